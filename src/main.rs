//! mcp-exchange - Exchange Online command line client
//!
//! Signs in with the device code flow, caches the token on disk and runs
//! mail and calendar operations against Microsoft Graph. Results are printed
//! as JSON on stdout; logs and sign-in prompts go to stderr.

#![deny(clippy::all)]

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use mcp_exchange::auth::CredentialManager;
use mcp_exchange::config::Config;
use mcp_exchange::error::{ApiError, AppError};
use mcp_exchange::graph::{
    Dispatcher, DraftRequest, EventQuery, ExchangeClient, FreeBusyQuery, MessageQuery,
};

#[derive(Parser)]
#[command(name = "mcp-exchange")]
#[command(author, version, about = "Exchange Online mail and calendar access via Microsoft Graph", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign in (device code) unless a usable cached token exists
    Login,

    /// Forget the cached token
    Logout,

    /// Show the credential state without contacting Azure AD
    Status,

    /// Show the signed-in user's profile
    Whoami,

    /// List mail folders
    Folders {
        /// Only show the folder with this display name
        #[arg(long)]
        name: Option<String>,
    },

    /// List messages, newest first
    Messages {
        /// Folder id or well-known name (inbox, archive, sentitems, ...)
        #[arg(long)]
        folder: Option<String>,

        /// Sender address
        #[arg(long)]
        from: Option<String>,

        /// Text contained in the subject
        #[arg(long)]
        subject: Option<String>,

        /// Received on or after (RFC 3339)
        #[arg(long)]
        since: Option<DateTime<Utc>>,

        /// Received on or before (RFC 3339)
        #[arg(long)]
        until: Option<DateTime<Utc>>,

        /// Only unread messages
        #[arg(long)]
        unread: bool,

        /// Only messages with attachments
        #[arg(long)]
        attachments: bool,

        #[arg(short, long, default_value = "25")]
        limit: u32,

        #[arg(long, default_value = "0")]
        skip: u32,
    },

    /// Show one message
    Message { id: String },

    /// Move a message to the Archive folder
    Archive { id: String },

    /// Delete a message
    Delete { id: String },

    /// Create a draft message
    Draft {
        #[arg(long)]
        subject: Option<String>,

        #[arg(long)]
        body: Option<String>,

        /// Treat the body as HTML
        #[arg(long)]
        html: bool,

        /// Recipient address (repeatable)
        #[arg(long)]
        to: Vec<String>,

        /// CC address (repeatable)
        #[arg(long)]
        cc: Vec<String>,

        /// low, normal or high
        #[arg(long, default_value = "normal")]
        importance: String,
    },

    /// List calendars
    Calendars,

    /// List events ordered by start time
    Events {
        /// Calendar id; the default calendar when omitted
        #[arg(long)]
        calendar: Option<String>,

        /// Start on or after (YYYY-MM-DDTHH:MM:SS)
        #[arg(long)]
        start: Option<NaiveDateTime>,

        /// End on or before (YYYY-MM-DDTHH:MM:SS)
        #[arg(long)]
        end: Option<NaiveDateTime>,

        #[arg(short, long, default_value = "25")]
        limit: u32,

        #[arg(long, default_value = "0")]
        skip: u32,
    },

    /// Show one event
    Event { id: String },

    /// Free/busy for up to 20 addresses
    FreeBusy {
        /// Addresses to look up (repeatable)
        #[arg(long = "email", required = true)]
        emails: Vec<String>,

        /// Window start (YYYY-MM-DDTHH:MM:SS)
        #[arg(long)]
        start: NaiveDateTime,

        /// Window end (YYYY-MM-DDTHH:MM:SS)
        #[arg(long)]
        end: NaiveDateTime,

        /// IANA time zone of start/end; the configured zone when omitted
        #[arg(long)]
        timezone: Option<String>,

        /// Availability slot length in minutes
        #[arg(long, default_value = "30")]
        interval: u32,
    },
}

#[tokio::main]
async fn main() {
    // .env is optional
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            eprintln!("Warning: Failed to load .env file: {}", e);
        }
    }

    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = match Config::load() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {:#}", e);
            eprintln!("\nPlease set the following environment variables:");
            eprintln!("  EXCHANGE_CLIENT_ID=<your-azure-ad-client-id>");
            eprintln!("  EXCHANGE_TENANT_ID=<your-tenant-id> (optional, defaults to common)");
            std::process::exit(2);
        }
    };

    info!("Starting {} v{}", config.app.name, env!("CARGO_PKG_VERSION"));

    let app = match App::new(&config) {
        Ok(app) => app,
        Err(e) => {
            error!("Startup failed: {:#}", e);
            eprintln!("Error: {:#}", e);
            std::process::exit(1);
        }
    };

    match app.run(cli.command).await {
        Ok(output) => println!("{}", output),
        Err(e) => {
            error!("{}", e);
            eprintln!("Error: {}", e.user_message());
            if e.requires_sign_out() {
                eprintln!("Run `mcp-exchange logout` and sign in again.");
            }
            std::process::exit(1);
        }
    }
}

/// Logs go to stderr; `RUST_LOG` wins over the configured level.
fn init_logging(verbose: bool) {
    let fallback = if verbose {
        "mcp_exchange=debug".to_string()
    } else {
        Config::embedded()
            .map(|c| c.logging.level)
            .unwrap_or_else(|_| "info".to_string())
    };

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback)))
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .init();
}

struct App {
    credentials: Arc<CredentialManager>,
    client: ExchangeClient,
}

impl App {
    fn new(config: &Config) -> Result<Self> {
        let credentials = Arc::new(
            CredentialManager::from_config(config).context("Failed to create credential manager")?,
        );
        let dispatcher = Arc::new(
            Dispatcher::new(config, Arc::clone(&credentials))
                .context("Failed to create Graph dispatcher")?,
        );

        Ok(Self {
            credentials,
            client: ExchangeClient::new(dispatcher, config.api.timezone.clone()),
        })
    }

    async fn run(&self, command: Commands) -> Result<String, AppError> {
        let value = match command {
            Commands::Login => {
                self.credentials.get_token(&[]).await?;
                json!({
                    "status": "signed_in",
                    "account": self.credentials.account().await,
                })
            }
            Commands::Logout => {
                self.credentials.sign_out().await?;
                json!({ "status": "signed_out" })
            }
            Commands::Status => json!({
                "state": format!("{:?}", self.credentials.state().await).to_lowercase(),
                "account": self.credentials.account().await,
            }),
            Commands::Whoami => {
                let profile = self.client.get_user_profile().await?;
                json!({
                    "id": profile.id,
                    "name": profile.name(),
                    "email": profile.address(),
                    "userPrincipalName": profile.user_principal_name,
                })
            }
            Commands::Folders { name: Some(name) } => {
                match self.client.get_folder_by_name(&name).await? {
                    Some(folder) => to_json(&folder)?,
                    None => {
                        return Err(ApiError::NotFound(format!("No folder named '{}'", name)).into())
                    }
                }
            }
            Commands::Folders { name: None } => to_json(&self.client.list_mail_folders().await?)?,
            Commands::Messages {
                folder,
                from,
                subject,
                since,
                until,
                unread,
                attachments,
                limit,
                skip,
            } => {
                let query = MessageQuery {
                    folder_id: folder,
                    sender: from,
                    subject,
                    from_date: since,
                    to_date: until,
                    is_read: unread.then_some(false),
                    has_attachments: attachments.then_some(true),
                    limit,
                    skip,
                };
                to_json(&self.client.list_messages(&query).await?)?
            }
            Commands::Message { id } => to_json(&self.client.get_message(&id).await?)?,
            Commands::Archive { id } => to_json(&self.client.archive_message(&id).await?)?,
            Commands::Delete { id } => {
                self.client.delete_message(&id).await?;
                json!({ "status": "deleted", "id": id })
            }
            Commands::Draft {
                subject,
                body,
                html,
                to,
                cc,
                importance,
            } => {
                let draft = DraftRequest {
                    subject,
                    body,
                    body_type: if html { "html" } else { "text" }.to_string(),
                    to,
                    cc,
                    importance,
                };
                to_json(&self.client.create_draft(&draft).await?)?
            }
            Commands::Calendars => to_json(&self.client.list_calendars().await?)?,
            Commands::Events {
                calendar,
                start,
                end,
                limit,
                skip,
            } => {
                let query = EventQuery {
                    calendar_id: calendar,
                    start,
                    end,
                    limit,
                    skip,
                };
                to_json(&self.client.list_events(&query).await?)?
            }
            Commands::Event { id } => to_json(&self.client.get_event(&id).await?)?,
            Commands::FreeBusy {
                emails,
                start,
                end,
                timezone,
                interval,
            } => {
                let query = FreeBusyQuery {
                    timezone,
                    interval_minutes: interval,
                    ..FreeBusyQuery::new(emails, start, end)
                };
                let mut schedules = self.client.get_free_busy(&query).await?;
                schedules.iter_mut().for_each(|s| s.mask_private());
                to_json(&schedules)?
            }
        };

        Ok(serde_json::to_string_pretty(&value)?)
    }
}

fn to_json<T: Serialize>(value: &T) -> Result<Value, AppError> {
    Ok(serde_json::to_value(value)?)
}

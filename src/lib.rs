//! Exchange Online access for the MCP server: device code sign-in, a
//! persistent token cache and an authenticated Microsoft Graph client.

#![deny(clippy::all)]

pub mod auth;
pub mod config;
pub mod error;
pub mod graph;
pub mod token_cache;

//! Exchange Online operations on top of the authenticated dispatcher.

use std::sync::Arc;

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde_json::{json, Map, Value};
use tracing::debug;

use super::dispatcher::{Dispatcher, OutboundRequest};
use super::models::{
    Calendar, Collection, Event, MailFolder, Message, Recipient, ScheduleInformation, UserProfile,
};
use crate::error::ApiError;

/// Fields requested for messages.
const MESSAGE_FIELDS: &str = "id,subject,bodyPreview,body,sender,from,toRecipients,ccRecipients,\
receivedDateTime,sentDateTime,hasAttachments,isRead,isDraft,importance,parentFolderId,webLink";

const FOLDER_FIELDS: &str =
    "id,displayName,parentFolderId,childFolderCount,unreadItemCount,totalItemCount";

const CALENDAR_FIELDS: &str =
    "id,name,color,canShare,canViewPrivateItems,canEdit,owner,isDefaultCalendar";

const EVENT_FIELDS: &str = "id,subject,body,bodyPreview,start,end,location,locations,attendees,\
organizer,isAllDay,isCancelled,isOrganizer,seriesMasterId,showAs,type,importance,sensitivity,\
categories,webLink,onlineMeetingUrl";

/// Delegated permissions per operation family.
const SCOPE_USER: &str = "User.Read";
const SCOPE_MAIL: &str = "Mail.ReadWrite";
const SCOPE_CALENDAR: &str = "Calendars.Read";
const SCOPE_SCHEDULE: &str = "Calendars.Read.Shared";

/// getSchedule accepts at most this many addresses per call.
const MAX_SCHEDULES: usize = 20;

/// Well-known folder name for the archive.
const ARCHIVE_FOLDER: &str = "archive";

/// Filters for listing messages.
#[derive(Debug, Clone)]
pub struct MessageQuery {
    /// Folder id or well-known name; the inbox when unset.
    pub folder_id: Option<String>,
    pub sender: Option<String>,
    /// Substring of the subject.
    pub subject: Option<String>,
    pub from_date: Option<DateTime<Utc>>,
    pub to_date: Option<DateTime<Utc>>,
    pub is_read: Option<bool>,
    pub has_attachments: Option<bool>,
    pub limit: u32,
    pub skip: u32,
}

impl Default for MessageQuery {
    fn default() -> Self {
        Self {
            folder_id: None,
            sender: None,
            subject: None,
            from_date: None,
            to_date: None,
            is_read: None,
            has_attachments: None,
            limit: 25,
            skip: 0,
        }
    }
}

impl MessageQuery {
    /// OData `$filter` expression, if any filter is set.
    pub fn filter(&self) -> Option<String> {
        let mut filters = Vec::new();

        if let Some(sender) = &self.sender {
            filters.push(format!(
                "from/emailAddress/address eq '{}'",
                odata_string(sender)
            ));
        }
        if let Some(subject) = &self.subject {
            filters.push(format!("contains(subject, '{}')", odata_string(subject)));
        }
        if let Some(from) = self.from_date {
            filters.push(format!("receivedDateTime ge {}", odata_datetime(from)));
        }
        if let Some(to) = self.to_date {
            filters.push(format!("receivedDateTime le {}", odata_datetime(to)));
        }
        if let Some(is_read) = self.is_read {
            filters.push(format!("isRead eq {}", is_read));
        }
        if let Some(has_attachments) = self.has_attachments {
            filters.push(format!("hasAttachments eq {}", has_attachments));
        }

        (!filters.is_empty()).then(|| filters.join(" and "))
    }
}

/// Filters for listing calendar events.
#[derive(Debug, Clone)]
pub struct EventQuery {
    /// Calendar id; the default calendar when unset.
    pub calendar_id: Option<String>,
    pub start: Option<NaiveDateTime>,
    pub end: Option<NaiveDateTime>,
    pub limit: u32,
    pub skip: u32,
}

impl Default for EventQuery {
    fn default() -> Self {
        Self {
            calendar_id: None,
            start: None,
            end: None,
            limit: 25,
            skip: 0,
        }
    }
}

impl EventQuery {
    pub fn filter(&self) -> Option<String> {
        let mut filters = Vec::new();
        if let Some(start) = self.start {
            filters.push(format!("start/dateTime ge '{}'", graph_datetime(start)));
        }
        if let Some(end) = self.end {
            filters.push(format!("end/dateTime le '{}'", graph_datetime(end)));
        }
        (!filters.is_empty()).then(|| filters.join(" and "))
    }
}

/// Free/busy lookup for up to 20 addresses.
#[derive(Debug, Clone)]
pub struct FreeBusyQuery {
    pub emails: Vec<String>,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    /// IANA zone for `start`/`end`; the configured zone when unset.
    pub timezone: Option<String>,
    pub interval_minutes: u32,
}

impl FreeBusyQuery {
    pub fn new(emails: Vec<String>, start: NaiveDateTime, end: NaiveDateTime) -> Self {
        Self {
            emails,
            start,
            end,
            timezone: None,
            interval_minutes: 30,
        }
    }
}

/// A new draft message.
#[derive(Debug, Clone)]
pub struct DraftRequest {
    pub subject: Option<String>,
    pub body: Option<String>,
    /// "text" or "html".
    pub body_type: String,
    pub to: Vec<String>,
    pub cc: Vec<String>,
    /// "low", "normal" or "high".
    pub importance: String,
}

impl Default for DraftRequest {
    fn default() -> Self {
        Self {
            subject: None,
            body: None,
            body_type: "text".to_string(),
            to: Vec::new(),
            cc: Vec::new(),
            importance: "normal".to_string(),
        }
    }
}

impl DraftRequest {
    /// Graph message payload; unset fields are omitted.
    pub fn to_payload(&self) -> Value {
        let mut payload = Map::new();

        if let Some(subject) = &self.subject {
            payload.insert("subject".into(), json!(subject));
        }
        if let Some(body) = &self.body {
            payload.insert(
                "body".into(),
                json!({ "contentType": self.body_type, "content": body }),
            );
        }
        if !self.to.is_empty() {
            payload.insert("toRecipients".into(), recipients(&self.to));
        }
        if !self.cc.is_empty() {
            payload.insert("ccRecipients".into(), recipients(&self.cc));
        }
        if self.importance != "normal" {
            payload.insert("importance".into(), json!(self.importance));
        }

        Value::Object(payload)
    }
}

/// Mail, calendar and profile operations for the signed-in user.
pub struct ExchangeClient {
    dispatcher: Arc<Dispatcher>,
    timezone: String,
}

impl ExchangeClient {
    pub fn new(dispatcher: Arc<Dispatcher>, timezone: impl Into<String>) -> Self {
        Self {
            dispatcher,
            timezone: timezone.into(),
        }
    }

    pub async fn get_user_profile(&self) -> Result<UserProfile, ApiError> {
        self.dispatcher
            .execute(&OutboundRequest::get("/me").scopes(&[SCOPE_USER]))
            .await?
            .json()
    }

    pub async fn list_mail_folders(&self) -> Result<Vec<MailFolder>, ApiError> {
        debug!("Listing mail folders");
        let request = OutboundRequest::get("/me/mailFolders")
            .query("$select", FOLDER_FIELDS)
            .query("$top", 100)
            .scopes(&[SCOPE_MAIL]);
        self.list(&request).await
    }

    /// Find a folder by display name, ignoring case.
    pub async fn get_folder_by_name(&self, name: &str) -> Result<Option<MailFolder>, ApiError> {
        let name = name.to_lowercase();
        Ok(self
            .list_mail_folders()
            .await?
            .into_iter()
            .find(|f| f.display_name.to_lowercase() == name))
    }

    /// List messages, newest first.
    pub async fn list_messages(&self, query: &MessageQuery) -> Result<Vec<Message>, ApiError> {
        let folder = query.folder_id.as_deref().unwrap_or("inbox");
        let mut request = OutboundRequest::get(format!("/me/mailFolders/{}/messages", segment(folder)))
            .query("$select", MESSAGE_FIELDS)
            .query("$top", query.limit)
            .query("$skip", query.skip)
            .query("$orderby", "receivedDateTime desc")
            .scopes(&[SCOPE_MAIL]);

        if let Some(filter) = query.filter() {
            request = request.query("$filter", filter);
        }

        debug!("Listing messages in {}", folder);
        self.list(&request).await
    }

    pub async fn get_message(&self, message_id: &str) -> Result<Message, ApiError> {
        let request = OutboundRequest::get(format!("/me/messages/{}", segment(message_id)))
            .query("$select", MESSAGE_FIELDS)
            .scopes(&[SCOPE_MAIL]);
        self.dispatcher.execute(&request).await?.json()
    }

    pub async fn move_message(
        &self,
        message_id: &str,
        destination_folder_id: &str,
    ) -> Result<Message, ApiError> {
        debug!("Moving message {} to {}", message_id, destination_folder_id);
        let request = OutboundRequest::post(format!("/me/messages/{}/move", segment(message_id)))
            .json(json!({ "destinationId": destination_folder_id }))
            .scopes(&[SCOPE_MAIL]);
        self.dispatcher.execute(&request).await?.json()
    }

    /// Move a message to the well-known Archive folder.
    pub async fn archive_message(&self, message_id: &str) -> Result<Message, ApiError> {
        self.move_message(message_id, ARCHIVE_FOLDER).await
    }

    /// Delete a message (it lands in Deleted Items).
    pub async fn delete_message(&self, message_id: &str) -> Result<(), ApiError> {
        debug!("Deleting message {}", message_id);
        let request = OutboundRequest::delete(format!("/me/messages/{}", segment(message_id)))
            .scopes(&[SCOPE_MAIL]);
        self.dispatcher.execute(&request).await?;
        Ok(())
    }

    pub async fn create_draft(&self, draft: &DraftRequest) -> Result<Message, ApiError> {
        let request = OutboundRequest::post("/me/messages")
            .json(draft.to_payload())
            .scopes(&[SCOPE_MAIL]);
        self.dispatcher.execute(&request).await?.json()
    }

    pub async fn list_calendars(&self) -> Result<Vec<Calendar>, ApiError> {
        let request = OutboundRequest::get("/me/calendars")
            .query("$select", CALENDAR_FIELDS)
            .scopes(&[SCOPE_CALENDAR]);
        self.list(&request).await
    }

    /// List events ordered by start time.
    pub async fn list_events(&self, query: &EventQuery) -> Result<Vec<Event>, ApiError> {
        let path = match &query.calendar_id {
            Some(id) => format!("/me/calendars/{}/events", segment(id)),
            None => "/me/calendar/events".to_string(),
        };

        let mut request = OutboundRequest::get(path)
            .query("$select", EVENT_FIELDS)
            .query("$top", query.limit)
            .query("$skip", query.skip)
            .query("$orderby", "start/dateTime")
            .scopes(&[SCOPE_CALENDAR]);

        if let Some(filter) = query.filter() {
            request = request.query("$filter", filter);
        }

        self.list(&request).await
    }

    pub async fn get_event(&self, event_id: &str) -> Result<Event, ApiError> {
        let request = OutboundRequest::get(format!("/me/events/{}", segment(event_id)))
            .query("$select", EVENT_FIELDS)
            .scopes(&[SCOPE_CALENDAR]);
        self.dispatcher.execute(&request).await?.json()
    }

    /// Free/busy schedules for each address in the query.
    pub async fn get_free_busy(
        &self,
        query: &FreeBusyQuery,
    ) -> Result<Vec<ScheduleInformation>, ApiError> {
        if query.emails.is_empty() {
            return Err(ApiError::InvalidRequest(
                "At least one email address is required for getSchedule".into(),
            ));
        }
        if query.emails.len() > MAX_SCHEDULES {
            return Err(ApiError::InvalidRequest(format!(
                "Maximum {} email addresses allowed for getSchedule",
                MAX_SCHEDULES
            )));
        }
        if query.end <= query.start {
            return Err(ApiError::InvalidRequest(
                "End time must be after start time".into(),
            ));
        }

        let timezone = query.timezone.as_deref().unwrap_or(&self.timezone);
        let payload = json!({
            "schedules": query.emails,
            "startTime": { "dateTime": graph_datetime(query.start), "timeZone": timezone },
            "endTime": { "dateTime": graph_datetime(query.end), "timeZone": timezone },
            "availabilityViewInterval": query.interval_minutes,
        });

        debug!("Getting free/busy for {} address(es)", query.emails.len());
        let request = OutboundRequest::post("/me/calendar/getSchedule")
            .json(payload)
            .scopes(&[SCOPE_SCHEDULE]);
        self.list(&request).await
    }

    async fn list<T: serde::de::DeserializeOwned>(
        &self,
        request: &OutboundRequest,
    ) -> Result<Vec<T>, ApiError> {
        let collection: Collection<T> = self.dispatcher.execute(request).await?.json()?;
        Ok(collection.value)
    }
}

fn recipients(addresses: &[String]) -> Value {
    json!(addresses
        .iter()
        .map(|a| Recipient::address(a.as_str()))
        .collect::<Vec<_>>())
}

/// Percent-encode an identifier for use as one path segment.
fn segment(id: &str) -> String {
    urlencoding::encode(id).into_owned()
}

/// Quote-escape a value for an OData string literal.
fn odata_string(value: &str) -> String {
    value.replace('\'', "''")
}

fn odata_datetime(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn graph_datetime(value: NaiveDateTime) -> String {
    value.format("%Y-%m-%dT%H:%M:%S").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::testing::DispatcherHarness;
    use chrono::{NaiveDate, TimeZone};
    use wiremock::matchers::{body_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn naive(h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 1, 5)
            .unwrap()
            .and_hms_opt(h, 0, 0)
            .unwrap()
    }

    fn client(harness: &DispatcherHarness) -> ExchangeClient {
        ExchangeClient::new(harness.dispatcher.clone(), "America/Chicago")
    }

    #[test]
    fn test_message_filter() {
        let query = MessageQuery {
            sender: Some("boss@contoso.com".into()),
            subject: Some("Q1 O'Brien".into()),
            from_date: Some(Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()),
            is_read: Some(false),
            ..Default::default()
        };

        assert_eq!(
            query.filter().unwrap(),
            "from/emailAddress/address eq 'boss@contoso.com' and \
             contains(subject, 'Q1 O''Brien') and \
             receivedDateTime ge 2026-01-01T00:00:00Z and isRead eq false"
        );
        assert!(MessageQuery::default().filter().is_none());
    }

    #[test]
    fn test_event_filter() {
        let query = EventQuery {
            start: Some(naive(8)),
            end: Some(naive(17)),
            ..Default::default()
        };
        assert_eq!(
            query.filter().unwrap(),
            "start/dateTime ge '2026-01-05T08:00:00' and end/dateTime le '2026-01-05T17:00:00'"
        );
    }

    #[test]
    fn test_draft_payload_omits_unset_fields() {
        let draft = DraftRequest {
            subject: Some("Hi".into()),
            to: vec!["a@contoso.com".into()],
            ..Default::default()
        };

        assert_eq!(
            draft.to_payload(),
            json!({
                "subject": "Hi",
                "toRecipients": [{ "emailAddress": { "address": "a@contoso.com" } }],
            })
        );

        let draft = DraftRequest {
            body: Some("<p>x</p>".into()),
            body_type: "html".into(),
            importance: "high".into(),
            ..Default::default()
        };
        assert_eq!(
            draft.to_payload(),
            json!({
                "body": { "contentType": "html", "content": "<p>x</p>" },
                "importance": "high",
            })
        );
    }

    #[test]
    fn test_segment_encoding() {
        assert_eq!(segment("AAMk/abc=="), "AAMk%2Fabc%3D%3D");
    }

    #[tokio::test]
    async fn test_list_messages_sends_filter() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/me/mailFolders/inbox/messages"))
            .and(query_param("$filter", "isRead eq false"))
            .and(query_param("$top", "10"))
            .and(query_param("$orderby", "receivedDateTime desc"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "value": [{ "id": "m1", "subject": "Hello", "isRead": false }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let h = DispatcherHarness::new(&server);
        let query = MessageQuery {
            is_read: Some(false),
            limit: 10,
            ..Default::default()
        };
        let messages = client(&h).list_messages(&query).await.unwrap();

        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].subject.as_deref(), Some("Hello"));
    }

    #[tokio::test]
    async fn test_get_folder_by_name_ignores_case() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/me/mailFolders"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "value": [
                    { "id": "f1", "displayName": "Inbox" },
                    { "id": "f2", "displayName": "Archive", "unreadItemCount": 3 },
                ]
            })))
            .mount(&server)
            .await;

        let h = DispatcherHarness::new(&server);
        let folder = client(&h).get_folder_by_name("archive").await.unwrap().unwrap();
        assert_eq!(folder.id, "f2");
        assert_eq!(folder.unread_item_count, 3);

        assert!(client(&h).get_folder_by_name("Spam").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_archive_moves_to_archive_folder() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/me/messages/m1/move"))
            .and(body_json(json!({ "destinationId": "archive" })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "id": "m1-archived", "parentFolderId": "archive-id"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let h = DispatcherHarness::new(&server);
        let moved = client(&h).archive_message("m1").await.unwrap();
        assert_eq!(moved.id, "m1-archived");
    }

    #[tokio::test]
    async fn test_delete_message_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/me/messages/missing"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({
                "error": { "code": "ErrorItemNotFound", "message": "Not found" }
            })))
            .mount(&server)
            .await;

        let h = DispatcherHarness::new(&server);
        let err = client(&h).delete_message("missing").await.unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_free_busy_payload_uses_configured_timezone() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/me/calendar/getSchedule"))
            .and(body_json(json!({
                "schedules": ["a@contoso.com"],
                "startTime": { "dateTime": "2026-01-05T08:00:00", "timeZone": "America/Chicago" },
                "endTime": { "dateTime": "2026-01-05T17:00:00", "timeZone": "America/Chicago" },
                "availabilityViewInterval": 30,
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "value": [{ "scheduleId": "a@contoso.com", "availabilityView": "0220", "scheduleItems": [] }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let h = DispatcherHarness::new(&server);
        let query = FreeBusyQuery::new(vec!["a@contoso.com".into()], naive(8), naive(17));
        let schedules = client(&h).get_free_busy(&query).await.unwrap();

        assert_eq!(schedules.len(), 1);
        assert_eq!(schedules[0].availability_view, "0220");
    }

    #[tokio::test]
    async fn test_free_busy_validation_happens_before_dispatch() {
        let server = MockServer::start().await;
        let h = DispatcherHarness::new(&server);

        let emails = (0..21).map(|i| format!("user{}@contoso.com", i)).collect();
        let err = client(&h)
            .get_free_busy(&FreeBusyQuery::new(emails, naive(8), naive(17)))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::InvalidRequest(_)));

        let err = client(&h)
            .get_free_busy(&FreeBusyQuery::new(vec!["a@contoso.com".into()], naive(17), naive(8)))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::InvalidRequest(_)));

        assert!(server.received_requests().await.unwrap().is_empty());
    }
}

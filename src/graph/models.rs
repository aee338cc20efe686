//! Microsoft Graph data models for Exchange Online mail and calendar.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// `{"value": [...]}` collection envelope.
#[derive(Debug, Deserialize)]
pub struct Collection<T> {
    #[serde(default = "Vec::new")]
    pub value: Vec<T>,
}

/// User profile from Microsoft Graph /me endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    /// Unique identifier for the user.
    pub id: String,

    /// User's display name.
    pub display_name: Option<String>,

    /// User's email address.
    pub mail: Option<String>,

    /// User Principal Name (typically email-like format).
    pub user_principal_name: Option<String>,
}

impl UserProfile {
    /// Display name, falling back to the UPN.
    pub fn name(&self) -> Option<&str> {
        self.display_name
            .as_deref()
            .or(self.user_principal_name.as_deref())
    }

    /// Primary SMTP address, falling back to the UPN.
    pub fn address(&self) -> Option<&str> {
        self.mail.as_deref().or(self.user_principal_name.as_deref())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailAddress {
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recipient {
    pub email_address: EmailAddress,
}

impl Recipient {
    pub fn address(address: impl Into<String>) -> Self {
        Self {
            email_address: EmailAddress {
                address: address.into(),
                name: None,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemBody {
    /// "text" or "html".
    pub content_type: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MailFolder {
    pub id: String,
    pub display_name: String,
    pub parent_folder_id: Option<String>,
    #[serde(default)]
    pub child_folder_count: u32,
    #[serde(default)]
    pub unread_item_count: u32,
    #[serde(default)]
    pub total_item_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub subject: Option<String>,
    pub body: Option<ItemBody>,
    pub body_preview: Option<String>,
    pub sender: Option<Recipient>,
    pub from: Option<Recipient>,
    #[serde(default)]
    pub to_recipients: Vec<Recipient>,
    #[serde(default)]
    pub cc_recipients: Vec<Recipient>,
    pub received_date_time: Option<DateTime<Utc>>,
    pub sent_date_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub has_attachments: bool,
    #[serde(default)]
    pub is_read: bool,
    #[serde(default)]
    pub is_draft: bool,
    #[serde(default = "normal")]
    pub importance: String,
    pub parent_folder_id: Option<String>,
    pub web_link: Option<String>,
}

fn normal() -> String {
    "normal".to_string()
}

/// Graph date/time pair; `date_time` carries no offset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DateTimeTimeZone {
    pub date_time: String,
    pub time_zone: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    #[serde(default)]
    pub display_name: String,
    pub location_type: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseStatus {
    pub response: Option<String>,
    pub time: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attendee {
    /// "required", "optional" or "resource".
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub status: Option<ResponseStatus>,
    pub email_address: EmailAddress,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Calendar {
    pub id: String,
    pub name: String,
    pub color: Option<String>,
    #[serde(default)]
    pub can_share: bool,
    #[serde(default)]
    pub can_view_private_items: bool,
    #[serde(default)]
    pub can_edit: bool,
    pub owner: Option<EmailAddress>,
    #[serde(default)]
    pub is_default_calendar: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: String,
    pub subject: Option<String>,
    pub body: Option<ItemBody>,
    pub body_preview: Option<String>,
    pub start: Option<DateTimeTimeZone>,
    pub end: Option<DateTimeTimeZone>,
    pub location: Option<Location>,
    #[serde(default)]
    pub locations: Vec<Location>,
    #[serde(default)]
    pub attendees: Vec<Attendee>,
    pub organizer: Option<Recipient>,
    #[serde(default)]
    pub is_all_day: bool,
    #[serde(default)]
    pub is_cancelled: bool,
    #[serde(default)]
    pub is_organizer: bool,
    pub series_master_id: Option<String>,
    /// "free", "tentative", "busy", "oof", ...
    pub show_as: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    #[serde(default = "normal")]
    pub importance: String,
    #[serde(default = "normal")]
    pub sensitivity: String,
    #[serde(default)]
    pub categories: Vec<String>,
    pub web_link: Option<String>,
    pub online_meeting_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleItem {
    /// "free", "tentative", "busy", "oof", "workingElsewhere" or "unknown".
    pub status: String,
    pub start: DateTimeTimeZone,
    pub end: DateTimeTimeZone,
    pub subject: Option<String>,
    pub location: Option<String>,
    #[serde(default)]
    pub is_private: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleInformation {
    /// The email address the schedule belongs to.
    pub schedule_id: String,
    #[serde(default)]
    pub availability_view: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub schedule_items: Vec<ScheduleItem>,
    pub working_hours: Option<serde_json::Value>,
    pub error: Option<serde_json::Value>,
}

impl ScheduleInformation {
    /// Hide subject and location of items marked private.
    pub fn mask_private(&mut self) {
        for item in self.schedule_items.iter_mut().filter(|i| i.is_private) {
            item.subject = Some(PRIVATE_SUBJECT.to_string());
            item.location = None;
        }
    }
}

const PRIVATE_SUBJECT: &str = "[Private]";

fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_profile_fallback() {
        let profile = UserProfile {
            id: "123".into(),
            display_name: None,
            mail: None,
            user_principal_name: Some("user@tenant.com".into()),
        };

        assert_eq!(profile.name(), Some("user@tenant.com"));
        assert_eq!(profile.address(), Some("user@tenant.com"));

        let bare = UserProfile {
            user_principal_name: None,
            ..profile
        };
        assert_eq!(bare.name(), None);
    }

    #[test]
    fn test_message_defaults() {
        let message: Message = serde_json::from_value(serde_json::json!({
            "id": "m1",
            "subject": "Hello",
            "from": { "emailAddress": { "address": "a@contoso.com", "name": "A" } },
            "receivedDateTime": "2026-01-05T09:00:00Z",
        }))
        .unwrap();

        assert_eq!(message.importance, "normal");
        assert!(!message.is_read);
        assert!(message.to_recipients.is_empty());
        assert_eq!(message.from.unwrap().email_address.address, "a@contoso.com");
    }

    #[test]
    fn test_schedule_items_null() {
        let info: ScheduleInformation = serde_json::from_value(serde_json::json!({
            "scheduleId": "a@contoso.com",
            "availabilityView": "0020",
            "scheduleItems": null,
        }))
        .unwrap();

        assert!(info.schedule_items.is_empty());
    }

    #[test]
    fn test_mask_private_items() {
        let mut info: ScheduleInformation = serde_json::from_value(serde_json::json!({
            "scheduleId": "a@contoso.com",
            "availabilityView": "22",
            "scheduleItems": [
                {
                    "status": "busy",
                    "start": { "dateTime": "2026-01-05T09:00:00", "timeZone": "UTC" },
                    "end": { "dateTime": "2026-01-05T10:00:00", "timeZone": "UTC" },
                    "subject": "Medical appointment",
                    "location": "Clinic",
                    "isPrivate": true,
                },
                {
                    "status": "busy",
                    "start": { "dateTime": "2026-01-05T10:00:00", "timeZone": "UTC" },
                    "end": { "dateTime": "2026-01-05T11:00:00", "timeZone": "UTC" },
                    "subject": "Standup",
                    "location": "Room 1",
                },
            ],
        }))
        .unwrap();

        info.mask_private();

        assert_eq!(info.schedule_items[0].subject.as_deref(), Some("[Private]"));
        assert_eq!(info.schedule_items[0].location, None);
        assert_eq!(info.schedule_items[1].subject.as_deref(), Some("Standup"));
        assert_eq!(info.schedule_items[1].location.as_deref(), Some("Room 1"));
    }
}

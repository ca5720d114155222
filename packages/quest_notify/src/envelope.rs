//! Message envelope exchanged over the notification socket.
//!
//! Every inbound text frame is `{"type": ..., "data": ...}`. Only the
//! `notification` type is interpreted; its `data` is forwarded untouched.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::EnvelopeError;

/// Envelope type carrying a push notification.
pub const NOTIFICATION_TYPE: &str = "notification";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: Value,
}

impl Envelope {
    pub fn notification(data: Value) -> Self {
        Self {
            kind: NOTIFICATION_TYPE.to_string(),
            data,
        }
    }
}

/// What the channel should do with a decoded frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Forward `data` verbatim to `on_notification`.
    Notification(Value),
    /// Any other envelope type; ignored.
    Ignored(String),
}

/// Decode one inbound text frame.
pub fn decode(text: &str) -> Result<Inbound, EnvelopeError> {
    let value: Value = serde_json::from_str(text)?;
    let Value::Object(mut fields) = value else {
        return Err(EnvelopeError::MissingType);
    };
    let kind = match fields.remove("type") {
        Some(Value::String(kind)) => kind,
        _ => return Err(EnvelopeError::MissingType),
    };

    if kind == NOTIFICATION_TYPE {
        Ok(Inbound::Notification(
            fields.remove("data").unwrap_or(Value::Null),
        ))
    } else {
        Ok(Inbound::Ignored(kind))
    }
}

// =============================================================================
// Typed view of notification payloads
// =============================================================================
//
// The channel never validates payloads; this is a convenience for consumers
// that want to render them. Unknown kinds and missing fields are tolerated.

/// Notification kinds sent to learners and administrators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    /// A new quest was published (learners).
    NewQuest,
    /// A submission was accepted (learners and admins).
    QuestValidated,
    /// A submission was rejected (learners and admins).
    QuestRejected,
    /// A submission awaits review (admins).
    PendingQuest,
    #[serde(untagged)]
    Other(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub notif_type: NotificationKind,
    #[serde(default)]
    pub quest_id: Option<i64>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Notification {
    /// Interpret an `on_notification` payload. Returns `None` when the
    /// payload has no recognisable `notif_type`.
    pub fn from_data(data: &Value) -> Option<Self> {
        serde_json::from_value(data.clone()).ok()
    }

    /// One-line human readable summary.
    pub fn summary(&self) -> String {
        let quest = self
            .quest_id
            .map(|id| format!("quest #{id}"))
            .unwrap_or_else(|| "a quest".to_string());
        let headline = match &self.notif_type {
            NotificationKind::NewQuest => format!("New quest available: {quest}"),
            NotificationKind::QuestValidated => format!("Submission validated for {quest}"),
            NotificationKind::QuestRejected => format!("Submission rejected for {quest}"),
            NotificationKind::PendingQuest => format!("Submission pending review for {quest}"),
            NotificationKind::Other(kind) => format!("{kind} ({quest})"),
        };
        match self.message.as_deref().or(self.title.as_deref()) {
            Some(text) => format!("{headline}: {text}"),
            None => headline,
        }
    }
}

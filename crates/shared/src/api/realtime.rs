//! Change notifications delivered by the external pub/sub feed.

use serde::{Deserialize, Serialize};

use crate::api::message::Message;

/// Kind of row change carried by a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeEventType {
    Insert,
    Update,
    Delete,
}

/// A `{ eventType, record }` tuple for a message row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeEvent {
    pub event_type: ChangeEventType,
    pub record: Message,
}

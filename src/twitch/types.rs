use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::irc_parser::IrcMessage;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamStatus {
    Offline,
    Live { uptime: Duration },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelRecord {
    pub name: String,
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatLogEntry {
    pub timestamp: DateTime<Utc>,
    pub channel: String,
    pub username: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
}

impl ChatLogEntry {
    pub fn from_message(msg: &IrcMessage) -> Self {
        let non_empty_tag = |key: &str| {
            msg.get_tag_value(key)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };
        Self {
            timestamp: msg.timestamp,
            channel: msg.channel_name(),
            username: msg.sender.clone(),
            message: msg.message.clone(),
            user_id: non_empty_tag("user-id"),
            display_name: non_empty_tag("display-name"),
            message_id: non_empty_tag("id"),
        }
    }
}

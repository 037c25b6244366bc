use super::error::ParseError;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

pub const CMD_CAP: &str = "CAP";
pub const CMD_JOIN: &str = "JOIN";
pub const CMD_NICK: &str = "NICK";
pub const CMD_NOTICE: &str = "NOTICE";
pub const CMD_PART: &str = "PART";
pub const CMD_PASS: &str = "PASS";
pub const CMD_PING: &str = "PING";
pub const CMD_PONG: &str = "PONG";
pub const CMD_PRIVMSG: &str = "PRIVMSG";
pub const CMD_RECONNECT: &str = "RECONNECT";
pub const RPL_WELCOME: &str = "001";

pub const IRC_ACK: &str = "ACK";
pub const IRC_NAK: &str = "NAK";

pub const SERVER_NAME: &str = "tmi.twitch.tv";
pub const TWITCH_CAPABILITIES: &str = "twitch.tv/tags twitch.tv/commands";

pub const AUTH_ERROR_LOGIN_FAILED: &str = "Login authentication failed";
pub const AUTH_ERROR_IMPROPERLY_FORMATTED: &str = "Improperly formatted auth";
pub const AUTH_ERROR_INVALID_NICK: &str = "Invalid NICK";

const CHANNEL_SIGIL: char = '#';

/// One inbound protocol line, decomposed.
#[derive(Debug, Clone, PartialEq)]
pub struct IrcMessage {
    pub tags: HashMap<String, String>,
    /// Nick taken from the prefix; empty when the line had no prefix.
    pub sender: String,
    pub command: String,
    /// First argument starting with `#`, or empty.
    pub channel: String,
    pub args: Vec<String>,
    /// Trailing payload after the first `" :"`.
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl IrcMessage {
    pub fn parse(line: &str) -> Result<Self, ParseError> {
        let mut remainder = line.trim_end_matches(['\r', '\n']);
        if remainder.is_empty() {
            return Err(ParseError::Empty);
        }

        let mut tags = HashMap::new();
        if let Some(tagged) = remainder.strip_prefix('@') {
            let Some(space_idx) = tagged.find(' ') else {
                return Err(ParseError::MissingDataAfterTags(line.to_string()));
            };
            tags = parse_tags(&tagged[..space_idx]);
            remainder = &tagged[space_idx + 1..];
        }

        let mut sender = String::new();
        if let Some(prefixed) = remainder.strip_prefix(':') {
            let Some(space_idx) = prefixed.find(' ') else {
                return Err(ParseError::MissingDataAfterPrefix(line.to_string()));
            };
            sender = parse_sender(&prefixed[..space_idx]).to_string();
            remainder = &prefixed[space_idx + 1..];
        }

        let (command_section, message) = match remainder.split_once(" :") {
            Some((command_section, trailing)) => (command_section, trailing),
            None => (remainder, ""),
        };

        let mut tokens = command_section.split_whitespace();
        let Some(command) = tokens.next() else {
            return Err(ParseError::MissingCommand(line.to_string()));
        };
        let args: Vec<String> = tokens.map(str::to_string).collect();
        let channel = args
            .iter()
            .find(|arg| arg.starts_with(CHANNEL_SIGIL))
            .cloned()
            .unwrap_or_default();

        Ok(IrcMessage {
            tags,
            sender,
            command: command.to_string(),
            channel,
            args,
            message: message.to_string(),
            timestamp: Utc::now(),
        })
    }

    pub fn get_tag_value(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }

    /// Channel name without the sigil, lower-cased.
    pub fn channel_name(&self) -> String {
        self.channel.trim_start_matches(CHANNEL_SIGIL).to_lowercase()
    }

    pub fn is_privmsg(&self) -> bool {
        self.command == CMD_PRIVMSG
    }

    pub fn is_auth_failure_notice(&self) -> bool {
        self.command == CMD_NOTICE
            && (self.message.contains(AUTH_ERROR_LOGIN_FAILED)
                || self.message.contains(AUTH_ERROR_IMPROPERLY_FORMATTED)
                || self.message.contains(AUTH_ERROR_INVALID_NICK))
    }
}

fn parse_tags(segment: &str) -> HashMap<String, String> {
    segment
        .split(';')
        .filter(|component| !component.is_empty())
        .map(|component| match component.split_once('=') {
            Some((key, value)) => (key.to_string(), value.to_string()),
            None => (component.to_string(), String::new()),
        })
        .collect()
}

fn parse_sender(prefix: &str) -> &str {
    if let Some(idx) = prefix.find('!') {
        return &prefix[..idx];
    }
    if let Some(idx) = prefix.find('@') {
        return &prefix[..idx];
    }
    prefix
}

fn with_sigil(channel: &str) -> String {
    format!("{}{}", CHANNEL_SIGIL, channel.trim_start_matches(CHANNEL_SIGIL))
}

pub fn format_chat(channel: &str, text: &str) -> String {
    format!("{} {} :{}", CMD_PRIVMSG, with_sigil(channel), text)
}

pub fn format_join(channel: &str) -> String {
    format!("{} {}", CMD_JOIN, with_sigil(channel))
}

pub fn format_part(channel: &str) -> String {
    format!("{} {}", CMD_PART, with_sigil(channel))
}

pub fn format_pass(token: &str) -> String {
    format!("{} {}", CMD_PASS, token)
}

pub fn format_nick(nick: &str) -> String {
    format!("{} {}", CMD_NICK, nick)
}

pub fn format_pong(server: &str) -> String {
    let server = if server.is_empty() { SERVER_NAME } else { server };
    format!("{} :{}", CMD_PONG, server)
}

pub fn format_capability_request() -> String {
    format!("{} REQ :{}", CMD_CAP, TWITCH_CAPABILITIES)
}

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("cannot parse empty message")]
    Empty,
    #[error("missing data after tags: {0}")]
    MissingDataAfterTags(String),
    #[error("missing data after prefix: {0}")]
    MissingDataAfterPrefix(String),
    #[error("missing IRC command: {0}")]
    MissingCommand(String),
    #[error("line is not valid UTF-8: {0}")]
    InvalidUtf8(String),
}

#[derive(Error, Debug)]
pub enum TwitchError {
    #[error("Cannot connect: missing login or OAuth token")]
    MissingCredentials,
    #[error("HTTP request failed: {0}")]
    Reqwest(#[from] reqwest::Error),
    #[error("JSON deserialization failed: {0}")]
    SerdeJson(#[from] serde_json::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Twitch IRC authentication/API error: {0}")]
    TwitchAuth(String),
    #[error("IRC message parsing error: {0}")]
    Parse(#[from] ParseError),
    #[error("IRC connection closed by server")]
    ConnectionClosed,
    #[error("Timed out: {0}")]
    Timeout(String),
    #[error("IRC connection is not established")]
    NotConnected,
    #[error("Outbound queue full, dropped line for #{0}")]
    OutboundQueueFull(String),
    #[error("Channel {0} has not been registered")]
    ChannelNotRegistered(String),
    #[error("Helix lookup failed: {0}")]
    Lookup(String),
}

pub type Result<T, E = TwitchError> = std::result::Result<T, E>;

pub mod auth;
pub mod channel;
pub mod connection;
pub mod error;
pub mod helix;
pub mod irc_parser;
pub mod lookup;
pub mod manager;
pub mod token_provider;
pub mod types;

pub use channel::ChannelTimings;
pub use connection::{IrcTransport, TransportOptions};
pub use error::TwitchError;
pub use helix::HelixClient;
pub use irc_parser::IrcMessage;
pub use lookup::StreamLookup;
pub use manager::ChannelRegistry;
pub use token_provider::TokenProvider;
pub use types::{ChannelRecord, ChatLogEntry};

use async_trait::async_trait;

use super::error::Result as TwitchResult;
use super::types::StreamStatus;

/// Stream metadata needed by the channel loops and the join flow.
#[async_trait]
pub trait StreamLookup: Send + Sync {
    async fn uptime(&self, channel: &str) -> TwitchResult<StreamStatus>;

    async fn resolve_channel_id(&self, channel: &str) -> TwitchResult<String>;
}

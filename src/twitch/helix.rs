use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::Deserialize;
use serde::de::DeserializeOwned;

use super::error::{Result as TwitchResult, TwitchError};
use super::lookup::StreamLookup;
use super::token_provider::TokenProvider;
use super::types::StreamStatus;

pub const DEFAULT_API_BASE_URL: &str = "https://api.twitch.tv/helix";

#[derive(Debug, Deserialize)]
struct HelixPage<T> {
    data: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct StreamData {
    started_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct UserData {
    id: String,
}

/// Helix REST client backing [`StreamLookup`].
#[derive(Debug, Clone)]
pub struct HelixClient {
    http: reqwest::Client,
    base_url: String,
    tokens: TokenProvider,
}

impl HelixClient {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>, tokens: TokenProvider) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            tokens,
        }
    }

    async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> TwitchResult<HelixPage<T>> {
        let token = self.tokens.get_token().await;
        let response = self
            .http
            .get(format!("{}/{}", self.base_url, path))
            .query(query)
            .header("Client-Id", self.tokens.client_id())
            .bearer_auth(token)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            tracing::warn!(path, "[HELIX] Request unauthorized, forcing token refresh");
            self.tokens.signal_immediate_refresh();
            return Err(TwitchError::Lookup(format!("{} returned 401", path)));
        }
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error body".to_string());
            return Err(TwitchError::Lookup(format!(
                "{} failed (HTTP {}): {}",
                path, status, body
            )));
        }

        let body = response.text().await?;
        Ok(serde_json::from_str(&body)?)
    }
}

#[async_trait]
impl StreamLookup for HelixClient {
    async fn uptime(&self, channel: &str) -> TwitchResult<StreamStatus> {
        let page: HelixPage<StreamData> = self.get("streams", &[("user_login", channel)]).await?;
        let status = stream_status(&page, Utc::now());
        tracing::debug!(channel.name = channel, ?status, "[HELIX] Stream status");
        Ok(status)
    }

    async fn resolve_channel_id(&self, channel: &str) -> TwitchResult<String> {
        let page: HelixPage<UserData> = self.get("users", &[("login", channel)]).await?;
        page.data
            .into_iter()
            .next()
            .map(|user| user.id)
            .ok_or_else(|| TwitchError::Lookup(format!("no Twitch user named {}", channel)))
    }
}

fn stream_status(page: &HelixPage<StreamData>, now: DateTime<Utc>) -> StreamStatus {
    match page.data.first() {
        None => StreamStatus::Offline,
        Some(stream) => StreamStatus::Live {
            uptime: (now - stream.started_at)
                .to_std()
                .unwrap_or(Duration::ZERO),
        },
    }
}

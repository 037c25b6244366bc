use crate::config::TwitchConfig;
use crate::twitch::auth::{AppAccessToken, fetch_app_access_token};
use crate::twitch::error::TwitchError;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Notify, RwLock};
use tokio::time::sleep;

const TOKEN_REFRESH_GRACE_PERIOD: Duration = Duration::from_secs(60 * 60); // Refresh 1 hour before expiry
const FETCH_RETRY_DELAY: Duration = Duration::from_secs(30);
const FETCH_MAX_ATTEMPTS: u32 = 3;
const FETCH_GIVE_UP_DELAY: Duration = Duration::from_secs(5 * 60);

/// Shared app access token, refreshed in the background ahead of expiry.
#[derive(Clone)]
pub struct TokenProvider {
    current_token: Arc<RwLock<AppAccessToken>>,
    twitch_config: Arc<TwitchConfig>,
    http: reqwest::Client,
    // A 401 from Helix means the cached token is bad; wake the refresh task.
    force_refresh_trigger: Arc<Notify>,
}

impl std::fmt::Debug for TokenProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenProvider")
            .field("client_id", &self.twitch_config.client_id)
            .finish_non_exhaustive()
    }
}

impl TokenProvider {
    pub async fn new(
        twitch_config: Arc<TwitchConfig>,
        http: reqwest::Client,
    ) -> Result<Self, TwitchError> {
        let initial_token = fetch_app_access_token(
            &http,
            &twitch_config.token_url,
            &twitch_config.client_id,
            &twitch_config.client_secret,
        )
        .await?;

        let provider = Self {
            current_token: Arc::new(RwLock::new(initial_token)),
            twitch_config,
            http,
            force_refresh_trigger: Arc::new(Notify::new()),
        };

        provider.spawn_refresh_task();
        Ok(provider)
    }

    pub async fn get_token(&self) -> String {
        self.current_token.read().await.token.clone()
    }

    pub fn client_id(&self) -> &str {
        &self.twitch_config.client_id
    }

    pub fn signal_immediate_refresh(&self) {
        self.force_refresh_trigger.notify_one();
    }

    async fn fetch_new_token_and_update(&self) -> Result<(), TwitchError> {
        let new_token = fetch_app_access_token(
            &self.http,
            &self.twitch_config.token_url,
            &self.twitch_config.client_id,
            &self.twitch_config.client_secret,
        )
        .await
        .inspect_err(|e| {
            tracing::error!(error = %e, "[HELIX][TOKEN] Failed to fetch new app access token");
        })?;

        *self.current_token.write().await = new_token;
        tracing::info!("[HELIX][TOKEN] App access token updated");
        Ok(())
    }

    fn spawn_refresh_task(&self) {
        let provider = self.clone();
        tokio::spawn(async move {
            loop {
                let expires_at = provider.current_token.read().await.expires_at;
                let wait = refresh_delay(expires_at.saturating_duration_since(Instant::now()));
                tracing::debug!(?wait, "[HELIX][TOKEN] Next scheduled refresh");

                tokio::select! {
                    _ = sleep(wait) => {
                        tracing::info!("[HELIX][TOKEN] Token is near expiry, refreshing");
                    }
                    _ = provider.force_refresh_trigger.notified() => {
                        tracing::info!("[HELIX][TOKEN] Immediate refresh signaled");
                    }
                }

                let mut attempts = 0;
                loop {
                    attempts += 1;
                    if provider.fetch_new_token_and_update().await.is_ok() {
                        break;
                    }
                    if attempts >= FETCH_MAX_ATTEMPTS {
                        tracing::error!(attempts, "[HELIX][TOKEN] Giving up on refresh for now");
                        sleep(FETCH_GIVE_UP_DELAY).await;
                        break;
                    }
                    tracing::warn!(attempts, "[HELIX][TOKEN] Refresh failed, retrying in 30s");
                    sleep(FETCH_RETRY_DELAY).await;
                }
            }
        });
    }
}

fn refresh_delay(time_to_expiry: Duration) -> Duration {
    time_to_expiry.saturating_sub(TOKEN_REFRESH_GRACE_PERIOD)
}

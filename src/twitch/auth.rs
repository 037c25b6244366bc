use super::error::TwitchError;
use serde::Deserialize;
use std::time::{Duration, Instant};

pub const DEFAULT_TOKEN_URL: &str = "https://id.twitch.tv/oauth2/token";

/// Seconds shaved off `expires_in` to absorb latency and clock skew.
const EXPIRY_SAFETY_MARGIN_SECS: u64 = 10;

#[derive(Deserialize, Debug)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Debug, Clone)]
pub struct AppAccessToken {
    pub token: String,
    pub expires_at: Instant,
}

impl AppAccessToken {
    fn from_response(response: TokenResponse, now: Instant) -> Self {
        let effective_expires_in = response
            .expires_in
            .saturating_sub(EXPIRY_SAFETY_MARGIN_SECS);
        if effective_expires_in == 0 {
            tracing::warn!(
                expires_in = response.expires_in,
                "[HELIX][AUTH] Token lifetime is very short, using as is"
            );
        }
        Self {
            token: response.access_token,
            expires_at: now + Duration::from_secs(effective_expires_in),
        }
    }
}

/// Client-credentials grant for the app access token used on Helix calls.
pub async fn fetch_app_access_token(
    http: &reqwest::Client,
    token_url: &str,
    client_id: &str,
    client_secret: &str,
) -> Result<AppAccessToken, TwitchError> {
    if client_id.is_empty() || client_secret.is_empty() {
        return Err(TwitchError::TwitchAuth(
            "client id and client secret are required for Helix lookups".to_string(),
        ));
    }

    tracing::info!("[HELIX][AUTH] Fetching app access token");
    let params = [
        ("client_id", client_id),
        ("client_secret", client_secret),
        ("grant_type", "client_credentials"),
    ];
    let response = http.post(token_url).form(&params).send().await?;

    if response.status().is_success() {
        let token_data = response.json::<TokenResponse>().await?;
        let expires_in = token_data.expires_in;
        let token = AppAccessToken::from_response(token_data, Instant::now());
        tracing::info!(expires_in, "[HELIX][AUTH] App access token fetched");
        Ok(token)
    } else {
        let status = response.status();
        let error_body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error body".to_string());
        tracing::error!(%status, body = %error_body, "[HELIX][AUTH] Token request rejected");
        Err(TwitchError::TwitchAuth(format!(
            "Token fetch failed (HTTP {}): {}",
            status, error_body
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expiry_keeps_safety_margin() {
        let now = Instant::now();
        let response: TokenResponse =
            serde_json::from_str(r#"{"access_token":"abc","expires_in":3600,"token_type":"bearer"}"#)
                .unwrap();
        let token = AppAccessToken::from_response(response, now);
        assert_eq!(token.token, "abc");
        assert_eq!(token.expires_at, now + Duration::from_secs(3590));
    }

    #[test]
    fn test_short_lifetime_does_not_underflow() {
        let now = Instant::now();
        let token = AppAccessToken::from_response(
            TokenResponse {
                access_token: "x".to_string(),
                expires_in: 5,
            },
            now,
        );
        assert_eq!(token.expires_at, now);
    }

    #[tokio::test]
    async fn test_missing_client_credentials_fail_before_request() {
        let http = reqwest::Client::new();
        let result = fetch_app_access_token(&http, "http://127.0.0.1:1/token", "", "secret").await;
        assert!(matches!(result, Err(TwitchError::TwitchAuth(_))));
    }
}

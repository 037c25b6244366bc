use crate::error::{ConfigError, Result as AppResult};
use crate::twitch::auth::DEFAULT_TOKEN_URL;
use crate::twitch::helix::DEFAULT_API_BASE_URL;
use crate::twitch::connection::{DEFAULT_CONNECT_TIMEOUT, DEFAULT_READ_TIMEOUT};
use crate::twitch::{ChannelTimings, TransportOptions};
use config::builder::DefaultState;
use config::{Config, ConfigBuilder, Environment, File};
use serde::Deserialize;
use std::fmt;
use std::time::Duration;

const OAUTH_PREFIX: &str = "oauth:";

#[derive(Clone, Deserialize)]
pub struct IrcConfig {
    pub host: String,
    pub port: u16,
    pub nick: String,
    pub token: String,
    pub rate_limit_ms: u64,
    pub queue_capacity: usize,
    pub reconnect_base_secs: u64,
    pub reconnect_max_secs: u64,
    pub connect_timeout_secs: u64,
    pub read_timeout_secs: u64,
}

impl IrcConfig {
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn transport_options(&self) -> TransportOptions {
        TransportOptions {
            rate_limit: Duration::from_millis(self.rate_limit_ms),
            queue_capacity: self.queue_capacity,
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            read_timeout: Duration::from_secs(self.read_timeout_secs),
        }
    }

    /// Bare lower-case nick; also the name of the home channel.
    pub fn home_channel(&self) -> String {
        self.nick.to_lowercase()
    }
}

impl fmt::Debug for IrcConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IrcConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("nick", &self.nick)
            .field("token", &"<redacted>")
            .field("rate_limit_ms", &self.rate_limit_ms)
            .field("queue_capacity", &self.queue_capacity)
            .field("reconnect_base_secs", &self.reconnect_base_secs)
            .field("reconnect_max_secs", &self.reconnect_max_secs)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .field("read_timeout_secs", &self.read_timeout_secs)
            .finish()
    }
}

#[derive(Clone, Deserialize)]
pub struct TwitchConfig {
    pub client_id: String,
    pub client_secret: String,
    pub api_base_url: String,
    pub token_url: String,
}

impl fmt::Debug for TwitchConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TwitchConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("api_base_url", &self.api_base_url)
            .field("token_url", &self.token_url)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    File,
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub channels_path: String,
    pub logs_path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BotConfig {
    /// Short name viewers may greet instead of the full nick.
    pub alias: String,
    pub greeting_cooldown_secs: u64,
    pub farewell_cooldown_secs: u64,
    pub wellness_cooldown_secs: u64,
    pub registration_cooldown_secs: u64,
    pub reminder_period_secs: u64,
    pub offline_poll_secs: u64,
    pub lookup_backoff_secs: u64,
}

impl BotConfig {
    pub fn timings(&self) -> ChannelTimings {
        ChannelTimings {
            greeting_cooldown: Duration::from_secs(self.greeting_cooldown_secs),
            farewell_cooldown: Duration::from_secs(self.farewell_cooldown_secs),
            wellness_cooldown: Duration::from_secs(self.wellness_cooldown_secs),
            registration_cooldown: Duration::from_secs(self.registration_cooldown_secs),
            reminder_period: Duration::from_secs(self.reminder_period_secs),
            offline_poll: Duration::from_secs(self.offline_poll_secs),
            lookup_backoff: Duration::from_secs(self.lookup_backoff_secs),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppSettings {
    pub irc: IrcConfig,
    pub twitch: TwitchConfig,
    pub store: StoreConfig,
    pub bot: BotConfig,
}

pub fn load_settings() -> AppResult<AppSettings> {
    let builder = with_defaults(Config::builder())?
        .add_source(
            Environment::with_prefix("GDB")
                .separator("__")
                .try_parsing(true),
        )
        .add_source(File::with_name("config").required(false));
    settings_from(builder)
}

fn with_defaults(
    builder: ConfigBuilder<DefaultState>,
) -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    let defaults = ChannelTimings::default();
    let secs = |d: Duration| d.as_secs() as i64;

    builder
        .set_default("irc.host", "irc.chat.twitch.tv")?
        .set_default("irc.port", 6667_i64)?
        .set_default("irc.nick", "")?
        .set_default("irc.token", "")?
        .set_default("irc.rate_limit_ms", 2_000_i64)?
        .set_default("irc.queue_capacity", 100_i64)?
        .set_default("irc.reconnect_base_secs", 5_i64)?
        .set_default("irc.reconnect_max_secs", 60_i64)?
        .set_default(
            "irc.connect_timeout_secs",
            DEFAULT_CONNECT_TIMEOUT.as_secs() as i64,
        )?
        .set_default("irc.read_timeout_secs", DEFAULT_READ_TIMEOUT.as_secs() as i64)?
        .set_default("twitch.client_id", "")?
        .set_default("twitch.client_secret", "")?
        .set_default("twitch.api_base_url", DEFAULT_API_BASE_URL)?
        .set_default("twitch.token_url", DEFAULT_TOKEN_URL)?
        .set_default("store.backend", "file")?
        .set_default("store.channels_path", "data/channels.json")?
        .set_default("store.logs_path", "data/chat_log.jsonl")?
        .set_default("bot.alias", "gdb")?
        .set_default("bot.greeting_cooldown_secs", secs(defaults.greeting_cooldown))?
        .set_default("bot.farewell_cooldown_secs", secs(defaults.farewell_cooldown))?
        .set_default("bot.wellness_cooldown_secs", secs(defaults.wellness_cooldown))?
        .set_default(
            "bot.registration_cooldown_secs",
            secs(defaults.registration_cooldown),
        )?
        .set_default("bot.reminder_period_secs", secs(defaults.reminder_period))?
        .set_default("bot.offline_poll_secs", secs(defaults.offline_poll))?
        .set_default("bot.lookup_backoff_secs", secs(defaults.lookup_backoff))
        .map_err(|e| ConfigError::Load(e.to_string()))
}

impl From<config::ConfigError> for ConfigError {
    fn from(e: config::ConfigError) -> Self {
        ConfigError::Load(e.to_string())
    }
}

fn settings_from(builder: ConfigBuilder<DefaultState>) -> AppResult<AppSettings> {
    let settings = builder
        .build()
        .map_err(|e| ConfigError::Load(e.to_string()))?;
    let mut app_settings: AppSettings = settings
        .try_deserialize()
        .map_err(|e| ConfigError::Load(e.to_string()))?;
    app_settings.validate()?;
    Ok(app_settings)
}

impl AppSettings {
    fn validate(&mut self) -> Result<(), ConfigError> {
        self.irc.nick = self.irc.nick.trim().to_string();
        if self.irc.nick.is_empty() {
            return Err(ConfigError::Missing("irc.nick".to_string()));
        }
        if self.irc.token.trim().is_empty() {
            return Err(ConfigError::Missing("irc.token".to_string()));
        }
        if !self.irc.token.starts_with(OAUTH_PREFIX) {
            self.irc.token = format!("{}{}", OAUTH_PREFIX, self.irc.token.trim());
        }
        if self.twitch.client_id.is_empty() {
            return Err(ConfigError::Missing("twitch.client_id".to_string()));
        }
        if self.twitch.client_secret.is_empty() {
            return Err(ConfigError::Missing("twitch.client_secret".to_string()));
        }
        if self.irc.queue_capacity == 0 {
            return Err(ConfigError::InvalidValue(
                "irc.queue_capacity must be at least 1".to_string(),
            ));
        }
        if self.irc.reconnect_base_secs == 0
            || self.irc.reconnect_max_secs < self.irc.reconnect_base_secs
        {
            return Err(ConfigError::InvalidValue(
                "irc.reconnect_base_secs must be positive and not exceed irc.reconnect_max_secs"
                    .to_string(),
            ));
        }
        if self.irc.connect_timeout_secs == 0 || self.irc.read_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "irc.connect_timeout_secs and irc.read_timeout_secs must be positive".to_string(),
            ));
        }
        if self.bot.reminder_period_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "bot.reminder_period_secs must be positive".to_string(),
            ));
        }
        if self.bot.alias.trim().is_empty() {
            self.bot.alias = "gdb".to_string();
        }
        Ok(())
    }
}

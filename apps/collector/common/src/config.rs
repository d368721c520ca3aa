use crate::collection::{CollectionSettings, CollectionWindow};
use crate::error::ServiceError;
use crate::irc::{self, Identity, KeywordMatcher, SessionOptions};
use crate::recovery::RecoveryManager;
use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use config::{Config, ConfigError, Environment, File};
use dotenv::dotenv;
use serde::Deserialize;
use std::fmt;
use std::time::Duration;

/// Defaults < `collector.{toml,json,yaml}` < `.env` < `APP_*` environment
fn layered(defaults: &[(&str, config::Value)]) -> Result<Config, ConfigError> {
    // Load environment variables from .env file
    dotenv().ok();

    let mut s = Config::new();
    for (key, value) in defaults {
        s.set_default(key, value.clone())?;
    }

    s.merge(File::with_name("collector").required(false))?;

    // Eg.. `APP_CHANNEL=hasanabi` sets the `channel` key
    s.merge(Environment::with_prefix("APP"))?;

    Ok(s)
}

fn collector_defaults() -> Vec<(&'static str, config::Value)> {
    vec![
        ("keyword_ignore_case", false.into()),
        ("irc_host", irc::DEFAULT_HOST.into()),
        ("irc_port", (irc::DEFAULT_PORT as i64).into()),
        ("api_url", "https://api.twitch.tv/helix".into()),
        ("data_dir", "data".into()),
        ("dataset", "raw".into()),
        ("refresh_interval_minutes", 15i64.into()),
        ("offline_poll_minutes", 15i64.into()),
        ("post_drop_poll_secs", 5i64.into()),
        ("liveness_retry_secs", 30i64.into()),
        ("connect_attempts", 5i64.into()),
        ("connect_base_delay_secs", 2i64.into()),
        ("connect_max_delay_secs", 60i64.into()),
        ("welcome_reads", 10i64.into()),
        ("read_timeout_secs", 360i64.into()),
        ("await_next_broadcast", false.into()),
        ("health_addr", "0.0.0.0:8080".into()),
    ]
}

#[derive(Clone, Deserialize)]
pub struct ServiceConfig {
    pub channel: String,
    pub login: String,
    pub oauth_token: String,
    pub client_id: String,
    pub api_token: String,
    pub keyword: String,
    pub keyword_ignore_case: bool,
    pub irc_host: String,
    pub irc_port: u16,
    pub api_url: String,
    pub data_dir: String,
    pub dataset: String,
    pub refresh_interval_minutes: u64,
    pub offline_poll_minutes: u64,
    pub post_drop_poll_secs: u64,
    pub liveness_retry_secs: u64,
    pub connect_attempts: u32,
    pub connect_base_delay_secs: u64,
    pub connect_max_delay_secs: u64,
    pub welcome_reads: usize,
    pub read_timeout_secs: u64,
    pub window_start: Option<String>,
    pub window_stop: Option<String>,
    pub await_next_broadcast: bool,
    pub health_addr: String,
}

impl fmt::Debug for ServiceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceConfig")
            .field("channel", &self.channel)
            .field("login", &self.login)
            .field("keyword", &self.keyword)
            .field("irc", &format!("{}:{}", self.irc_host, self.irc_port))
            .field("api_url", &self.api_url)
            .field("dataset", &format!("{}/{}.csv", self.data_dir, self.dataset))
            .field("refresh_interval_minutes", &self.refresh_interval_minutes)
            .field("window_start", &self.window_start)
            .field("window_stop", &self.window_stop)
            .field("await_next_broadcast", &self.await_next_broadcast)
            .finish_non_exhaustive()
    }
}

impl ServiceConfig {
    pub fn new() -> Result<Self, ConfigError> {
        Self::from_config(layered(&collector_defaults())?)
    }

    pub fn from_config(config: Config) -> Result<Self, ConfigError> {
        config.try_into()
    }

    pub fn identity(&self) -> Identity {
        Identity::new(&self.login, &self.channel, &self.oauth_token)
    }

    /// Bearer token for the status endpoint, without the chat `oauth:` prefix
    pub fn api_bearer(&self) -> &str {
        self.api_token
            .trim()
            .strip_prefix("oauth:")
            .unwrap_or(self.api_token.trim())
    }

    pub fn keyword_matcher(&self) -> KeywordMatcher {
        KeywordMatcher::new(&self.channel, &self.keyword, self.keyword_ignore_case)
    }

    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            welcome_reads: self.welcome_reads,
            read_timeout: Duration::from_secs(self.read_timeout_secs),
        }
    }

    pub fn recovery_manager(&self) -> RecoveryManager {
        RecoveryManager::new(
            self.connect_attempts,
            Duration::from_secs(self.connect_base_delay_secs),
            Duration::from_secs(self.connect_max_delay_secs),
        )
    }

    pub fn health_addr(&self) -> Option<&str> {
        let addr = self.health_addr.trim();
        (!addr.is_empty()).then_some(addr)
    }

    /// Checks cross-field constraints and converts to loop settings.
    pub fn collection_settings(&self) -> Result<CollectionSettings, ServiceError> {
        if self.channel.trim().trim_start_matches('#').is_empty() {
            return Err(ServiceError::Config("channel must not be empty".into()));
        }
        if self.keyword.is_empty() {
            return Err(ServiceError::Config("keyword must not be empty".into()));
        }
        if self.connect_attempts == 0 {
            return Err(ServiceError::Config(
                "connect_attempts must be at least 1".into(),
            ));
        }
        for (key, value) in [
            ("refresh_interval_minutes", self.refresh_interval_minutes),
            ("offline_poll_minutes", self.offline_poll_minutes),
            ("read_timeout_secs", self.read_timeout_secs),
            ("welcome_reads", self.welcome_reads as u64),
        ] {
            if value == 0 {
                return Err(ServiceError::Config(format!("{} must be positive", key)));
            }
        }

        let start = self
            .window_start
            .as_deref()
            .map(parse_wall_clock)
            .transpose()?;
        let stop = self
            .window_stop
            .as_deref()
            .map(parse_wall_clock)
            .transpose()?;
        if let (Some(start), Some(stop)) = (start, stop) {
            if stop <= start {
                return Err(ServiceError::Config(format!(
                    "window_stop {} is not after window_start {}",
                    stop, start
                )));
            }
        }

        Ok(CollectionSettings {
            dataset: self.dataset.clone(),
            refresh_interval: Duration::from_secs(self.refresh_interval_minutes * 60),
            offline_poll_interval: Duration::from_secs(self.offline_poll_minutes * 60),
            post_drop_delay: Duration::from_secs(self.post_drop_poll_secs),
            liveness_retry_delay: Duration::from_secs(self.liveness_retry_secs),
            window: CollectionWindow { start, stop },
            await_next_broadcast: self.await_next_broadcast,
        })
    }
}

/// Accepts RFC 3339 or a local `YYYY-MM-DD HH:MM[:SS]`
pub fn parse_wall_clock(raw: &str) -> Result<DateTime<Utc>, ServiceError> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }

    ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
        .and_then(|naive| Local.from_local_datetime(&naive).earliest())
        .map(|ts| ts.with_timezone(&Utc))
        .ok_or_else(|| ServiceError::Config(format!("unrecognised window timestamp '{}'", raw)))
}

/// Settings for the offline cleaning and report passes
#[derive(Debug, Clone, Deserialize)]
pub struct BatchConfig {
    pub data_dir: String,
    pub raw_dataset: String,
    pub clean_dataset: String,
    pub clean_keyword: String,
    pub clean_window_secs: u64,
    pub top_users: usize,
    pub login: Option<String>,
}

impl BatchConfig {
    pub fn new() -> Result<Self, ConfigError> {
        let defaults: Vec<(&str, config::Value)> = vec![
            ("data_dir", "data".into()),
            ("raw_dataset", "raw".into()),
            ("clean_dataset", "clean".into()),
            ("clean_keyword", "crazy".into()),
            ("clean_window_secs", 30i64.into()),
            ("top_users", 25i64.into()),
        ];
        layered(&defaults)?.try_into()
    }
}

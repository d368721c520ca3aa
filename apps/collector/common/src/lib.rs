pub mod clean;
pub mod collection;
pub mod config;
pub mod dataset;
pub mod error;
pub mod helix;
pub mod irc;
pub mod metadata;
pub mod recovery;
pub mod stats;

pub use error::ServiceError;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One keyword occurrence captured from chat.
///
/// Field order is the on-disk column order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatEvent {
    #[serde(with = "dataset::sent_format")]
    pub sent: NaiveDateTime,
    pub game_name: String,
    pub title: String,
    pub user: String,
    pub message: String,
}

/// Broadcast metadata as reported by the status endpoint
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcastMetadata {
    pub game_name: String,
    pub title: String,
    pub is_live: bool,
}

impl BroadcastMetadata {
    pub fn offline() -> Self {
        Self::default()
    }
}

/// Collection loop states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CollectorState {
    WaitingForLive,
    Connecting,
    Streaming,
    Checkpointing,
    Done,
}

impl fmt::Display for CollectorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CollectorState::WaitingForLive => "WAITING_FOR_LIVE",
            CollectorState::Connecting => "CONNECTING",
            CollectorState::Streaming => "STREAMING",
            CollectorState::Checkpointing => "CHECKPOINTING",
            CollectorState::Done => "DONE",
        };
        f.write_str(name)
    }
}

/// Service health status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServiceStatus {
    Healthy,
    Degraded,
    Starting,
    ShuttingDown,
}

/// Live view of the collector, shared with the health endpoint
#[derive(Debug, Clone, Serialize)]
pub struct CollectorStatus {
    pub status: ServiceStatus,
    pub state: CollectorState,
    pub channel: String,
    pub events_collected: usize,
    pub total_events: usize,
    pub last_checkpoint: Option<DateTime<Utc>>,
    pub last_metadata: Option<BroadcastMetadata>,
    pub session_id: Option<String>,
}

impl CollectorStatus {
    pub fn new(channel: &str) -> Self {
        Self {
            status: ServiceStatus::Starting,
            state: CollectorState::WaitingForLive,
            channel: channel.to_string(),
            events_collected: 0,
            total_events: 0,
            last_checkpoint: None,
            last_metadata: None,
            session_id: None,
        }
    }
}

pub mod logger {
    use tracing_subscriber::EnvFilter;

    /// Installs the global subscriber. `RUST_LOG` overrides the default `info` level.
    pub fn init() {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        // A second init (e.g. from tests) is harmless
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .try_init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_display_names() {
        assert_eq!(CollectorState::WaitingForLive.to_string(), "WAITING_FOR_LIVE");
        assert_eq!(CollectorState::Checkpointing.to_string(), "CHECKPOINTING");
        assert_eq!(
            serde_json::to_value(CollectorState::Streaming).unwrap(),
            serde_json::json!("STREAMING")
        );
    }

    #[test]
    fn test_new_status_starts_waiting() {
        let status = CollectorStatus::new("hasanabi");
        assert_eq!(status.state, CollectorState::WaitingForLive);
        assert_eq!(status.events_collected, 0);
        assert!(status.last_checkpoint.is_none());
    }
}

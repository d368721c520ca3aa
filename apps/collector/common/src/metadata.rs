use crate::BroadcastMetadata;
use crate::error::ServiceError;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

/// An immutable metadata snapshot. `version` 0 means nothing was ever fetched.
#[derive(Debug, Clone, PartialEq)]
pub struct MetadataSnapshot {
    pub metadata: BroadcastMetadata,
    pub fetched_at: Option<DateTime<Utc>>,
    pub version: u64,
}

impl MetadataSnapshot {
    fn empty() -> Self {
        Self {
            metadata: BroadcastMetadata::default(),
            fetched_at: None,
            version: 0,
        }
    }
}

/// Single-writer holder of the current snapshot.
///
/// Writers swap in a whole new `Arc`, so readers holding an older one keep a
/// consistent view. A failed fetch, or an offline listing that carries no
/// metadata, leaves the last good snapshot in place.
#[derive(Debug)]
pub struct MetadataStore {
    tx: watch::Sender<Arc<MetadataSnapshot>>,
}

impl Default for MetadataStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MetadataStore {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(Arc::new(MetadataSnapshot::empty()));
        Self { tx }
    }

    pub fn current(&self) -> Arc<MetadataSnapshot> {
        self.tx.borrow().clone()
    }

    /// Records the outcome of a fetch and returns the snapshot now in effect.
    pub fn apply(
        &self,
        fetched: Result<BroadcastMetadata, ServiceError>,
    ) -> Arc<MetadataSnapshot> {
        match fetched {
            Ok(metadata) if !metadata.is_live => {
                let current = self.current();
                info!(
                    "No running broadcast listed, keeping snapshot v{}",
                    current.version
                );
                current
            }
            Ok(metadata) => {
                let version = self.current().version + 1;
                info!(
                    "Metadata v{}: live={} game='{}' title='{}'",
                    version, metadata.is_live, metadata.game_name, metadata.title
                );
                let snapshot = Arc::new(MetadataSnapshot {
                    metadata,
                    fetched_at: Some(Utc::now()),
                    version,
                });
                self.tx.send_replace(snapshot.clone());
                snapshot
            }
            Err(e) => {
                let current = self.current();
                warn!(
                    "Metadata fetch failed, keeping snapshot v{}: {}",
                    current.version, e
                );
                current
            }
        }
    }
}

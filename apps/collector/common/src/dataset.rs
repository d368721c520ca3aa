//! Flat-file storage for collected chat events.
//!
//! A dataset is a CSV file `<data_dir>/<name>.csv` with the columns
//! `sent, game_name, title, user, message`. It is always rewritten whole:
//! the new contents go to a sibling `.tmp` file which is then renamed over
//! the old one, so readers only ever see a complete file.

use crate::ChatEvent;
use crate::error::ServiceError;
use chrono::NaiveDateTime;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const COLUMNS: [&str; 5] = ["sent", "game_name", "title", "user", "message"];

/// `sent` column encoding
pub mod sent_format {
    use chrono::{DateTime, Local, NaiveDateTime};
    use serde::{Deserialize, Deserializer, Serializer};

    pub const FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

    const ACCEPTED: [&str; 3] = [
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M",
    ];

    pub fn serialize<S>(sent: &NaiveDateTime, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&sent.format(FORMAT).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<NaiveDateTime, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        parse(&raw)
            .ok_or_else(|| serde::de::Error::custom(format!("unrecognised timestamp '{}'", raw)))
    }

    pub fn parse(raw: &str) -> Option<NaiveDateTime> {
        let raw = raw.trim();
        ACCEPTED
            .iter()
            .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
            .or_else(|| {
                DateTime::parse_from_rfc3339(raw)
                    .ok()
                    .map(|ts| ts.with_timezone(&Local).naive_local())
            })
    }
}

/// Ordered, append-only sequence of events held in memory between checkpoints
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dataset {
    events: Vec<ChatEvent>,
}

impl Dataset {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_events(events: Vec<ChatEvent>) -> Self {
        Self { events }
    }

    pub fn push(&mut self, event: ChatEvent) {
        self.events.push(event);
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn events(&self) -> &[ChatEvent] {
        &self.events
    }

    pub fn into_events(self) -> Vec<ChatEvent> {
        self.events
    }

    pub fn last_sent(&self) -> Option<NaiveDateTime> {
        self.events.last().map(|e| e.sent)
    }
}

#[derive(Debug, Clone)]
pub struct DatasetSink {
    data_dir: PathBuf,
}

impl DatasetSink {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    pub fn path_for(&self, name: &str) -> PathBuf {
        self.data_dir.join(format!("{}.csv", name))
    }

    /// Reads `<name>.csv`, or returns an empty dataset when it does not exist yet.
    pub fn load(&self, name: &str) -> Result<Dataset, ServiceError> {
        let path = self.path_for(name);
        if !path.exists() {
            info!("No dataset at {}, starting empty", path.display());
            return Ok(Dataset::new());
        }

        let mut reader = csv::Reader::from_path(&path)?;
        let events = reader
            .deserialize::<ChatEvent>()
            .collect::<Result<Vec<_>, _>>()?;

        info!("Loaded {} events from {}", events.len(), path.display());
        Ok(Dataset::from_events(events))
    }

    /// Overwrites `<name>.csv` with the full dataset, in insertion order.
    pub fn save(&self, dataset: &Dataset, name: &str) -> Result<PathBuf, ServiceError> {
        fs::create_dir_all(&self.data_dir)?;

        let path = self.path_for(name);
        let tmp_path = path.with_extension("csv.tmp");

        if let Err(e) = write_events(&tmp_path, dataset) {
            let _ = fs::remove_file(&tmp_path);
            return Err(e);
        }
        fs::rename(&tmp_path, &path)?;

        debug!("Wrote {} events to {}", dataset.len(), path.display());
        Ok(path)
    }
}

fn write_events(path: &Path, dataset: &Dataset) -> Result<(), ServiceError> {
    // Header is written by hand so an empty dataset still carries the schema
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(File::create(path)?);

    writer.write_record(COLUMNS)?;
    for event in dataset.events() {
        writer.serialize(event)?;
    }

    let file = writer
        .into_inner()
        .map_err(|e| ServiceError::IO(e.into_error()))?;
    file.sync_all()?;
    Ok(())
}

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::limits::MIN_SLOT_MINUTES;
use crate::model::Minute;

/// Runtime settings for the host process, read from `SLOTBOOK_*` variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub data_dir: PathBuf,
    /// Spacing between generated slot start times.
    pub slot_minutes: Minute,
    /// Journal appends after which the compactor rewrites the log.
    pub compact_threshold: u64,
    pub reaper_interval: Duration,
    pub metrics_port: Option<u16>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            slot_minutes: 30,
            compact_threshold: 1000,
            reaper_interval: Duration::from_secs(60),
            metrics_port: None,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; unparsable values fall back to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let slot_minutes = parsed(&lookup, "SLOTBOOK_SLOT_MINUTES")
            .filter(|m: &Minute| *m >= MIN_SLOT_MINUTES)
            .unwrap_or(defaults.slot_minutes);
        Self {
            data_dir: lookup("SLOTBOOK_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            slot_minutes,
            compact_threshold: parsed(&lookup, "SLOTBOOK_COMPACT_THRESHOLD")
                .unwrap_or(defaults.compact_threshold),
            reaper_interval: parsed(&lookup, "SLOTBOOK_REAPER_SECS")
                .filter(|s: &u64| *s > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.reaper_interval),
            metrics_port: parsed(&lookup, "SLOTBOOK_METRICS_PORT"),
        }
    }

    pub fn journal_path(&self) -> PathBuf {
        self.data_dir.join("slotbook.wal")
    }
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    lookup(key).and_then(|s| s.trim().parse().ok())
}

//! Persistence collaborator seam.
//!
//! The relay may hand each broadcast snapshot to a sink for storage or
//! replay. The write is strictly fire-and-forget: a failing or slow
//! sink must never block or fail message processing, so the trait is
//! infallible and implementations are expected to swallow their own
//! errors (queue internally, log, drop).

use serde::Serialize;

/// One normalized snapshot as handed to persistence.
#[derive(Debug, Clone, Serialize)]
pub struct SnapshotRecord {
    pub ts_ms: i64,
    pub fire: bool,
    pub co2: f64,
    pub pm25: f64,
    pub pm10: f64,
    pub person_detected: bool,
    /// "ROBOT" | "DEMO" | "CACHE" | "REAL" when dust was never tagged.
    pub source: String,
}

pub trait SnapshotSink: Send + Sync {
    fn record(&self, record: &SnapshotRecord);
}

/// Default sink: log the record and move on.
pub struct LogSink;

impl SnapshotSink for LogSink {
    fn record(&self, record: &SnapshotRecord) {
        match serde_json::to_string(record) {
            Ok(json) => log::debug!("Snapshot record: {}", json),
            Err(e) => log::warn!("Failed to serialize snapshot record: {}", e),
        }
    }
}

//! On-disk cassette layout.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A recorded session: every call made to one port, in order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cassette {
    /// Session name.
    pub name: String,
    /// When the recording finished.
    pub recorded_at: DateTime<Utc>,
    /// Source commit at record time.
    pub commit: String,
    /// Calls in the order they completed.
    pub interactions: Vec<Interaction>,
}

/// One call and its outcome.
///
/// `output` is `{"Ok": value}` or `{"Err": {"kind": .., "message": ..}}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Interaction {
    /// Position within the cassette.
    pub seq: u64,
    /// Port name, e.g. `generation_api`.
    pub port: String,
    /// Method name on the port.
    pub method: String,
    /// Request as recorded.
    pub input: serde_json::Value,
    /// Result as recorded.
    pub output: serde_json::Value,
}

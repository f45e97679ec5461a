//! Collects interactions and writes them as a YAML cassette.

use std::path::{Path, PathBuf};

use chrono::Utc;
use serde_json::Value;

use super::format::{Cassette, Interaction};
use crate::error::BotError;

/// Interactions in call order, written out once by [`CassetteRecorder::finish`].
#[derive(Debug)]
pub struct CassetteRecorder {
    path: PathBuf,
    cassette: Cassette,
}

impl CassetteRecorder {
    /// Recorder for a cassette named `name`, taken at `commit`, to be written to `path`.
    pub fn new(path: impl Into<PathBuf>, name: impl Into<String>, commit: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            cassette: Cassette {
                name: name.into(),
                recorded_at: Utc::now(),
                commit: commit.into(),
                interactions: Vec::new(),
            },
        }
    }

    /// Append one call; its `seq` is its position in the cassette.
    pub fn record(&mut self, port: &str, method: &str, input: Value, output: Value) {
        let seq = self.cassette.interactions.len() as u64;
        self.cassette.interactions.push(Interaction {
            seq,
            port: port.to_string(),
            method: method.to_string(),
            input,
            output,
        });
    }

    /// Interactions recorded so far.
    #[must_use]
    pub fn interactions(&self) -> &[Interaction] {
        &self.cassette.interactions
    }

    /// Stamp the cassette and write it, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns an error if the cassette cannot be encoded or written.
    pub fn finish(mut self) -> Result<PathBuf, BotError> {
        self.cassette.recorded_at = Utc::now();
        let yaml = serde_yaml::to_string(&self.cassette)
            .map_err(|e| BotError::Config(format!("Failed to encode cassette: {e}")))?;
        write_through_temp(&self.path, yaml.as_bytes())?;
        Ok(self.path)
    }
}

fn write_through_temp(path: &Path, bytes: &[u8]) -> Result<(), BotError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("yaml.tmp");
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

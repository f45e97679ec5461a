//! Adapters that answer port calls from a cassette.

pub mod generation;

use std::sync::{Arc, Mutex, PoisonError};

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::cassette::replayer::CassetteReplayer;
use crate::error::{BotError, ErrorKind};

/// Take the next recorded output for `port`/`method`.
///
/// # Errors
///
/// Returns [`BotError::Config`] if the cassette has nothing left for the pair.
pub(crate) fn next_output(
    replayer: &Arc<Mutex<CassetteReplayer>>,
    port: &str,
    method: &str,
) -> Result<Value, BotError> {
    let mut guard = replayer.lock().unwrap_or_else(PoisonError::into_inner);
    guard.next_interaction(port, method).map(|i| i.output).map_err(BotError::Config)
}

/// Rebuild a recorded error.
pub(crate) fn replay_error(value: &Value) -> BotError {
    let kind = value
        .get("kind")
        .and_then(|k| serde_json::from_value::<ErrorKind>(k.clone()).ok())
        .unwrap_or(ErrorKind::Other);
    let message = value
        .get("message")
        .and_then(Value::as_str)
        .or_else(|| value.as_str())
        .unwrap_or("replayed error")
        .to_string();
    BotError::Replayed { kind, message }
}

/// Decode a recorded `{"Ok": ..}` / `{"Err": ..}` output.
///
/// # Errors
///
/// Returns the recorded error, or [`BotError::Config`] if the value does not
/// match `T`.
pub(crate) fn replay_result<T: DeserializeOwned>(output: Value) -> Result<T, BotError> {
    if let Some(err) = output.get("Err") {
        return Err(replay_error(err));
    }
    let value = match output {
        Value::Object(mut map) if map.contains_key("Ok") => map.remove("Ok").unwrap_or(Value::Null),
        other => other,
    };
    serde_json::from_value(value)
        .map_err(|e| BotError::Config(format!("Cassette output does not match: {e}")))
}

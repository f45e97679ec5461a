//! Adapters that pass calls through to a live port and record them.

pub mod generation;

use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use serde_json::{json, Value};

use crate::cassette::recorder::CassetteRecorder;
use crate::error::BotError;

/// JSON for a recorded value; unserializable values are recorded as their error.
fn to_json<T: Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or_else(|e| json!({ "unserializable": e.to_string() }))
}

/// Recorded form of an error: its kind and display text.
pub(crate) fn error_json(error: &BotError) -> Value {
    json!({ "kind": error.kind(), "message": error.to_string() })
}

/// Record a `Result` using the `Ok`/`Err` output convention.
pub(crate) fn record_result<T, I>(
    recorder: &Arc<Mutex<CassetteRecorder>>,
    port: &str,
    method: &str,
    input: &I,
    result: &Result<T, BotError>,
) where
    T: Serialize,
    I: Serialize,
{
    let output = match result {
        Ok(v) => json!({ "Ok": to_json(v) }),
        Err(e) => json!({ "Err": error_json(e) }),
    };
    record_raw(recorder, port, method, to_json(input), output);
}

/// Record an already-shaped output value.
pub(crate) fn record_raw(
    recorder: &Arc<Mutex<CassetteRecorder>>,
    port: &str,
    method: &str,
    input: Value,
    output: Value,
) {
    let mut guard = recorder.lock().unwrap_or_else(PoisonError::into_inner);
    guard.record(port, method, input, output);
}

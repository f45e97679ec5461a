//! Record/replay of generation API calls.
//!
//! A recording session wraps the live API and writes every call to a YAML
//! cassette. Replaying serves those results back in order, per method, so
//! whole chat sessions can run without network access.

pub mod config;
pub mod format;
pub mod recorder;
pub mod replayer;

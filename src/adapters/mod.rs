//! Adapter implementations for port traits.
//!
//! - `live/`: the Gemini API, the console transport and local media storage
//! - `recording/`: wrap a live API and record every call to a cassette
//! - `replaying/`: answer calls from a recorded cassette

pub mod live;
pub mod recording;
pub mod replaying;

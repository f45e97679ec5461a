//! Adapters that talk to real systems.

pub mod console;
pub mod gemini;
pub mod media;

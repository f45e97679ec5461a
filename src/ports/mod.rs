//! Port traits defining external boundaries.
//!
//! Each trait represents a boundary between the application core and an
//! external system. Implementations live in `src/adapters/`.

pub mod generation;
pub mod media;
pub mod transport;

pub use generation::{
    GeneratedImage, GenerationApi, GenerationOutput, ImageRequest, Role, TextRequest, TextStream,
    Turn,
};
pub use media::MediaFetcher;
pub use transport::{
    Button, CallbackQuery, IncomingMessage, Keyboard, RepliedMessage, SentMessage, Transport,
    Update,
};

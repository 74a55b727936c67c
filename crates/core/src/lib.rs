//! Subtitle translation dispatch engine.
//!
//! A document is parsed into entries ([`srt`]), its distinct texts are
//! batched ([`dispatch`]) and resolved through a rate-limited pool of slots
//! ([`limiter`]) with bounded retries ([`retry`]), then substituted back and
//! serialized ([`pipeline`]).

pub mod archive;
pub mod cancel;
pub mod config;
pub mod dispatch;
pub mod encoding;
pub mod limiter;
pub mod pipeline;
pub mod progress;
pub mod retry;
pub mod srt;
pub mod translate;

pub use cancel::CancelToken;
pub use config::EngineConfig;
pub use pipeline::{FileStatus, FileTranslationResult, Pipeline, SourceDocument};
pub use progress::{NoProgress, Progress};
pub use translate::{ProviderError, Translator};

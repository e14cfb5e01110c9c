//! Captioning backends.
//!
//! A backend turns one decoded image into one line of descriptive text. The
//! set of backends is closed: a [`BackendKind`] is parsed once at startup and
//! an unsupported name fails there, never per-request.

use async_trait::async_trait;
use strum::{Display, EnumString};
use thiserror::Error;

use crate::imaging::ImagePayload;

pub mod mock;
pub mod remote;

#[cfg(feature = "blip")]
pub mod blip;

/// Failure reported by a backend for a single captioning request.
///
/// The `Display` form is exactly the backend's message; it is stored verbatim
/// on the failed task record.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct BackendError {
    message: String,
}

impl BackendError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// A captioning capability.
///
/// Implementations may take seconds to minutes per call and may fail on
/// malformed input. The task runner serializes calls through its single
/// worker; the synchronous route can still overlap one extra call, so
/// implementations that cannot tolerate that serialize internally.
#[async_trait]
pub trait CaptionBackend: Send + Sync {
    /// Model name reported alongside results.
    fn name(&self) -> &str;

    /// Produce a caption for `image`.
    async fn generate(&self, image: &ImagePayload) -> Result<String, BackendError>;
}

/// The closed set of selectable backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(ascii_case_insensitive, serialize_all = "lowercase")]
pub enum BackendKind {
    /// Canned captions, no model; development and tests.
    Mock,
    /// OpenAI-compatible hosted vision model.
    Remote,
    /// Local BLIP captioning on candle (requires the `blip` cargo feature).
    Blip,
}

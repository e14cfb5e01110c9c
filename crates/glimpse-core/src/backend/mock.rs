//! Canned-caption backend for development and tests.

use std::time::Duration;

use async_trait::async_trait;

use crate::backend::{BackendError, CaptionBackend};
use crate::imaging::ImagePayload;

/// Returns a fixed caption, optionally after an artificial delay.
///
/// The default configuration lets the whole service run end-to-end without
/// any model weights.
#[derive(Debug, Clone)]
pub struct MockBackend {
    caption: String,
    delay: Duration,
    failure: Option<String>,
}

impl MockBackend {
    pub fn new(caption: impl Into<String>) -> Self {
        Self {
            caption: caption.into(),
            delay: Duration::ZERO,
            failure: None,
        }
    }

    /// A backend that fails every request with `message`.
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            caption: String::new(),
            delay: Duration::ZERO,
            failure: Some(message.into()),
        }
    }

    /// Sleep for `delay` before each response, to imitate a slow model.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new("a picture with no particular subject")
    }
}

#[async_trait]
impl CaptionBackend for MockBackend {
    fn name(&self) -> &str {
        "mock"
    }

    async fn generate(&self, _image: &ImagePayload) -> Result<String, BackendError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        match &self.failure {
            Some(message) => Err(BackendError::new(message.clone())),
            None => Ok(self.caption.clone()),
        }
    }
}

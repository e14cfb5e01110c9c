//! Shared application state injected into every handler.

use std::sync::Arc;

use glimpse_core::TaskRunner;
use glimpse_core::backend::CaptionBackend;

use crate::config::Config;

/// State shared across all HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    /// Server configuration, frozen at startup.
    pub config: Arc<Config>,
    /// The captioning model selected at startup; used directly by the
    /// synchronous route.
    pub backend: Arc<dyn CaptionBackend>,
    /// Bounded queue plus background worker for asynchronous captioning.
    pub runner: TaskRunner,
}

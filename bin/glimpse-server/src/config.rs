//! Server configuration, loaded from environment variables at startup.

use glimpse_core::backend::BackendKind;

/// Runtime configuration for glimpse-server.
///
/// Every field has a default so the server works out-of-the-box; only the
/// `remote` backend requires explicit settings.
#[derive(Debug, Clone)]
pub struct Config {
    /// TCP address to bind (default: `"127.0.0.1:5000"`, from
    /// `GLIMPSE_HOST` + `GLIMPSE_PORT`).
    pub bind_address: String,

    /// Which captioning backend to run (default: `mock`).
    pub backend: BackendKind,

    /// Inference device for local backends: `"cpu"` or `"cuda"`.
    pub device: String,

    /// Largest image dimension kept after upload normalization; bigger
    /// images are downscaled preserving aspect ratio.
    pub max_image_size: u32,

    /// Pending-task capacity of the caption queue.
    pub queue_capacity: usize,

    /// Worker idle re-check interval in milliseconds.
    pub poll_interval_ms: u64,

    /// `tracing` filter string, e.g. `"info"` or `"debug,tower_http=warn"`.
    pub log_level: String,

    /// When `true`, emit log records as newline-delimited JSON.
    pub log_json: bool,

    /// API root for the `remote` backend, e.g. `https://api.openai.com/v1`.
    pub remote_url: Option<String>,

    /// Model name for the `remote` backend.
    pub remote_model: Option<String>,

    /// Optional bearer token for the `remote` backend.
    pub remote_api_key: Option<String>,
}

impl Config {
    /// Build [`Config`] from environment variables, falling back to defaults.
    ///
    /// An unknown backend name is a hard error: model selection must fail at
    /// startup, never per-request.
    pub fn from_env() -> anyhow::Result<Self> {
        let backend_name = env_or("GLIMPSE_BACKEND", "mock");
        let backend = backend_name.parse::<BackendKind>().map_err(|_| {
            anyhow::anyhow!(
                "unsupported backend '{backend_name}' (expected mock, remote, or blip)"
            )
        })?;

        Ok(Self {
            bind_address: format!(
                "{}:{}",
                env_or("GLIMPSE_HOST", "127.0.0.1"),
                parse_env::<u16>("GLIMPSE_PORT", 5000),
            ),
            backend,
            device: env_or("GLIMPSE_DEVICE", "cpu"),
            max_image_size: parse_env("GLIMPSE_MAX_IMAGE_SIZE", 1024),
            queue_capacity: parse_env("GLIMPSE_QUEUE_CAPACITY", 5),
            poll_interval_ms: parse_env("GLIMPSE_POLL_INTERVAL_MS", 100),
            log_level: env_or("GLIMPSE_LOG", "info,glimpse_server=debug,glimpse_core=debug"),
            log_json: std::env::var("GLIMPSE_LOG_JSON")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
            remote_url: std::env::var("GLIMPSE_REMOTE_URL").ok(),
            remote_model: std::env::var("GLIMPSE_REMOTE_MODEL").ok(),
            remote_api_key: std::env::var("GLIMPSE_REMOTE_API_KEY").ok(),
        })
    }
}

// ── private helpers ──────────────────────────────────────────────────────────

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_owned())
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

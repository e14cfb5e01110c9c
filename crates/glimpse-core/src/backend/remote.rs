//! Captioning via an OpenAI-compatible chat-completions API.
//!
//! The request/response types follow the OpenAI vision-message shape so any
//! compatible server (hosted or local) works unmodified. The image travels
//! inline as a base64 `data:` URL; the first choice's message content is the
//! caption.

use anyhow::Context;
use async_trait::async_trait;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::backend::{BackendError, CaptionBackend};
use crate::imaging::ImagePayload;

const CAPTION_PROMPT: &str = "Describe this image in one short sentence.";

/// Connection settings for [`RemoteBackend`].
#[derive(Debug, Clone)]
pub struct RemoteOptions {
    /// API root, e.g. `https://api.openai.com/v1`.
    pub base_url: String,
    /// Model identifier passed through to the API.
    pub model: String,
    /// Optional bearer token.
    pub api_key: Option<String>,
}

/// Backend that delegates captioning to a hosted vision model.
///
/// No request timeout is set: captioning can legitimately take minutes and
/// the task queue already isolates slow calls from submitters.
pub struct RemoteBackend {
    client: reqwest::Client,
    options: RemoteOptions,
}

impl RemoteBackend {
    pub fn new(options: RemoteOptions) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .context("building HTTP client for the remote caption backend")?;
        Ok(Self { client, options })
    }
}

// ── Wire types ─────────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: Vec<ContentPart<'a>>,
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart<'a> {
    Text { text: &'a str },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: AssistantMessage,
}

#[derive(Deserialize)]
struct AssistantMessage {
    content: String,
}

#[async_trait]
impl CaptionBackend for RemoteBackend {
    fn name(&self) -> &str {
        &self.options.model
    }

    async fn generate(&self, image: &ImagePayload) -> Result<String, BackendError> {
        let png = image
            .to_png_bytes()
            .map_err(|e| BackendError::new(e.to_string()))?;
        let data_url = format!(
            "data:image/png;base64,{}",
            base64::engine::general_purpose::STANDARD.encode(&png)
        );

        let request = ChatRequest {
            model: &self.options.model,
            messages: vec![ChatMessage {
                role: "user",
                content: vec![
                    ContentPart::Text {
                        text: CAPTION_PROMPT,
                    },
                    ContentPart::ImageUrl {
                        image_url: ImageUrl { url: data_url },
                    },
                ],
            }],
            max_tokens: 128,
        };

        let url = format!(
            "{}/chat/completions",
            self.options.base_url.trim_end_matches('/')
        );
        let mut call = self.client.post(&url).json(&request);
        if let Some(key) = &self.options.api_key {
            call = call.bearer_auth(key);
        }

        let response = call
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| BackendError::new(format!("caption API request failed: {e}")))?;

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| BackendError::new(format!("caption API returned malformed JSON: {e}")))?;

        let caption = body
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content.trim().to_owned())
            .filter(|c| !c.is_empty())
            .ok_or_else(|| BackendError::new("caption API returned no choices"))?;

        debug!(model = %self.options.model, "remote caption received");
        Ok(caption)
    }
}

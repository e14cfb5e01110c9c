//! Local BLIP captioning on candle.
//!
//! Weights and tokenizer come from the Hugging Face hub once at construction;
//! generation is greedy decoding on a blocking thread. The model holds a kv
//! cache and is therefore guarded by a mutex: calls are serialized even when
//! the synchronous route overlaps the queue worker.

use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::generation::LogitsProcessor;
use candle_transformers::models::blip;
use tokenizers::Tokenizer;
use tracing::info;

use crate::backend::{BackendError, CaptionBackend};
use crate::imaging::ImagePayload;

const MODEL_REPO: &str = "Salesforce/blip-image-captioning-large";
/// `[DEC]` opens every caption; `[SEP]` closes it.
const BOS_TOKEN: u32 = 30522;
const EOS_TOKEN: u32 = 102;
const MAX_TOKENS: usize = 64;
/// CLIP-style channel normalization used by BLIP's vision tower.
const IMAGE_MEAN: [f32; 3] = [0.481_454_66, 0.457_827_5, 0.408_210_73];
const IMAGE_STD: [f32; 3] = [0.268_629_54, 0.261_302_6, 0.275_777_1];
const IMAGE_DIM: usize = 384;

pub struct BlipBackend {
    model: Arc<Mutex<blip::BlipForConditionalGeneration>>,
    tokenizer: Tokenizer,
    device: Device,
}

impl BlipBackend {
    /// Fetch (or reuse cached) weights and load the model onto `device`
    /// (`"cpu"` or `"cuda"`). Runs at startup; a failure here aborts the
    /// process instead of surfacing per-request.
    pub fn load(device: &str) -> anyhow::Result<Self> {
        let device = match device {
            "cpu" => Device::Cpu,
            "cuda" => Device::new_cuda(0).context("initializing CUDA device")?,
            other => {
                return Err(anyhow!(
                    "unsupported device '{other}' (expected 'cpu' or 'cuda')"
                ));
            }
        };

        let api = hf_hub::api::sync::Api::new().context("creating Hugging Face hub client")?;
        let repo = api.model(MODEL_REPO.to_string());
        let weights = repo
            .get("model.safetensors")
            .context("fetching BLIP weights")?;
        let tokenizer_file = repo
            .get("tokenizer.json")
            .context("fetching BLIP tokenizer")?;

        let tokenizer =
            Tokenizer::from_file(tokenizer_file).map_err(|e| anyhow!("loading tokenizer: {e}"))?;

        let vb = unsafe { VarBuilder::from_mmaped_safetensors(&[weights], DType::F32, &device)? };
        let config = blip::Config::image_captioning_large();
        let model = blip::BlipForConditionalGeneration::new(&config, vb)
            .context("building BLIP model")?;

        info!(repo = MODEL_REPO, "BLIP model loaded");
        Ok(Self {
            model: Arc::new(Mutex::new(model)),
            tokenizer,
            device,
        })
    }
}

#[async_trait]
impl CaptionBackend for BlipBackend {
    fn name(&self) -> &str {
        "blip-image-captioning-large"
    }

    async fn generate(&self, image: &ImagePayload) -> Result<String, BackendError> {
        let model = Arc::clone(&self.model);
        let tokenizer = self.tokenizer.clone();
        let device = self.device.clone();
        let rgb = image.as_rgb().clone();

        tokio::task::spawn_blocking(move || caption_blocking(&model, &tokenizer, &device, rgb))
            .await
            .map_err(|e| BackendError::new(format!("caption thread failed: {e}")))?
            .map_err(|e| BackendError::new(e.to_string()))
    }
}

fn caption_blocking(
    model: &Mutex<blip::BlipForConditionalGeneration>,
    tokenizer: &Tokenizer,
    device: &Device,
    rgb: image::RgbImage,
) -> anyhow::Result<String> {
    let pixels = preprocess(rgb, device)?;

    let mut model = model.lock().map_err(|_| anyhow!("model lock poisoned"))?;
    model.reset_kv_cache();

    let image_embeds = pixels.unsqueeze(0)?.apply(model.vision_model())?;

    let mut logits_processor = LogitsProcessor::new(1337, None, None);
    let mut token_ids = vec![BOS_TOKEN];
    for index in 0..MAX_TOKENS {
        // After the first step only the newest token is fed; the kv cache
        // carries the rest.
        let context_size = if index > 0 { 1 } else { token_ids.len() };
        let start_pos = token_ids.len().saturating_sub(context_size);
        let input_ids = Tensor::new(&token_ids[start_pos..], device)?.unsqueeze(0)?;
        let logits = model.text_decoder().forward(&input_ids, &image_embeds)?;
        let logits = logits.squeeze(0)?;
        let logits = logits.get(logits.dim(0)? - 1)?;
        let token = logits_processor.sample(&logits)?;
        if token == EOS_TOKEN {
            break;
        }
        token_ids.push(token);
    }

    let caption = tokenizer
        .decode(&token_ids[1..], true)
        .map_err(|e| anyhow!("detokenization failed: {e}"))?;
    Ok(caption.trim().to_owned())
}

/// Resize to the 384×384 BLIP input, then normalize channels to the CLIP
/// mean/std expected by the vision tower.
fn preprocess(rgb: image::RgbImage, device: &Device) -> anyhow::Result<Tensor> {
    let resized = image::DynamicImage::ImageRgb8(rgb).resize_to_fill(
        IMAGE_DIM as u32,
        IMAGE_DIM as u32,
        image::imageops::FilterType::Triangle,
    );
    let data = resized.to_rgb8().into_raw();
    let pixels = Tensor::from_vec(data, (IMAGE_DIM, IMAGE_DIM, 3), device)?
        .permute((2, 0, 1))?
        .to_dtype(DType::F32)?;
    let mean = Tensor::new(&IMAGE_MEAN, device)?.reshape((3, 1, 1))?;
    let std = Tensor::new(&IMAGE_STD, device)?.reshape((3, 1, 1))?;
    let pixels = ((pixels / 255.)?.broadcast_sub(&mean))?.broadcast_div(&std)?;
    Ok(pixels)
}

use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::bert::{BertModel, Config};
use hf_hub::api::sync::Api;
use tokenizers::{PaddingParams, Tokenizer, TruncationParams};
use tracing::info;

use crate::{
    embedding::Embedder,
    error::{Error, Result},
};

pub const DEFAULT_MODEL_ID: &str =
    "sentence-transformers/paraphrase-multilingual-MiniLM-L12-v2";
pub const MODEL_ENV_VAR: &str = "POSTSEEK_MODEL";

/// Longest token sequence fed to the encoder; longer posts are truncated.
const MAX_SEQUENCE_LENGTH: usize = 128;

/// Select the best available compute device.
///
/// Uses CUDA when compiled with the `cuda` feature, Metal when compiled with
/// the `metal` feature, and falls back to CPU otherwise.
fn default_device() -> Device {
    #[cfg(feature = "cuda")]
    {
        if let Ok(device) = Device::new_cuda(0) {
            return device;
        }
    }

    #[cfg(feature = "metal")]
    {
        if let Ok(device) = Device::new_metal(0) {
            return device;
        }
    }

    Device::Cpu
}

struct LoadedModel {
    model: BertModel,
    tokenizer: Tokenizer,
    device: Device,
}

/// Manages the sentence embedding model lifecycle, loading it on first use.
///
/// Embeddings are the attention-masked mean of the encoder's last hidden
/// state, L2-normalized, so cosine distance between them lies in `[0, 2]`.
pub struct ModelManager {
    model: Option<LoadedModel>,
    model_id: String,
}

impl Default for ModelManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ModelManager {
    /// Creates a new `ModelManager`. The model ID is resolved from:
    /// 1. The `POSTSEEK_MODEL` environment variable, if set
    /// 2. Otherwise, the default multilingual MiniLM model
    ///
    /// Nothing is downloaded or loaded until the first call to `embed`.
    pub fn new() -> Self {
        let model_id = std::env::var(MODEL_ENV_VAR)
            .unwrap_or_else(|_| DEFAULT_MODEL_ID.to_string());

        Self {
            model: None,
            model_id,
        }
    }

    /// Creates a `ModelManager` with an explicit model ID, bypassing
    /// environment variable resolution.
    pub fn with_model_id(model_id: String) -> Self {
        Self {
            model: None,
            model_id,
        }
    }

    /// Returns `true` if the model has already been loaded into memory.
    pub fn is_loaded(&self) -> bool {
        self.model.is_some()
    }

    /// Ensures the model is loaded, downloading from HuggingFace Hub if needed.
    fn ensure_loaded(&mut self) -> Result<&LoadedModel> {
        if self.model.is_none() {
            self.model = Some(self.load()?);
        }

        self.model
            .as_ref()
            .ok_or_else(|| Error::Config("model failed to load".to_string()))
    }

    fn load(&self) -> Result<LoadedModel> {
        info!(model = %self.model_id, "loading embedding model");
        let repo = Api::new()?.model(self.model_id.clone());
        let config_path = repo.get("config.json")?;
        let tokenizer_path = repo.get("tokenizer.json")?;
        let weights_path = repo.get("model.safetensors")?;

        let config: Config =
            serde_json::from_str(&std::fs::read_to_string(config_path)?)?;

        let mut tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| Error::Embedding(format!("failed to load tokenizer: {e}")))?;
        tokenizer.with_padding(Some(PaddingParams::default()));
        tokenizer
            .with_truncation(Some(TruncationParams {
                max_length: MAX_SEQUENCE_LENGTH,
                ..Default::default()
            }))
            .map_err(|e| Error::Embedding(format!("failed to configure tokenizer: {e}")))?;

        let device = default_device();
        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&[weights_path], DType::F32, &device)?
        };
        let model = BertModel::load(vb, &config)?;

        Ok(LoadedModel {
            model,
            tokenizer,
            device,
        })
    }
}

impl Embedder for ModelManager {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn embed(&mut self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let loaded = self.ensure_loaded()?;
        let encodings = loaded
            .tokenizer
            .encode_batch(texts.to_vec(), true)
            .map_err(|e| Error::Embedding(format!("tokenization failed: {e}")))?;

        let mut ids = Vec::with_capacity(encodings.len());
        let mut masks = Vec::with_capacity(encodings.len());
        for encoding in &encodings {
            ids.push(Tensor::new(encoding.get_ids(), &loaded.device)?);
            masks.push(Tensor::new(encoding.get_attention_mask(), &loaded.device)?);
        }
        let input_ids = Tensor::stack(&ids, 0)?;
        let attention_mask = Tensor::stack(&masks, 0)?;
        let token_type_ids = input_ids.zeros_like()?;

        // [batch, tokens, hidden]
        let hidden = loaded.model.forward(
            &input_ids,
            &token_type_ids,
            Some(&attention_mask),
        )?;

        let pooled = mean_pool(&hidden, &attention_mask)?;
        let normalized = normalize_l2(&pooled)?;
        Ok(normalized.to_vec2::<f32>()?)
    }
}

/// Average token embeddings, ignoring padding positions.
fn mean_pool(hidden: &Tensor, attention_mask: &Tensor) -> Result<Tensor> {
    let mask = attention_mask.to_dtype(hidden.dtype())?.unsqueeze(2)?;
    let summed = hidden.broadcast_mul(&mask)?.sum(1)?;
    let counts = mask.sum(1)?.affine(1.0, 1e-9)?;
    Ok(summed.broadcast_div(&counts)?)
}

fn normalize_l2(v: &Tensor) -> Result<Tensor> {
    let norms = v.sqr()?.sum_keepdim(1)?.sqrt()?.affine(1.0, 1e-12)?;
    Ok(v.broadcast_div(&norms)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn custom_model_id() {
        let manager = ModelManager::with_model_id("custom/model".to_string());
        assert_eq!(manager.model_id(), "custom/model");
        assert!(!manager.is_loaded());
    }

    #[test]
    fn empty_batch_does_not_load_model() {
        let mut manager = ModelManager::with_model_id("custom/model".to_string());
        assert!(manager.embed(&[]).unwrap().is_empty());
        assert!(!manager.is_loaded());
    }

    #[test]
    fn mean_pool_ignores_padding() {
        // batch of 1, 3 tokens, dim 2; last token is padding.
        let hidden = Tensor::new(
            &[[[1.0f32, 2.0], [3.0, 4.0], [100.0, 100.0]]],
            &Device::Cpu,
        )
        .unwrap();
        let mask = Tensor::new(&[[1u32, 1, 0]], &Device::Cpu).unwrap();

        let pooled = mean_pool(&hidden, &mask).unwrap();
        assert_eq!(pooled.to_vec2::<f32>().unwrap(), vec![vec![2.0, 3.0]]);
    }

    #[test]
    fn normalize_produces_unit_vectors() {
        let v = Tensor::new(&[[3.0f32, 4.0], [0.0, 2.0]], &Device::Cpu).unwrap();
        let n = normalize_l2(&v).unwrap().to_vec2::<f32>().unwrap();
        assert!((n[0][0] - 0.6).abs() < 1e-6);
        assert!((n[0][1] - 0.8).abs() < 1e-6);
        assert!((n[1][1] - 1.0).abs() < 1e-6);
    }
}

use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Instant;

use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::xlm_roberta::{Config as XLMRobertaConfig, XLMRobertaModel};
use tokenizers::Tokenizer;
use tracing::{info, warn};

use harbor_core::Embedder;

use crate::device::select_device;
use crate::pool::masked_mean_l2;
use crate::tokenize::tokenize_batch;

/// XLM-RoBERTa sentence embedder loaded from a local model directory
/// (`tokenizer.json`, `config.json`, `pytorch_model.bin`).
pub struct XlmRobertaEmbedder {
    model: XLMRobertaModel,
    tokenizer: Tokenizer,
    device: Device,
    dim: usize,
    max_len: usize,
}

impl XlmRobertaEmbedder {
    pub fn from_dir(model_dir: &Path, max_len: usize) -> Result<Self> {
        let device = select_device();
        info!(dir = %model_dir.display(), "loading text embedding model");

        let tokenizer_path = model_dir.join("tokenizer.json");
        let tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| anyhow!("Failed to load tokenizer from {}: {}", tokenizer_path.display(), e))?;

        let config: XLMRobertaConfig =
            serde_json::from_str(&std::fs::read_to_string(model_dir.join("config.json"))?)?;
        let dim = config.hidden_size;

        let weights = candle_core::pickle::read_all(model_dir.join("pytorch_model.bin"))?;
        let weights: HashMap<String, Tensor> = weights.into_iter().collect();
        let vb = VarBuilder::from_tensors(weights, DType::F32, &device);
        let model = XLMRobertaModel::new(&config, vb)?;

        info!(dim, "text embedding model loaded");
        Ok(Self { model, tokenizer, device, dim, max_len })
    }

    /// One forward pass over the whole batch.
    pub fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let start = Instant::now();
        let (input_ids, attention_mask) = tokenize_batch(&self.tokenizer, texts, self.max_len, &self.device)?;
        let token_type_ids = input_ids.zeros_like()?;
        let hidden = self
            .model
            .forward(&input_ids, &attention_mask, &token_type_ids, None, None, None)?;
        let pooled = masked_mean_l2(&hidden, &attention_mask)?;
        let rows: Vec<Vec<f32>> = pooled.to_device(&Device::Cpu)?.to_dtype(DType::F32)?.to_vec2()?;
        let elapsed_ms = start.elapsed().as_millis() as u64;
        if elapsed_ms > 100 * texts.len() as u64 {
            warn!(elapsed_ms, batch = texts.len(), "slow embedding batch");
        }
        Ok(rows)
    }
}

impl Embedder for XlmRobertaEmbedder {
    fn dim(&self) -> usize {
        self.dim
    }

    fn max_len(&self) -> usize {
        self.max_len
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.embed_texts(texts)
    }
}

/// `APP_MODEL_DIR`, then `MODEL_DIR`, then the configured directory.
pub fn resolve_model_dir(configured: Option<&str>) -> Result<PathBuf> {
    for var in ["APP_MODEL_DIR", "MODEL_DIR"] {
        if let Ok(dir) = std::env::var(var) {
            let p = PathBuf::from(dir);
            if p.exists() {
                return Ok(p);
            }
        }
    }
    if let Some(dir) = configured {
        let p = harbor_core::config::expand_path(dir);
        if p.exists() {
            return Ok(p);
        }
    }
    Err(anyhow!("Could not locate text embedding model directory"))
}

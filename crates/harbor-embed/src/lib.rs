pub mod hash;
pub mod histogram;

#[cfg(feature = "candle")]
pub mod device;
#[cfg(feature = "candle")]
pub mod model;
#[cfg(feature = "candle")]
pub mod pool;
#[cfg(feature = "candle")]
pub mod tokenize;

use anyhow::Result;
use tracing::info;

use harbor_core::Embedder;

pub use hash::HashTextEmbedder;
pub use histogram::ByteHistogramEmbedder;

/// Text embedder for a plugin instance: the XLM-RoBERTa model when the
/// `candle` feature is on and `model_dir` is set, otherwise the hashed
/// embedder with `dim` dimensions. `APP_USE_FAKE_EMBEDDINGS=1` forces the
/// hashed embedder.
pub fn text_embedder(model_dir: Option<&str>, dim: usize) -> Result<Box<dyn Embedder>> {
    let use_fake = std::env::var("APP_USE_FAKE_EMBEDDINGS")
        .ok()
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false);

    if let (false, Some(dir)) = (use_fake, model_dir) {
        if let Some(model) = model_embedder(dir)? {
            return Ok(model);
        }
    }

    info!(dim, "using hashed text embeddings");
    Ok(Box::new(HashTextEmbedder::new(dim)))
}

#[cfg(feature = "candle")]
fn model_embedder(dir: &str) -> Result<Option<Box<dyn Embedder>>> {
    let dir = model::resolve_model_dir(Some(dir))?;
    Ok(Some(Box::new(model::XlmRobertaEmbedder::from_dir(&dir, 256)?)))
}

#[cfg(not(feature = "candle"))]
fn model_embedder(dir: &str) -> Result<Option<Box<dyn Embedder>>> {
    tracing::warn!(dir, "model_dir set but built without the candle feature; using hashed embeddings");
    Ok(None)
}

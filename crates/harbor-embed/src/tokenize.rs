use anyhow::{anyhow, ensure, Result};
use candle_core::{Device, Tensor};
use tokenizers::Tokenizer;

/// XLM-RoBERTa `<pad>` id.
const PAD_ID: u32 = 1;

/// Encode `texts` as one `[B, L]` batch, where `L` is the longest encoding
/// capped at `max_len`. Returns `(input_ids, attention_mask)`.
pub fn tokenize_batch(tokenizer: &Tokenizer, texts: &[String], max_len: usize, device: &Device) -> Result<(Tensor, Tensor)> {
    ensure!(!texts.is_empty(), "cannot tokenize an empty batch");
    let encodings = tokenizer
        .encode_batch(texts.to_vec(), true)
        .map_err(|e| anyhow!("Tokenization failed: {}", e))?;
    let width = encodings.iter().map(|e| e.get_ids().len().min(max_len)).max().unwrap_or(0).max(1);

    let mut ids = Vec::with_capacity(texts.len() * width);
    let mut mask = Vec::with_capacity(texts.len() * width);
    for enc in &encodings {
        let n = enc.get_ids().len().min(width);
        ids.extend_from_slice(&enc.get_ids()[..n]);
        mask.extend_from_slice(&enc.get_attention_mask()[..n]);
        ids.resize(ids.len() + width - n, PAD_ID);
        mask.resize(mask.len() + width - n, 0);
    }
    let input_ids = Tensor::from_vec(ids, (texts.len(), width), device)?;
    let attention_mask = Tensor::from_vec(mask, (texts.len(), width), device)?;
    Ok((input_ids, attention_mask))
}

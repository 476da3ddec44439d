use anyhow::{bail, Result};

use crate::hash::l2_normalize;

/// Image descriptor computed directly from the encoded bytes: a normalised
/// histogram with `bins` buckets. Stands in for a colour histogram where no
/// decoder is available.
#[derive(Debug, Clone)]
pub struct ByteHistogramEmbedder {
    bins: usize,
}

impl ByteHistogramEmbedder {
    pub fn new(bins: usize) -> Result<Self> {
        if bins == 0 || bins > 256 || 256 % bins != 0 {
            bail!("histogram bins must divide 256, got {bins}");
        }
        Ok(Self { bins })
    }

    pub fn dim(&self) -> usize {
        self.bins
    }

    pub fn embed_bytes(&self, bytes: &[u8]) -> Result<Vec<f32>> {
        if bytes.is_empty() {
            bail!("empty image");
        }
        let width = 256 / self.bins;
        let mut v = vec![0f32; self.bins];
        for b in bytes {
            v[*b as usize / width] += 1.0;
        }
        l2_normalize(&mut v);
        Ok(v)
    }
}

//! Quantized embeddings: int8 components plus scalar dequantization
//! parameters. One vector of dimension D occupies D + 8 bytes on disk,
//! against 4D for float32, at ~1% cosine error.

use serde::{Deserialize, Serialize};

/// A quantized unit vector. All vectors in one store share a dimension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuantizedVector {
    pub data: Vec<i8>,
    pub scale: f32,
    pub offset: f32,
}

impl QuantizedVector {
    /// Bytes needed on disk for a vector of `dim` components.
    pub const fn disk_size(dim: usize) -> usize {
        dim + 8
    }

    pub fn zeros(dim: usize) -> Self {
        Self {
            data: vec![0; dim],
            scale: 1.0,
            offset: 0.0,
        }
    }

    pub fn dim(&self) -> usize {
        self.data.len()
    }

    pub fn is_zero(&self) -> bool {
        self.data.iter().all(|&v| v == 0) && self.offset.abs() < 1e-8
    }

    /// Quantize a float vector. Components map linearly onto [-127, 127].
    pub fn from_float(v: &[f32]) -> Self {
        let mut min_val = f32::MAX;
        let mut max_val = f32::MIN;
        for &x in v {
            min_val = min_val.min(x);
            max_val = max_val.max(x);
        }
        let mut range = max_val - min_val;
        if !range.is_finite() || range < 1e-8 {
            range = 1.0;
        }

        let scale = range / 254.0;
        let offset = min_val + range / 2.0;

        let data = v
            .iter()
            .map(|&x| {
                let normalized = (x - offset) / scale;
                normalized.round().clamp(-127.0, 127.0) as i8
            })
            .collect();

        Self {
            data,
            scale,
            offset,
        }
    }

    /// Dequantize back to float32.
    pub fn to_float(&self) -> Vec<f32> {
        self.data
            .iter()
            .map(|&q| q as f32 * self.scale + self.offset)
            .collect()
    }

    /// Approximate cosine similarity straight over the int8 form.
    pub fn cosine_approx(&self, other: &QuantizedVector) -> f32 {
        debug_assert_eq!(self.data.len(), other.data.len());
        let mut dot: i64 = 0;
        let mut norm_a: i64 = 0;
        let mut norm_b: i64 = 0;
        for (&a, &b) in self.data.iter().zip(other.data.iter()) {
            dot += a as i64 * b as i64;
            norm_a += a as i64 * a as i64;
            norm_b += b as i64 * b as i64;
        }
        let denom = (norm_a as f32).sqrt() * (norm_b as f32).sqrt();
        if denom > 0.0 {
            dot as f32 / denom
        } else {
            0.0
        }
    }

    /// Exact cosine through dequantization.
    pub fn cosine_exact(&self, other: &QuantizedVector) -> f32 {
        chitta_embedder::cosine(&self.to_float(), &other.to_float())
    }

    /// Approximate cosine over raw on-disk component bytes, skipping the
    /// dequantization parameters entirely.
    pub fn cosine_approx_raw(a: &[u8], b: &[u8]) -> f32 {
        debug_assert_eq!(a.len(), b.len());
        let mut dot: i64 = 0;
        let mut norm_a: i64 = 0;
        let mut norm_b: i64 = 0;
        for (&xa, &xb) in a.iter().zip(b.iter()) {
            let xa = xa as i8 as i64;
            let xb = xb as i8 as i64;
            dot += xa * xb;
            norm_a += xa * xa;
            norm_b += xb * xb;
        }
        let denom = (norm_a as f32).sqrt() * (norm_b as f32).sqrt();
        if denom > 0.0 {
            dot as f32 / denom
        } else {
            0.0
        }
    }

    /// Serialize into exactly `disk_size(dim)` bytes.
    pub fn write_to(&self, out: &mut [u8]) {
        let dim = self.data.len();
        debug_assert_eq!(out.len(), Self::disk_size(dim));
        for (dst, &src) in out[..dim].iter_mut().zip(self.data.iter()) {
            *dst = src as u8;
        }
        out[dim..dim + 4].copy_from_slice(&self.scale.to_le_bytes());
        out[dim + 4..dim + 8].copy_from_slice(&self.offset.to_le_bytes());
    }

    /// Deserialize from exactly `disk_size(dim)` bytes.
    pub fn read_from(bytes: &[u8], dim: usize) -> Self {
        debug_assert_eq!(bytes.len(), Self::disk_size(dim));
        let data = bytes[..dim].iter().map(|&b| b as i8).collect();
        let scale = f32::from_le_bytes([bytes[dim], bytes[dim + 1], bytes[dim + 2], bytes[dim + 3]]);
        let offset = f32::from_le_bytes([
            bytes[dim + 4],
            bytes[dim + 5],
            bytes[dim + 6],
            bytes[dim + 7],
        ]);
        Self {
            data,
            scale,
            offset,
        }
    }
}

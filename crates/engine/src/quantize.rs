//! Vector codecs used for index storage
//!
//! - **fp32**: vectors stored as-is (4 bytes per dimension)
//! - **sq8**: per-dimension scalar quantization to one byte (4x compression)
//! - **rabitq**: one sign bit per dimension around the training centroid, plus a
//!   norm and a correction factor used by the distance estimator (~32x compression)
//!
//! Quantizers work on caller-provided byte buffers of [`Quantizer::code_size`]
//! bytes so codes can live directly in block storage.

use crate::distance::{inner_product, norm_sqr, Metric};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Storage encoding of vectors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QuantizationType {
    #[serde(rename = "fp32")]
    Fp32,
    #[serde(rename = "sq8")]
    Sq8,
    #[serde(rename = "rabitq")]
    RaBitQ,
}

impl QuantizationType {
    pub fn as_str(self) -> &'static str {
        match self {
            QuantizationType::Fp32 => "fp32",
            QuantizationType::Sq8 => "sq8",
            QuantizationType::RaBitQ => "rabitq",
        }
    }
}

impl FromStr for QuantizationType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "fp32" => Ok(QuantizationType::Fp32),
            "sq8" => Ok(QuantizationType::Sq8),
            "rabitq" => Ok(QuantizationType::RaBitQ),
            other => Err(Error::invalid_argument(format!(
                "unknown quantization type '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for QuantizationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Query-side state computed once per search and reused for every code
#[derive(Debug, Clone)]
pub struct PreparedQuery {
    pub vector: Vec<f32>,
    residual: Vec<f32>,
    residual_norm_sqr: f32,
    centroid_dot: f32,
}

impl PreparedQuery {
    fn plain(query: &[f32]) -> Self {
        Self {
            vector: query.to_vec(),
            residual: Vec::new(),
            residual_norm_sqr: 0.0,
            centroid_dot: 0.0,
        }
    }
}

/// Byte-oriented vector codec
pub trait Quantizer: Send + Sync {
    fn dim(&self) -> usize;

    /// Bytes per encoded vector
    fn code_size(&self) -> usize;

    /// Whether parameters have been learned from data
    fn is_trained(&self) -> bool;

    /// Learn parameters from a row-major batch of vectors
    fn train(&mut self, vectors: &[f32]);

    fn encode(&self, vector: &[f32], code: &mut [u8]);

    /// Lossy reconstruction of an encoded vector
    fn decode(&self, code: &[u8], out: &mut [f32]);

    fn prepare(&self, query: &[f32]) -> PreparedQuery {
        PreparedQuery::plain(query)
    }

    /// Distance between a prepared query and an encoded vector
    fn distance(&self, metric: Metric, query: &PreparedQuery, code: &[u8]) -> f32;
}

// ============================================================================
// fp32
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fp32Quantizer {
    dim: usize,
}

impl Fp32Quantizer {
    pub fn new(dim: usize) -> Self {
        Self { dim }
    }
}

impl Quantizer for Fp32Quantizer {
    fn dim(&self) -> usize {
        self.dim
    }

    fn code_size(&self) -> usize {
        self.dim * 4
    }

    fn is_trained(&self) -> bool {
        true
    }

    fn train(&mut self, _vectors: &[f32]) {}

    fn encode(&self, vector: &[f32], code: &mut [u8]) {
        for (chunk, value) in code.chunks_exact_mut(4).zip(vector) {
            chunk.copy_from_slice(&value.to_ne_bytes());
        }
    }

    fn decode(&self, code: &[u8], out: &mut [f32]) {
        for (chunk, value) in code.chunks_exact(4).zip(out.iter_mut()) {
            *value = f32::from_ne_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }
    }

    fn distance(&self, metric: Metric, query: &PreparedQuery, code: &[u8]) -> f32 {
        let mut decoded = vec![0.0f32; self.dim];
        self.decode(code, &mut decoded);
        metric.distance(&query.vector, &decoded)
    }
}

// ============================================================================
// sq8
// ============================================================================

/// Per-dimension affine mapping into [0, 255]
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ScalarRange {
    pub min: f32,
    pub scale: f32,
}

impl ScalarRange {
    fn new(min: f32, max: f32) -> Self {
        let range = max - min;
        let scale = if range > 0.0 { range / 255.0 } else { 1.0 };
        Self { min, scale }
    }

    #[inline]
    fn quantize(&self, value: f32) -> u8 {
        ((value - self.min) / self.scale).round().clamp(0.0, 255.0) as u8
    }

    #[inline]
    fn dequantize(&self, code: u8) -> f32 {
        code as f32 * self.scale + self.min
    }
}

/// Scalar quantizer trained on per-dimension min/max of the first batch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScalarQuantizer {
    dim: usize,
    ranges: Vec<ScalarRange>,
}

impl ScalarQuantizer {
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            ranges: Vec::new(),
        }
    }

    pub fn ranges(&self) -> &[ScalarRange] {
        &self.ranges
    }
}

impl Quantizer for ScalarQuantizer {
    fn dim(&self) -> usize {
        self.dim
    }

    fn code_size(&self) -> usize {
        self.dim
    }

    fn is_trained(&self) -> bool {
        self.ranges.len() == self.dim
    }

    fn train(&mut self, vectors: &[f32]) {
        let mut mins = vec![f32::INFINITY; self.dim];
        let mut maxs = vec![f32::NEG_INFINITY; self.dim];
        for row in vectors.chunks_exact(self.dim) {
            for (i, &value) in row.iter().enumerate() {
                mins[i] = mins[i].min(value);
                maxs[i] = maxs[i].max(value);
            }
        }
        self.ranges = mins
            .into_iter()
            .zip(maxs)
            .map(|(min, max)| {
                if min.is_finite() && max.is_finite() {
                    ScalarRange::new(min, max)
                } else {
                    ScalarRange::new(0.0, 0.0)
                }
            })
            .collect();
    }

    fn encode(&self, vector: &[f32], code: &mut [u8]) {
        for ((out, &value), range) in code.iter_mut().zip(vector).zip(&self.ranges) {
            *out = range.quantize(value);
        }
    }

    fn decode(&self, code: &[u8], out: &mut [f32]) {
        for ((value, &c), range) in out.iter_mut().zip(code).zip(&self.ranges) {
            *value = range.dequantize(c);
        }
    }

    fn distance(&self, metric: Metric, query: &PreparedQuery, code: &[u8]) -> f32 {
        let q = &query.vector;
        match metric {
            Metric::L2 => {
                let mut sum = 0.0f32;
                for i in 0..self.dim {
                    let diff = q[i] - self.ranges[i].dequantize(code[i]);
                    sum += diff * diff;
                }
                sum
            }
            Metric::InnerProduct => {
                let mut dot = 0.0f32;
                for i in 0..self.dim {
                    dot += q[i] * self.ranges[i].dequantize(code[i]);
                }
                1.0 - dot
            }
        }
    }
}

// ============================================================================
// rabitq
// ============================================================================

const RABITQ_HEADER: usize = 8;

/// Sign-bit quantizer around a training centroid.
///
/// Each code is `[residual norm: f32][alignment factor: f32][sign bits]`, where the
/// alignment factor is the cosine between the residual and its sign vector. The
/// distance estimator divides by it to undo the bias of projecting onto signs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RaBitQuantizer {
    dim: usize,
    centroid: Vec<f32>,
}

impl RaBitQuantizer {
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            centroid: Vec::new(),
        }
    }

    fn bits_len(&self) -> usize {
        (self.dim + 7) / 8
    }

    fn header(code: &[u8]) -> (f32, f32) {
        let norm = f32::from_le_bytes([code[0], code[1], code[2], code[3]]);
        let factor = f32::from_le_bytes([code[4], code[5], code[6], code[7]]);
        (norm, factor)
    }

    /// `<sign(code) / sqrt(d), v>`
    fn signed_projection(&self, bits: &[u8], v: &[f32]) -> f32 {
        let mut sum = 0.0f32;
        for (i, &value) in v.iter().enumerate() {
            if (bits[i / 8] >> (i % 8)) & 1 == 1 {
                sum += value;
            } else {
                sum -= value;
            }
        }
        sum / (self.dim as f32).sqrt()
    }
}

impl Quantizer for RaBitQuantizer {
    fn dim(&self) -> usize {
        self.dim
    }

    fn code_size(&self) -> usize {
        RABITQ_HEADER + self.bits_len()
    }

    fn is_trained(&self) -> bool {
        self.centroid.len() == self.dim
    }

    fn train(&mut self, vectors: &[f32]) {
        let mut centroid = vec![0.0f32; self.dim];
        let mut rows = 0usize;
        for row in vectors.chunks_exact(self.dim) {
            for (c, &value) in centroid.iter_mut().zip(row) {
                *c += value;
            }
            rows += 1;
        }
        if rows > 0 {
            for c in centroid.iter_mut() {
                *c /= rows as f32;
            }
        }
        self.centroid = centroid;
    }

    fn encode(&self, vector: &[f32], code: &mut [u8]) {
        let residual: Vec<f32> = vector
            .iter()
            .zip(&self.centroid)
            .map(|(v, c)| v - c)
            .collect();
        let norm = norm_sqr(&residual).sqrt();
        let factor = if norm > 0.0 {
            let abs_sum: f32 = residual.iter().map(|r| r.abs()).sum();
            abs_sum / ((self.dim as f32).sqrt() * norm)
        } else {
            1.0
        };

        code[0..4].copy_from_slice(&norm.to_le_bytes());
        code[4..8].copy_from_slice(&factor.to_le_bytes());
        let bits = &mut code[RABITQ_HEADER..];
        bits.fill(0);
        for (i, &r) in residual.iter().enumerate() {
            if r >= 0.0 {
                bits[i / 8] |= 1 << (i % 8);
            }
        }
    }

    fn decode(&self, code: &[u8], out: &mut [f32]) {
        let (norm, factor) = Self::header(code);
        let bits = &code[RABITQ_HEADER..];
        let magnitude = norm * factor / (self.dim as f32).sqrt();
        for (i, value) in out.iter_mut().enumerate() {
            let sign = if (bits[i / 8] >> (i % 8)) & 1 == 1 { 1.0 } else { -1.0 };
            *value = self.centroid[i] + sign * magnitude;
        }
    }

    fn prepare(&self, query: &[f32]) -> PreparedQuery {
        let residual: Vec<f32> = query
            .iter()
            .zip(&self.centroid)
            .map(|(q, c)| q - c)
            .collect();
        PreparedQuery {
            vector: query.to_vec(),
            residual_norm_sqr: norm_sqr(&residual),
            centroid_dot: inner_product(&self.centroid, query),
            residual,
        }
    }

    fn distance(&self, metric: Metric, query: &PreparedQuery, code: &[u8]) -> f32 {
        let (norm, factor) = Self::header(code);
        let bits = &code[RABITQ_HEADER..];
        let factor = if factor > f32::EPSILON { factor } else { 1.0 };
        match metric {
            Metric::L2 => {
                let estimate = norm * self.signed_projection(bits, &query.residual) / factor;
                (norm * norm + query.residual_norm_sqr - 2.0 * estimate).max(0.0)
            }
            Metric::InnerProduct => {
                let estimate = norm * self.signed_projection(bits, &query.vector) / factor;
                1.0 - (query.centroid_dot + estimate)
            }
        }
    }
}

// ============================================================================
// Dispatch
// ============================================================================

/// Any of the supported codecs, serializable alongside the codes it produced
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AnyQuantizer {
    Fp32(Fp32Quantizer),
    Sq8(ScalarQuantizer),
    RaBitQ(RaBitQuantizer),
}

impl AnyQuantizer {
    pub fn new(kind: QuantizationType, dim: usize) -> Self {
        match kind {
            QuantizationType::Fp32 => AnyQuantizer::Fp32(Fp32Quantizer::new(dim)),
            QuantizationType::Sq8 => AnyQuantizer::Sq8(ScalarQuantizer::new(dim)),
            QuantizationType::RaBitQ => AnyQuantizer::RaBitQ(RaBitQuantizer::new(dim)),
        }
    }

    pub fn kind(&self) -> QuantizationType {
        match self {
            AnyQuantizer::Fp32(_) => QuantizationType::Fp32,
            AnyQuantizer::Sq8(_) => QuantizationType::Sq8,
            AnyQuantizer::RaBitQ(_) => QuantizationType::RaBitQ,
        }
    }

    fn inner(&self) -> &dyn Quantizer {
        match self {
            AnyQuantizer::Fp32(q) => q,
            AnyQuantizer::Sq8(q) => q,
            AnyQuantizer::RaBitQ(q) => q,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn Quantizer {
        match self {
            AnyQuantizer::Fp32(q) => q,
            AnyQuantizer::Sq8(q) => q,
            AnyQuantizer::RaBitQ(q) => q,
        }
    }
}

impl Quantizer for AnyQuantizer {
    fn dim(&self) -> usize {
        self.inner().dim()
    }

    fn code_size(&self) -> usize {
        self.inner().code_size()
    }

    fn is_trained(&self) -> bool {
        self.inner().is_trained()
    }

    fn train(&mut self, vectors: &[f32]) {
        self.inner_mut().train(vectors)
    }

    fn encode(&self, vector: &[f32], code: &mut [u8]) {
        self.inner().encode(vector, code)
    }

    fn decode(&self, code: &[u8], out: &mut [f32]) {
        self.inner().decode(code, out)
    }

    fn prepare(&self, query: &[f32]) -> PreparedQuery {
        self.inner().prepare(query)
    }

    fn distance(&self, metric: Metric, query: &PreparedQuery, code: &[u8]) -> f32 {
        self.inner().distance(metric, query, code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distance::l2_sqr;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn random_batch(rows: usize, dim: usize, seed: u64) -> Vec<f32> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..rows * dim).map(|_| rng.gen::<f32>() * 2.0 - 1.0).collect()
    }

    fn encode_one(q: &AnyQuantizer, v: &[f32]) -> Vec<u8> {
        let mut code = vec![0u8; q.code_size()];
        q.encode(v, &mut code);
        code
    }

    #[test]
    fn test_code_sizes() {
        assert_eq!(AnyQuantizer::new(QuantizationType::Fp32, 10).code_size(), 40);
        assert_eq!(AnyQuantizer::new(QuantizationType::Sq8, 10).code_size(), 10);
        assert_eq!(AnyQuantizer::new(QuantizationType::RaBitQ, 10).code_size(), 10);
        assert_eq!(AnyQuantizer::new(QuantizationType::RaBitQ, 128).code_size(), 24);
    }

    #[test]
    fn test_fp32_is_lossless() {
        let q = AnyQuantizer::new(QuantizationType::Fp32, 4);
        let v = [0.25, -1.5, 3.0, 0.0];
        let code = encode_one(&q, &v);
        let mut out = [0.0; 4];
        q.decode(&code, &mut out);
        assert_eq!(out, v);
        let prepared = q.prepare(&v);
        assert_eq!(q.distance(Metric::L2, &prepared, &code), 0.0);
    }

    #[test]
    fn test_sq8_reconstruction_error_is_bounded() {
        let dim = 32;
        let batch = random_batch(200, dim, 7);
        let mut q = AnyQuantizer::new(QuantizationType::Sq8, dim);
        assert!(!q.is_trained());
        q.train(&batch);
        assert!(q.is_trained());

        let mut out = vec![0.0; dim];
        for row in batch.chunks_exact(dim).take(20) {
            let code = encode_one(&q, row);
            q.decode(&code, &mut out);
            for (a, b) in row.iter().zip(&out) {
                assert!((a - b).abs() <= 2.0 / 255.0 + 1e-6);
            }
        }
    }

    #[test]
    fn test_sq8_clamps_out_of_range() {
        let mut q = ScalarQuantizer::new(2);
        q.train(&[0.0, 0.0, 1.0, 1.0]);
        let mut code = [0u8; 2];
        q.encode(&[-5.0, 5.0], &mut code);
        assert_eq!(code, [0, 255]);
    }

    #[test]
    fn test_rabitq_ranks_nearest_first() {
        let dim = 64;
        let batch = random_batch(300, dim, 11);
        let mut q = AnyQuantizer::new(QuantizationType::RaBitQ, dim);
        q.train(&batch);

        let query = &batch[0..dim];
        let prepared = q.prepare(query);
        let codes: Vec<Vec<u8>> = batch.chunks_exact(dim).map(|r| encode_one(&q, r)).collect();

        let mut estimated: Vec<(f32, usize)> = codes
            .iter()
            .enumerate()
            .map(|(i, c)| (q.distance(Metric::L2, &prepared, c), i))
            .collect();
        estimated.sort_by(|a, b| a.0.total_cmp(&b.0));

        // the query's own code must land among the very closest estimates
        assert!(estimated.iter().take(5).any(|&(_, i)| i == 0));
    }

    #[test]
    fn test_rabitq_estimate_tracks_true_distance() {
        let dim = 128;
        let batch = random_batch(100, dim, 3);
        let mut q = AnyQuantizer::new(QuantizationType::RaBitQ, dim);
        q.train(&batch);

        let query = random_batch(1, dim, 99);
        let prepared = q.prepare(&query);
        let mut total_rel_err = 0.0;
        for row in batch.chunks_exact(dim) {
            let code = encode_one(&q, row);
            let exact = l2_sqr(&query, row);
            let approx = q.distance(Metric::L2, &prepared, &code);
            total_rel_err += ((approx - exact) / exact).abs();
        }
        assert!(total_rel_err / 100.0 < 0.25);
    }

    #[test]
    fn test_quantization_type_parse() {
        assert_eq!("sq8".parse::<QuantizationType>().unwrap(), QuantizationType::Sq8);
        assert_eq!(
            "rabitq".parse::<QuantizationType>().unwrap(),
            QuantizationType::RaBitQ
        );
        assert!("pq".parse::<QuantizationType>().is_err());
    }
}

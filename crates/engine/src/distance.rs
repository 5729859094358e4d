//! Distance metrics and their SIMD kernels
//!
//! Kernels use `pulp` for portable SIMD with runtime CPU detection (AVX2/SSE on
//! x86_64, NEON on ARM, scalar elsewhere).
//!
//! Both metrics are expressed as distances where smaller is closer:
//!
//! - [`Metric::L2`]: squared Euclidean distance
//! - [`Metric::InnerProduct`]: `1 - dot(a, b)`

use crate::{Error, Result};
use pulp::Simd;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Distance metric used by an index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Metric {
    #[serde(rename = "l2")]
    L2,
    #[serde(rename = "ip")]
    InnerProduct,
}

impl Metric {
    /// Distance between two full-precision vectors
    #[inline]
    pub fn distance(self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            Metric::L2 => l2_sqr(a, b),
            Metric::InnerProduct => 1.0 - inner_product(a, b),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Metric::L2 => "l2",
            Metric::InnerProduct => "ip",
        }
    }
}

impl FromStr for Metric {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "l2" => Ok(Metric::L2),
            "ip" => Ok(Metric::InnerProduct),
            other => Err(Error::invalid_argument(format!(
                "unknown metric_type '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Squared Euclidean distance.
///
/// # Panics
///
/// Panics if the slices differ in length.
///
/// ```
/// use vecbridge_engine::distance::l2_sqr;
///
/// assert!((l2_sqr(&[0.0, 0.0], &[3.0, 4.0]) - 25.0).abs() < 1e-5);
/// ```
#[inline]
pub fn l2_sqr(a: &[f32], b: &[f32]) -> f32 {
    assert_eq!(a.len(), b.len(), "Vector dimensions must match");
    let simd = pulp::Arch::new();
    simd.dispatch(L2Sqr { a, b })
}

/// Dot product.
///
/// # Panics
///
/// Panics if the slices differ in length.
#[inline]
pub fn inner_product(a: &[f32], b: &[f32]) -> f32 {
    assert_eq!(a.len(), b.len(), "Vector dimensions must match");
    let simd = pulp::Arch::new();
    simd.dispatch(InnerProduct { a, b })
}

/// Squared L2 norm
#[inline]
pub fn norm_sqr(v: &[f32]) -> f32 {
    inner_product(v, v)
}

struct InnerProduct<'a> {
    a: &'a [f32],
    b: &'a [f32],
}

impl pulp::WithSimd for InnerProduct<'_> {
    type Output = f32;

    #[inline(always)]
    fn with_simd<S: Simd>(self, simd: S) -> Self::Output {
        let a = self.a;
        let b = self.b;
        let n = a.len();

        let lane_count = std::mem::size_of::<S::f32s>() / std::mem::size_of::<f32>();
        let simd_end = n - n % lane_count;

        let mut sum = simd.f32s_splat(0.0);
        let mut i = 0;
        while i < simd_end {
            let a_vec = pulp::cast_lossy::<_, S::f32s>(simd.f32s_partial_load(&a[i..]));
            let b_vec = pulp::cast_lossy::<_, S::f32s>(simd.f32s_partial_load(&b[i..]));
            sum = simd.f32s_mul_add_e(a_vec, b_vec, sum);
            i += lane_count;
        }

        let mut result = simd.f32s_reduce_sum(sum);
        for i in simd_end..n {
            result += a[i] * b[i];
        }
        result
    }
}

struct L2Sqr<'a> {
    a: &'a [f32],
    b: &'a [f32],
}

impl pulp::WithSimd for L2Sqr<'_> {
    type Output = f32;

    #[inline(always)]
    fn with_simd<S: Simd>(self, simd: S) -> Self::Output {
        let a = self.a;
        let b = self.b;
        let n = a.len();

        let lane_count = std::mem::size_of::<S::f32s>() / std::mem::size_of::<f32>();
        let simd_end = n - n % lane_count;

        let mut sum_squares = simd.f32s_splat(0.0);
        let mut i = 0;
        while i < simd_end {
            let a_vec = pulp::cast_lossy::<_, S::f32s>(simd.f32s_partial_load(&a[i..]));
            let b_vec = pulp::cast_lossy::<_, S::f32s>(simd.f32s_partial_load(&b[i..]));
            let diff = simd.f32s_sub(a_vec, b_vec);
            sum_squares = simd.f32s_mul_add_e(diff, diff, sum_squares);
            i += lane_count;
        }

        let mut result = simd.f32s_reduce_sum(sum_squares);
        for i in simd_end..n {
            let diff = a[i] - b[i];
            result += diff * diff;
        }
        result
    }
}

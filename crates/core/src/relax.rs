//! Relaxation primitives: softmax, Gumbel-softmax, one-hot sampling, STE.
//!
//! Every mutable delegates to these functions to turn an architecture
//! parameter into per-candidate weights. Decisions that need host values
//! (argmax, zero-skip, sampling) read the weights back with [`to_host`];
//! the returned tensors stay attached to the autograd graph.

use candle_core::{DType, Device, Tensor, D};
use rand::distributions::{Distribution, WeightedIndex};
use rand::Rng;

use diffnas_common::{MutableError, Result};

// ── Parameter checks ────────────────────────────────────────────────────────

/// Fails unless `arch_param` is 1-D with one entry per candidate.
pub fn check_arch_param(arch_param: &Tensor, num_candidates: usize) -> Result<()> {
    MutableError::check_len("parameter dims", 1, arch_param.rank())?;
    MutableError::check_len(
        "architecture parameters",
        num_candidates,
        arch_param.elem_count(),
    )
}

/// Copy a 1-D tensor to host memory as f32.
pub fn to_host(t: &Tensor) -> Result<Vec<f32>> {
    Ok(t.to_dtype(DType::F32)?.flatten_all()?.to_vec1::<f32>()?)
}

// ── Probabilities ───────────────────────────────────────────────────────────

/// Default relaxation: softmax over the last axis.
#[inline]
pub fn softmax_probs(arch_param: &Tensor) -> Result<Tensor> {
    Ok(candle_nn::ops::softmax(arch_param, D::Minus1)?)
}

/// Straight-through: forward value is exactly `hard`, gradient is that of `soft`.
///
/// The trick is `hard + (soft - soft.detach())`. In the forward pass the
/// residual is exactly zero; in the backward pass `∂residual/∂soft = 1`.
#[inline]
pub fn straight_through(hard: &Tensor, soft: &Tensor) -> Result<Tensor> {
    let residual = (soft - &soft.detach())?;
    Ok((hard + &residual)?)
}

/// One Gumbel(0, 1) draw: `-ln(-ln(u))`, `u ~ U(0, 1)`.
fn gumbel_noise<R: Rng + ?Sized>(rng: &mut R) -> f64 {
    let u: f64 = rng.gen_range(f64::MIN_POSITIVE..1.0);
    -(-u.ln()).ln()
}

/// Gumbel-softmax over the last axis of a 1-D logit vector.
///
/// ```text
/// y = softmax((logits + g) / tau),   g_i ~ Gumbel(0, 1)
/// ```
///
/// With `hard = true` the forward value is the one-hot argmax of `y`, and the
/// gradient is that of the soft sample.
pub fn gumbel_softmax<R: Rng + ?Sized>(
    logits: &Tensor,
    tau: f64,
    hard: bool,
    rng: &mut R,
) -> Result<Tensor> {
    let n = logits.elem_count();
    let noise: Vec<f32> = (0..n).map(|_| gumbel_noise(rng) as f32).collect();
    let g = Tensor::from_vec(noise, logits.dims(), logits.device())?.to_dtype(logits.dtype())?;
    let y = (logits + &g)?.affine(1.0 / tau, 0.0)?;
    let soft = candle_nn::ops::softmax(&y, D::Minus1)?;
    if !hard {
        return Ok(soft);
    }
    let index = argmax(&to_host(&soft)?);
    let hard = one_hot(index, n, soft.dtype(), soft.device())?;
    straight_through(&hard, &soft)
}

// ── Discrete helpers ────────────────────────────────────────────────────────

/// Constant one-hot vector of length `len` (no gradient).
pub fn one_hot(index: usize, len: usize, dtype: DType, device: &Device) -> Result<Tensor> {
    let mut v = vec![0f32; len];
    v[index] = 1.0;
    Ok(Tensor::from_vec(v, len, device)?.to_dtype(dtype)?)
}

/// Draw an index from a categorical distribution over `probs`.
pub fn sample_index<R: Rng + ?Sized>(probs: &[f32], rng: &mut R) -> Result<usize> {
    let dist = WeightedIndex::new(probs)
        .map_err(|e| MutableError::state(format!("cannot sample from {probs:?}: {e}")))?;
    Ok(dist.sample(rng))
}

/// Index of the largest value; ties resolve to the first occurrence.
pub fn argmax(values: &[f32]) -> usize {
    let mut best = 0;
    for (i, &v) in values.iter().enumerate().skip(1) {
        if v > values[best] {
            best = i;
        }
    }
    best
}

/// Indices of the `k` largest values, descending. Stable: ties keep index order.
pub fn top_k_indices(values: &[f32], k: usize) -> Vec<usize> {
    let mut idx: Vec<usize> = (0..values.len()).collect();
    idx.sort_by(|&a, &b| values[b].total_cmp(&values[a]));
    idx.truncate(k);
    idx
}

// ── Aggregation ─────────────────────────────────────────────────────────────

/// `weights[i] * output`, with the scalar weight kept in the autograd graph.
pub fn scale_by_weight(weights: &Tensor, i: usize, output: &Tensor) -> Result<Tensor> {
    let w = weights.get(i)?.to_dtype(output.dtype())?;
    Ok(output.broadcast_mul(&w)?)
}

/// Element-wise sum of same-shaped outputs.
pub fn sum_outputs(outputs: Vec<Tensor>) -> Result<Tensor> {
    let mut iter = outputs.into_iter();
    let first = iter.next().ok_or(MutableError::EmptySelection)?;
    iter.try_fold(first, |acc, t| Ok((acc + t)?))
}

// ── Tests ───────────────────────────────────────────────────────────────────

// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Vector math shared by every Cortex component.
//!
//! All functions are pure. Vectors of different lengths are treated as
//! unrelated: similarity is `0.0` rather than an error, so retrieval keeps
//! working when a stray embedding of the wrong dimension slips in.

use rand::Rng;

/// Cosine similarity between two vectors.
///
/// Returns `0.0` for mismatched lengths, empty input or a zero-norm vector.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Element-wise mean of a set of equal-length vectors.
///
/// Vectors whose length differs from the first one are skipped.
pub fn mean(vectors: &[&[f32]]) -> Option<Vec<f32>> {
    let dim = vectors.first()?.len();
    let mut sum = vec![0.0f32; dim];
    let mut count = 0usize;

    for v in vectors.iter().filter(|v| v.len() == dim) {
        for (acc, x) in sum.iter_mut().zip(v.iter()) {
            *acc += x;
        }
        count += 1;
    }

    for acc in sum.iter_mut() {
        *acc /= count as f32;
    }
    Some(sum)
}

/// Weighted element-wise average. Weights need not sum to one.
pub fn weighted_average(vectors: &[(&[f32], f32)]) -> Option<Vec<f32>> {
    let dim = vectors.first()?.0.len();
    let mut sum = vec![0.0f32; dim];
    let mut total = 0.0f32;

    for (v, w) in vectors.iter().filter(|(v, _)| v.len() == dim) {
        for (acc, x) in sum.iter_mut().zip(v.iter()) {
            *acc += x * w;
        }
        total += w;
    }

    if total <= 0.0 {
        return Some(sum);
    }
    for acc in sum.iter_mut() {
        *acc /= total;
    }
    Some(sum)
}

/// Position-weighted average of a trajectory's embeddings.
///
/// Step `i` of `n` weighs `(i + 1) / n`, so later steps dominate. An empty
/// slice yields a zero vector of `dim` entries.
pub fn trajectory_embedding(embeddings: &[&[f32]], dim: usize) -> Vec<f32> {
    let n = embeddings.len();
    if n == 0 {
        return vec![0.0; dim];
    }

    let weighted: Vec<(&[f32], f32)> = embeddings
        .iter()
        .enumerate()
        .map(|(i, e)| (*e, (i + 1) as f32 / n as f32))
        .collect();

    weighted_average(&weighted).unwrap_or_else(|| vec![0.0; dim])
}

/// Copy of `v` with independent uniform noise in `[-scale, scale]` per component.
pub fn perturb<R: Rng + ?Sized>(v: &[f32], scale: f32, rng: &mut R) -> Vec<f32> {
    if scale <= 0.0 {
        return v.to_vec();
    }
    v.iter().map(|x| x + rng.gen_range(-scale..=scale)).collect()
}

//! Mini-batch K-means over a flat row-major matrix.
//!
//! Training subsamples large inputs, seeds centroids by plain uniform
//! draws, and assigns with the fused `‖x‖² + ‖c‖² − 2·x·c` form. Given the
//! same seed and input the output centroids are bit-identical.

use std::time::Instant;

use rand::rngs::StdRng;
use rand::seq::index;
use rand::SeedableRng;
use rayon::prelude::*;

use crate::error::EngineError;
use crate::vector::simd;

#[derive(Clone, Copy, Debug)]
pub struct KmeansConfig {
    pub max_iters: usize,
    pub tol: f32,
    pub sample_cap: usize,
    pub seed: u64,
}

impl Default for KmeansConfig {
    fn default() -> Self {
        Self {
            max_iters: 20,
            tol: 1e-4,
            sample_cap: 10_000,
            seed: 42,
        }
    }
}

/// Assignment fan-out threshold; small training sets stay sequential.
const PARALLEL_ASSIGN_MIN: usize = 2048;

/// Trains `k` centroids on the n × dim matrix `data` and returns them as a
/// flat k × dim buffer.
pub fn train_centroids(
    data: &[f32],
    dim: usize,
    k: usize,
    config: &KmeansConfig,
    deadline: Option<Instant>,
) -> Result<Vec<f32>, EngineError> {
    debug_assert!(dim > 0);
    debug_assert_eq!(data.len() % dim, 0);
    let n = data.len() / dim;
    let n_sample = n.min(config.sample_cap.max(1));
    if k == 0 {
        return Err(EngineError::invalid("k must be positive"));
    }
    if k > n_sample {
        return Err(EngineError::invalid(format!(
            "k={k} exceeds training sample of {n_sample} rows"
        )));
    }

    let mut rng = StdRng::seed_from_u64(config.seed);

    // Subsample heavy datasets; iterations run on the sample only.
    let sample: Vec<f32>;
    let train: &[f32] = if n > n_sample {
        let picked = index::sample(&mut rng, n, n_sample);
        let mut buf = Vec::with_capacity(n_sample * dim);
        for row in picked.iter() {
            buf.extend_from_slice(&data[row * dim..(row + 1) * dim]);
        }
        sample = buf;
        &sample
    } else {
        data
    };

    let mut centroids = Vec::with_capacity(k * dim);
    for row in index::sample(&mut rng, n_sample, k).iter() {
        centroids.extend_from_slice(&train[row * dim..(row + 1) * dim]);
    }

    let row_norms: Vec<f32> = train.chunks(dim).map(simd::norm_sq).collect();
    let mut assignments = vec![0u32; n_sample];

    for _ in 0..config.max_iters.max(1) {
        if deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(EngineError::Timeout);
        }

        assign_rows(train, dim, &row_norms, &centroids, &mut assignments);

        // New centroid = mean of assigned rows; empty clusters keep the
        // previous centroid.
        let mut sums = vec![0.0f64; k * dim];
        let mut counts = vec![0usize; k];
        for (row, &cluster) in assignments.iter().enumerate() {
            let c = cluster as usize;
            counts[c] += 1;
            let src = &train[row * dim..(row + 1) * dim];
            let dst = &mut sums[c * dim..(c + 1) * dim];
            for (acc, &x) in dst.iter_mut().zip(src) {
                *acc += x as f64;
            }
        }
        let mut max_shift_sq = 0.0f32;
        for c in 0..k {
            if counts[c] == 0 {
                continue;
            }
            let inv = 1.0 / counts[c] as f64;
            let old = &mut centroids[c * dim..(c + 1) * dim];
            let mut shift_sq = 0.0f32;
            for (d, slot) in old.iter_mut().enumerate() {
                let new = (sums[c * dim + d] * inv) as f32;
                let delta = new - *slot;
                shift_sq += delta * delta;
                *slot = new;
            }
            max_shift_sq = max_shift_sq.max(shift_sq);
        }
        if max_shift_sq.sqrt() <= config.tol {
            break;
        }
    }

    Ok(centroids)
}

/// Nearest-centroid assignment for every row of `data`, fused form with the
/// caller's norm cache. Ties go to the lowest centroid index.
pub fn assign_rows(
    data: &[f32],
    dim: usize,
    row_norms: &[f32],
    centroids: &[f32],
    out: &mut [u32],
) {
    let centroid_norms: Vec<f32> = centroids.chunks(dim).map(simd::norm_sq).collect();
    let nearest = |row: usize, x: &[f32]| -> u32 {
        let x_sq = row_norms[row];
        let mut best = 0u32;
        let mut best_dist = f32::INFINITY;
        for (c, centroid) in centroids.chunks(dim).enumerate() {
            let dist = x_sq + centroid_norms[c] - 2.0 * simd::dot(x, centroid);
            if dist < best_dist {
                best_dist = dist;
                best = c as u32;
            }
        }
        best
    };
    let n = out.len();
    if n >= PARALLEL_ASSIGN_MIN {
        out.par_iter_mut().enumerate().for_each(|(row, slot)| {
            *slot = nearest(row, &data[row * dim..(row + 1) * dim]);
        });
    } else {
        for (row, slot) in out.iter_mut().enumerate() {
            *slot = nearest(row, &data[row * dim..(row + 1) * dim]);
        }
    }
}

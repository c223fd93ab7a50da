//! Distance kernels over contiguous f32 buffers.
//!
//! Everything here is a pure function; the fused batched form
//! `‖q‖² + ‖r‖² − 2·q·r` is the central performance primitive shared by the
//! flat scan, K-means assignment, and IVF probe selection.

pub mod simd;

use rayon::prelude::*;

/// Rows below this count are scored sequentially; the rayon fan-out only
/// pays for itself on larger matrices.
const PARALLEL_ROW_MIN: usize = 4096;

/// Squared Euclidean distance.
#[inline]
pub fn l2_sq(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum()
}

/// Cosine distance: `1 − cos(a, b)`. A zero-norm operand is treated as
/// maximally dissimilar and yields 1.0.
#[inline]
pub fn cosine(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    let dot = simd::dot(a, b);
    let norm_a = simd::norm_sq(a).sqrt();
    let norm_b = simd::norm_sq(b).sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 1.0;
    }
    1.0 - dot / (norm_a * norm_b)
}

/// Scales `v` to unit length. Vectors with norm below 1e-12 are returned
/// unchanged rather than blown up.
pub fn normalize(v: &[f32]) -> Vec<f32> {
    let norm = simd::norm_sq(v).sqrt();
    if norm < 1e-12 {
        return v.to_vec();
    }
    v.iter().map(|x| x / norm).collect()
}

/// Squared L2 distance from `query` to every row of the row-major matrix
/// `rows` (n × dim), via the fused expansion `‖q‖² + ‖r‖² − 2·q·r`.
///
/// `cached_norms`, when supplied, must hold `‖r‖²` per row and is used
/// verbatim. Results are clamped at zero: the expansion can dip slightly
/// negative for near-identical vectors.
pub fn l2_sq_batch(query: &[f32], rows: &[f32], dim: usize, cached_norms: Option<&[f32]>) -> Vec<f32> {
    debug_assert_eq!(query.len(), dim);
    debug_assert_eq!(rows.len() % dim.max(1), 0);
    if rows.is_empty() || dim == 0 {
        return Vec::new();
    }
    let n = rows.len() / dim;
    if let Some(norms) = cached_norms {
        debug_assert_eq!(norms.len(), n);
    }
    let q_sq = simd::norm_sq(query);
    let row_dist = |i: usize, row: &[f32]| -> f32 {
        let r_sq = match cached_norms {
            Some(norms) => norms[i],
            None => simd::norm_sq(row),
        };
        (q_sq + r_sq - 2.0 * simd::dot(query, row)).max(0.0)
    };
    if n >= PARALLEL_ROW_MIN {
        rows.par_chunks(dim)
            .enumerate()
            .map(|(i, row)| row_dist(i, row))
            .collect()
    } else {
        rows.chunks(dim)
            .enumerate()
            .map(|(i, row)| row_dist(i, row))
            .collect()
    }
}

/// Bounded selection of the `k` smallest `(distance, row)` pairs.
///
/// Ties on distance resolve to the lower row index, which keeps result
/// ordering deterministic across runs and probe orders.
pub struct TopK {
    limit: usize,
    heap: std::collections::BinaryHeap<HeapEntry>,
}

#[derive(PartialEq)]
struct HeapEntry {
    dist: f32,
    row: u32,
}

impl Eq for HeapEntry {}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.dist
            .total_cmp(&other.dist)
            .then(self.row.cmp(&other.row))
    }
}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl TopK {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            heap: std::collections::BinaryHeap::with_capacity(limit + 1),
        }
    }

    pub fn push(&mut self, dist: f32, row: u32) {
        if self.limit == 0 {
            return;
        }
        let entry = HeapEntry { dist, row };
        if self.heap.len() < self.limit {
            self.heap.push(entry);
        } else if let Some(worst) = self.heap.peek() {
            if entry < *worst {
                self.heap.pop();
                self.heap.push(entry);
            }
        }
    }

    /// Drains into `(row, dist)` pairs sorted ascending by distance, then row.
    pub fn into_sorted(self) -> Vec<(u32, f32)> {
        let mut entries = self.heap.into_vec();
        entries.sort_unstable();
        entries.into_iter().map(|e| (e.row, e.dist)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    #[test]
    fn l2_sq_basics() {
        let a = vec![1.0f32, 0.0, 0.0];
        let b = vec![0.0f32, 1.0, 0.0];
        assert_eq!(l2_sq(&a, &a), 0.0);
        assert!((l2_sq(&a, &b) - 2.0).abs() < 1e-6);
        assert_eq!(l2_sq(&a, &b), l2_sq(&b, &a));
    }

    #[test]
    fn cosine_orthogonal_and_zero() {
        let a = vec![1.0f32, 0.0];
        let b = vec![0.0f32, 1.0];
        assert!((cosine(&a, &b) - 1.0).abs() < 1e-6);
        assert!(cosine(&a, &a).abs() < 1e-6);
        let zero = vec![0.0f32, 0.0];
        assert_eq!(cosine(&a, &zero), 1.0);
    }

    #[test]
    fn normalize_zero_vector_unchanged() {
        let zero = vec![0.0f32; 4];
        assert_eq!(normalize(&zero), zero);
        let v = vec![3.0f32, 4.0];
        let n = normalize(&v);
        assert!((simd::norm_sq(&n).sqrt() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn batch_matches_pairwise() {
        let mut rng = StdRng::seed_from_u64(7);
        let dim = 24;
        let n = 200;
        let rows: Vec<f32> = (0..n * dim).map(|_| rng.gen_range(-1.0..1.0)).collect();
        let query: Vec<f32> = (0..dim).map(|_| rng.gen_range(-1.0..1.0)).collect();
        let norms: Vec<f32> = rows.chunks(dim).map(simd::norm_sq).collect();

        for cached in [None, Some(norms.as_slice())] {
            let batch = l2_sq_batch(&query, &rows, dim, cached);
            assert_eq!(batch.len(), n);
            for (i, row) in rows.chunks(dim).enumerate() {
                let exact = l2_sq(&query, row);
                let allowance = 1e-4 * exact.max(1e-3);
                assert!(
                    (batch[i] - exact).abs() <= allowance,
                    "row {i}: batch={} exact={exact}",
                    batch[i]
                );
            }
        }
    }

    #[test]
    fn batch_empty_input() {
        assert!(l2_sq_batch(&[1.0, 2.0], &[], 2, None).is_empty());
    }

    #[test]
    fn top_k_keeps_smallest_with_stable_ties() {
        let mut top = TopK::new(3);
        for (dist, row) in [(5.0, 0), (1.0, 4), (1.0, 2), (9.0, 1), (0.5, 7)] {
            top.push(dist, row);
        }
        assert_eq!(top.into_sorted(), vec![(7, 0.5), (2, 1.0), (4, 1.0)]);
    }

    #[test]
    fn top_k_smaller_input_returns_all() {
        let mut top = TopK::new(10);
        top.push(2.0, 1);
        top.push(1.0, 0);
        assert_eq!(top.into_sorted(), vec![(0, 1.0), (1, 2.0)]);
    }
}

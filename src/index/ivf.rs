//! Inverted-file index: coarse quantization via K-means centroids, fine
//! scan within probed lists under a per-query scan budget.
//!
//! Rows appended to the store after training stay outside the lists and are
//! invisible to IVF search until the next `train` rebuilds the partitions.

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::time::Instant;

use serde::Serialize;

use crate::error::EngineError;
use crate::index::clustering::{self, KmeansConfig};
use crate::store::DataStore;
use crate::vector::{self, simd, TopK};

/// Statistics reported by the stats endpoint and the offline subcommand.
#[derive(Debug, Serialize)]
pub struct IndexStats {
    pub k: usize,
    pub n_trained: usize,
    pub total_indexed: usize,
    pub min_cell_size: usize,
    pub max_cell_size: usize,
    pub avg_cell_size: f64,
    pub imbalance_factor: f64,
}

pub struct IvfIndex {
    dim: usize,
    k: usize,
    centroids: Vec<f32>,
    centroid_norms: Vec<f32>,
    lists: Vec<Vec<u32>>,
    n_trained: usize,
}

impl IvfIndex {
    /// Clusters the store's rows into `k` cells and partitions every row
    /// present at call time. The assignment pass reuses the store's norm
    /// cache through the fused batched distance; the cache must be clean,
    /// which every mutating path guarantees before releasing its lock.
    pub fn train(
        store: &DataStore,
        k: usize,
        config: &KmeansConfig,
        deadline: Option<Instant>,
    ) -> Result<Self, EngineError> {
        let dim = store.dim();
        let n_trained = store.len();

        let centroids =
            clustering::train_centroids(store.all_vectors(), dim, k, config, deadline)?;
        let centroid_norms: Vec<f32> = centroids.chunks(dim).map(simd::norm_sq).collect();

        if deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(EngineError::Timeout);
        }

        let mut assignments = vec![0u32; n_trained];
        clustering::assign_rows(
            store.all_vectors(),
            dim,
            store.norms(),
            &centroids,
            &mut assignments,
        );

        let mut lists: Vec<Vec<u32>> = vec![Vec::new(); k];
        for (row, &cluster) in assignments.iter().enumerate() {
            lists[cluster as usize].push(row as u32);
        }

        Ok(Self {
            dim,
            k,
            centroids,
            centroid_norms,
            lists,
            n_trained,
        })
    }

    pub fn k(&self) -> usize {
        self.k
    }

    pub fn n_trained(&self) -> usize {
        self.n_trained
    }

    /// Probe search. Visits the `nprobe` nearest cells in centroid-distance
    /// order and scans their lists with the fused L2² form until the lists
    /// are exhausted or `max_codes` rows have been scanned; a probe may be
    /// cut off mid-list. Returns `(row, distance)` ascending.
    pub fn search(
        &self,
        query: &[f32],
        top_k: usize,
        nprobe: usize,
        max_codes: usize,
        vectors: &[f32],
        norms: &[f32],
        deadline: Option<Instant>,
    ) -> Result<Vec<(u32, f32)>, EngineError> {
        if query.len() != self.dim {
            return Err(EngineError::invalid(format!(
                "query dim {} does not match index dim {}",
                query.len(),
                self.dim
            )));
        }
        if self.n_trained == 0 || top_k == 0 || nprobe == 0 {
            return Ok(Vec::new());
        }
        // Arms carry production-sized nprobe values; small indexes clamp
        // to "scan every list" rather than reject.
        let nprobe = nprobe.min(self.k);

        let centroid_dists =
            vector::l2_sq_batch(query, &self.centroids, self.dim, Some(&self.centroid_norms));
        let mut order: Vec<u32> = (0..self.k as u32).collect();
        order.sort_unstable_by(|&a, &b| {
            centroid_dists[a as usize]
                .total_cmp(&centroid_dists[b as usize])
                .then(a.cmp(&b))
        });

        let q_sq = simd::norm_sq(query);
        let mut top = TopK::new(top_k);
        let mut codes_scanned = 0usize;

        'probes: for &cell in order.iter().take(nprobe) {
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return Err(EngineError::Timeout);
            }
            for &row in &self.lists[cell as usize] {
                let r = row as usize;
                let v = &vectors[r * self.dim..(r + 1) * self.dim];
                let dist = (q_sq + norms[r] - 2.0 * simd::dot(query, v)).max(0.0);
                top.push(dist, row);
                codes_scanned += 1;
                if codes_scanned >= max_codes {
                    break 'probes;
                }
            }
        }

        Ok(top.into_sorted())
    }

    pub fn stats(&self) -> IndexStats {
        let sizes: Vec<usize> = self.lists.iter().map(Vec::len).collect();
        let total: usize = sizes.iter().sum();
        let avg = if sizes.is_empty() {
            0.0
        } else {
            total as f64 / sizes.len() as f64
        };
        IndexStats {
            k: self.k,
            n_trained: self.n_trained,
            total_indexed: total,
            min_cell_size: sizes.iter().copied().min().unwrap_or(0),
            max_cell_size: sizes.iter().copied().max().unwrap_or(0),
            avg_cell_size: avg,
            imbalance_factor: if avg > 0.0 {
                sizes.iter().copied().max().unwrap_or(0) as f64 / avg
            } else {
                1.0
            },
        }
    }

    /// Serializes to `ivf.bin`: centroids, then one `(cell u32, len u32,
    /// rows u32[])` record per cell, then a `(k u32, n_trained u32)` trailer.
    pub fn save(&self, path: &Path) -> io::Result<()> {
        let tmp = path.with_extension("bin.tmp");
        let mut w = BufWriter::new(File::create(&tmp)?);
        for &x in &self.centroids {
            w.write_all(&x.to_le_bytes())?;
        }
        for (cell, rows) in self.lists.iter().enumerate() {
            w.write_all(&(cell as u32).to_le_bytes())?;
            w.write_all(&(rows.len() as u32).to_le_bytes())?;
            for &row in rows {
                w.write_all(&row.to_le_bytes())?;
            }
        }
        w.write_all(&(self.k as u32).to_le_bytes())?;
        w.write_all(&(self.n_trained as u32).to_le_bytes())?;
        let file = w.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;
        fs::rename(&tmp, path)
    }

    /// Reads the `ivf.bin` layout back. The trailer fixes `k`; `dim` comes
    /// from the store's sidecar.
    pub fn load(path: &Path, dim: usize) -> Result<Self, EngineError> {
        let bytes = fs::read(path)?;
        if bytes.len() < 8 {
            return Err(EngineError::corrupt("ivf.bin too short"));
        }
        let trailer = bytes.len() - 8;
        let k = read_u32(&bytes, trailer) as usize;
        let n_trained = read_u32(&bytes, trailer + 4) as usize;

        let centroid_bytes = k * dim * 4;
        if trailer < centroid_bytes {
            return Err(EngineError::corrupt("ivf.bin centroid block truncated"));
        }
        let mut centroids = Vec::with_capacity(k * dim);
        for i in 0..k * dim {
            centroids.push(f32::from_le_bytes(
                bytes[i * 4..i * 4 + 4].try_into().expect("4-byte chunk"),
            ));
        }

        let mut lists: Vec<Vec<u32>> = Vec::with_capacity(k);
        let mut offset = centroid_bytes;
        for expected in 0..k as u32 {
            if offset + 8 > trailer {
                return Err(EngineError::corrupt("ivf.bin list block truncated"));
            }
            let cell = read_u32(&bytes, offset);
            let len = read_u32(&bytes, offset + 4) as usize;
            offset += 8;
            if cell != expected {
                return Err(EngineError::corrupt(format!(
                    "ivf.bin cell {cell} out of order"
                )));
            }
            if offset + len * 4 > trailer {
                return Err(EngineError::corrupt("ivf.bin row block truncated"));
            }
            let mut rows = Vec::with_capacity(len);
            for i in 0..len {
                rows.push(read_u32(&bytes, offset + i * 4));
            }
            offset += len * 4;
            lists.push(rows);
        }
        if offset != trailer {
            return Err(EngineError::corrupt("ivf.bin trailing garbage"));
        }

        let centroid_norms = centroids.chunks(dim).map(simd::norm_sq).collect();
        Ok(Self {
            dim,
            k,
            centroids,
            centroid_norms,
            lists,
            n_trained,
        })
    }
}

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes(bytes[offset..offset + 4].try_into().expect("4-byte chunk"))
}

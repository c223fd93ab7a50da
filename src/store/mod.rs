//! Memory-mapped vector store.
//!
//! Two flat files hold the data: `vectors.bin` (N × D little-endian f32,
//! row-major) and `ids.bin` (N × i64). Neither carries a header; the
//! `meta.json` sidecar records dim, count, capacity, and the layout version.
//! Capacity doubles on exhaustion and the files are truncate-then-remapped,
//! so existing rows never move.

use std::collections::{HashMap, HashSet};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use memmap2::MmapMut;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::vector::simd;

const VECTORS_FILE: &str = "vectors.bin";
const IDS_FILE: &str = "ids.bin";
const META_FILE: &str = "meta.json";
const LAYOUT_VERSION: u32 = 1;

/// Rebuilding the norm cache fans out once the store is big enough to be
/// worth it.
const PARALLEL_NORM_MIN: usize = 4096;

#[derive(Debug, Serialize, Deserialize)]
struct Meta {
    dim: usize,
    count: usize,
    capacity: usize,
    layout_version: u32,
}

/// Append-only vector store over memory-mapped files.
///
/// Row indices are dense, 0-based, and stable for the lifetime of the store.
/// External ids are caller-chosen i64 values, unique across the store.
#[derive(Debug)]
pub struct DataStore {
    dir: PathBuf,
    dim: usize,
    count: usize,
    capacity: usize,
    vectors_file: File,
    ids_file: File,
    vectors: MmapMut,
    ids: MmapMut,
    id_to_row: HashMap<i64, usize>,
    norms: Vec<f32>,
    norms_dirty: bool,
    read_only: bool,
}

impl DataStore {
    /// Opens the store in `dir`, creating the files when absent.
    ///
    /// An existing sidecar must agree on `dim`; a mismatch or an unreadable
    /// sidecar fails the open without touching the data files.
    pub fn open(
        dir: impl AsRef<Path>,
        dim: usize,
        initial_capacity: usize,
    ) -> Result<Self, EngineError> {
        if dim == 0 {
            return Err(EngineError::invalid("dim must be positive"));
        }
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let meta_path = dir.join(META_FILE);
        let (count, capacity, fresh) = if meta_path.exists() {
            let raw = fs::read(&meta_path)?;
            let meta: Meta = serde_json::from_slice(&raw)
                .map_err(|e| EngineError::corrupt(format!("bad meta sidecar: {e}")))?;
            if meta.layout_version != LAYOUT_VERSION {
                return Err(EngineError::corrupt(format!(
                    "unsupported layout version {}",
                    meta.layout_version
                )));
            }
            if meta.dim != dim {
                return Err(EngineError::corrupt(format!(
                    "store dim {} does not match configured dim {dim}",
                    meta.dim
                )));
            }
            if meta.count > meta.capacity {
                return Err(EngineError::corrupt("count exceeds capacity"));
            }
            (meta.count, meta.capacity.max(1), false)
        } else {
            (0, initial_capacity.max(1), true)
        };

        let vectors_file = open_data_file(&dir.join(VECTORS_FILE))?;
        let ids_file = open_data_file(&dir.join(IDS_FILE))?;

        let vec_bytes = (capacity * dim * 4) as u64;
        let id_bytes = (capacity * 8) as u64;
        if fresh {
            // Mapping a zero-length file is not portable; fresh stores are
            // created at full initial capacity.
            vectors_file.set_len(vec_bytes)?;
            ids_file.set_len(id_bytes)?;
        } else {
            if vectors_file.metadata()?.len() < vec_bytes {
                return Err(EngineError::corrupt("vectors.bin shorter than capacity"));
            }
            if ids_file.metadata()?.len() < id_bytes {
                return Err(EngineError::corrupt("ids.bin shorter than capacity"));
            }
        }

        let vectors = unsafe { MmapMut::map_mut(&vectors_file)? };
        let ids = unsafe { MmapMut::map_mut(&ids_file)? };

        let mut store = Self {
            dir,
            dim,
            count,
            capacity,
            vectors_file,
            ids_file,
            vectors,
            ids,
            id_to_row: HashMap::new(),
            norms: Vec::new(),
            norms_dirty: count > 0,
            read_only: false,
        };
        store.rebuild_id_map()?;
        if fresh {
            store.write_meta()?;
        }
        Ok(store)
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Appends a batch of rows. All-or-nothing: any dimension mismatch or
    /// duplicate id rejects the whole batch before a byte is written.
    /// Returns the assigned row indices.
    pub fn add(&mut self, vectors: &[Vec<f32>], ids: &[i64]) -> Result<Vec<usize>, EngineError> {
        self.check_writable()?;
        if vectors.is_empty() {
            return Err(EngineError::invalid("empty batch"));
        }
        if vectors.len() != ids.len() {
            return Err(EngineError::invalid(format!(
                "{} vectors but {} ids",
                vectors.len(),
                ids.len()
            )));
        }
        for v in vectors {
            if v.len() != self.dim {
                return Err(EngineError::invalid(format!(
                    "vector dim {} does not match store dim {}",
                    v.len(),
                    self.dim
                )));
            }
        }
        let mut batch_seen = HashSet::with_capacity(ids.len());
        for &id in ids {
            if self.id_to_row.contains_key(&id) || !batch_seen.insert(id) {
                return Err(EngineError::Conflict(id));
            }
        }

        let needed = self.count + vectors.len();
        if needed > self.capacity {
            self.grow(needed).map_err(|e| self.poison(e))?;
        }

        let base = self.count;
        let dim = self.dim;
        {
            let dst = &mut self.floats_mut()[base * dim..needed * dim];
            for (i, v) in vectors.iter().enumerate() {
                dst[i * dim..(i + 1) * dim].copy_from_slice(v);
            }
        }
        {
            let dst = &mut self.ids_mut()[base..needed];
            dst.copy_from_slice(ids);
        }
        for (i, &id) in ids.iter().enumerate() {
            self.id_to_row.insert(id, base + i);
        }
        self.count = needed;
        self.norms_dirty = true;
        self.flush().map_err(|e| self.poison_engine(e))?;
        Ok((base..needed).collect())
    }

    /// Zero-copy view of one row.
    pub fn get_row(&self, row: usize) -> &[f32] {
        assert!(row < self.count, "row {row} out of bounds ({})", self.count);
        &self.floats()[row * self.dim..(row + 1) * self.dim]
    }

    /// Looks up a vector by external id.
    pub fn get_by_id(&self, id: i64) -> Result<(usize, &[f32]), EngineError> {
        let row = *self.id_to_row.get(&id).ok_or(EngineError::NotFound(id))?;
        Ok((row, self.get_row(row)))
    }

    /// The external id stored at `row`.
    pub fn external_id(&self, row: usize) -> i64 {
        assert!(row < self.count);
        self.ids_view()[row]
    }

    /// The live N × D matrix as one contiguous slice.
    pub fn all_vectors(&self) -> &[f32] {
        &self.floats()[..self.count * self.dim]
    }

    /// Cached squared norms, recomputed in one pass when stale.
    pub fn norms_sq(&mut self) -> &[f32] {
        if self.norms_dirty {
            let dim = self.dim;
            let fresh: Vec<f32> = if self.count >= PARALLEL_NORM_MIN {
                self.all_vectors().par_chunks(dim).map(simd::norm_sq).collect()
            } else {
                self.all_vectors().chunks(dim).map(simd::norm_sq).collect()
            };
            self.norms = fresh;
            self.norms_dirty = false;
        }
        &self.norms
    }

    /// Read-side view of the norm cache. Mutating paths leave the cache
    /// clean before releasing the exclusive lock, so shared-lock readers
    /// never observe a stale cache.
    pub fn norms(&self) -> &[f32] {
        debug_assert!(!self.norms_dirty, "norm cache read while dirty");
        &self.norms
    }

    /// Truncates to zero rows. Capacity and file allocation are kept.
    pub fn reset(&mut self) -> Result<(), EngineError> {
        self.check_writable()?;
        self.count = 0;
        self.id_to_row.clear();
        self.norms.clear();
        self.norms_dirty = false;
        self.flush().map_err(|e| self.poison_engine(e))?;
        Ok(())
    }

    /// Syncs mapped pages and rewrites the sidecar.
    pub fn flush(&mut self) -> Result<(), EngineError> {
        self.vectors.flush()?;
        self.ids.flush()?;
        self.write_meta()?;
        Ok(())
    }

    fn check_writable(&self) -> Result<(), EngineError> {
        if self.read_only {
            return Err(EngineError::Storage(io::Error::other(
                "store is read-only after a storage failure; reopen to recover",
            )));
        }
        Ok(())
    }

    /// Doubles capacity until `needed` fits, extends both files, and
    /// re-establishes the mappings. Existing rows keep their offsets.
    fn grow(&mut self, needed: usize) -> io::Result<()> {
        let mut new_capacity = self.capacity.max(1);
        while new_capacity < needed {
            new_capacity *= 2;
        }
        tracing::debug!(
            old = self.capacity,
            new = new_capacity,
            "growing store capacity"
        );
        self.vectors.flush()?;
        self.ids.flush()?;
        self.vectors_file
            .set_len((new_capacity * self.dim * 4) as u64)?;
        self.ids_file.set_len((new_capacity * 8) as u64)?;
        self.vectors = unsafe { MmapMut::map_mut(&self.vectors_file)? };
        self.ids = unsafe { MmapMut::map_mut(&self.ids_file)? };
        self.capacity = new_capacity;
        Ok(())
    }

    fn poison(&mut self, err: io::Error) -> EngineError {
        self.read_only = true;
        tracing::error!(%err, "storage failure; store is now read-only");
        EngineError::Storage(err)
    }

    fn poison_engine(&mut self, err: EngineError) -> EngineError {
        if matches!(err, EngineError::Storage(_)) {
            self.read_only = true;
            tracing::error!(%err, "storage failure; store is now read-only");
        }
        err
    }

    fn rebuild_id_map(&mut self) -> Result<(), EngineError> {
        self.id_to_row = HashMap::with_capacity(self.count);
        for row in 0..self.count {
            let id = self.ids_view()[row];
            if self.id_to_row.insert(id, row).is_some() {
                return Err(EngineError::corrupt(format!("duplicate id {id} in ids.bin")));
            }
        }
        Ok(())
    }

    fn write_meta(&self) -> io::Result<()> {
        let meta = Meta {
            dim: self.dim,
            count: self.count,
            capacity: self.capacity,
            layout_version: LAYOUT_VERSION,
        };
        let tmp = self.dir.join(format!("{META_FILE}.tmp"));
        let mut file = File::create(&tmp)?;
        serde_json::to_writer(&mut file, &meta)?;
        file.flush()?;
        file.sync_all()?;
        fs::rename(&tmp, self.dir.join(META_FILE))
    }

    // The data files are packed little-endian arrays with no header. The
    // mappings are reinterpreted in place, which assumes a little-endian
    // host (x86_64/aarch64); mmap alignment covers f32 and i64.

    fn floats(&self) -> &[f32] {
        unsafe {
            std::slice::from_raw_parts(
                self.vectors.as_ptr() as *const f32,
                self.capacity * self.dim,
            )
        }
    }

    fn floats_mut(&mut self) -> &mut [f32] {
        unsafe {
            std::slice::from_raw_parts_mut(
                self.vectors.as_mut_ptr() as *mut f32,
                self.capacity * self.dim,
            )
        }
    }

    fn ids_view(&self) -> &[i64] {
        unsafe { std::slice::from_raw_parts(self.ids.as_ptr() as *const i64, self.capacity) }
    }

    fn ids_mut(&mut self) -> &mut [i64] {
        unsafe { std::slice::from_raw_parts_mut(self.ids.as_mut_ptr() as *mut i64, self.capacity) }
    }
}

fn open_data_file(path: &Path) -> io::Result<File> {
    OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(dim: usize, n: usize) -> (Vec<Vec<f32>>, Vec<i64>) {
        let vectors = (0..n)
            .map(|i| (0..dim).map(|d| (i * dim + d) as f32 * 0.5).collect())
            .collect();
        let ids = (0..n as i64).map(|i| i * 10 + 1).collect();
        (vectors, ids)
    }

    #[test]
    fn add_assigns_dense_rows() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = DataStore::open(dir.path(), 3, 4).unwrap();
        let (vectors, ids) = sample(3, 3);
        let rows = store.add(&vectors, &ids).unwrap();
        assert_eq!(rows, vec![0, 1, 2]);
        assert_eq!(store.len(), 3);
        for (row, v) in vectors.iter().enumerate() {
            assert_eq!(store.get_row(row), v.as_slice());
        }
        let (row, v) = store.get_by_id(11).unwrap();
        assert_eq!(row, 1);
        assert_eq!(v, vectors[1].as_slice());
    }

    #[test]
    fn duplicate_id_rejects_whole_batch() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = DataStore::open(dir.path(), 2, 4).unwrap();
        store.add(&[vec![1.0, 0.0]], &[1]).unwrap();

        let err = store
            .add(&[vec![0.0, 1.0], vec![1.0, 1.0], vec![2.0, 2.0]], &[2, 1, 3])
            .unwrap_err();
        assert!(matches!(err, EngineError::Conflict(1)));
        assert_eq!(store.len(), 1);
        assert!(matches!(
            store.get_by_id(2).unwrap_err(),
            EngineError::NotFound(2)
        ));
        assert!(matches!(
            store.get_by_id(3).unwrap_err(),
            EngineError::NotFound(3)
        ));
    }

    #[test]
    fn duplicate_within_batch_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = DataStore::open(dir.path(), 2, 4).unwrap();
        let err = store
            .add(&[vec![0.0, 1.0], vec![1.0, 1.0]], &[5, 5])
            .unwrap_err();
        assert!(matches!(err, EngineError::Conflict(5)));
        assert_eq!(store.len(), 0);
    }

    #[test]
    fn capacity_doubles_until_fit() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = DataStore::open(dir.path(), 2, 2).unwrap();
        for i in 0..5i64 {
            store.add(&[vec![i as f32, -i as f32]], &[i]).unwrap();
        }
        assert_eq!(store.capacity(), 8);
        assert_eq!(store.len(), 5);
        for i in 0..5i64 {
            let (_, v) = store.get_by_id(i).unwrap();
            assert_eq!(v, &[i as f32, -i as f32]);
        }
    }

    #[test]
    fn norm_cache_tracks_inserts() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = DataStore::open(dir.path(), 2, 4).unwrap();
        store.add(&[vec![3.0, 4.0]], &[1]).unwrap();
        assert_eq!(store.norms_sq(), &[25.0]);
        store.add(&[vec![1.0, 1.0]], &[2]).unwrap();
        let norms = store.norms_sq();
        assert_eq!(norms.len(), 2);
        for row in 0..store.len() {
            let v = store.get_row(row);
            let exact: f32 = v.iter().map(|x| x * x).sum();
            assert!((store.norms()[row] - exact).abs() <= 1e-4 * exact.max(1e-6));
        }
    }

    #[test]
    fn reset_clears_rows() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = DataStore::open(dir.path(), 2, 4).unwrap();
        let (vectors, ids) = sample(2, 3);
        store.add(&vectors, &ids).unwrap();
        store.reset().unwrap();
        assert!(store.is_empty());
        assert!(store.get_by_id(ids[0]).is_err());
        store.add(&vectors, &ids).unwrap();
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn reopen_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let (vectors, ids) = sample(4, 7);
        {
            let mut store = DataStore::open(dir.path(), 4, 2).unwrap();
            store.add(&vectors, &ids).unwrap();
        }
        let store = DataStore::open(dir.path(), 4, 2).unwrap();
        assert_eq!(store.len(), 7);
        assert_eq!(store.capacity(), 8);
        for (i, id) in ids.iter().enumerate() {
            let (row, v) = store.get_by_id(*id).unwrap();
            assert_eq!(row, i);
            assert_eq!(v, vectors[i].as_slice());
        }
    }

    #[test]
    fn dim_mismatch_on_open_fails() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut store = DataStore::open(dir.path(), 3, 2).unwrap();
            store.add(&[vec![1.0, 2.0, 3.0]], &[1]).unwrap();
        }
        let err = DataStore::open(dir.path(), 5, 2).unwrap_err();
        assert!(matches!(err, EngineError::Corrupt(_)));
    }
}

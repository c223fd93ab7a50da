//! Search orchestration: strategy dispatch between the flat scan and the
//! IVF index, with optional bandit-driven selection and latency feedback.
//!
//! One reader-writer lock guards the store and the index together (IVF row
//! indices are only meaningful against the store layout they were trained
//! on). Training builds the new index under an upgradable read lock so
//! concurrent searches keep hitting the previous index, and swaps it in
//! under the exclusive lock.

use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::Instant;

use parking_lot::{Mutex, RwLock, RwLockUpgradableReadGuard};

use crate::agent::{AdaptiveAgent, AgentState};
use crate::config::Config;
use crate::error::EngineError;
use crate::index::{IvfIndex, KmeansConfig};
use crate::search::types::{
    AddOutcome, EngineStats, Metric, SearchHit, SearchOptions, SearchOutcome, StoreStats,
    TrainOutcome,
};
use crate::store::DataStore;
use crate::vector::{self, simd, TopK};

const IVF_FILE: &str = "ivf.bin";

static RAYON_INIT: OnceLock<()> = OnceLock::new();

struct CoreState {
    store: DataStore,
    index: Option<IvfIndex>,
}

pub struct SearchEngine {
    core: RwLock<CoreState>,
    agent: Mutex<AdaptiveAgent>,
    ivf_path: PathBuf,
    default_nprobe: usize,
    default_max_codes: usize,
    kmeans: KmeansConfig,
}

impl SearchEngine {
    /// Opens (or creates) the persistent state under `config.data_dir`.
    pub fn new(config: &Config) -> Result<Self, EngineError> {
        init_rayon(config.search_threads);

        let data_dir = PathBuf::from(&config.data_dir);
        let mut store = DataStore::open(&data_dir, config.dim, config.initial_capacity)?;
        store.norms_sq();

        let ivf_path = data_dir.join(IVF_FILE);
        let index = if ivf_path.exists() {
            match IvfIndex::load(&ivf_path, config.dim) {
                Ok(index) if index.n_trained() <= store.len() => {
                    tracing::info!(k = index.k(), n_trained = index.n_trained(), "loaded IVF index");
                    Some(index)
                }
                Ok(index) => {
                    tracing::warn!(
                        n_trained = index.n_trained(),
                        rows = store.len(),
                        "IVF index references rows beyond the store; dropping it"
                    );
                    None
                }
                Err(err) => {
                    tracing::warn!(%err, "could not load IVF index; continuing untrained");
                    None
                }
            }
        } else {
            None
        };

        let agent = AdaptiveAgent::new(
            &data_dir,
            config.agent_algorithm,
            config.agent_epsilon,
            config.checkpoint_every,
        );

        Ok(Self {
            core: RwLock::new(CoreState { store, index }),
            agent: Mutex::new(agent),
            ivf_path,
            default_nprobe: config.default_nprobe,
            default_max_codes: config.default_max_codes,
            kmeans: KmeansConfig {
                max_iters: config.train_max_iters,
                sample_cap: config.train_sample_cap,
                seed: config.train_seed,
                ..KmeansConfig::default()
            },
        })
    }

    /// Appends a batch of vectors. The norm cache is left clean before the
    /// exclusive lock drops, so readers never pay for a rebuild.
    pub fn add(&self, vectors: &[Vec<f32>], ids: &[i64]) -> Result<AddOutcome, EngineError> {
        let mut core = self.core.write();
        let result = core.store.add(vectors, ids);
        // Rebuild unconditionally: a flush failure after the rows landed
        // must not leave readers a dirty cache.
        core.store.norms_sq();
        let rows = result?;
        Ok(AddOutcome {
            inserted: rows.len(),
            total: core.store.len(),
        })
    }

    /// Rebuilds the IVF partitions over the rows present right now.
    pub fn train(
        &self,
        n_cells: usize,
        deadline: Option<Instant>,
    ) -> Result<TrainOutcome, EngineError> {
        if n_cells == 0 {
            return Err(EngineError::invalid("n_cells must be positive"));
        }
        let core = self.core.upgradable_read();
        let index = IvfIndex::train(&core.store, n_cells, &self.kmeans, deadline)?;
        index.save(&self.ivf_path)?;
        let outcome = TrainOutcome {
            k: index.k(),
            n_trained: index.n_trained(),
        };
        let mut core = RwLockUpgradableReadGuard::upgrade(core);
        core.index = Some(index);
        tracing::info!(k = outcome.k, n_trained = outcome.n_trained, "IVF index trained");
        Ok(outcome)
    }

    pub fn search(
        &self,
        query: &[f32],
        opts: SearchOptions,
        deadline: Option<Instant>,
    ) -> Result<SearchOutcome, EngineError> {
        let started = Instant::now();
        if opts.top_k == 0 {
            return Err(EngineError::invalid("top_k must be positive"));
        }

        let core = self.core.read();
        if query.len() != core.store.dim() {
            return Err(EngineError::invalid(format!(
                "query dim {} does not match store dim {}",
                query.len(),
                core.store.dim()
            )));
        }
        if core.store.is_empty() {
            return Ok(SearchOutcome {
                results: Vec::new(),
                latency_ms: ms_since(started),
                strategy: None,
            });
        }

        let mut strategy = None;
        let (use_index, nprobe, max_codes) = if opts.use_agent {
            let arm = self.agent.lock().select_arm();
            strategy = Some(arm.name.to_string());
            (
                arm.use_index,
                arm.nprobe.unwrap_or(self.default_nprobe),
                arm.max_codes.unwrap_or(self.default_max_codes),
            )
        } else {
            (opts.use_index, self.default_nprobe, self.default_max_codes)
        };

        // The IVF path is L2²-only; cosine queries always take the flat scan.
        let results = match (&core.index, use_index, opts.metric) {
            (Some(index), true, Metric::L2) => {
                let rows = index.search(
                    query,
                    opts.top_k,
                    nprobe,
                    max_codes,
                    core.store.all_vectors(),
                    core.store.norms(),
                    deadline,
                )?;
                rows.into_iter()
                    .map(|(row, distance)| SearchHit {
                        id: core.store.external_id(row as usize),
                        distance,
                    })
                    .collect()
            }
            _ => flat_search(&core.store, query, opts.top_k, opts.metric),
        };
        drop(core);

        let latency_ms = ms_since(started);
        if let Some(name) = &strategy {
            self.agent.lock().update(name, latency_ms);
        }
        Ok(SearchOutcome {
            results,
            latency_ms,
            strategy,
        })
    }

    /// Drops every stored row and the index. Any index trained against the
    /// old layout would point at dead rows, so it goes first.
    pub fn reset(&self) -> Result<(), EngineError> {
        let mut core = self.core.write();
        core.index = None;
        if let Err(err) = std::fs::remove_file(&self.ivf_path) {
            if err.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(%err, "could not remove ivf.bin");
            }
        }
        core.store.reset()
    }

    pub fn stats(&self) -> EngineStats {
        let core = self.core.read();
        EngineStats {
            store: StoreStats {
                dim: core.store.dim(),
                count: core.store.len(),
                capacity: core.store.capacity(),
            },
            index: core.index.as_ref().map(IvfIndex::stats),
        }
    }

    pub fn agent_stats(&self) -> AgentState {
        self.agent.lock().state()
    }

    pub fn agent_reset(&self) -> AgentState {
        let mut agent = self.agent.lock();
        agent.reset();
        agent.state()
    }

    /// Flushes the agent checkpoint; called on graceful shutdown.
    pub fn save_agent(&self) {
        if let Err(err) = self.agent.lock().save() {
            tracing::warn!(%err, "agent checkpoint on shutdown failed");
        }
    }
}

fn flat_search(store: &DataStore, query: &[f32], top_k: usize, metric: Metric) -> Vec<SearchHit> {
    let mut top = TopK::new(top_k);
    match metric {
        Metric::L2 => {
            let dists = vector::l2_sq_batch(query, store.all_vectors(), store.dim(), Some(store.norms()));
            for (row, dist) in dists.into_iter().enumerate() {
                top.push(dist, row as u32);
            }
        }
        Metric::Cosine => {
            let q_norm = simd::norm_sq(query).sqrt();
            for (row, v) in store.all_vectors().chunks(store.dim()).enumerate() {
                let v_norm = store.norms()[row].sqrt();
                let dist = if q_norm == 0.0 || v_norm == 0.0 {
                    1.0
                } else {
                    1.0 - simd::dot(query, v) / (q_norm * v_norm)
                };
                top.push(dist, row as u32);
            }
        }
    }
    top.into_sorted()
        .into_iter()
        .map(|(row, distance)| SearchHit {
            id: store.external_id(row as usize),
            distance,
        })
        .collect()
}

fn ms_since(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1_000.0
}

fn init_rayon(threads: usize) {
    RAYON_INIT.get_or_init(|| {
        let mut builder = rayon::ThreadPoolBuilder::new();
        if threads > 0 {
            builder = builder.num_threads(threads);
        }
        let _ = builder.build_global();
    });
}

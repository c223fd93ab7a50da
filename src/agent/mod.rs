//! Self-tuning strategy selection as a multi-armed bandit.
//!
//! The arm set is a closed, declared table; selection runs ε-greedy or
//! UCB1 over per-arm reward statistics. Reward is inverse latency
//! (`1000 / latency_ms`), so the agent optimizes for fast queries without
//! any recall signal. State checkpoints to `agent_state.json` and survives
//! restarts; a checkpoint failure never fails a query.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::error::EngineError;

pub const STATE_FILE: &str = "agent_state.json";
const STATE_VERSION: u32 = 1;

/// Floor applied to observed latency before inversion.
const LATENCY_FLOOR_MS: f64 = 1e-6;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Algorithm {
    #[serde(rename = "epsilon-greedy")]
    EpsilonGreedy,
    #[serde(rename = "ucb1")]
    Ucb1,
}

impl FromStr for Algorithm {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "epsilon-greedy" => Ok(Self::EpsilonGreedy),
            "ucb1" => Ok(Self::Ucb1),
            other => Err(EngineError::invalid(format!(
                "unknown agent algorithm {other:?}"
            ))),
        }
    }
}

/// One search strategy arm with its fixed parameters.
#[derive(Clone, Copy, Debug)]
pub struct Strategy {
    pub name: &'static str,
    pub use_index: bool,
    pub nprobe: Option<usize>,
    pub max_codes: Option<usize>,
}

/// The declared arm set; declaration order is the tiebreak order.
pub const ARMS: [Strategy; 4] = [
    Strategy {
        name: "flat",
        use_index: false,
        nprobe: None,
        max_codes: None,
    },
    Strategy {
        name: "ivf_conservative",
        use_index: true,
        nprobe: Some(5),
        max_codes: Some(10_000),
    },
    Strategy {
        name: "ivf_balanced",
        use_index: true,
        nprobe: Some(10),
        max_codes: Some(50_000),
    },
    Strategy {
        name: "ivf_aggressive",
        use_index: true,
        nprobe: Some(20),
        max_codes: Some(100_000),
    },
];

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct ArmStats {
    pub pulls: u64,
    pub total_reward: f64,
    pub avg_reward: f64,
    pub avg_latency_ms: f64,
}

/// Persisted + reported agent state. The same schema backs the stats
/// endpoint and the checkpoint file.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AgentState {
    pub version: u32,
    pub algorithm: Algorithm,
    pub epsilon: f64,
    pub total_pulls: u64,
    pub statistics: BTreeMap<String, ArmStats>,
}

pub struct AdaptiveAgent {
    algorithm: Algorithm,
    epsilon: f64,
    stats: [ArmStats; ARMS.len()],
    total_pulls: u64,
    checkpoint_every: u64,
    state_path: PathBuf,
    rng: StdRng,
}

impl AdaptiveAgent {
    /// Creates the agent, restoring a checkpoint from `dir` when one is
    /// present. A missing, stale-versioned, or unreadable checkpoint just
    /// starts from zero knowledge.
    pub fn new(dir: &Path, algorithm: Algorithm, epsilon: f64, checkpoint_every: u64) -> Self {
        let mut agent = Self {
            algorithm,
            epsilon,
            stats: Default::default(),
            total_pulls: 0,
            checkpoint_every,
            state_path: dir.join(STATE_FILE),
            rng: StdRng::from_entropy(),
        };
        agent.load();
        agent
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    /// Picks the next strategy to play.
    pub fn select_arm(&mut self) -> Strategy {
        let idx = match self.algorithm {
            Algorithm::EpsilonGreedy => self.select_epsilon_greedy(),
            Algorithm::Ucb1 => self.select_ucb1(),
        };
        ARMS[idx]
    }

    fn select_epsilon_greedy(&mut self) -> usize {
        if self.rng.gen::<f64>() < self.epsilon {
            return self.rng.gen_range(0..ARMS.len());
        }
        let mut best = 0usize;
        let mut best_avg = f64::NEG_INFINITY;
        for (i, s) in self.stats.iter().enumerate() {
            if s.avg_reward > best_avg {
                best = i;
                best_avg = s.avg_reward;
            }
        }
        // Untried arms sit at avg_reward 0; when nothing has done better,
        // sweep them in declared order before replaying a known arm.
        if best_avg <= 0.0 {
            if let Some(i) = self.stats.iter().position(|s| s.pulls == 0) {
                return i;
            }
        }
        best
    }

    fn select_ucb1(&mut self) -> usize {
        for (i, s) in self.stats.iter().enumerate() {
            if s.pulls == 0 {
                return i;
            }
        }
        let ln_total = (self.total_pulls as f64).ln();
        let mut best = 0usize;
        let mut best_ucb = f64::NEG_INFINITY;
        for (i, s) in self.stats.iter().enumerate() {
            let ucb = s.avg_reward + (2.0 * ln_total / s.pulls as f64).sqrt();
            if ucb > best_ucb {
                best = i;
                best_ucb = ucb;
            }
        }
        best
    }

    /// Records the observed latency for `arm_name`. Unknown arm names are
    /// ignored. Checkpoints every `checkpoint_every` updates.
    pub fn update(&mut self, arm_name: &str, latency_ms: f64) {
        let Some(idx) = ARMS.iter().position(|a| a.name == arm_name) else {
            tracing::debug!(arm = arm_name, "update for unknown arm ignored");
            return;
        };
        let reward = 1000.0 / latency_ms.max(LATENCY_FLOOR_MS);
        let s = &mut self.stats[idx];
        s.pulls += 1;
        s.total_reward += reward;
        s.avg_reward = s.total_reward / s.pulls as f64;
        s.avg_latency_ms += (latency_ms - s.avg_latency_ms) / s.pulls as f64;
        self.total_pulls += 1;

        if self.checkpoint_every > 0 && self.total_pulls % self.checkpoint_every == 0 {
            if let Err(err) = self.save() {
                tracing::warn!(%err, "agent checkpoint failed; keeping state in memory");
            }
        }
    }

    pub fn state(&self) -> AgentState {
        AgentState {
            version: STATE_VERSION,
            algorithm: self.algorithm,
            epsilon: self.epsilon,
            total_pulls: self.total_pulls,
            statistics: ARMS
                .iter()
                .zip(self.stats.iter())
                .map(|(arm, s)| (arm.name.to_string(), *s))
                .collect(),
        }
    }

    /// Writes the checkpoint file.
    pub fn save(&self) -> std::io::Result<()> {
        if let Some(parent) = self.state_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_vec_pretty(&self.state())?;
        fs::write(&self.state_path, json)
    }

    fn load(&mut self) {
        let raw = match fs::read(&self.state_path) {
            Ok(raw) => raw,
            Err(_) => return,
        };
        let state: AgentState = match serde_json::from_slice(&raw) {
            Ok(state) => state,
            Err(err) => {
                tracing::warn!(%err, "unreadable agent state; starting fresh");
                return;
            }
        };
        if state.version != STATE_VERSION {
            tracing::warn!(
                version = state.version,
                "agent state schema mismatch; starting fresh"
            );
            return;
        }
        self.algorithm = state.algorithm;
        self.epsilon = state.epsilon;
        self.total_pulls = state.total_pulls;
        for (i, arm) in ARMS.iter().enumerate() {
            if let Some(s) = state.statistics.get(arm.name) {
                self.stats[i] = *s;
            }
        }
    }

    /// Drops all learned statistics and removes the checkpoint file.
    pub fn reset(&mut self) {
        self.stats = Default::default();
        self.total_pulls = 0;
        if let Err(err) = fs::remove_file(&self.state_path) {
            if err.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(%err, "could not remove agent state file");
            }
        }
    }

    #[cfg(test)]
    fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }
}

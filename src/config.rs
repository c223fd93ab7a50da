use std::fmt::Display;
use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;

use crate::agent::Algorithm;

/// Runtime configuration. Every knob resolves as CLI flag > env var >
/// default; a value that is present but unparsable is a configuration
/// error, never a silent fallback. `dim` has no default and must be
/// supplied.
#[derive(Clone, Debug)]
pub struct Config {
    pub port: u16,
    pub bind_addr: IpAddr,
    pub data_dir: String,
    pub dim: usize,
    pub initial_capacity: usize,
    pub default_nprobe: usize,
    pub default_max_codes: usize,
    pub agent_algorithm: Algorithm,
    pub agent_epsilon: f64,
    pub checkpoint_every: u64,
    pub max_k: usize,
    pub max_vector_batch: usize,
    pub request_timeout_ms: u64,
    pub search_threads: usize,
    pub train_sample_cap: usize,
    pub train_max_iters: usize,
    pub train_seed: u64,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let dim: usize = resolve("--dim", "DIM", 0)?;
        if dim == 0 {
            anyhow::bail!("DIM (or --dim) is required and must be positive");
        }
        let agent_epsilon = resolve("--agent-epsilon", "AGENT_EPSILON", 0.1)?;
        if !(0.0..=1.0).contains(&agent_epsilon) {
            anyhow::bail!("AGENT_EPSILON must be within [0, 1]");
        }
        let initial_capacity = resolve("--initial-capacity", "INITIAL_CAPACITY", 1024)?;
        if initial_capacity == 0 {
            anyhow::bail!("INITIAL_CAPACITY must be positive");
        }
        let max_k = resolve("--max-k", "MAX_K", 256)?;
        if max_k == 0 {
            anyhow::bail!("MAX_K must be positive");
        }

        Ok(Self {
            port: resolve("--port", "PORT", 8080)?,
            bind_addr: resolve("--bind", "BIND_ADDR", IpAddr::V4(Ipv4Addr::LOCALHOST))?,
            data_dir: resolve("--data-dir", "DATA_DIR", "./data".to_string())?,
            dim,
            initial_capacity,
            default_nprobe: resolve("--nprobe", "DEFAULT_NPROBE", 10usize)?.max(1),
            default_max_codes: resolve("--max-codes", "DEFAULT_MAX_CODES", 50_000usize)?.max(1),
            agent_algorithm: resolve(
                "--agent-algorithm",
                "AGENT_ALGORITHM",
                Algorithm::EpsilonGreedy,
            )?,
            agent_epsilon,
            checkpoint_every: resolve("--checkpoint-every", "AGENT_CHECKPOINT_EVERY", 10)?,
            max_k,
            max_vector_batch: resolve("--max-vector-batch", "MAX_VECTOR_BATCH", 4096usize)?
                .max(1),
            request_timeout_ms: resolve("--request-timeout-ms", "REQUEST_TIMEOUT_MS", 30_000)?,
            search_threads: resolve("--search-threads", "SEARCH_THREADS", 0)?,
            train_sample_cap: resolve("--train-sample-cap", "TRAIN_SAMPLE_CAP", 10_000usize)?
                .max(1),
            train_max_iters: resolve("--train-max-iters", "TRAIN_MAX_ITERS", 20usize)?.max(1),
            train_seed: resolve("--train-seed", "TRAIN_SEED", 42)?,
        })
    }
}

/// Resolves one knob: the CLI flag wins over the env var, the default
/// applies only when neither is present. Unparsable input is reported with
/// its source so the operator knows which setting to fix.
fn resolve<T>(flag: &str, env: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    let Some((raw, source)) = lookup(flag, env) else {
        return Ok(default);
    };
    raw.parse()
        .map_err(|err| anyhow::anyhow!("{source}={raw:?}: {err}"))
}

fn lookup(flag: &str, env: &str) -> Option<(String, String)> {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == flag {
            if let Some(value) = args.next() {
                return Some((value, flag.to_string()));
            }
        }
    }
    std::env::var(env).ok().map(|value| (value, env.to_string()))
}

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    #[default]
    L2,
    Cosine,
}

/// One search result: external id plus distance under the query metric
/// (squared L2 or cosine distance; lower is closer for both).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: i64,
    pub distance: f32,
}

#[derive(Clone, Copy, Debug)]
pub struct SearchOptions {
    pub top_k: usize,
    pub metric: Metric,
    pub use_index: bool,
    pub use_agent: bool,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            top_k: 10,
            metric: Metric::L2,
            use_index: true,
            use_agent: false,
        }
    }
}

#[derive(Clone, Debug)]
pub struct SearchOutcome {
    pub results: Vec<SearchHit>,
    pub latency_ms: f64,
    pub strategy: Option<String>,
}

#[derive(Clone, Copy, Debug, Serialize)]
pub struct AddOutcome {
    pub inserted: usize,
    pub total: usize,
}

#[derive(Clone, Copy, Debug, Serialize)]
pub struct TrainOutcome {
    pub k: usize,
    pub n_trained: usize,
}

#[derive(Debug, Serialize)]
pub struct StoreStats {
    pub dim: usize,
    pub count: usize,
    pub capacity: usize,
}

#[derive(Debug, Serialize)]
pub struct EngineStats {
    pub store: StoreStats,
    pub index: Option<crate::index::IndexStats>,
}

pub mod engine;
pub mod types;

pub use engine::SearchEngine;
pub use types::{
    AddOutcome, EngineStats, Metric, SearchHit, SearchOptions, SearchOutcome, TrainOutcome,
};

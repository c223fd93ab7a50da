pub mod clustering;
pub mod ivf;

pub use clustering::KmeansConfig;
pub use ivf::{IndexStats, IvfIndex};

pub mod frequency;
pub mod hotpath;

pub use frequency::{FrequencyAnalyzer, FrequencyResult};
pub use hotpath::{HotPathAnalyzer, HotPathNode};

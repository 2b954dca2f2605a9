pub mod entry;
pub mod sys;

pub use entry::{PerfEntry, PerfRecord};

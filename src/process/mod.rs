pub mod enumerate;

pub use enumerate::{list_pids, list_tids, pid_exists, ProcessNameFilter};

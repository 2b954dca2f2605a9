//! A live sampling CPU profiler core for Linux.
//!
//! Attaches to a target process by executable name, samples the CPU
//! program counter and frame-pointer call chain of each of its threads via
//! `perf_event_open`, resolves instruction pointers to symbol names, and
//! feeds the enriched sample stream through a small pipeline of analyzers.
//!
//! The pipeline is single-threaded and cooperative: [`pipeline::PipelineDriver`]
//! owns a [`sampler::ThreadSampler`] collector, a [`interceptor::SymbolResolver`]
//! interceptor, and any number of [`pipeline::Analyzer`]s (this crate ships
//! [`analyzers::FrequencyAnalyzer`] and [`analyzers::HotPathAnalyzer`]).

pub mod analyzers;
pub mod config;
pub mod error;
pub mod interceptor;
pub mod maps;
pub mod multiplex;
pub mod perf;
pub mod pipeline;
pub mod pool;
pub mod process;
pub mod sampler;
pub mod symbol;
pub mod symbols;

pub use config::SamplerConfig;
pub use error::{ProfilerError, Result};
pub use interceptor::SymbolResolver;
pub use pipeline::{Analyzer, Collector, Interceptor, PipelineDriver};
pub use sampler::ThreadSampler;
pub use symbol::{Sample, SymbolIdentity};

/// Convenience constructor assembling the shipped pipeline: a thread-tracking
/// sampler targeting `process_name`, the symbol-resolution interceptor, and
/// no analyzers (callers add the ones they want via
/// [`pipeline::PipelineDriver::add_analyzer`]).
pub fn build_pipeline(process_name: impl Into<String>, config: &SamplerConfig) -> Result<PipelineDriver<ThreadSampler>> {
    let sampler = ThreadSampler::new(process_name, config)?;
    Ok(PipelineDriver::new()
        .with_collector(sampler)
        .add_interceptor(Box::new(SymbolResolver::new())))
}

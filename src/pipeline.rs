//! Pipeline driver and the capability traits it composes.
//!
//! The driver owns a concrete collector type, so it and its RAII
//! enable/disable bracket stay simple and monomorphic over the one real
//! collector type, while interceptors and analyzers are trait objects so
//! a test can substitute a stub without pulling in real kernel resources.

use crate::error::{ProfilerError, Result};
use crate::symbol::Sample;
use std::time::{Duration, Instant};

pub trait Collector {
    fn enable(&mut self);
    fn disable(&mut self);
    fn reset(&mut self);
    fn collect(&mut self, timeout: Duration) -> Result<&mut [Sample]>;
}

pub trait Interceptor {
    fn alter(&mut self, batch: &mut [Sample]);
    fn reset(&mut self);
}

pub trait Analyzer {
    fn feed(&mut self, batch: &[Sample]);
    fn reset(&mut self);
}

/// Drives drain -> intercept -> feed for a bounded wall-clock duration.
/// Not `Send`/`Sync`: the collector is the sole owner of kernel resources
/// and this driver is not safe to use from more than one thread.
pub struct PipelineDriver<C: Collector> {
    collector: Option<C>,
    interceptors: Vec<Box<dyn Interceptor>>,
    analyzers: Vec<Box<dyn Analyzer>>,
}

impl<C: Collector> PipelineDriver<C> {
    pub fn new() -> Self {
        PipelineDriver {
            collector: None,
            interceptors: Vec::new(),
            analyzers: Vec::new(),
        }
    }

    pub fn with_collector(mut self, collector: C) -> Self {
        self.collector = Some(collector);
        self
    }

    pub fn add_interceptor(mut self, interceptor: Box<dyn Interceptor>) -> Self {
        self.interceptors.push(interceptor);
        self
    }

    pub fn add_analyzer(mut self, analyzer: Box<dyn Analyzer>) -> Self {
        self.analyzers.push(analyzer);
        self
    }

    /// Enables the collector, runs drain/intercept/feed iterations until
    /// `duration` elapses, then disables the collector on every exit path
    /// (including an error from the collector, an interceptor, or an
    /// analyzer).
    pub fn collect_for(&mut self, duration: Duration) -> Result<()> {
        let collector = match self.collector.as_mut() {
            Some(c) => c,
            None => return Err(ProfilerError::configuration("pipeline has no collector")),
        };

        collector.enable();
        log::debug!("collect_for starting, duration={duration:?}");
        let start = Instant::now();
        let outcome = Self::run_loop(collector, &mut self.interceptors, &mut self.analyzers, duration);
        collector.disable();
        log::debug!("collect_for finished after {:?}", start.elapsed());
        outcome
    }

    fn run_loop(
        collector: &mut C,
        interceptors: &mut [Box<dyn Interceptor>],
        analyzers: &mut [Box<dyn Analyzer>],
        duration: Duration,
    ) -> Result<()> {
        let start = Instant::now();
        let mut total_samples = 0usize;
        loop {
            let elapsed = start.elapsed();
            if elapsed >= duration {
                break;
            }
            let remaining = duration - elapsed;
            let batch = collector.collect(remaining)?;
            total_samples += batch.len();
            for interceptor in interceptors.iter_mut() {
                interceptor.alter(batch);
            }
            for analyzer in analyzers.iter_mut() {
                analyzer.feed(batch);
            }
        }
        log::debug!("collect_for processed {total_samples} samples");
        Ok(())
    }

    /// Resets the collector, every interceptor, and every analyzer.
    pub fn reset(&mut self) {
        if let Some(collector) = self.collector.as_mut() {
            collector.reset();
        }
        for interceptor in self.interceptors.iter_mut() {
            interceptor.reset();
        }
        for analyzer in self.analyzers.iter_mut() {
            analyzer.reset();
        }
    }
}

impl<C: Collector> Default for PipelineDriver<C> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    struct StubCollector {
        enabled: bool,
        batches_remaining: usize,
        batch: Vec<Sample>,
    }

    impl Collector for StubCollector {
        fn enable(&mut self) {
            self.enabled = true;
        }
        fn disable(&mut self) {
            self.enabled = false;
        }
        fn reset(&mut self) {
            self.batches_remaining = 0;
        }
        fn collect(&mut self, _timeout: Duration) -> Result<&mut [Sample]> {
            if self.batches_remaining > 0 {
                self.batches_remaining -= 1;
                self.batch = vec![Sample::new()];
            } else {
                self.batch.clear();
            }
            Ok(&mut self.batch)
        }
    }

    struct CountingAnalyzer {
        count: Rc<RefCell<usize>>,
    }

    impl Analyzer for CountingAnalyzer {
        fn feed(&mut self, batch: &[Sample]) {
            *self.count.borrow_mut() += batch.len();
        }
        fn reset(&mut self) {
            *self.count.borrow_mut() = 0;
        }
    }

    #[test]
    fn missing_collector_is_a_configuration_error() {
        let mut driver: PipelineDriver<StubCollector> = PipelineDriver::new();
        let err = driver.collect_for(Duration::from_millis(1)).unwrap_err();
        assert!(matches!(err, ProfilerError::Configuration { .. }));
    }

    #[test]
    fn feeds_batches_through_analyzers_and_disables_on_exit() {
        let count = Rc::new(RefCell::new(0));
        let collector = StubCollector {
            enabled: false,
            batches_remaining: 3,
            batch: Vec::new(),
        };
        let mut driver = PipelineDriver::new()
            .with_collector(collector)
            .add_analyzer(Box::new(CountingAnalyzer { count: Rc::clone(&count) }));

        driver.collect_for(Duration::from_millis(5)).unwrap();
        assert!(*count.borrow() >= 3);
        assert!(!driver.collector.as_ref().unwrap().enabled);
    }
}

//! `SamplerConfig`: the single typed value collecting every tunable
//! parameter of the sampler and its resolver, built with chained `with_*`
//! setters.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct SamplerConfig {
    pub processes_update_interval: Duration,
    pub sample_period: u64,
    pub mmap_page_count: usize,
    pub wakeup_events: u32,
    pub exclude_user: bool,
    pub exclude_kernel: bool,
    pub exclude_hypervisor: bool,
    pub include_callchain: bool,
    pub inclusive_trace_level: usize,
    pub survival_process_check_interval: Duration,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        SamplerConfig {
            processes_update_interval: Duration::from_millis(100),
            sample_period: 100_000,
            mmap_page_count: 8,
            wakeup_events: 8,
            exclude_user: false,
            exclude_kernel: true,
            exclude_hypervisor: true,
            include_callchain: true,
            inclusive_trace_level: 3,
            survival_process_check_interval: Duration::from_secs(1),
        }
    }
}

impl SamplerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_processes_update_interval(mut self, interval: Duration) -> Self {
        self.processes_update_interval = interval;
        self
    }

    pub fn with_sample_period(mut self, period: u64) -> Self {
        self.sample_period = period;
        self
    }

    pub fn with_mmap_page_count(mut self, pages: usize) -> Self {
        assert!(pages.is_power_of_two(), "mmap_page_count must be a power of two");
        self.mmap_page_count = pages;
        self
    }

    pub fn with_wakeup_events(mut self, events: u32) -> Self {
        self.wakeup_events = events;
        self
    }

    pub fn with_exclude_user(mut self, exclude: bool) -> Self {
        self.exclude_user = exclude;
        self
    }

    pub fn with_exclude_kernel(mut self, exclude: bool) -> Self {
        self.exclude_kernel = exclude;
        self
    }

    pub fn with_exclude_hypervisor(mut self, exclude: bool) -> Self {
        self.exclude_hypervisor = exclude;
        self
    }

    pub fn with_include_callchain(mut self, include: bool) -> Self {
        self.include_callchain = include;
        self
    }

    pub fn with_inclusive_trace_level(mut self, level: usize) -> Self {
        self.inclusive_trace_level = level;
        self
    }

    pub fn with_survival_process_check_interval(mut self, interval: Duration) -> Self {
        self.survival_process_check_interval = interval;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let cfg = SamplerConfig::default();
        assert_eq!(cfg.processes_update_interval, Duration::from_millis(100));
        assert_eq!(cfg.sample_period, 100_000);
        assert_eq!(cfg.mmap_page_count, 8);
        assert_eq!(cfg.wakeup_events, 8);
        assert!(!cfg.exclude_user);
        assert!(cfg.exclude_kernel);
        assert!(cfg.exclude_hypervisor);
        assert!(cfg.include_callchain);
        assert_eq!(cfg.inclusive_trace_level, 3);
        assert_eq!(cfg.survival_process_check_interval, Duration::from_secs(1));
    }

    #[test]
    fn builder_overrides_apply() {
        let cfg = SamplerConfig::new()
            .with_sample_period(1000)
            .with_mmap_page_count(16)
            .with_exclude_kernel(false);
        assert_eq!(cfg.sample_period, 1000);
        assert_eq!(cfg.mmap_page_count, 16);
        assert!(!cfg.exclude_kernel);
    }
}

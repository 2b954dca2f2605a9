//! Thread-tracking sampler: maintains the tid to perf-entry map, runs
//! periodic process/thread discovery, and drains ready ring buffers into
//! samples.

use crate::config::SamplerConfig;
use crate::error::{ProfilerError, Result};
use crate::multiplex::ReadinessMultiplexer;
use crate::perf::{PerfEntry, PerfRecord};
use crate::pipeline::Collector;
use crate::pool::FreeListPool;
use crate::process::{list_pids, list_tids, ProcessNameFilter};
use crate::symbol::Sample;
use rustc_hash::{FxHashMap, FxHashSet};
use std::time::{Duration, Instant};

/// Any call-chain entry whose upper 48 bits are all set is a kernel/user
/// transition marker the kernel injects at frame-pointer chain boundaries,
/// not a real caller address.
fn is_transition_marker(ip: u64) -> bool {
    const UPPER_48_MASK: u64 = 0xFFFF_FFFF_FFFF_0000;
    ip & UPPER_48_MASK == UPPER_48_MASK
}

pub struct ThreadSampler {
    filter: ProcessNameFilter,
    entries: FxHashMap<u32, PerfEntry>,
    multiplexer: ReadinessMultiplexer,
    samples_pool: FreeListPool<Sample>,
    output: Vec<Sample>,
    discovery_interval: Duration,
    last_discovery: Option<Instant>,
    scratch_tids: Vec<u32>,
    enabled: bool,
    sample_period: u64,
    mmap_page_count: usize,
    wakeup_events: u32,
    include_callchain: bool,
    exclude_user: bool,
    exclude_kernel: bool,
    exclude_hypervisor: bool,
}

impl ThreadSampler {
    pub fn new(process_name: impl Into<String>, config: &SamplerConfig) -> Result<Self> {
        Ok(ThreadSampler {
            filter: ProcessNameFilter::new(process_name),
            entries: FxHashMap::default(),
            multiplexer: ReadinessMultiplexer::new(64)?,
            samples_pool: FreeListPool::new(256),
            output: Vec::new(),
            discovery_interval: config.processes_update_interval,
            last_discovery: None,
            scratch_tids: Vec::new(),
            enabled: false,
            sample_period: config.sample_period,
            mmap_page_count: config.mmap_page_count,
            wakeup_events: config.wakeup_events,
            include_callchain: config.include_callchain,
            exclude_user: config.exclude_user,
            exclude_kernel: config.exclude_kernel,
            exclude_hypervisor: config.exclude_hypervisor,
        })
    }

    /// Lists the pids passing the filter, then their tids, into a sorted
    /// composite list; opens entries for new tids, tears down entries for
    /// tids that vanished. A tid that died between enumeration and open is
    /// skipped; any other open failure is surfaced.
    fn discover(&mut self) -> Result<()> {
        self.scratch_tids.clear();
        for pid in list_pids(&mut self.filter) {
            self.scratch_tids.extend(list_tids(pid));
        }
        self.scratch_tids.sort_unstable();

        for &tid in &self.scratch_tids {
            if self.entries.contains_key(&tid) {
                continue;
            }
            match PerfEntry::open(
                tid,
                self.sample_period,
                self.mmap_page_count,
                self.wakeup_events,
                self.include_callchain,
                self.exclude_user,
                self.exclude_kernel,
                self.exclude_hypervisor,
            ) {
                Ok(entry) => {
                    if let Err(e) = self.multiplexer.add(entry.fd(), tid as u64) {
                        log::error!("failed to register perf fd for tid {tid}: {e}");
                        return Err(e);
                    }
                    if self.enabled {
                        entry.enable();
                    }
                    self.entries.insert(tid, entry);
                    log::trace!("attached perf entry for tid {tid}");
                }
                Err(ProfilerError::Transient { .. }) => {
                    log::debug!("tid {tid} vanished before perf_event_open");
                }
                Err(e) => {
                    log::error!("perf_event_open failed for tid {tid}: {e}");
                    return Err(e);
                }
            }
        }

        let present: FxHashSet<u32> = self.scratch_tids.iter().copied().collect();
        let stale: Vec<u32> = self
            .entries
            .keys()
            .copied()
            .filter(|tid| !present.contains(tid))
            .collect();
        for tid in stale {
            if let Some(entry) = self.entries.remove(&tid) {
                self.multiplexer.remove(entry.fd());
                entry.disable();
            }
        }

        self.last_discovery = Some(Instant::now());
        Ok(())
    }

    /// Runs discovery if due, releases the previous batch to the sample
    /// pool, waits for readiness, and converts ready records into samples.
    pub fn collect(&mut self, timeout: Duration) -> Result<&mut [Sample]> {
        let discovery_due = match self.last_discovery {
            None => true,
            Some(t) => t.elapsed() >= self.discovery_interval,
        };
        if discovery_due {
            self.discover()?;
        }

        for sample in self.output.drain(..) {
            self.samples_pool.deallocate(sample, |s| s.reset_for_reuse());
        }

        let events = self.multiplexer.wait(timeout)?;
        for event in events {
            let tid = event.token as u32;
            if event.hup_or_error {
                if let Some(entry) = self.entries.remove(&tid) {
                    self.multiplexer.remove(entry.fd());
                    entry.disable();
                }
                continue;
            }
            if !event.readable {
                continue;
            }
            let wakeup_events = self.wakeup_events as usize;
            let include_callchain = self.include_callchain;
            let pool = &mut self.samples_pool;
            let output = &mut self.output;
            if let Some(entry) = self.entries.get_mut(&tid) {
                for record in entry.drain(wakeup_events) {
                    if let PerfRecord::Sample { ip, pid, tid, call_chain } = record {
                        let mut sample = pool.allocate((), |s, _| s.reset_for_reuse(), |_| Sample::new());
                        sample.ip = ip;
                        sample.pid = pid;
                        sample.tid = tid;
                        if include_callchain {
                            for cip in call_chain {
                                if cip == ip || is_transition_marker(cip) {
                                    continue;
                                }
                                sample.call_chain_ips.push(cip);
                                sample.call_chain_symbols.push(None);
                            }
                        }
                        output.push(sample);
                    }
                }
                entry.advance();
            }
        }

        Ok(&mut self.output)
    }

    pub fn enable(&mut self) {
        self.enabled = true;
        for entry in self.entries.values() {
            entry.enable();
        }
    }

    pub fn disable(&mut self) {
        self.enabled = false;
        for entry in self.entries.values() {
            entry.disable();
        }
    }

    /// Disables and drops every entry, clears scratch state, and forgets
    /// the last discovery timestamp, matching a freshly constructed sampler.
    pub fn reset(&mut self) {
        self.disable();
        for (_, entry) in self.entries.drain() {
            self.multiplexer.remove(entry.fd());
        }
        self.scratch_tids.clear();
        self.last_discovery = None;
        for sample in self.output.drain(..) {
            self.samples_pool.deallocate(sample, |s| s.reset_for_reuse());
        }
    }

    pub fn tracked_tid_count(&self) -> usize {
        self.entries.len()
    }
}

impl Collector for ThreadSampler {
    fn enable(&mut self) {
        ThreadSampler::enable(self)
    }

    fn disable(&mut self) {
        ThreadSampler::disable(self)
    }

    fn reset(&mut self) {
        ThreadSampler::reset(self)
    }

    fn collect(&mut self, timeout: Duration) -> Result<&mut [Sample]> {
        ThreadSampler::collect(self, timeout)
    }
}

//! Symbol-resolution interceptor.
//!
//! Owns the per-pid (address-space, JIT-map) caches and the process-wide
//! (executable-symbol-table, kernel-symbol-table) caches, and attaches a
//! `SymbolIdentity` to every sample's `ip` and call-chain entries by
//! falling back through address-space map, executable table, kernel
//! table, and JIT map in turn.

use crate::maps::AddressSpaceMap;
use crate::pipeline::Interceptor;
use crate::pool::{PathInterner, SingletonCache};
use crate::process::pid_exists;
use crate::symbol::{Sample, SymbolIdentity};
use crate::symbols::{ExecutableSymbolTable, JitMapResolver, KernelSymbolTable};
use rustc_hash::FxHashMap;
use std::rc::Rc;
use std::time::{Duration, Instant};

const SWEEP_INTERVAL: Duration = Duration::from_secs(1);

pub struct SymbolResolver {
    address_space_maps: FxHashMap<u32, AddressSpaceMap>,
    jit_maps: FxHashMap<u32, JitMapResolver>,
    executable_tables: SingletonCache<String, ExecutableSymbolTable>,
    kernel_table: KernelSymbolTable,
    interner: PathInterner,
    last_sweep: Option<Instant>,
    sweep_interval: Duration,
    last_lookup_hint: Option<u32>,
}

impl SymbolResolver {
    pub fn new() -> Self {
        SymbolResolver {
            address_space_maps: FxHashMap::default(),
            jit_maps: FxHashMap::default(),
            executable_tables: SingletonCache::new(),
            kernel_table: KernelSymbolTable::load_running_kernel(),
            interner: PathInterner::new(),
            last_sweep: None,
            sweep_interval: SWEEP_INTERVAL,
            last_lookup_hint: None,
        }
    }

    /// Resolves `ip` for `pid` through the address-space-map, executable
    /// table, kernel table, and JIT-map fallback chain, using `ip`
    /// unchanged (not `ip - 1`) per the core's resolved attribution
    /// convention. The last-used pid is cached only to skip the hashmap
    /// lookup on a repeated pid, not to bypass the reload rate limit.
    pub fn resolve(&mut self, pid: u32, ip: u64) -> Option<Rc<SymbolIdentity>> {
        let address_space = if self.last_lookup_hint == Some(pid) {
            self.address_space_maps
                .get_mut(&pid)
                .expect("hint pid is only set once its map entry exists")
        } else {
            self.address_space_maps.entry(pid).or_insert_with(|| AddressSpaceMap::new(pid))
        };
        self.last_lookup_hint = Some(pid);

        if let Some((path, offset)) = address_space.locate(ip, false, &mut self.interner) {
            let path_key = path.to_string();
            let table = self.executable_tables.get_or_insert(path_key.clone(), || {
                ExecutableSymbolTable::load(&path_key, Rc::clone(&path)).unwrap_or_else(|e| {
                    log::warn!("failed to load executable symbol table for {path_key}: {e}");
                    ExecutableSymbolTable::empty()
                })
            });
            if let Some(sym) = table.resolve(offset) {
                return Some(sym);
            }
        }

        if let Some(sym) = self.kernel_table.resolve(ip) {
            return Some(sym);
        }

        let jit_map = self.jit_maps.entry(pid).or_insert_with(|| JitMapResolver::new(pid));
        jit_map.resolve(ip, false)
    }

    /// Resolves every sample's primary ip and its call-chain ips in place,
    /// then periodically sweeps dead-pid caches.
    pub fn alter(&mut self, batch: &mut [Sample]) {
        for sample in batch {
            sample.symbol = self.resolve(sample.pid, sample.ip);
            for i in 0..sample.call_chain_ips.len() {
                let ip = sample.call_chain_ips[i];
                let pid = sample.pid;
                sample.call_chain_symbols[i] = self.resolve(pid, ip);
            }
        }
        self.sweep_if_due();
    }

    fn sweep_if_due(&mut self) {
        let due = match self.last_sweep {
            None => true,
            Some(t) => t.elapsed() >= self.sweep_interval,
        };
        if !due {
            return;
        }
        let dead_pids: Vec<u32> = self
            .address_space_maps
            .keys()
            .copied()
            .filter(|pid| !pid_exists(*pid))
            .collect();
        let evicted = dead_pids.len();
        for pid in &dead_pids {
            self.address_space_maps.remove(pid);
        }
        let live_pids: std::collections::HashSet<u32> = self.address_space_maps.keys().copied().collect();
        let stale_jit: Vec<u32> = self
            .jit_maps
            .keys()
            .copied()
            .filter(|pid| !live_pids.contains(pid))
            .collect();
        for pid in &stale_jit {
            self.jit_maps.remove(pid);
        }
        if evicted > 0 || !stale_jit.is_empty() {
            log::trace!("cache sweep evicted {evicted} address-space caches, {} jit-map caches", stale_jit.len());
        }
        self.last_sweep = Some(Instant::now());
    }

    /// Resets every per-pid cache; process-wide caches (kernel table,
    /// executable-table cache, interner) are kept since they're immutable
    /// after their first load and cheap to keep around between sessions.
    pub fn reset(&mut self) {
        self.address_space_maps.clear();
        self.jit_maps.clear();
        self.last_sweep = None;
        self.last_lookup_hint = None;
    }
}

impl Default for SymbolResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl Interceptor for SymbolResolver {
    fn alter(&mut self, batch: &mut [Sample]) {
        SymbolResolver::alter(self, batch)
    }

    fn reset(&mut self) {
        SymbolResolver::reset(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_symbol_in_own_running_binary() {
        let mut resolver = SymbolResolver::new();
        let probe = SymbolResolver::new as usize as u64;
        let pid = std::process::id();
        let sym = resolver.resolve(pid, probe);
        assert!(sym.is_some());
    }

    #[test]
    fn resolving_same_address_twice_yields_same_reference() {
        let mut resolver = SymbolResolver::new();
        let probe = SymbolResolver::new as usize as u64;
        let pid = std::process::id();
        let a = resolver.resolve(pid, probe).unwrap();
        let b = resolver.resolve(pid, probe).unwrap();
        assert!(Rc::ptr_eq(&a, &b));
    }

    #[test]
    fn dead_pid_resolves_to_none() {
        let mut resolver = SymbolResolver::new();
        let bogus_pid = u32::MAX - 1;
        assert!(resolver.resolve(bogus_pid, 0x1234).is_none());
    }

    #[test]
    fn reset_clears_per_pid_caches() {
        let mut resolver = SymbolResolver::new();
        let pid = std::process::id();
        resolver.resolve(pid, 0x1234);
        assert!(!resolver.address_space_maps.is_empty());
        resolver.reset();
        assert!(resolver.address_space_maps.is_empty());
        assert!(resolver.jit_maps.is_empty());
    }
}

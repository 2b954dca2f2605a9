//! The shared data model: symbol identities and samples.

use std::rc::Rc;

/// An immutable record identifying a named function in a named object.
/// Equality is meaningful only by reference: two resolutions of the same
/// (path, file-offset-start, file-offset-end) must yield the identical
/// `Rc`, which the caches in `symbols::table` and `symbols::jit_map`
/// guarantee by construction.
#[derive(Debug)]
pub struct SymbolIdentity {
    pub original_name: String,
    pub demangled_name: Option<String>,
    pub path: Rc<str>,
    pub file_offset_start: u64,
    pub file_offset_end: u64,
}

impl SymbolIdentity {
    pub fn new(
        original_name: String,
        demangled_name: Option<String>,
        path: Rc<str>,
        file_offset_start: u64,
        file_offset_end: u64,
    ) -> Self {
        let demangled_name = match demangled_name {
            Some(d) if d != original_name => Some(d),
            _ => None,
        };
        SymbolIdentity {
            original_name,
            demangled_name,
            path,
            file_offset_start,
            file_offset_end,
        }
    }

    /// The name to present: demangled when available and distinct from the
    /// original, else the original (possibly-mangled) name.
    pub fn display_name(&self) -> &str {
        self.demangled_name.as_deref().unwrap_or(&self.original_name)
    }
}

/// Well-known pseudo-paths for symbol identities that do not come from an
/// on-disk ELF object.
pub const KERNEL_PATH: &str = "[kernel]";

pub fn jit_map_path(pid: u32) -> String {
    format!("[jit:{pid}]")
}

/// Per-sample mutable record produced by the sampler and enriched by the
/// interceptor. Samples are pooled and recycled by the sampler; an analyzer
/// must not retain one beyond the batch it was handed.
#[derive(Debug, Default)]
pub struct Sample {
    pub ip: u64,
    pub pid: u32,
    pub tid: u32,
    pub symbol: Option<Rc<SymbolIdentity>>,
    pub call_chain_ips: Vec<u64>,
    pub call_chain_symbols: Vec<Option<Rc<SymbolIdentity>>>,
}

impl Sample {
    pub fn new() -> Self {
        Sample::default()
    }

    /// Clears all fields but keeps the two `Vec` allocations, so the pool
    /// can recycle a `Sample` without re-allocating its call-chain buffers.
    pub fn reset_for_reuse(&mut self) {
        self.ip = 0;
        self.pid = 0;
        self.tid = 0;
        self.symbol = None;
        self.call_chain_ips.clear();
        self.call_chain_symbols.clear();
    }

    /// Invariant: the two call-chain sequences are always the same length,
    /// one resolved symbol per raw ip.
    pub fn check_invariant(&self) -> bool {
        self.call_chain_ips.len() == self.call_chain_symbols.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn demangled_name_dropped_when_identical_to_original() {
        let s = SymbolIdentity::new(
            "main".to_string(),
            Some("main".to_string()),
            Rc::from("/bin/a"),
            0,
            10,
        );
        assert!(s.demangled_name.is_none());
        assert_eq!(s.display_name(), "main");
    }

    #[test]
    fn demangled_name_kept_when_different() {
        let s = SymbolIdentity::new(
            "_ZN3foo3barEv".to_string(),
            Some("foo::bar".to_string()),
            Rc::from("/bin/a"),
            0,
            10,
        );
        assert_eq!(s.display_name(), "foo::bar");
    }

    #[test]
    fn sample_reset_keeps_allocation() {
        let mut sample = Sample::new();
        sample.call_chain_ips.push(1);
        sample.call_chain_symbols.push(None);
        let cap = sample.call_chain_ips.capacity();
        sample.reset_for_reuse();
        assert!(sample.check_invariant());
        assert_eq!(sample.call_chain_ips.capacity(), cap);
        assert!(sample.call_chain_ips.is_empty());
    }
}

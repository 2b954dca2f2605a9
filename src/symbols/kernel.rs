//! Kernel symbol table: parses `/proc/kallsyms` into an absolute-address
//! range lookup.

use crate::symbol::{SymbolIdentity, KERNEL_PATH};
use crate::symbols::table::RangeSymbolTable;
use std::fs;
use std::rc::Rc;

pub struct KernelSymbolTable {
    table: RangeSymbolTable,
}

/// Parses one `/proc/kallsyms` line: `<hex addr> <space> <type letter>
/// <space> <name> [\t<module>]`. Returns `None` for malformed lines.
fn parse_line(line: &str) -> Option<(u64, &str)> {
    let mut fields = line.splitn(3, ' ');
    let addr = u64::from_str_radix(fields.next()?, 16).ok()?;
    let _kind = fields.next()?;
    let rest = fields.next()?;
    let name = rest.split_whitespace().next()?;
    Some((addr, name))
}

impl KernelSymbolTable {
    /// Parses kallsyms text (as read from `/proc/kallsyms`) into a range
    /// table. Each entry's size is the distance to the next address in
    /// file order after sorting by address; the last entry gets size 1.
    pub fn parse(kallsyms: &str) -> Self {
        let mut entries: Vec<(u64, &str)> = kallsyms.lines().filter_map(parse_line).collect();
        entries.sort_by_key(|(addr, _)| *addr);
        entries.dedup_by_key(|(addr, _)| *addr);

        let path: Rc<str> = Rc::from(KERNEL_PATH);
        let mut symbols = Vec::with_capacity(entries.len());
        for (i, (addr, name)) in entries.iter().enumerate() {
            let size = entries
                .get(i + 1)
                .map(|(next, _)| next.saturating_sub(*addr).max(1))
                .unwrap_or(1);
            symbols.push(Rc::new(SymbolIdentity::new(
                name.to_string(),
                None,
                Rc::clone(&path),
                *addr,
                addr + size,
            )));
        }

        KernelSymbolTable {
            table: RangeSymbolTable::new(symbols),
        }
    }

    /// Builds the table from the live `/proc/kallsyms`. Kernels that
    /// restrict kallsyms to root produce an all-zero-address file; those
    /// entries still parse but every address collapses to the same range,
    /// which is acceptable: `resolve` will simply never find a match.
    pub fn load_running_kernel() -> Self {
        let contents = fs::read_to_string("/proc/kallsyms").unwrap_or_default();
        Self::parse(&contents)
    }

    pub fn min_address(&self) -> u64 {
        self.table.min_address()
    }

    pub fn max_address(&self) -> u64 {
        self.table.max_address()
    }

    pub fn resolve(&self, address: u64) -> Option<Rc<SymbolIdentity>> {
        self.table.resolve(address).cloned()
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
ffffffff81000000 T _text
ffffffff81000190 T startup_64
ffffffff810002e0 T secondary_startup_64
ffffffff81400000 T _etext
";

    #[test]
    fn resolves_within_a_symbols_range() {
        let table = KernelSymbolTable::parse(SAMPLE);
        let sym = table.resolve(0xffffffff81000050).unwrap();
        assert_eq!(sym.original_name, "_text");
    }

    #[test]
    fn last_symbol_gets_size_one() {
        let table = KernelSymbolTable::parse(SAMPLE);
        assert!(table.resolve(0xffffffff81400000).is_some());
        assert!(table.resolve(0xffffffff81400001).is_none());
    }

    #[test]
    fn out_of_range_address_is_none() {
        let table = KernelSymbolTable::parse(SAMPLE);
        assert!(table.resolve(0).is_none());
    }

    #[test]
    fn skips_malformed_lines() {
        let table = KernelSymbolTable::parse("garbage\nffffffff81000000 T _text\n");
        assert_eq!(table.len(), 1);
    }
}

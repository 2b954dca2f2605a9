//! Executable symbol table: parses an ELF object's symbol table into a
//! file-offset-keyed range lookup, owning the fully parsed data rather
//! than borrowing from the backing mapping past load time.

use crate::error::{ProfilerError, Result};
use crate::symbol::SymbolIdentity;
use crate::symbols::demangle::demangle_any;
use crate::symbols::table::RangeSymbolTable;
use memmap2::Mmap;
use object::{Object, ObjectSection, ObjectSegment, ObjectSymbol, SectionIndex, SymbolKind};
use rustc_hash::FxHashMap;
use std::fs::File;
use std::rc::Rc;

#[derive(Debug)]
pub struct ExecutableSymbolTable {
    table: RangeSymbolTable,
}

struct RawSymbol {
    vaddr: u64,
    size: u64,
    section: Option<SectionIndex>,
    name: String,
}

impl ExecutableSymbolTable {
    /// A table with no symbols, used to cache a path that failed to parse so
    /// repeated lookups don't re-attempt the load; `resolve` always returns
    /// `None`.
    pub fn empty() -> Self {
        ExecutableSymbolTable {
            table: RangeSymbolTable::new(Vec::new()),
        }
    }

    /// Loads and parses the ELF object at `path`. `path` is also the
    /// interned path stored on every resulting `SymbolIdentity`.
    pub fn load(path: &str, interned_path: Rc<str>) -> Result<Self> {
        let file_handle = File::open(path).map_err(|e| ProfilerError::transient("open executable object", e))?;
        // SAFETY: the mapping is read-only and only ever read through the
        // `object` crate's borrow of this slice, which does not outlive
        // `load`; truncation of the backing file underneath us is an
        // accepted race with the filesystem, the same as a plain `read`
        // racing a concurrent write.
        let mmap = unsafe { Mmap::map(&file_handle) }.map_err(|e| ProfilerError::transient("mmap executable object", e))?;
        let file = object::File::parse(&*mmap).map_err(|e| ProfilerError::parsing("elf parse", e.to_string()))?;

        let segments: Vec<(u64, u64, u64)> = file
            .segments()
            .filter(|s| s.size() > 0)
            .map(|s| {
                let (file_offset, _file_size) = s.file_range();
                (file_offset, s.address(), s.address() + s.size())
            })
            .collect();

        let vaddr_to_offset = |vaddr: u64| -> Option<u64> {
            segments
                .iter()
                .find(|(_, start, end)| vaddr >= *start && vaddr < *end)
                .map(|(offset, start, _)| vaddr - start + offset)
        };

        let mut raws: Vec<RawSymbol> = Vec::new();
        for sym in file.symbols().chain(file.dynamic_symbols()) {
            if sym.is_undefined() {
                continue;
            }
            match sym.kind() {
                SymbolKind::Section | SymbolKind::File | SymbolKind::Label => continue,
                _ => {}
            }
            let name = match sym.name() {
                Ok(n) if !n.is_empty() => n.to_string(),
                _ => continue,
            };
            let section = match sym.section() {
                object::SymbolSection::Section(idx) => Some(idx),
                _ => None,
            };
            raws.push(RawSymbol {
                vaddr: sym.address(),
                size: sym.size(),
                section,
                name,
            });
        }

        let section_end = |idx: SectionIndex| -> Option<u64> {
            file.section_by_index(idx).ok().map(|s| s.address() + s.size())
        };

        let mut by_section: FxHashMap<Option<SectionIndex>, Vec<usize>> = FxHashMap::default();
        for (i, r) in raws.iter().enumerate() {
            by_section.entry(r.section).or_default().push(i);
        }
        for idxs in by_section.values_mut() {
            idxs.sort_by_key(|&i| raws[i].vaddr);
        }

        let mut symbols = Vec::with_capacity(raws.len());
        for idxs in by_section.values() {
            for (pos, &i) in idxs.iter().enumerate() {
                let size = if raws[i].size > 0 {
                    raws[i].size
                } else if let Some(&next_i) = idxs.get(pos + 1) {
                    raws[next_i].vaddr.saturating_sub(raws[i].vaddr).max(1)
                } else if let Some(sec) = raws[i].section {
                    section_end(sec)
                        .map(|end| end.saturating_sub(raws[i].vaddr).max(1))
                        .unwrap_or(1)
                } else {
                    1
                };

                let vaddr = raws[i].vaddr;
                if let Some(start_off) = vaddr_to_offset(vaddr) {
                    let end_off = start_off + size;
                    let demangled = demangle_any(&raws[i].name);
                    symbols.push(Rc::new(SymbolIdentity::new(
                        raws[i].name.clone(),
                        demangled,
                        Rc::clone(&interned_path),
                        start_off,
                        end_off,
                    )));
                }
            }
        }

        Ok(ExecutableSymbolTable {
            table: RangeSymbolTable::new(symbols),
        })
    }

    pub fn resolve(&self, file_offset: u64) -> Option<Rc<SymbolIdentity>> {
        self.table.resolve(file_offset).cloned()
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

    #[test]
    fn loads_own_test_binary_without_panicking() {
        let path = std::fs::read_link("/proc/self/exe").unwrap();
        let path_str = path.to_str().unwrap().to_string();
        let table = ExecutableSymbolTable::load(&path_str, Rc::from(path_str.as_str()));
        assert!(table.is_ok());
    }

    #[test]
    fn missing_file_is_transient_not_persistent() {
        let err = ExecutableSymbolTable::load("/nonexistent/path/to/binary", Rc::from("x")).unwrap_err();
        assert!(matches!(err, ProfilerError::Transient { .. }));
    }
}

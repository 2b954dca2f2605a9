//! Per-process JIT-map resolver: incremental reads from the last consumed
//! byte offset, deferring an incomplete trailing line, re-sorting the
//! whole symbol list by start offset after every update, and never
//! truncating previously accepted entries.

use crate::symbol::SymbolIdentity;
use std::fs;
use std::rc::Rc;
use std::time::{Duration, Instant};

const DEFAULT_UPDATE_MIN_INTERVAL: Duration = Duration::from_millis(100);

pub fn jit_map_file_path(pid: u32) -> String {
    format!("/tmp/perf-{pid}.map")
}

/// Parses one JIT-map line: `ADDR_HEX SIZE_HEX NAME_REST_OF_LINE`, where
/// the name may itself contain spaces. Returns `None` for malformed lines.
fn parse_line(line: &str) -> Option<(u64, u64, &str)> {
    let mut rest = line;
    let addr_str = take_token(&mut rest)?;
    let size_str = take_token(&mut rest)?;
    let name = rest.trim_start();
    if name.is_empty() {
        return None;
    }
    let addr = u64::from_str_radix(addr_str, 16).ok()?;
    let size = u64::from_str_radix(size_str, 16).ok()?;
    if addr == 0 || size == 0 {
        return None;
    }
    Some((addr, size, name))
}

fn take_token<'a>(s: &mut &'a str) -> Option<&'a str> {
    let trimmed = s.trim_start();
    let idx = trimmed.find(char::is_whitespace)?;
    let token = &trimmed[..idx];
    *s = &trimmed[idx..];
    Some(token)
}

pub struct JitMapResolver {
    pid: u32,
    path: Rc<str>,
    symbols: Vec<Rc<SymbolIdentity>>,
    last_read_offset: u64,
    last_update: Option<Instant>,
    update_min_interval: Duration,
}

impl JitMapResolver {
    pub fn new(pid: u32) -> Self {
        JitMapResolver {
            pid,
            path: Rc::from(jit_map_file_path(pid).as_str()),
            symbols: Vec::new(),
            last_read_offset: 0,
            last_update: None,
            update_min_interval: DEFAULT_UPDATE_MIN_INTERVAL,
        }
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    fn try_resolve(&self, address: u64) -> Option<Rc<SymbolIdentity>> {
        if self.symbols.is_empty() {
            return None;
        }
        let idx = self.symbols.partition_point(|s| s.file_offset_start <= address);
        if idx == 0 {
            return None;
        }
        let candidate = &self.symbols[idx - 1];
        if address < candidate.file_offset_end {
            Some(Rc::clone(candidate))
        } else {
            None
        }
    }

    /// Reads any bytes appended since the last call, parses complete
    /// lines, appends new entries (never dropping old ones), and re-sorts
    /// the whole list by start offset. A missing file is treated as "no
    /// new data" rather than an error (transient condition).
    fn update_symbol_names(&mut self) {
        let data = match fs::read(jit_map_file_path(self.pid)) {
            Ok(d) => d,
            Err(_) => return,
        };
        if (data.len() as u64) <= self.last_read_offset {
            return;
        }
        let new_bytes = &data[self.last_read_offset as usize..];
        let text = match std::str::from_utf8(new_bytes) {
            Ok(t) => t,
            Err(_) => return,
        };

        let mut consumed = 0usize;
        while let Some(nl_idx) = text[consumed..].find('\n') {
            let line = &text[consumed..consumed + nl_idx];
            if let Some((addr, size, name)) = parse_line(line) {
                self.symbols.push(Rc::new(SymbolIdentity::new(
                    name.to_string(),
                    None,
                    Rc::clone(&self.path),
                    addr,
                    addr + size,
                )));
            }
            consumed += nl_idx + 1;
        }
        self.last_read_offset += consumed as u64;

        self.symbols.sort_by_key(|s| s.file_offset_start);
    }

    /// Resolves `address` against the current symbol list, reloading from
    /// disk first when `force_update` is set or the rate-limit interval
    /// has elapsed since the last reload.
    pub fn resolve(&mut self, address: u64, force_update: bool) -> Option<Rc<SymbolIdentity>> {
        if let Some(found) = self.try_resolve(address) {
            return Some(found);
        }
        let should_update = force_update
            || match self.last_update {
                Some(t) => t.elapsed() > self.update_min_interval,
                None => true,
            };
        if should_update {
            self.update_symbol_names();
            self.last_update = Some(Instant::now());
        }
        self.try_resolve(address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_jit_map(pid: u32, contents: &str) {
        let mut f = fs::File::create(jit_map_file_path(pid)).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
    }

    #[test]
    fn scenario_4_resolve_finds_first_symbol() {
        let pid = 900_001;
        write_jit_map(pid, "30 1a symA\n50 1c symB\n70 1e symC (with space)\n");
        let mut resolver = JitMapResolver::new(pid);
        let sym = resolver.resolve(0x49, true).unwrap();
        assert_eq!(sym.original_name, "symA");
        let _ = fs::remove_file(jit_map_file_path(pid));
    }

    #[test]
    fn name_with_spaces_is_kept_whole() {
        let pid = 900_002;
        write_jit_map(pid, "70 1e symC (with space)\n");
        let mut resolver = JitMapResolver::new(pid);
        let sym = resolver.resolve(0x71, true).unwrap();
        assert_eq!(sym.original_name, "symC (with space)");
        let _ = fs::remove_file(jit_map_file_path(pid));
    }

    #[test]
    fn missing_file_resolves_to_none_without_panicking() {
        let mut resolver = JitMapResolver::new(900_003);
        assert!(resolver.resolve(0x1000, true).is_none());
    }

    #[test]
    fn incomplete_trailing_line_is_deferred() {
        let pid = 900_004;
        write_jit_map(pid, "30 1a symA\n50 1c incomplete-no-newline");
        let mut resolver = JitMapResolver::new(pid);
        resolver.resolve(0x35, true);
        assert_eq!(resolver.symbols.len(), 1);
        // Completing the line and forcing another update picks it up.
        write_jit_map(pid, "30 1a symA\n50 1c symB\n");
        let sym = resolver.resolve(0x51, true).unwrap();
        assert_eq!(sym.original_name, "symB");
        let _ = fs::remove_file(jit_map_file_path(pid));
    }

    #[test]
    fn never_truncates_previous_entries() {
        let pid = 900_005;
        write_jit_map(pid, "30 1a symA\n");
        let mut resolver = JitMapResolver::new(pid);
        assert!(resolver.resolve(0x31, true).is_some());
        write_jit_map(pid, "30 1a symA\n50 1c symB\n");
        assert!(resolver.resolve(0x51, true).is_some());
        // symA is still resolvable even though the file was rewritten with
        // unrelated new content appended.
        assert!(resolver.resolve(0x31, false).is_some());
        let _ = fs::remove_file(jit_map_file_path(pid));
    }
}

//! Per-process address-space map: parses `/proc/<pid>/maps` into mapped
//! executable ranges and resolves an address to its containing file and
//! file offset, reloading on a lookup miss subject to a rate limit.

use crate::pool::PathInterner;
use std::fs;
use std::rc::Rc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct MapEntry {
    pub start: u64,
    pub end: u64,
    pub file_offset: u64,
    pub path: Rc<str>,
}

fn skip_whitespace(p: &mut &str) {
    *p = p.trim_start_matches(' ');
}

fn get_until<'a>(p: &mut &'a str, delim: char) -> &'a str {
    match p.find(delim) {
        Some(idx) => {
            let (head, rest) = p.split_at(idx);
            *p = &rest[delim.len_utf8()..];
            head
        }
        None => {
            let head = *p;
            *p = "";
            head
        }
    }
}

/// Parses one `/proc/<pid>/maps` line into `(start, end, file_offset, path)`.
/// Returns `None` for malformed lines (parsing anomaly: skipped).
fn parse_line(line: &str) -> Option<(u64, u64, u64, &str)> {
    let mut p = line;
    let start = u64::from_str_radix(get_until(&mut p, '-'), 16).ok()?;
    let end = u64::from_str_radix(get_until(&mut p, ' '), 16).ok()?;

    // perms, e.g. "r-xp"
    let _perms = get_until(&mut p, ' ');
    skip_whitespace(&mut p);

    let file_offset = u64::from_str_radix(get_until(&mut p, ' '), 16).ok()?;
    skip_whitespace(&mut p);

    let _dev = get_until(&mut p, ' ');
    skip_whitespace(&mut p);

    let _inode = get_until(&mut p, ' ');
    skip_whitespace(&mut p);

    // whatever remains (possibly empty) is the pathname
    Some((start, end, file_offset, p))
}

/// Parses a full maps file's contents into entries sorted by start address.
/// Malformed lines are skipped silently, matching the parsing-anomaly
/// policy.
pub fn parse(maps: &str, interner: &mut PathInterner) -> Vec<MapEntry> {
    let mut entries: Vec<MapEntry> = maps
        .lines()
        .filter_map(|line| {
            let (start, end, file_offset, path) = parse_line(line)?;
            if end <= start {
                return None;
            }
            Some(MapEntry {
                start,
                end,
                file_offset,
                path: interner.intern(path),
            })
        })
        .collect();
    entries.sort_by_key(|e| e.start);
    entries
}

const DEFAULT_RELOAD_INTERVAL: Duration = Duration::from_millis(100);

/// Per-process locator: binary-searches a sorted, periodically-reloaded
/// snapshot of `/proc/<pid>/maps`.
pub struct AddressSpaceMap {
    pid: u32,
    entries: Vec<MapEntry>,
    last_reload: Option<Instant>,
    reload_interval: Duration,
}

impl AddressSpaceMap {
    pub fn new(pid: u32) -> Self {
        AddressSpaceMap {
            pid,
            entries: Vec::new(),
            last_reload: None,
            reload_interval: DEFAULT_RELOAD_INTERVAL,
        }
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Fully rebuilds `entries` from the current contents of
    /// `/proc/<pid>/maps`. Returns `false` (without raising) if the file
    /// cannot be read; the process has likely exited.
    pub fn reload(&mut self, interner: &mut PathInterner) -> bool {
        self.last_reload = Some(Instant::now());
        match fs::read_to_string(format!("/proc/{}/maps", self.pid)) {
            Ok(contents) => {
                self.entries = parse(&contents, interner);
                true
            }
            Err(_) => false,
        }
    }

    fn find(&self, address: u64) -> Option<&MapEntry> {
        let idx = self.entries.partition_point(|e| e.start <= address);
        if idx == 0 {
            return None;
        }
        let candidate = &self.entries[idx - 1];
        if address < candidate.end {
            Some(candidate)
        } else {
            None
        }
    }

    /// Returns `(path, offset)` for `address`, reloading from `/proc` on a
    /// miss when `force_reload` is set or the rate-limit interval has
    /// elapsed since the last reload.
    pub fn locate(
        &mut self,
        address: u64,
        force_reload: bool,
        interner: &mut PathInterner,
    ) -> Option<(Rc<str>, u64)> {
        if let Some(entry) = self.find(address) {
            return Some((Rc::clone(&entry.path), address - entry.start + entry.file_offset));
        }
        let should_reload = force_reload
            || match self.last_reload {
                Some(t) => t.elapsed() > self.reload_interval,
                None => true,
            };
        if should_reload {
            self.reload(interner);
        }
        let entry = self.find(address)?;
        Some((Rc::clone(&entry.path), address - entry.start + entry.file_offset))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scenario_3_locate_in_parsed_line() {
        let mut interner = PathInterner::new();
        let entries = parse(
            "08048000-08056000 r-xp 00000000 03:0c 64593 /usr/sbin/gpm\n",
            &mut interner,
        );
        assert_eq!(entries.len(), 1);
        let e = &entries[0];
        let addr = 0x8050000u64;
        let offset = addr - e.start + e.file_offset;
        assert_eq!(&*e.path, "/usr/sbin/gpm");
        assert_eq!(offset, 0x8000);
    }

    #[test]
    fn parses_entry_without_pathname() {
        let mut interner = PathInterner::new();
        let entries = parse(
            "7f0000000000-7f0000021000 rw-p 00000000 00:00 0 \n",
            &mut interner,
        );
        assert_eq!(entries.len(), 1);
        assert_eq!(&*entries[0].path, "");
    }

    #[test]
    fn parses_pseudo_path_with_brackets() {
        let mut interner = PathInterner::new();
        let entries = parse(
            "7ffd00000000-7ffd00021000 rw-p 00000000 00:00 0  [heap]\n",
            &mut interner,
        );
        assert_eq!(&*entries[0].path, "[heap]");
    }

    #[test]
    fn skips_malformed_lines() {
        let mut interner = PathInterner::new();
        let entries = parse("not a valid line at all\n", &mut interner);
        assert!(entries.is_empty());
    }

    #[test]
    fn empty_maps_file_yields_no_entries() {
        let mut interner = PathInterner::new();
        assert!(parse("", &mut interner).is_empty());
    }

    #[test]
    fn locate_returns_offset_strictly_within_entry() {
        let mut interner = PathInterner::new();
        let entries = parse(
            "08048000-08056000 r-xp 00000000 03:0c 64593 /usr/sbin/gpm\n",
            &mut interner,
        );
        let mut map = AddressSpaceMap::new(1);
        map.entries = entries;
        map.last_reload = Some(Instant::now());
        let (_path, offset) = map.locate(0x8050000, false, &mut interner).unwrap();
        let e = &map.entries[0];
        assert!(offset < e.end - e.start);
    }

    #[test]
    fn locate_self_process_finds_real_mapping() {
        let mut interner = PathInterner::new();
        let mut map = AddressSpaceMap::new(std::process::id());
        assert!(map.reload(&mut interner));
        // The address of this function itself should resolve to some
        // mapped, named region (the test binary's own executable mapping).
        let probe = parse_line as usize as u64;
        assert!(map.locate(probe, false, &mut interner).is_some());
    }
}

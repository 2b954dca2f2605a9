//! Process/thread enumerator: lists numeric `/proc` subdirectories whose
//! `exe` symlink's final path component matches the configured process
//! name, then lists each matching pid's threads from `/proc/<pid>/task`.

use std::ffi::CStr;
use std::fs;
use std::io::Write as _;
use std::os::raw::c_char;

/// Reusable, heap-allocation-avoiding matcher for "is this pid's executable
/// named X". The scratch buffers are grown once and then reused across
/// calls, as required by the hot-path-allocation constraint in the spec.
pub struct ProcessNameFilter {
    name: String,
    path_buf: Vec<u8>,
    link_buf: Vec<u8>,
}

impl ProcessNameFilter {
    pub fn new(name: impl Into<String>) -> Self {
        ProcessNameFilter {
            name: name.into(),
            path_buf: Vec::with_capacity(32),
            link_buf: vec![0u8; 4096],
        }
    }

    /// True when `/proc/<pid>/exe` resolves to a path whose final component
    /// is exactly (case-sensitively) `self.name`.
    pub fn matches(&mut self, pid: u32) -> bool {
        self.path_buf.clear();
        let _ = write!(self.path_buf, "/proc/{pid}/exe\0");

        let path_cstr = match CStr::from_bytes_with_nul(&self.path_buf) {
            Ok(c) => c,
            Err(_) => return false,
        };

        // SAFETY: path_buf is a valid NUL-terminated C string; link_buf is a
        // writable buffer of the given length owned by self.
        let n = unsafe {
            libc::readlink(
                path_cstr.as_ptr() as *const c_char,
                self.link_buf.as_mut_ptr() as *mut c_char,
                self.link_buf.len(),
            )
        };
        if n <= 0 {
            return false;
        }
        let target = &self.link_buf[..n as usize];
        ends_with_component(target, self.name.as_bytes())
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// True when `haystack`'s final path component equals `component` exactly:
/// either `haystack == component`, or `haystack` ends in `/component` with
/// nothing after it.
fn ends_with_component(haystack: &[u8], component: &[u8]) -> bool {
    if component.is_empty() || haystack.len() < component.len() {
        return false;
    }
    let split = haystack.len() - component.len();
    if &haystack[split..] != component {
        return false;
    }
    split == 0 || haystack[split - 1] == b'/'
}

/// Enumerate pids under `/proc` whose name passes `filter`. Unreadable
/// entries (the process may exit mid-enumeration) are silently skipped.
pub fn list_pids(filter: &mut ProcessNameFilter) -> Vec<u32> {
    let mut pids = Vec::new();
    let entries = match fs::read_dir("/proc") {
        Ok(e) => e,
        Err(_) => return pids,
    };
    for entry in entries.flatten() {
        let name = entry.file_name();
        let name = match name.to_str() {
            Some(n) => n,
            None => continue,
        };
        let pid: u32 = match name.parse() {
            Ok(p) => p,
            Err(_) => continue,
        };
        if filter.matches(pid) {
            pids.push(pid);
        }
    }
    pids
}

/// Enumerate the tids of `pid` via `/proc/<pid>/task`. Returns an empty
/// vector (not an error) if the process no longer exists.
pub fn list_tids(pid: u32) -> Vec<u32> {
    let mut tids = Vec::new();
    let path = format!("/proc/{pid}/task");
    let entries = match fs::read_dir(path) {
        Ok(e) => e,
        Err(_) => return tids,
    };
    for entry in entries.flatten() {
        if let Some(tid) = entry.file_name().to_str().and_then(|n| n.parse().ok()) {
            tids.push(tid);
        }
    }
    tids
}

/// Whether `pid` currently exists, tested by sending the null signal (does
/// not actually signal the process, just checks permissions/existence).
pub fn pid_exists(pid: u32) -> bool {
    let ret = unsafe { libc::kill(pid as libc::pid_t, 0) };
    ret == 0 || unsafe { *libc::__errno_location() } != libc::ESRCH
}

//! Perf entry: owns one counter fd and its memory-mapped ring buffer.

use crate::error::{ProfilerError, Result};
use crate::perf::sys::{self, PerfEventAttr, PerfEventHeader, PerfEventMmapPage, PERF_RECORD_SAMPLE};
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicU64, Ordering};

/// A parsed, owned ring-buffer record. Payload bytes are copied out while
/// parsing, before `data_tail` is advanced, so this carries no lifetime
/// tied to the mmap.
#[derive(Debug, Clone)]
pub enum PerfRecord {
    Sample {
        ip: u64,
        pid: u32,
        tid: u32,
        call_chain: Vec<u64>,
    },
    Other,
}

pub struct PerfEntry {
    fd: RawFd,
    tid: u32,
    mmap_ptr: *mut u8,
    mmap_len: usize,
    data_size: u64,
    read_offset: u64,
    pending_head: Option<u64>,
    include_callchain: bool,
}

fn page_size() -> usize {
    unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize }
}

impl PerfEntry {
    /// Opens a counter attached to `tid` on any CPU and maps its ring
    /// buffer. An `ESRCH` from the syscall (the thread died between
    /// enumeration and open) is reported as a transient error so callers
    /// skip it silently rather than treating it as a real failure.
    pub fn open(
        tid: u32,
        sample_period: u64,
        mmap_page_count: usize,
        wakeup_events: u32,
        include_callchain: bool,
        exclude_user: bool,
        exclude_kernel: bool,
        exclude_hypervisor: bool,
    ) -> Result<Self> {
        assert!(mmap_page_count.is_power_of_two());

        let attr = PerfEventAttr::for_cpu_clock_sample(
            sample_period,
            wakeup_events,
            include_callchain,
            exclude_user,
            exclude_kernel,
            exclude_hypervisor,
        );

        // SAFETY: attr is a fully initialized, correctly sized PerfEventAttr.
        let fd = unsafe { sys::sys_perf_event_open(&attr, tid as libc::pid_t, -1, -1, 0) };
        if fd < 0 {
            let err = std::io::Error::last_os_error();
            return if ProfilerError::is_no_such_process(&err) {
                Err(ProfilerError::transient("perf_event_open: thread vanished", err))
            } else {
                Err(ProfilerError::persistent("perf_event_open", err))
            };
        }

        let page_size = page_size();
        let data_size = (mmap_page_count * page_size) as u64;
        let mmap_len = page_size + data_size as usize;

        // SAFETY: fd is a valid perf_event fd just opened above; mmap_len
        // matches one header page plus mmap_page_count data pages.
        let mmap_ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                mmap_len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                0,
            )
        };
        if mmap_ptr == libc::MAP_FAILED {
            let err = std::io::Error::last_os_error();
            unsafe {
                libc::close(fd);
            }
            return Err(ProfilerError::persistent("perf ring buffer mmap", err));
        }

        Ok(PerfEntry {
            fd,
            tid,
            mmap_ptr: mmap_ptr as *mut u8,
            mmap_len,
            data_size,
            read_offset: 0,
            pending_head: None,
            include_callchain,
        })
    }

    pub fn fd(&self) -> RawFd {
        self.fd
    }

    pub fn tid(&self) -> u32 {
        self.tid
    }

    fn header_page(&self) -> *const PerfEventMmapPage {
        self.mmap_ptr as *const PerfEventMmapPage
    }

    fn data_ptr(&self) -> *const u8 {
        unsafe { self.mmap_ptr.add(page_size()) }
    }

    /// Acquire-load of the kernel-published producer cursor.
    fn read_data_head(&self) -> u64 {
        unsafe {
            let field_ptr = std::ptr::addr_of!((*self.header_page()).data_head);
            (*(field_ptr as *const AtomicU64)).load(Ordering::Acquire)
        }
    }

    /// Release-store of the consumer cursor, letting the kernel reuse the
    /// freed ring-buffer region.
    fn write_data_tail(&self, value: u64) {
        unsafe {
            let field_ptr = std::ptr::addr_of!((*self.header_page()).data_tail);
            (*(field_ptr as *const AtomicU64)).store(value, Ordering::Release);
        }
    }

    pub fn enable(&self) {
        // SAFETY: fd is owned and open for the lifetime of self.
        unsafe { sys::perf_event_enable(self.fd, true) };
    }

    pub fn disable(&self) {
        // SAFETY: fd is owned and open for the lifetime of self.
        unsafe { sys::perf_event_disable(self.fd) };
    }

    /// Reads up to `scan_limit` records starting at the last-published
    /// read offset, validating that a full header plus payload fits before
    /// the data-head observed at the start of this call. Does not publish
    /// anything to the kernel; call `advance` afterward.
    pub fn drain(&mut self, scan_limit: usize) -> Vec<PerfRecord> {
        let head = self.read_data_head();
        self.pending_head = Some(head);

        let mut records = Vec::new();
        let mut cursor = self.read_offset;
        let data = self.data_ptr();

        while records.len() < scan_limit {
            let available = head.wrapping_sub(cursor);
            if available < 8 {
                break;
            }
            let pos = (cursor % self.data_size) as usize;
            if pos + 8 > self.data_size as usize {
                // Ring-buffer wraparound mid-header is not supported by
                // this reader; stop here for this call.
                break;
            }

            // SAFETY: pos+8 <= data_size, data spans data_size bytes.
            let header = unsafe { std::ptr::read_unaligned(data.add(pos) as *const PerfEventHeader) };
            if header.size < 8 {
                break;
            }
            let size = header.size as u64;
            if available < size {
                break;
            }
            if pos + size as usize > self.data_size as usize {
                break;
            }

            let record = if header.kind == PERF_RECORD_SAMPLE {
                // SAFETY: bounds already validated against data_size above.
                unsafe { self.parse_sample(data, pos, size as usize) }
            } else {
                PerfRecord::Other
            };
            records.push(record);
            cursor += size;
        }

        records
    }

    /// # Safety
    /// `pos + len <= self.data_size as usize` must already hold.
    unsafe fn parse_sample(&self, data: *const u8, pos: usize, len: usize) -> PerfRecord {
        let body = std::slice::from_raw_parts(data.add(pos + 8), len - 8);
        if body.len() < 16 {
            return PerfRecord::Other;
        }
        let ip = u64::from_ne_bytes(body[0..8].try_into().unwrap());
        let pid = u32::from_ne_bytes(body[8..12].try_into().unwrap());
        let tid = u32::from_ne_bytes(body[12..16].try_into().unwrap());

        let mut call_chain = Vec::new();
        if self.include_callchain && (len - 8 >= 24) {
            if let Some(nr_bytes) = body.get(16..24) {
                let nr = u64::from_ne_bytes(nr_bytes.try_into().unwrap()) as usize;
                let ips_start = 24;
                let available_ips = (body.len().saturating_sub(ips_start)) / 8;
                let nr = nr.min(available_ips);
                call_chain.reserve(nr);
                for i in 0..nr {
                    let start = ips_start + i * 8;
                    let ip_bytes = &body[start..start + 8];
                    call_chain.push(u64::from_ne_bytes(ip_bytes.try_into().unwrap()));
                }
            }
        }

        PerfRecord::Sample {
            ip,
            pid,
            tid,
            call_chain,
        }
    }

    /// Publishes the data-head observed during the most recent `drain`
    /// call as the new consumer cursor, jumping straight to head rather
    /// than advancing by the number of bytes consumed.
    pub fn advance(&mut self) {
        if let Some(head) = self.pending_head.take() {
            self.read_offset = head;
            self.write_data_tail(head);
        }
    }
}

impl Drop for PerfEntry {
    fn drop(&mut self) {
        // Mapping released before descriptor, per the destruction-order
        // invariant.
        unsafe {
            libc::munmap(self.mmap_ptr as *mut libc::c_void, self.mmap_len);
            libc::close(self.fd);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn current_tid() -> u32 {
        unsafe { libc::syscall(libc::SYS_gettid) as u32 }
    }

    /// Counter creation can fail in sandboxed test environments that
    /// restrict `perf_event_open` (e.g. `perf_event_paranoid` > 1 without
    /// CAP_PERFMON); when that happens the test exercises only the error
    /// path, which is itself part of the contract (transient-vs-persistent
    /// classification).
    #[test]
    fn open_enable_drain_disable_round_trip() {
        match PerfEntry::open(current_tid(), 1_000_000, 8, 8, true, false, true, true) {
            Ok(mut entry) => {
                entry.enable();
                let records = entry.drain(8);
                // May or may not have produced samples yet; must not panic.
                let _ = records.len();
                entry.advance();
                entry.disable();
            }
            Err(ProfilerError::Persistent { .. }) => {
                // Sandboxed environment without perf_event_open access.
            }
            Err(other) => panic!("unexpected error opening perf entry: {other}"),
        }
    }
}

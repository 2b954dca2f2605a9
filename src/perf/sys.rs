//! Raw `perf_event_open` ABI: syscall number, the `perf_event_attr` and
//! `perf_event_mmap_page` layouts, and the three control ioctls.

use std::os::raw::{c_int, c_ulong};

pub const PERF_TYPE_SOFTWARE: u32 = 1;
pub const PERF_COUNT_SW_CPU_CLOCK: u64 = 0;

pub const PERF_SAMPLE_IP: u64 = 1 << 0;
pub const PERF_SAMPLE_TID: u64 = 1 << 1;
pub const PERF_SAMPLE_CALLCHAIN: u64 = 1 << 5;

pub const PERF_RECORD_SAMPLE: u32 = 9;

// perf_event_attr.flags bit positions (linux/perf_event.h).
const FLAG_DISABLED: u64 = 1 << 0;
const FLAG_EXCLUDE_USER: u64 = 1 << 4;
const FLAG_EXCLUDE_KERNEL: u64 = 1 << 5;
const FLAG_EXCLUDE_HV: u64 = 1 << 6;

#[repr(C)]
#[derive(Clone, Copy, Default)]
pub struct PerfEventAttr {
    pub kind: u32,
    pub size: u32,
    pub config: u64,
    pub sample_period_or_freq: u64,
    pub sample_type: u64,
    pub read_format: u64,
    pub flags: u64,
    pub wakeup_events_or_watermark: u32,
    pub bp_type: u32,
    pub bp_addr_or_config: u64,
    pub bp_len_or_config: u64,
    pub branch_sample_type: u64,
    pub sample_regs_user: u64,
    pub sample_stack_user: u32,
    pub clock_id: i32,
}

impl PerfEventAttr {
    pub fn for_cpu_clock_sample(
        sample_period: u64,
        wakeup_events: u32,
        include_callchain: bool,
        exclude_user: bool,
        exclude_kernel: bool,
        exclude_hypervisor: bool,
    ) -> Self {
        let mut sample_type = PERF_SAMPLE_IP | PERF_SAMPLE_TID;
        if include_callchain {
            sample_type |= PERF_SAMPLE_CALLCHAIN;
        }
        let mut flags = FLAG_DISABLED;
        if exclude_user {
            flags |= FLAG_EXCLUDE_USER;
        }
        if exclude_kernel {
            flags |= FLAG_EXCLUDE_KERNEL;
        }
        if exclude_hypervisor {
            flags |= FLAG_EXCLUDE_HV;
        }
        PerfEventAttr {
            kind: PERF_TYPE_SOFTWARE,
            size: std::mem::size_of::<PerfEventAttr>() as u32,
            config: PERF_COUNT_SW_CPU_CLOCK,
            sample_period_or_freq: sample_period,
            sample_type,
            read_format: 0,
            flags,
            wakeup_events_or_watermark: wakeup_events,
            ..Default::default()
        }
    }
}

/// The kernel-populated mmap header page. Only `data_head`/`data_tail` are
/// accessed (through raw pointers with explicit acquire/release ordering,
/// in `perf::entry`); the remaining fields exist purely to keep the struct
/// the ABI-mandated size.
#[repr(C)]
pub struct PerfEventMmapPage {
    pub version: u32,
    pub compat_version: u32,
    pub lock: u32,
    pub index: u32,
    pub offset: i64,
    pub time_enabled: u64,
    pub time_running: u64,
    pub capabilities: u64,
    pub pmc_width: u16,
    pub time_shift: u16,
    pub time_mult: u32,
    pub time_offset: u64,
    pub time_zero: u64,
    pub size: u32,
    pub reserved: [u8; 118 * 8 + 4],
    pub data_head: u64,
    pub data_tail: u64,
    pub data_offset: u64,
    pub data_size: u64,
    pub aux_head: u64,
    pub aux_tail: u64,
    pub aux_offset: u64,
    pub aux_size: u64,
}

#[repr(C)]
pub struct PerfEventHeader {
    pub kind: u32,
    pub misc: u16,
    pub size: u16,
}

const PERF_EVENT_IOC_ENABLE: c_ulong = 0x2400;
const PERF_EVENT_IOC_DISABLE: c_ulong = 0x2401;
const PERF_EVENT_IOC_RESET: c_ulong = 0x2402;

/// Issues the raw `perf_event_open` syscall. `pid` here is a tid (the
/// kernel's `perf_event_open` attaches per-thread when given a tid and
/// `cpu == -1`).
///
/// # Safety
/// `attr` must point to a valid, fully initialized `PerfEventAttr` whose
/// `size` field matches `size_of::<PerfEventAttr>()`.
pub unsafe fn sys_perf_event_open(
    attr: *const PerfEventAttr,
    pid: libc::pid_t,
    cpu: c_int,
    group_fd: c_int,
    flags: c_ulong,
) -> c_int {
    libc::syscall(libc::SYS_perf_event_open, attr, pid, cpu, group_fd, flags) as c_int
}

/// # Safety
/// `fd` must be a valid, open perf_event file descriptor.
pub unsafe fn perf_event_enable(fd: c_int, reset: bool) {
    if reset {
        libc::ioctl(fd, PERF_EVENT_IOC_RESET, 0);
    }
    libc::ioctl(fd, PERF_EVENT_IOC_ENABLE, 0);
}

/// # Safety
/// `fd` must be a valid, open perf_event file descriptor.
pub unsafe fn perf_event_disable(fd: c_int) {
    libc::ioctl(fd, PERF_EVENT_IOC_DISABLE, 0);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mmap_page_is_abi_sized() {
        assert_eq!(std::mem::size_of::<PerfEventMmapPage>(), 1088);
    }

    #[test]
    fn header_is_eight_bytes() {
        assert_eq!(std::mem::size_of::<PerfEventHeader>(), 8);
    }

    #[test]
    fn attr_sets_expected_flags() {
        let attr = PerfEventAttr::for_cpu_clock_sample(100_000, 8, true, false, true, true);
        assert_eq!(attr.kind, PERF_TYPE_SOFTWARE);
        assert_eq!(attr.config, PERF_COUNT_SW_CPU_CLOCK);
        assert_ne!(attr.flags & FLAG_DISABLED, 0);
        assert_eq!(attr.flags & FLAG_EXCLUDE_USER, 0);
        assert_ne!(attr.flags & FLAG_EXCLUDE_KERNEL, 0);
        assert_ne!(attr.flags & FLAG_EXCLUDE_HV, 0);
        assert_ne!(attr.sample_type & PERF_SAMPLE_CALLCHAIN, 0);
    }
}

//! Readiness multiplexer: wraps `mio`'s epoll-backed `Poll`, which always
//! registers interest edge-triggered on Linux. Raw perf-event file
//! descriptors are registered through `mio::unix::SourceFd`.

use crate::error::{ProfilerError, Result};
use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Token};
use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

pub struct ReadinessEvent {
    pub token: u64,
    pub readable: bool,
    pub hup_or_error: bool,
}

pub struct ReadinessMultiplexer {
    poll: Poll,
    events: Events,
}

impl ReadinessMultiplexer {
    pub fn new(capacity: usize) -> Result<Self> {
        let poll = Poll::new().map_err(|e| ProfilerError::persistent("create readiness instance", e))?;
        Ok(ReadinessMultiplexer {
            poll,
            events: Events::with_capacity(capacity.max(16)),
        })
    }

    pub fn add(&mut self, fd: RawFd, token: u64) -> Result<()> {
        let mut fd = fd;
        self.poll
            .registry()
            .register(&mut SourceFd(&mut fd), Token(token as usize), Interest::READABLE)
            .map_err(|e| ProfilerError::persistent("register fd with readiness instance", e))
    }

    pub fn modify(&mut self, fd: RawFd, token: u64) -> Result<()> {
        let mut fd = fd;
        self.poll
            .registry()
            .reregister(&mut SourceFd(&mut fd), Token(token as usize), Interest::READABLE)
            .map_err(|e| ProfilerError::persistent("reregister fd with readiness instance", e))
    }

    /// Duplicate/unknown-fd removal is not an error per the spec's failure
    /// surface, so any error here is swallowed.
    pub fn remove(&mut self, fd: RawFd) {
        let mut fd = fd;
        let _ = self.poll.registry().deregister(&mut SourceFd(&mut fd));
    }

    /// Waits up to `timeout` (rounded up to at least one millisecond when
    /// non-zero, to avoid busy-spinning) for readiness events. A signal
    /// interruption is reported as an empty set, not an error.
    pub fn wait(&mut self, timeout: Duration) -> Result<Vec<ReadinessEvent>> {
        let effective_timeout = if timeout.is_zero() {
            Duration::ZERO
        } else {
            timeout.max(Duration::from_millis(1))
        };

        match self.poll.poll(&mut self.events, Some(effective_timeout)) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => return Ok(Vec::new()),
            Err(e) => return Err(ProfilerError::persistent("readiness wait", e)),
        }

        Ok(self
            .events
            .iter()
            .map(|event| ReadinessEvent {
                token: event.token().0 as u64,
                readable: event.is_readable(),
                hup_or_error: event.is_read_closed() || event.is_error() || event.is_write_closed(),
            })
            .collect())
    }
}

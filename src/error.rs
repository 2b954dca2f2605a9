use std::io;

/// Structured error carrying one of the four kinds described in the crate's
/// error handling design: configuration mistakes, transient OS conditions
/// that a caller can usually retry past, persistent OS errors that leave
/// kernel resources in an indeterminate state, and parsing anomalies.
#[derive(Debug, thiserror::Error)]
pub enum ProfilerError {
    #[error("configuration error: {context}")]
    Configuration { context: &'static str },

    #[error("transient OS condition ({context}): {source}")]
    Transient {
        context: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("persistent OS error ({context}, errno {errno}): {source}")]
    Persistent {
        context: &'static str,
        errno: i32,
        #[source]
        source: io::Error,
    },

    #[error("parsing anomaly ({context}): {detail}")]
    Parsing { context: &'static str, detail: String },
}

pub type Result<T> = std::result::Result<T, ProfilerError>;

impl ProfilerError {
    pub fn configuration(context: &'static str) -> Self {
        ProfilerError::Configuration { context }
    }

    pub fn transient(context: &'static str, source: io::Error) -> Self {
        ProfilerError::Transient { context, source }
    }

    /// Builds a persistent error from the last OS error, unless that error
    /// is ESRCH (no such process), in which case the caller should treat
    /// the condition as transient instead.
    pub fn persistent(context: &'static str, source: io::Error) -> Self {
        let errno = source.raw_os_error().unwrap_or(0);
        ProfilerError::Persistent {
            context,
            errno,
            source,
        }
    }

    pub fn parsing(context: &'static str, detail: impl Into<String>) -> Self {
        ProfilerError::Parsing {
            context,
            detail: detail.into(),
        }
    }

    /// True when the wrapped OS error is ESRCH: the process or thread
    /// vanished between enumeration and use, which the spec treats as
    /// "skip and continue" rather than a surfaced failure.
    pub fn is_no_such_process(err: &io::Error) -> bool {
        err.raw_os_error() == Some(libc::ESRCH)
    }
}

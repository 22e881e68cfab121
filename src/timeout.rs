//! Timeouts, per-call size bounds and deadline arithmetic.
//!
//! A compound operation (e.g. `recv_size` issuing several reads) fixes one
//! [`Deadline`] when it starts. Before each underlying call the remaining
//! time is recomputed and applied to the transport, so the whole operation
//! is bounded by the original timeout rather than each call individually.

use std::io;
use std::time::{Duration, Instant};

/// Default timeout for blocking operations.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default cap on the receive buffer and per-read chunk size (32 KiB).
pub const DEFAULT_MAX_BUFFER_SIZE: usize = 32 * 1024;

/// Practical ceiling used for [`MaxSize::Unbounded`] (1 PiB).
#[cfg(target_pointer_width = "64")]
pub const UNBOUNDED_MAX_SIZE: usize = 1 << 50;

/// Practical ceiling used for [`MaxSize::Unbounded`].
#[cfg(not(target_pointer_width = "64"))]
pub const UNBOUNDED_MAX_SIZE: usize = usize::MAX;

/// How long a blocking operation may wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Timeout {
    /// Wait indefinitely.
    Never,
    /// Complete immediately or fail with "would block".
    NonBlocking,
    /// Fail with a timeout error once this much time has elapsed.
    After(Duration),
}

impl Timeout {
    /// Build a timeout from a duration; zero means non-blocking.
    pub fn after(duration: Duration) -> Self {
        if duration.is_zero() {
            Self::NonBlocking
        } else {
            Self::After(duration)
        }
    }

    /// Build a timeout from seconds: `None` waits forever, `0` is non-blocking.
    ///
    /// Returns `None` for negative or non-finite values.
    pub fn from_secs_f64(secs: Option<f64>) -> Option<Self> {
        match secs {
            None => Some(Self::Never),
            Some(s) if s.is_finite() && s >= 0.0 => {
                Duration::try_from_secs_f64(s).ok().map(Self::after)
            }
            Some(_) => None,
        }
    }

    /// Seconds representation: `None` for [`Timeout::Never`].
    pub fn as_secs_f64(&self) -> Option<f64> {
        match self {
            Self::Never => None,
            Self::NonBlocking => Some(0.0),
            Self::After(d) => Some(d.as_secs_f64()),
        }
    }

    /// Time allotted, as reported in timeout errors.
    pub fn allotted(&self) -> Duration {
        match self {
            Self::After(d) => *d,
            Self::Never | Self::NonBlocking => Duration::ZERO,
        }
    }

    /// Normalize `After(0)` to `NonBlocking`.
    fn normalized(self) -> Self {
        match self {
            Self::After(d) => Self::after(d),
            other => other,
        }
    }
}

impl Default for Timeout {
    fn default() -> Self {
        Self::After(DEFAULT_TIMEOUT)
    }
}

impl From<Duration> for Timeout {
    fn from(duration: Duration) -> Self {
        Self::after(duration)
    }
}

/// Per-call bound on how much may be buffered.
///
/// `Default` defers to the socket's configured `max_buffer_size`;
/// `Unbounded` asks for no bound and resolves to [`UNBOUNDED_MAX_SIZE`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MaxSize {
    /// Use the instance default.
    #[default]
    Default,
    /// No bound beyond [`UNBOUNDED_MAX_SIZE`].
    Unbounded,
    /// Explicit bound in bytes.
    Limit(usize),
}

impl MaxSize {
    /// Resolve against the instance default.
    #[inline]
    pub fn resolve(self, default: usize) -> usize {
        match self {
            Self::Default => default,
            Self::Unbounded => UNBOUNDED_MAX_SIZE,
            Self::Limit(n) => n,
        }
    }
}

impl From<usize> for MaxSize {
    fn from(limit: usize) -> Self {
        Self::Limit(limit)
    }
}

/// Wall-clock bound for one compound operation.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Deadline {
    timeout: Timeout,
    expires: Option<Instant>,
}

impl Deadline {
    /// Start the clock for `timeout`.
    pub(crate) fn start(timeout: Timeout) -> Self {
        let timeout = timeout.normalized();
        let expires = match timeout {
            Timeout::After(d) => Instant::now().checked_add(d),
            Timeout::Never | Timeout::NonBlocking => None,
        };
        Self { timeout, expires }
    }

    /// The timeout this deadline was started with.
    pub(crate) fn timeout(&self) -> Timeout {
        self.timeout
    }

    /// Timeout to apply to the next transport call, or `None` once expired.
    pub(crate) fn remaining(&self) -> Option<Timeout> {
        match (self.timeout, self.expires) {
            (Timeout::After(_), Some(expires)) => expires
                .checked_duration_since(Instant::now())
                .filter(|left| !left.is_zero())
                .map(Timeout::After),
            // Too far in the future to represent; every call gets the full span.
            (timeout, _) => Some(timeout),
        }
    }

    /// Whether `err` from a transport call means this deadline ran out.
    ///
    /// Only applies to timed operations; in non-blocking mode "would block"
    /// is surfaced as-is.
    pub(crate) fn is_expiry(&self, err: &io::Error) -> bool {
        matches!(self.timeout, Timeout::After(_))
            && matches!(
                err.kind(),
                io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
            )
    }
}

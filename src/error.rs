use std::fmt;

// Status codes returned by the host-side operations. QueueFull is the only
// transient one, callers may retry it after yielding to process(). Remote
// failures (stuck or crashed clients) are never surfaced here, the GC pass
// absorbs them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    ClockFailure,
    InvalidSize,
    NoMem,
    HostStarted,
    NoQueues,
    NoSharedMem,
    QueueFull,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let descr = match self {
            Error::ClockFailure => "the monotonic clock is unusable",
            Error::InvalidSize => "the region is smaller than the shared header",
            Error::NoMem => "out of host-private memory",
            Error::HostStarted => "the host has started, the layout is frozen",
            Error::NoQueues => "all queue slots are in use",
            Error::NoSharedMem => "not enough shared memory left in the region",
            Error::QueueFull => "the queue has no free slots",
        };
        return write!(f, "{}", descr);
    }
}

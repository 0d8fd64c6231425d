use chrono::{DateTime, Utc};

/// Time source used by the runner and scheduler. Swapping in a fixed clock
/// makes run durations and latencies reproducible, which the byte-identical
/// result-file tests rely on.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock pinned to a single instant. All elapsed-time measurements come
/// out as zero.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl FixedClock {
    pub fn at_epoch() -> Self {
        Self(DateTime::<Utc>::UNIX_EPOCH)
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

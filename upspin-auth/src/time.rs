use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// The wall clock the handshake validates timestamps against. A real
/// deployment uses [`SystemTimeSource`]; tests substitute
/// [`FixedTimeSource`] for deterministic skew checks, per spec §4.7's
/// "a configurable time source is used to allow deterministic tests".
pub trait TimeSource: Send + Sync {
    fn now(&self) -> u64;
}

#[derive(Default)]
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn now(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before unix epoch")
            .as_secs()
    }
}

/// A clock callers can set directly, for deterministic handshake tests.
pub struct FixedTimeSource(AtomicU64);

impl FixedTimeSource {
    pub fn new(now: u64) -> Self {
        FixedTimeSource(AtomicU64::new(now))
    }

    pub fn set(&self, now: u64) {
        self.0.store(now, Ordering::SeqCst);
    }
}

impl TimeSource for FixedTimeSource {
    fn now(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }
}

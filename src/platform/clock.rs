//! Time source abstraction, so reboot detection and timeout math are testable without
//! real sleeps or a real reboot.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// A source of "now" and "when did this host last boot".
pub trait Clock: Send + Sync {
    /// Current wall-clock time.
    fn now(&self) -> SystemTime;
    /// The time at which the current process's host last booted.
    fn boot_time(&self) -> SystemTime;
}

/// The real wall clock. Boot time is approximated as process start time, since reading the
/// true OS boot time is a platform binding out of scope for this crate (§1).
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }

    fn boot_time(&self) -> SystemTime {
        *PROCESS_START.get_or_init(SystemTime::now)
    }
}

static PROCESS_START: OnceLock<SystemTime> = OnceLock::new();

/// A controllable clock for tests: `now` advances freely; `boot_time` only changes when
/// `reboot()` is called, simulating a process restart after an OS reboot.
#[derive(Debug)]
pub struct FakeClock {
    now_secs: AtomicU64,
    boot_secs: AtomicU64,
}

impl FakeClock {
    /// Construct a fake clock starting at `start`, with boot time equal to `start`.
    pub fn new(start: SystemTime) -> Self {
        let secs = start.duration_since(UNIX_EPOCH).unwrap_or_default().as_secs();
        Self {
            now_secs: AtomicU64::new(secs),
            boot_secs: AtomicU64::new(secs),
        }
    }

    /// Advance "now" without changing boot time.
    pub fn advance(&self, by: Duration) {
        self.now_secs.fetch_add(by.as_secs(), Ordering::SeqCst);
    }

    /// Simulate a reboot: boot time jumps to the current "now", and "now" advances by
    /// `downtime` to model the restart itself taking time.
    pub fn reboot(&self, downtime: Duration) {
        self.advance(downtime);
        let now = self.now_secs.load(Ordering::SeqCst);
        self.boot_secs.store(now, Ordering::SeqCst);
    }
}

impl Clock for FakeClock {
    fn now(&self) -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(self.now_secs.load(Ordering::SeqCst))
    }

    fn boot_time(&self) -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(self.boot_secs.load(Ordering::SeqCst))
    }
}

//! Global shutdown flag.
//!
//! Every blocking wait in the pipeline is bounded and re-checks this flag, so
//! all threads exit within one wait interval of [`Shutdown::request`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Longest single sleep slice between shutdown checks.
const SLEEP_SLICE: Duration = Duration::from_millis(20);

/// Cloneable handle to the process-wide shutdown flag.
#[derive(Debug, Clone, Default)]
pub struct Shutdown {
    flag: Arc<AtomicBool>,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.flag.store(true, Ordering::Release);
    }

    #[inline]
    pub fn is_requested(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// Sleep for `dur`, waking early if shutdown is requested.
    ///
    /// Returns `false` if the sleep was cut short by shutdown.
    pub fn sleep(&self, dur: Duration) -> bool {
        let deadline = Instant::now() + dur;
        loop {
            if self.is_requested() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            std::thread::sleep((deadline - now).min(SLEEP_SLICE));
        }
    }
}

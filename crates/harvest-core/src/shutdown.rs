//! Graceful shutdown support via shared atomic flags
//!
//! First SIGINT/SIGTERM requests a graceful stop: no new work is started
//! and backoff sleeps end early. A second signal forces in-flight HTTP
//! calls to be abandoned. Signal handlers only flip atomics; everything
//! else happens in the cooperative checks of the callers.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Granularity of interruptible sleeps and forced-shutdown polling
const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Default)]
struct ShutdownState {
    requested: AtomicBool,
    forced: AtomicBool,
}

impl ShutdownState {
    /// First call requests, any later call forces. Async-signal-safe.
    fn escalate(&self) {
        if self.requested.swap(true, Ordering::SeqCst) {
            self.forced.store(true, Ordering::SeqCst);
        }
    }
}

/// Cloneable handle to the process-wide cancellation state.
#[derive(Debug, Clone, Default)]
pub struct Shutdown {
    state: Arc<ShutdownState>,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request shutdown; a second request escalates to forced.
    pub fn request(&self) {
        self.state.escalate();
    }

    /// Check if shutdown was requested
    pub fn is_requested(&self) -> bool {
        self.state.requested.load(Ordering::Relaxed)
    }

    /// Check if in-flight work should be abandoned
    pub fn is_forced(&self) -> bool {
        self.state.forced.load(Ordering::Relaxed)
    }

    /// Sleep for `duration`, waking early on shutdown.
    ///
    /// Returns `false` if the sleep was cut short.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.is_requested() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            std::thread::sleep((deadline - now).min(POLL_INTERVAL));
        }
    }

    /// Resolves once a forced shutdown is requested.
    pub async fn forced(&self) {
        while !self.is_forced() {
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Route SIGINT and SIGTERM to this handle.
    pub fn install_signal_handlers(&self) -> std::io::Result<()> {
        for signal in [signal_hook::consts::SIGINT, signal_hook::consts::SIGTERM] {
            let state = Arc::clone(&self.state);
            // SAFETY: the handler only performs atomic swaps/stores,
            // which are async-signal-safe. No allocation, no locks.
            unsafe {
                signal_hook::low_level::register(signal, move || state.escalate())?;
            }
        }
        Ok(())
    }
}

//! Keep-alive guard
//!
//! The first lease acquires the foreground keep-alive and the wake lock; the
//! last lease to drop releases them. A platform refusing either resource only
//! marks the engagement as degraded.

use std::sync::Arc;

use parking_lot::Mutex;

use super::platform::{ForegroundNotice, Platform, PlatformError};

#[derive(Debug, Default)]
struct GuardState {
    holders: usize,
    generation: u64,
    foreground: bool,
    wake_lock: bool,
    degraded: bool,
}

struct GuardInner {
    platform: Arc<dyn Platform>,
    state: Mutex<GuardState>,
}

impl GuardInner {
    fn release_resources(&self, state: &mut GuardState) {
        if state.wake_lock {
            log_failure("release wake lock", self.platform.release_wake_lock());
            state.wake_lock = false;
        }
        if state.foreground {
            log_failure("stop foreground", self.platform.stop_foreground());
            state.foreground = false;
        }
        state.degraded = false;
    }
}

fn log_failure(action: &str, result: Result<(), PlatformError>) -> bool {
    match result {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(action = action, error = %e, "Platform resource unavailable, continuing degraded");
            false
        }
    }
}

/// Process keep-alive shared by sessions and manual foreground requests
#[derive(Clone)]
pub struct LifecycleGuard {
    inner: Arc<GuardInner>,
}

impl LifecycleGuard {
    pub fn new(platform: Arc<dyn Platform>) -> Self {
        Self {
            inner: Arc::new(GuardInner {
                platform,
                state: Mutex::new(GuardState::default()),
            }),
        }
    }

    pub fn platform(&self) -> &Arc<dyn Platform> {
        &self.inner.platform
    }

    /// Take a lease on the keep-alive resources
    ///
    /// Never fails; check [`LifecycleLease::is_degraded`] to learn whether
    /// every resource was acquired.
    pub fn engage(&self, notice: &ForegroundNotice) -> LifecycleLease {
        let mut state = self.inner.state.lock();

        if state.holders == 0 {
            let platform = &self.inner.platform;
            state.foreground = log_failure("start foreground", platform.start_foreground(notice));
            state.wake_lock = log_failure("acquire wake lock", platform.acquire_wake_lock());
            state.degraded = !(state.foreground && state.wake_lock);

            tracing::info!(
                title = %notice.title,
                degraded = state.degraded,
                "Lifecycle guard engaged"
            );
        }
        state.holders += 1;

        LifecycleLease {
            inner: Arc::clone(&self.inner),
            generation: state.generation,
            degraded: state.degraded,
            released: false,
        }
    }

    /// Release everything and invalidate outstanding leases
    ///
    /// Safe to call repeatedly and on a guard that was never engaged.
    pub fn release(&self) {
        let mut state = self.inner.state.lock();
        if state.holders == 0 && !state.foreground && !state.wake_lock {
            return;
        }

        self.inner.release_resources(&mut state);
        state.holders = 0;
        state.generation += 1;
        tracing::info!("Lifecycle guard force-released");
    }

    pub fn is_engaged(&self) -> bool {
        self.inner.state.lock().holders > 0
    }

    pub fn holders(&self) -> usize {
        self.inner.state.lock().holders
    }

    pub fn is_degraded(&self) -> bool {
        let state = self.inner.state.lock();
        state.holders > 0 && state.degraded
    }
}

/// Scoped hold on the guard; dropping it gives the hold back
pub struct LifecycleLease {
    inner: Arc<GuardInner>,
    generation: u64,
    degraded: bool,
    released: bool,
}

impl LifecycleLease {
    /// Whether a resource was unavailable when this lease was taken
    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    /// Give the hold back now instead of at drop
    pub fn release(mut self) {
        self.give_back();
    }

    fn give_back(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        let mut state = self.inner.state.lock();
        // A forced release already returned this hold
        if state.generation != self.generation || state.holders == 0 {
            return;
        }

        state.holders -= 1;
        if state.holders == 0 {
            self.inner.release_resources(&mut state);
            tracing::info!("Lifecycle guard released");
        }
    }
}

impl Drop for LifecycleLease {
    fn drop(&mut self) {
        self.give_back();
    }
}

impl std::fmt::Debug for LifecycleLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleLease")
            .field("generation", &self.generation)
            .field("degraded", &self.degraded)
            .field("released", &self.released)
            .finish()
    }
}

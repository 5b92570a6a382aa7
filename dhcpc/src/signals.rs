//! Async-signal-safe flags set by `signal-hook`; the main loop polls and
//! clears them at well-defined suspension points only.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub struct Signals {
    renew: Arc<AtomicBool>,
    release: Arc<AtomicBool>,
    terminate: Arc<AtomicBool>,
}

impl Signals {
    pub fn register() -> std::io::Result<Self> {
        let renew = Arc::new(AtomicBool::new(false));
        let release = Arc::new(AtomicBool::new(false));
        let terminate = Arc::new(AtomicBool::new(false));

        signal_hook::flag::register(signal_hook::consts::SIGUSR1, renew.clone())?;
        signal_hook::flag::register(signal_hook::consts::SIGUSR2, release.clone())?;
        signal_hook::flag::register(signal_hook::consts::SIGTERM, terminate.clone())?;
        signal_hook::flag::register(signal_hook::consts::SIGINT, terminate.clone())?;

        Ok(Self { renew, release, terminate })
    }

    pub fn take_renew(&self) -> bool {
        self.renew.swap(false, Ordering::Relaxed)
    }

    pub fn take_release(&self) -> bool {
        self.release.swap(false, Ordering::Relaxed)
    }

    pub fn terminated(&self) -> bool {
        self.terminate.load(Ordering::Relaxed)
    }

    /// `true` if any flag is set, without consuming it. Used to cut short a
    /// timed sleep so the main loop can react at its next suspension point.
    pub fn pending(&self) -> bool {
        self.renew.load(Ordering::Relaxed)
            || self.release.load(Ordering::Relaxed)
            || self.terminate.load(Ordering::Relaxed)
    }
}

//! The cue list's background pulse thread.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::CueListInner;

/// Spawn the thread that pulses every playing cue once per `interval`.
pub(super) fn spawn(inner: Arc<CueListInner>, interval: Duration) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("cuestack-scheduler".to_string())
        .spawn(move || run(&inner, interval))
}

fn run(inner: &CueListInner, interval: Duration) {
    log::debug!("Scheduler started ({:?} pulse)", interval);
    while !inner.kill.load(Ordering::Relaxed) {
        {
            let mut state = inner.lock_state();
            let now = inner.clock.now();
            state.pulse_all(now);
        }
        inner.reap();
        thread::sleep(interval);
    }
    log::debug!("Scheduler stopped");
}

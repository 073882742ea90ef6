//! The pending-change buffer behind every armed watch.
//!
//! The event-delivery path calls [`Debouncer::push`]; a single trigger worker
//! loops on [`Debouncer::next_batch`] and [`Debouncer::finish`]. Both sides
//! share one mutex-guarded state and a condition variable.

use std::collections::BTreeSet;
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use camino::Utf8PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Nothing pending.
    Idle,
    /// Changes pending, waiting for the window to settle.
    Buffering,
    /// A run is in progress; new changes wait for it to finish.
    Triggering,
}

#[derive(Debug)]
struct State {
    phase: Phase,
    pending: BTreeSet<Utf8PathBuf>,
    deadline: Option<Instant>,
    closed: bool,
}

/// Sliding-window coalescing of change events.
///
/// Every push moves the deadline to `now + window`; a batch is released only
/// once the deadline has passed without further pushes and no run is in
/// progress.
#[derive(Debug)]
pub struct Debouncer {
    window: Duration,
    state: Mutex<State>,
    signal: Condvar,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            state: Mutex::new(State {
                phase: Phase::Idle,
                pending: BTreeSet::new(),
                deadline: None,
                closed: false,
            }),
            signal: Condvar::new(),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // Nothing in the critical sections can panic halfway through an
        // update, so a poisoned lock still guards consistent state.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn phase(&self) -> Phase {
        self.lock().phase
    }

    /// Records a changed path and restarts the window.
    pub fn push(&self, path: Utf8PathBuf) {
        let mut state = self.lock();
        if state.closed {
            return;
        }

        state.pending.insert(path);
        state.deadline = Some(Instant::now() + self.window);
        if state.phase == Phase::Idle {
            state.phase = Phase::Buffering;
        }

        self.signal.notify_all();
    }

    /// Blocks until a settled batch is available and moves to
    /// [`Phase::Triggering`]. Returns `None` once the debouncer is closed.
    pub fn next_batch(&self) -> Option<Vec<Utf8PathBuf>> {
        let mut state = self.lock();

        loop {
            if state.closed {
                return None;
            }

            let deadline = match (state.phase, state.deadline) {
                (Phase::Triggering, _) | (_, None) => {
                    state = self.signal.wait(state).unwrap_or_else(|e| e.into_inner());
                    continue;
                }
                (_, Some(deadline)) => deadline,
            };

            let now = Instant::now();
            if now >= deadline {
                state.phase = Phase::Triggering;
                state.deadline = None;
                return Some(std::mem::take(&mut state.pending).into_iter().collect());
            }

            let (guard, _) = self
                .signal
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(|e| e.into_inner());
            state = guard;
        }
    }

    /// Marks the current run as done. Changes that arrived during the run are
    /// kept and will form the next batch.
    pub fn finish(&self) {
        let mut state = self.lock();
        state.phase = if state.pending.is_empty() {
            Phase::Idle
        } else {
            Phase::Buffering
        };
        self.signal.notify_all();
    }

    /// Wakes the worker and makes every later [`Debouncer::next_batch`]
    /// return `None`.
    pub fn close(&self) {
        let mut state = self.lock();
        state.closed = true;
        self.signal.notify_all();
    }
}

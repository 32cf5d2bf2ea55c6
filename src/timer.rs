//! Single-shot request deadlines, multiplexed onto one monitor thread.
//!
//! Arming pushes a deadline onto a min-heap; the monitor sleeps until the
//! earliest deadline and fires the engine's timeout hook for it. Disarming
//! is lazy: the id is dropped from the armed set and a later heap pop for it
//! is skipped, so a deadline can never fire twice nor fire after the owning
//! request settled.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashSet};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use log::{debug, error};

use crate::protocol::RequestId;

type DeadlineHook = Box<dyn Fn(RequestId) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct TimerEntry {
    due: Instant,
    id: RequestId,
}

impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.due.cmp(&other.due).then(self.id.cmp(&other.id))
    }
}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

struct TimerState {
    deadlines: BinaryHeap<Reverse<TimerEntry>>,
    armed: HashSet<RequestId>,
    shutdown: bool,
}

struct TimerShared {
    state: Mutex<TimerState>,
    rearm: Condvar,
}

/// Deadline monitor shared by every request of one engine.
pub(crate) struct RequestTimer {
    shared: Arc<TimerShared>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl RequestTimer {
    /// Starts the monitor thread. `on_deadline` runs on that thread for
    /// every armed deadline that elapses before being disarmed.
    pub(crate) fn new(on_deadline: DeadlineHook) -> Self {
        let shared = Arc::new(TimerShared {
            state: Mutex::new(TimerState {
                deadlines: BinaryHeap::new(),
                armed: HashSet::new(),
                shutdown: false,
            }),
            rearm: Condvar::new(),
        });

        let monitor_shared = Arc::clone(&shared);
        let thread = thread::spawn(move || Self::monitor_loop(monitor_shared, on_deadline));

        Self {
            shared,
            thread: Mutex::new(Some(thread)),
        }
    }

    fn monitor_loop(shared: Arc<TimerShared>, on_deadline: DeadlineHook) {
        loop {
            let expired = {
                let mut state = shared.state.lock().expect("timer state lock poisoned");
                loop {
                    if state.shutdown {
                        return;
                    }
                    let Some(Reverse(earliest)) = state.deadlines.peek().copied() else {
                        state = shared
                            .rearm
                            .wait(state)
                            .expect("timer state lock poisoned");
                        continue;
                    };
                    let now = Instant::now();
                    if earliest.due <= now {
                        state.deadlines.pop();
                        break state.armed.remove(&earliest.id).then_some(earliest.id);
                    }
                    let (reacquired, _) = shared
                        .rearm
                        .wait_timeout(state, earliest.due - now)
                        .expect("timer state lock poisoned");
                    state = reacquired;
                }
            };

            if let Some(id) = expired {
                debug!("RequestTimer: deadline elapsed for request {id}");
                on_deadline(id);
            }
        }
    }

    /// Arms a single-shot deadline for `id`. One deadline per request.
    pub(crate) fn arm(&self, id: RequestId, due: Instant) {
        let mut state = self
            .shared
            .state
            .lock()
            .expect("timer state lock poisoned");
        state.deadlines.push(Reverse(TimerEntry { due, id }));
        state.armed.insert(id);
        drop(state);
        self.shared.rearm.notify_one();
    }

    /// Disarms the deadline of `id`, if any. Idempotent; harmless for
    /// unknown or already-fired ids.
    pub(crate) fn disarm(&self, id: RequestId) {
        self.shared
            .state
            .lock()
            .expect("timer state lock poisoned")
            .armed
            .remove(&id);
    }

    /// Stops the monitor thread. Pending deadlines are discarded.
    pub(crate) fn shutdown(&self) {
        {
            let mut state = self
                .shared
                .state
                .lock()
                .expect("timer state lock poisoned");
            state.shutdown = true;
        }
        self.shared.rearm.notify_one();

        let thread = self
            .thread
            .lock()
            .expect("timer thread lock poisoned")
            .take();
        if let Some(thread) = thread {
            if thread.join().is_err() {
                error!("RequestTimer: monitor thread terminated by panic");
            }
        }
    }
}

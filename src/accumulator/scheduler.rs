//! Delayed single-shot tasks behind a schedule/cancel interface.
//!
//! The store never touches timer primitives directly: production code runs on
//! [`TokioScheduler`], tests drive [`ManualScheduler`] through virtual time.

use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::AbortHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

pub type TimerTask = Box<dyn FnOnce() + Send>;

pub trait Scheduler: Send + Sync {
    /// Run `task` once after `delay`, unless cancelled first.
    fn schedule(&self, delay: Duration, task: TimerTask) -> TimerId;

    /// Cancel a pending task. Unknown or already fired ids are ignored.
    fn cancel(&self, id: TimerId);
}

/// Scheduler backed by spawned tokio sleeps.
pub struct TokioScheduler {
    handle: Handle,
    next_id: AtomicU64,
    timers: Arc<Mutex<HashMap<TimerId, AbortHandle>>>,
}

impl TokioScheduler {
    pub fn new(handle: Handle) -> Self {
        Self {
            handle,
            next_id: AtomicU64::new(1),
            timers: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Scheduler on the runtime of the calling context, if any.
    pub fn current() -> Option<Self> {
        Handle::try_current().ok().map(Self::new)
    }

    /// Number of timers not yet fired or cancelled.
    pub fn pending(&self) -> usize {
        self.timers.lock().len()
    }
}

impl Scheduler for TokioScheduler {
    fn schedule(&self, delay: Duration, task: TimerTask) -> TimerId {
        let id = TimerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let timers = self.timers.clone();

        // Held across spawn so a zero-delay task cannot fire before its
        // handle is registered.
        let mut registered = self.timers.lock();
        let join = self.handle.spawn(async move {
            tokio::time::sleep(delay).await;
            timers.lock().remove(&id);
            task();
        });
        registered.insert(id, join.abort_handle());

        id
    }

    fn cancel(&self, id: TimerId) {
        if let Some(handle) = self.timers.lock().remove(&id) {
            handle.abort();
        }
    }
}

/// Deterministic scheduler for tests. Time only moves on [`advance`].
///
/// [`advance`]: ManualScheduler::advance
#[derive(Default)]
pub struct ManualScheduler {
    state: Mutex<ManualState>,
}

#[derive(Default)]
struct ManualState {
    now: Duration,
    next_id: u64,
    pending: BTreeMap<(Duration, TimerId), TimerTask>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now(&self) -> Duration {
        self.state.lock().now
    }

    pub fn pending(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Move virtual time forward, running due tasks in deadline order.
    ///
    /// Tasks run without the scheduler lock held, so they may schedule or
    /// cancel. Returns how many tasks fired.
    pub fn advance(&self, by: Duration) -> usize {
        let target = self.state.lock().now + by;
        let mut fired = 0;

        loop {
            let task = {
                let mut state = self.state.lock();
                match state.pending.first_key_value().map(|(key, _)| *key) {
                    Some(key) if key.0 <= target => {
                        state.now = key.0;
                        state.pending.remove(&key)
                    }
                    _ => break,
                }
            };
            if let Some(task) = task {
                task();
                fired += 1;
            }
        }

        self.state.lock().now = target;
        fired
    }
}

impl Scheduler for ManualScheduler {
    fn schedule(&self, delay: Duration, task: TimerTask) -> TimerId {
        let mut state = self.state.lock();
        state.next_id += 1;
        let id = TimerId(state.next_id);
        let deadline = state.now + delay;
        state.pending.insert((deadline, id), task);
        id
    }

    fn cancel(&self, id: TimerId) {
        self.state.lock().pending.retain(|(_, pending), _| *pending != id);
    }
}

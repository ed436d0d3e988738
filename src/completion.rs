// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
Completion counter and waiters.

The counter is advanced only by the copy worker, one task at a time, after the task's fence
has been reached. Waiters either poll the counter or register interest. Registration checks
the counter under the same lock the worker takes to drain waiters, so a wakeup cannot be
missed.
*/

use crate::task::TaskId;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

pub(crate) type Callback = Box<dyn FnOnce(TaskId) + Send + 'static>;

enum Notify {
    Continuation(r#continue::Sender<()>),
    Callback(Callback),
}

struct Waiter {
    id: TaskId,
    notify: Notify,
}

pub(crate) struct Completion {
    counter: AtomicU64,
    poisoned: AtomicBool,
    waiters: Mutex<Vec<Waiter>>,
}

impl std::fmt::Debug for Completion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Completion")
            .field("counter", &self.completed())
            .field("poisoned", &self.is_poisoned())
            .finish_non_exhaustive()
    }
}

impl Completion {
    pub(crate) fn new() -> Self {
        Completion {
            counter: AtomicU64::new(0),
            poisoned: AtomicBool::new(false),
            waiters: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn completed(&self) -> u64 {
        self.counter.load(Ordering::Acquire)
    }

    pub(crate) fn is_complete(&self, id: TaskId) -> bool {
        self.completed() >= id.get()
    }

    pub(crate) fn is_poisoned(&self) -> bool {
        self.poisoned.load(Ordering::Acquire)
    }

    /// Marks `id` done and notifies everyone waiting on it or an earlier id.
    pub(crate) fn advance(&self, id: TaskId) {
        let ready = {
            let mut waiters = self.waiters.lock().unwrap();
            let previous = self.counter.swap(id.get(), Ordering::AcqRel);
            debug_assert_eq!(previous + 1, id.get(), "tasks must complete in order");
            let (ready, pending): (Vec<Waiter>, Vec<Waiter>) =
                waiters.drain(..).partition(|w| w.id <= id);
            *waiters = pending;
            ready
        };
        for waiter in ready {
            match waiter.notify {
                Notify::Continuation(sender) => sender.send(()),
                Notify::Callback(callback) => callback(waiter.id),
            }
        }
    }

    /// Runs `callback` once `id` is done; immediately if it already is.
    ///
    /// Callbacks registered on a poisoned engine never run.
    pub(crate) fn on_complete(&self, id: TaskId, callback: Callback) {
        {
            let mut waiters = self.waiters.lock().unwrap();
            if !self.is_complete(id) {
                if !self.is_poisoned() {
                    waiters.push(Waiter {
                        id,
                        notify: Notify::Callback(callback),
                    });
                }
                return;
            }
        }
        callback(id);
    }

    /// Resolves once `id` is done, or once the engine is poisoned.
    pub(crate) async fn wait(&self, id: TaskId) {
        loop {
            let future = {
                let mut waiters = self.waiters.lock().unwrap();
                if self.is_complete(id) || self.is_poisoned() {
                    None
                } else {
                    let (sender, future) = r#continue::continuation();
                    waiters.push(Waiter {
                        id,
                        notify: Notify::Continuation(sender),
                    });
                    Some(future)
                }
            };
            match future {
                Some(future) => future.await,
                None => return,
            }
        }
    }

    /// Stops all further completion. Pending async waiters are woken so they can observe it.
    pub(crate) fn poison(&self) {
        let waiters = {
            let mut waiters = self.waiters.lock().unwrap();
            self.poisoned.store(true, Ordering::Release);
            std::mem::take(&mut *waiters)
        };
        for waiter in waiters {
            if let Notify::Continuation(sender) = waiter.notify {
                sender.send(());
            }
        }
    }
}

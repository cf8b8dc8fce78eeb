// SPDX-FileCopyrightText: © 2023 Cascade driver contributors
// SPDX-License-Identifier: Apache-2.0

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Condvar, Mutex, MutexGuard,
    },
    time::{Duration, Instant},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WaitOutcome {
    Completed,
    Cancelled,
    TimedOut,
}

#[derive(Default)]
struct State {
    epoch: u64,
    done: bool,
}

/// One-shot signal between a transfer and the thread waiting on it.
///
/// Every [`Completion::reinit`] starts a new epoch. A completion raised for an older epoch
/// belongs to a transfer that was killed and is dropped.
#[derive(Default)]
pub struct Completion {
    state: Mutex<State>,
    cond: Condvar,
}

impl Completion {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn epoch(&self) -> u64 {
        self.lock().epoch
    }

    pub fn is_done(&self) -> bool {
        self.lock().done
    }

    /// Signal the waiter. Returns false if `epoch` is stale.
    pub fn complete(&self, epoch: u64) -> bool {
        let mut state = self.lock();
        if state.epoch != epoch {
            return false;
        }
        state.done = true;
        self.cond.notify_all();
        true
    }

    /// Forget any pending signal and start a new epoch.
    pub fn reinit(&self) -> u64 {
        let mut state = self.lock();
        state.epoch = state.epoch.wrapping_add(1);
        state.done = false;
        state.epoch
    }

    /// Wake waiters without completing, so they re-check any cancellation flag.
    pub fn wake(&self) {
        let _state = self.lock();
        self.cond.notify_all();
    }

    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let never = AtomicBool::new(false);
        self.wait_or_cancel(&never, Some(timeout)) == WaitOutcome::Completed
    }

    /// Block until completed, `cancelled` is set, or `timeout` passes.
    ///
    /// Cancellation is checked before completion, so a transfer that finished at the same
    /// moment it was aborted still counts as aborted.
    pub fn wait_or_cancel(&self, cancelled: &AtomicBool, timeout: Option<Duration>) -> WaitOutcome {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = self.lock();
        loop {
            if cancelled.load(Ordering::SeqCst) {
                return WaitOutcome::Cancelled;
            }
            if state.done {
                return WaitOutcome::Completed;
            }

            state = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return WaitOutcome::TimedOut;
                    }
                    self.cond
                        .wait_timeout(state, deadline - now)
                        .unwrap_or_else(|poisoned| poisoned.into_inner())
                        .0
                }
                None => self
                    .cond
                    .wait(state)
                    .unwrap_or_else(|poisoned| poisoned.into_inner()),
            };
        }
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn stale_epoch_is_ignored() {
        let completion = Completion::new();
        let old = completion.reinit();
        let new = completion.reinit();

        assert!(!completion.complete(old));
        assert!(!completion.wait_timeout(Duration::from_millis(10)));

        assert!(completion.complete(new));
        assert!(completion.wait_timeout(Duration::from_millis(10)));
    }

    #[test]
    fn completes_from_another_thread() {
        let completion = Arc::new(Completion::new());
        let epoch = completion.reinit();

        let signaller = {
            let completion = Arc::clone(&completion);
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(20));
                completion.complete(epoch);
            })
        };

        assert!(completion.wait_timeout(Duration::from_secs(5)));
        signaller.join().unwrap();
    }

    #[test]
    fn cancel_wins() {
        let completion = Arc::new(Completion::new());
        let cancelled = Arc::new(AtomicBool::new(false));

        let canceller = {
            let completion = Arc::clone(&completion);
            let cancelled = Arc::clone(&cancelled);
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(20));
                cancelled.store(true, Ordering::SeqCst);
                completion.wake();
            })
        };

        assert_eq!(
            completion.wait_or_cancel(&cancelled, None),
            WaitOutcome::Cancelled
        );
        canceller.join().unwrap();
    }
}

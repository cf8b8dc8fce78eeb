// SPDX-FileCopyrightText: © 2023 Cascade driver contributors
// SPDX-License-Identifier: Apache-2.0

use std::time::{Duration, Instant};

/// Number of polls that only yield the thread before we start sleeping between polls.
const SPIN_POLLS: u32 = 64;
const POLL_SLEEP: Duration = Duration::from_micros(500);

#[derive(Clone, Copy, Debug)]
pub struct Deadline {
    start: Instant,
    timeout: Duration,
}

impl Deadline {
    pub fn new(timeout: Duration) -> Self {
        Self {
            start: Instant::now(),
            timeout,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn expired(&self) -> bool {
        self.elapsed() > self.timeout
    }

    pub fn remaining(&self) -> Duration {
        self.timeout.saturating_sub(self.elapsed())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PollOutcome<T> {
    Ready(T),
    TimedOut(Duration),
}

impl<T> PollOutcome<T> {
    pub fn ready(self) -> Option<T> {
        match self {
            PollOutcome::Ready(value) => Some(value),
            PollOutcome::TimedOut(_) => None,
        }
    }
}

/// Repeatedly run `check` until it produces a value or `timeout` passes.
///
/// The check always runs at least once, and once more after the deadline has passed, so a
/// condition that became true while we slept is not reported as a timeout. An error from
/// `check` stops polling immediately.
pub fn poll_until<T, E>(
    timeout: Duration,
    mut check: impl FnMut() -> Result<Option<T>, E>,
) -> Result<PollOutcome<T>, E> {
    let deadline = Deadline::new(timeout);
    let mut polls = 0u32;
    loop {
        let expired = deadline.expired();
        if let Some(value) = check()? {
            return Ok(PollOutcome::Ready(value));
        }
        if expired {
            return Ok(PollOutcome::TimedOut(deadline.elapsed()));
        }

        if polls < SPIN_POLLS {
            polls += 1;
            std::thread::yield_now();
        } else {
            std::thread::sleep(POLL_SLEEP.min(deadline.remaining()));
        }
    }
}

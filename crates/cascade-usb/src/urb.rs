// SPDX-FileCopyrightText: © 2023 Cascade driver contributors
// SPDX-License-Identifier: Apache-2.0

use std::{
    sync::{Mutex, MutexGuard},
    time::Duration,
};

use crate::completion::Completion;

/// What the host controller reports back for a finished transfer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UrbResult {
    Sent(usize),
    Received(Vec<u8>),
    Failed(String),
}

/// A snapshot of a submitted transfer, handed to the host controller.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UrbRequest {
    pub epoch: u64,
    pub endpoint: u8,
    /// Payload for OUT endpoints, empty for IN endpoints.
    pub data: Vec<u8>,
    /// Bytes requested on an IN endpoint.
    pub length: usize,
    /// How long the caller waits for this transfer; `None` waits until cancelled.
    pub timeout: Option<Duration>,
}

#[derive(Default)]
struct UrbState {
    epoch: u64,
    buffer: Vec<u8>,
    length: usize,
    timeout: Option<Duration>,
    actual: usize,
    error: Option<String>,
}

/// A bulk transfer on one endpoint, reused for every transfer on that endpoint.
pub struct Urb {
    endpoint: u8,
    state: Mutex<UrbState>,
    completion: Completion,
}

impl Urb {
    pub fn new(endpoint: u8) -> Self {
        Self {
            endpoint,
            state: Mutex::default(),
            completion: Completion::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, UrbState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn endpoint(&self) -> u8 {
        self.endpoint
    }

    pub fn is_in(&self) -> bool {
        self.endpoint & 0x80 != 0
    }

    pub fn completion(&self) -> &Completion {
        &self.completion
    }

    fn prepare(&self, buffer: Vec<u8>, length: usize, timeout: Option<Duration>) -> u64 {
        let mut state = self.lock();
        let epoch = self.completion.reinit();
        *state = UrbState {
            epoch,
            buffer,
            length,
            timeout,
            actual: 0,
            error: None,
        };
        epoch
    }

    /// Load `data` for an OUT transfer.
    pub fn prepare_out(&self, data: &[u8], timeout: Option<Duration>) -> u64 {
        self.prepare(data.to_vec(), data.len(), timeout)
    }

    /// Arm an IN transfer of up to `length` bytes.
    pub fn prepare_in(&self, length: usize, timeout: Option<Duration>) -> u64 {
        self.prepare(Vec::new(), length, timeout)
    }

    pub fn request(&self) -> UrbRequest {
        let state = self.lock();
        UrbRequest {
            epoch: state.epoch,
            endpoint: self.endpoint,
            data: if self.is_in() {
                Vec::new()
            } else {
                state.buffer.clone()
            },
            length: state.length,
            timeout: state.timeout,
        }
    }

    /// Whether the transfer submitted as `epoch` is still the one the caller waits for.
    pub fn is_current(&self, epoch: u64) -> bool {
        self.lock().epoch == epoch
    }

    /// Called by the host controller when a transfer finishes.
    ///
    /// Returns false when the transfer was killed or superseded in the meantime.
    pub fn give_back(&self, epoch: u64, result: UrbResult) -> bool {
        let mut state = self.lock();
        if state.epoch != epoch {
            tracing::debug!("dropping stale completion on endpoint {:#04x}", self.endpoint);
            return false;
        }

        match result {
            UrbResult::Sent(count) => state.actual = count,
            UrbResult::Received(mut bytes) => {
                bytes.truncate(state.length);
                state.actual = bytes.len();
                state.buffer = bytes;
            }
            UrbResult::Failed(reason) => state.error = Some(reason),
        }
        drop(state);

        self.completion.complete(epoch)
    }

    /// Detach the in-flight transfer so that its completion, if it ever arrives, is ignored.
    pub fn retire(&self) {
        let mut state = self.lock();
        state.epoch = self.completion.reinit();
    }

    pub fn actual_length(&self) -> usize {
        self.lock().actual
    }

    pub fn error(&self) -> Option<String> {
        self.lock().error.clone()
    }

    /// The bytes received by the last IN transfer.
    pub fn data(&self) -> Vec<u8> {
        let state = self.lock();
        state.buffer[..state.actual.min(state.buffer.len())].to_vec()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn in_transfer_truncates_to_request() {
        let urb = Urb::new(0x82);
        let epoch = urb.prepare_in(4, Some(Duration::from_millis(10)));
        assert_eq!(urb.request().timeout, Some(Duration::from_millis(10)));

        assert!(urb.give_back(epoch, UrbResult::Received(vec![1, 2, 3, 4, 5, 6])));
        assert_eq!(urb.actual_length(), 4);
        assert_eq!(urb.data(), vec![1, 2, 3, 4]);
        assert!(urb.completion().is_done());
    }

    #[test]
    fn retired_transfer_is_ignored() {
        let urb = Urb::new(0x02);
        let epoch = urb.prepare_out(&[1, 2, 3], None);
        assert_eq!(urb.request().data, vec![1, 2, 3]);
        assert!(urb.is_current(epoch));

        urb.retire();
        assert!(!urb.is_current(epoch));
        assert!(!urb.give_back(epoch, UrbResult::Sent(3)));
        assert_eq!(urb.actual_length(), 0);
        assert!(!urb.completion().is_done());
    }
}

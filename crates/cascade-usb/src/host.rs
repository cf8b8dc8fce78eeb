// SPDX-FileCopyrightText: © 2023 Cascade driver contributors
// SPDX-License-Identifier: Apache-2.0

use std::{
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use crate::{
    error::UsbError,
    urb::{Urb, UrbRequest, UrbResult},
};

/// The host controller side of the bulk interface.
///
/// `submit` queues a transfer and returns at once; the controller later reports the result
/// through [`Urb::give_back`].
pub trait UsbHost: Send + Sync {
    fn submit(&self, urb: &Arc<Urb>) -> Result<(), UsbError>;

    /// Cancel a transfer and wait for the cancellation to take effect.
    fn kill(&self, urb: &Urb);

    /// Cancel a transfer without waiting; the transfer completes with an error.
    fn unlink(&self, urb: &Urb);
}

/// How a [`ScriptedHost`] answers one submission.
#[derive(Clone, Debug)]
pub enum Reply {
    Complete(UrbResult),
    Delay(Duration, UrbResult),
    /// Never complete unless unlinked.
    Hang,
    /// Fail the submission itself.
    Reject(String),
}

impl Reply {
    pub fn sent(request: &UrbRequest) -> Self {
        Reply::Complete(UrbResult::Sent(request.data.len()))
    }

    pub fn received(bytes: impl Into<Vec<u8>>) -> Self {
        Reply::Complete(UrbResult::Received(bytes.into()))
    }
}

type Handler = dyn Fn(&UrbRequest) -> Reply + Send + Sync;

#[derive(Default)]
struct Journal {
    requests: Vec<UrbRequest>,
    killed: Vec<u8>,
    unlinked: Vec<u8>,
    pending: Vec<(Arc<Urb>, u64)>,
}

/// A host controller driven by a closure standing in for the device firmware.
pub struct ScriptedHost {
    handler: Box<Handler>,
    journal: Mutex<Journal>,
}

impl ScriptedHost {
    pub fn new(handler: impl Fn(&UrbRequest) -> Reply + Send + Sync + 'static) -> Self {
        Self {
            handler: Box::new(handler),
            journal: Mutex::default(),
        }
    }

    fn journal(&self) -> MutexGuard<'_, Journal> {
        self.journal.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Every transfer submitted so far, in order.
    pub fn requests(&self) -> Vec<UrbRequest> {
        self.journal().requests.clone()
    }

    /// Endpoints of every killed transfer, in order.
    pub fn killed(&self) -> Vec<u8> {
        self.journal().killed.clone()
    }

    pub fn unlinked(&self) -> Vec<u8> {
        self.journal().unlinked.clone()
    }

    pub fn clear(&self) {
        let mut journal = self.journal();
        journal.requests.clear();
        journal.killed.clear();
        journal.unlinked.clear();
    }
}

impl UsbHost for ScriptedHost {
    fn submit(&self, urb: &Arc<Urb>) -> Result<(), UsbError> {
        let request = urb.request();
        let reply = (self.handler)(&request);
        self.journal().requests.push(request.clone());

        match reply {
            Reply::Complete(result) => {
                urb.give_back(request.epoch, result);
            }
            Reply::Delay(delay, result) => {
                let urb = Arc::clone(urb);
                std::thread::spawn(move || {
                    std::thread::sleep(delay);
                    urb.give_back(request.epoch, result);
                });
            }
            Reply::Hang => self.journal().pending.push((Arc::clone(urb), request.epoch)),
            Reply::Reject(reason) => {
                return Err(UsbError::SubmitError {
                    endpoint: request.endpoint,
                    reason,
                })
            }
        }

        Ok(())
    }

    fn kill(&self, urb: &Urb) {
        let mut journal = self.journal();
        journal.killed.push(urb.endpoint());
        journal
            .pending
            .retain(|(pending, _)| !std::ptr::eq(Arc::as_ptr(pending), urb));
    }

    fn unlink(&self, urb: &Urb) {
        let unlinked = {
            let mut journal = self.journal();
            journal.unlinked.push(urb.endpoint());
            let (unlinked, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut journal.pending)
                .into_iter()
                .partition(|(pending, _)| std::ptr::eq(Arc::as_ptr(pending), urb));
            journal.pending = kept;
            unlinked
        };

        for (urb, epoch) in unlinked.into_iter() {
            urb.give_back(epoch, UrbResult::Failed("unlinked".to_string()));
        }
    }
}

#[cfg(feature = "usb")]
pub use rusb_host::RusbHost;

#[cfg(feature = "usb")]
mod rusb_host {
    use std::{
        collections::HashMap,
        sync::{Arc, Mutex},
        thread::JoinHandle,
        time::{Duration, Instant},
    };

    use rusb::{DeviceHandle, GlobalContext};

    use super::UsbHost;
    use crate::{
        error::UsbError,
        urb::{Urb, UrbRequest, UrbResult},
        MEMX_VENDOR_ID,
    };

    /// Longest a read blocks in libusb before checking whether it was cancelled.
    const CANCEL_POLL: Duration = Duration::from_millis(50);

    /// Bulk transfers over libusb, one worker thread per submission.
    ///
    /// libusb's synchronous calls cannot be interrupted, so reads are issued in short slices
    /// and stop at the first slice boundary after their transfer is retired. Writes carry the
    /// caller's own timeout. A worker never outlives a `kill`, nor the next submission on its
    /// endpoint.
    pub struct RusbHost {
        handle: Arc<DeviceHandle<GlobalContext>>,
        /// Used for writes submitted without a timeout of their own.
        write_timeout: Duration,
        workers: Mutex<HashMap<u8, JoinHandle<()>>>,
    }

    fn read(handle: &DeviceHandle<GlobalContext>, urb: &Urb, request: &UrbRequest) -> UrbResult {
        let deadline = request.timeout.map(|timeout| Instant::now() + timeout);
        let mut buffer = vec![0u8; request.length];

        loop {
            let slice = match deadline {
                Some(deadline) => deadline.saturating_duration_since(Instant::now()).min(CANCEL_POLL),
                None => CANCEL_POLL,
            };
            // libusb treats a zero timeout as unlimited
            if slice.is_zero() {
                return UrbResult::Failed(rusb::Error::Timeout.to_string());
            }

            match handle.read_bulk(request.endpoint, &mut buffer, slice) {
                Ok(count) => {
                    buffer.truncate(count);
                    return UrbResult::Received(buffer);
                }
                Err(rusb::Error::Timeout) if urb.is_current(request.epoch) => continue,
                Err(err) => return UrbResult::Failed(err.to_string()),
            }
        }
    }

    impl RusbHost {
        pub fn scan() -> Result<Vec<rusb::Device<GlobalContext>>, UsbError> {
            let mut output = Vec::new();
            for device in rusb::devices()?.iter() {
                let desc = device.device_descriptor()?;
                if desc.vendor_id() == MEMX_VENDOR_ID {
                    output.push(device);
                }
            }
            Ok(output)
        }

        pub fn open(index: usize, write_timeout: Duration) -> Result<Self, UsbError> {
            let device = Self::scan()?
                .into_iter()
                .nth(index)
                .ok_or(UsbError::NoDevice)?;
            tracing::debug!(
                "opening usb device bus={} addr={}",
                device.bus_number(),
                device.address()
            );

            let mut handle = device.open()?;
            let _ = handle.set_auto_detach_kernel_driver(true);
            handle.claim_interface(0)?;

            Ok(Self {
                handle: Arc::new(handle),
                write_timeout,
                workers: Mutex::default(),
            })
        }

        /// Wait for the worker last started on `endpoint`, if any.
        fn join_worker(&self, endpoint: u8) {
            let worker = self
                .workers
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .remove(&endpoint);
            if let Some(worker) = worker {
                if worker.join().is_err() {
                    tracing::warn!("usb worker for endpoint {endpoint:#04x} panicked");
                }
            }
        }
    }

    impl UsbHost for RusbHost {
        fn submit(&self, urb: &Arc<Urb>) -> Result<(), UsbError> {
            let request = urb.request();
            let endpoint = request.endpoint;

            // A retired transfer may still be inside libusb; it must not race this one for data.
            self.join_worker(endpoint);

            let handle = Arc::clone(&self.handle);
            let write_timeout = request.timeout.unwrap_or(self.write_timeout);
            let urb = Arc::clone(urb);

            let worker = std::thread::Builder::new()
                .name(format!("usb-ep{endpoint:02x}"))
                .spawn(move || {
                    let result = if request.endpoint & 0x80 != 0 {
                        read(&handle, &urb, &request)
                    } else {
                        match handle.write_bulk(request.endpoint, &request.data, write_timeout) {
                            Ok(count) => UrbResult::Sent(count),
                            Err(err) => UrbResult::Failed(err.to_string()),
                        }
                    };
                    urb.give_back(request.epoch, result);
                })
                .map_err(|err| UsbError::SubmitError {
                    endpoint,
                    reason: err.to_string(),
                })?;

            self.workers
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .insert(endpoint, worker);
            Ok(())
        }

        fn kill(&self, urb: &Urb) {
            urb.retire();
            self.join_worker(urb.endpoint());
        }

        fn unlink(&self, urb: &Urb) {
            urb.retire();
            urb.completion().wake();
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn unlink_fails_a_hung_transfer() {
        let host = ScriptedHost::new(|_| Reply::Hang);
        let urb = Arc::new(Urb::new(0x81));
        urb.prepare_in(16, None);

        host.submit(&urb).unwrap();
        assert!(!urb.completion().is_done());

        host.unlink(&urb);
        assert!(urb.completion().is_done());
        assert_eq!(urb.error().as_deref(), Some("unlinked"));
        assert_eq!(host.unlinked(), vec![0x81]);
    }

    #[test]
    fn rejected_submission() {
        let host = ScriptedHost::new(|_| Reply::Reject("no bandwidth".to_string()));
        let urb = Arc::new(Urb::new(0x02));
        urb.prepare_out(&[0; 8], None);

        assert!(matches!(
            host.submit(&urb),
            Err(UsbError::SubmitError { endpoint: 0x02, .. })
        ));
    }
}

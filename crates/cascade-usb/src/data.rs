// SPDX-FileCopyrightText: © 2023 Cascade driver contributors
// SPDX-License-Identifier: Apache-2.0

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use crate::{
    completion::WaitOutcome, error::UsbError, host::UsbHost, transfer, urb::Urb, MAX_MPUOUT_SIZE,
    MAX_READ_SIZE, MEMX_IN_EP, MEMX_OUT_EP,
};

struct Shared {
    host: Arc<dyn UsbHost>,
    tx: Arc<Urb>,
    rx: Arc<Urb>,
    write_lock: Mutex<()>,
    read_lock: Mutex<()>,
    aborting: AtomicBool,
    chunk_timeout: Duration,
}

/// The inference data endpoints of a USB device.
///
/// Reads block until the device produces output; [`UsbDataPath::abort`] releases a blocked
/// reader from another thread.
#[derive(Clone)]
pub struct UsbDataPath {
    shared: Arc<Shared>,
}

impl UsbDataPath {
    pub fn new(host: Arc<dyn UsbHost>, chunk_timeout: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                host,
                tx: Arc::new(Urb::new(MEMX_OUT_EP)),
                rx: Arc::new(Urb::new(MEMX_IN_EP)),
                write_lock: Mutex::new(()),
                read_lock: Mutex::new(()),
                aborting: AtomicBool::new(false),
                chunk_timeout,
            }),
        }
    }

    /// Send `data` to the device in chunks the firmware accepts. Returns the bytes written.
    pub fn write(&self, data: &[u8]) -> Result<usize, UsbError> {
        let shared = &self.shared;
        let _guard = shared
            .write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let mut written = 0;
        for chunk in data.chunks(MAX_MPUOUT_SIZE) {
            written += transfer::send(
                shared.host.as_ref(),
                &shared.tx,
                chunk,
                shared.chunk_timeout,
            )?;
        }
        Ok(written)
    }

    /// Wait for the next block of output from the device.
    ///
    /// There is no deadline: the device may stay idle for as long as it likes. Returns
    /// [`UsbError::Aborted`] if [`UsbDataPath::abort`] is called first.
    pub fn read(&self) -> Result<Vec<u8>, UsbError> {
        let shared = &self.shared;
        if shared.aborting.swap(false, Ordering::SeqCst) {
            return Err(UsbError::Aborted);
        }

        let _guard = shared
            .read_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        shared.rx.prepare_in(MAX_READ_SIZE, None);
        shared.host.submit(&shared.rx)?;

        match shared.rx.completion().wait_or_cancel(&shared.aborting, None) {
            WaitOutcome::Cancelled | WaitOutcome::TimedOut => {
                shared.aborting.store(false, Ordering::SeqCst);
                shared.host.kill(&shared.rx);
                shared.rx.retire();
                tracing::debug!("data read aborted");
                Err(UsbError::Aborted)
            }
            WaitOutcome::Completed => {
                if let Some(reason) = shared.rx.error() {
                    return Err(UsbError::Transfer {
                        endpoint: MEMX_IN_EP,
                        reason,
                    });
                }
                Ok(shared.rx.data())
            }
        }
    }

    /// Release a reader blocked in [`UsbDataPath::read`].
    pub fn abort(&self) {
        let shared = &self.shared;
        shared.aborting.store(true, Ordering::SeqCst);
        shared.host.unlink(&shared.rx);
        shared.rx.completion().wake();
    }
}

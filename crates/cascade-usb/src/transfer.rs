// SPDX-FileCopyrightText: © 2023 Cascade driver contributors
// SPDX-License-Identifier: Apache-2.0

use std::{sync::Arc, time::Duration};

use crate::{error::UsbError, host::UsbHost, urb::Urb};

/// Serialize header words the way the firmware expects them on the wire.
pub(crate) fn header(words: &[u32]) -> Vec<u8> {
    bytemuck::cast_slice::<u32, u8>(words).to_vec()
}

fn check_error(urb: &Urb) -> Result<(), UsbError> {
    match urb.error() {
        Some(reason) => Err(UsbError::Transfer {
            endpoint: urb.endpoint(),
            reason,
        }),
        None => Ok(()),
    }
}

/// Push `data` out of `urb` and block until the host reports it sent.
///
/// On timeout the transfer is killed and its completion reset, so the next transfer on the
/// endpoint starts clean.
pub(crate) fn send(
    host: &dyn UsbHost,
    urb: &Arc<Urb>,
    data: &[u8],
    timeout: Duration,
) -> Result<usize, UsbError> {
    urb.prepare_out(data, Some(timeout));
    host.submit(urb)?;

    if !urb.completion().wait_timeout(timeout) {
        tracing::error!(
            "write of {} bytes on endpoint {:#04x} timed out",
            data.len(),
            urb.endpoint()
        );
        host.kill(urb);
        urb.retire();
        return Err(UsbError::WriteTimeout {
            endpoint: urb.endpoint(),
            timeout,
        });
    }
    check_error(urb)?;

    Ok(urb.actual_length())
}

/// Read up to `length` bytes from `urb`.
pub(crate) fn receive(
    host: &dyn UsbHost,
    urb: &Arc<Urb>,
    length: usize,
    timeout: Duration,
) -> Result<Vec<u8>, UsbError> {
    urb.prepare_in(length, Some(timeout));
    host.submit(urb)?;

    if !urb.completion().wait_timeout(timeout) {
        tracing::error!("read on endpoint {:#04x} timed out", urb.endpoint());
        host.kill(urb);
        urb.retire();
        return Err(UsbError::ReadTimeout {
            endpoint: urb.endpoint(),
            timeout,
        });
    }
    check_error(urb)?;

    Ok(urb.data())
}

pub(crate) fn le_word(bytes: &[u8], index: usize) -> Option<u32> {
    let start = index * 4;
    let word = bytes.get(start..start + 4)?;
    Some(u32::from_le_bytes([word[0], word[1], word[2], word[3]]))
}

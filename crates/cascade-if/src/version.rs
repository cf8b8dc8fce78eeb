// SPDX-FileCopyrightText: © 2023 Cascade driver contributors
// SPDX-License-Identifier: Apache-2.0

use once_cell::sync::Lazy;

/// Version string reported through the info feature, NUL padded to 8 bytes.
pub static DRIVER_VERSION: Lazy<[u8; 8]> = Lazy::new(|| {
    let mut version = [0u8; 8];
    let text = env!("CARGO_PKG_VERSION").as_bytes();
    let len = text.len().min(version.len());
    version[..len].copy_from_slice(&text[..len]);
    version
});

/// The version as the two result words it occupies.
pub fn version_words() -> [u32; 2] {
    let v = &*DRIVER_VERSION;
    [
        u32::from_le_bytes([v[0], v[1], v[2], v[3]]),
        u32::from_le_bytes([v[4], v[5], v[6], v[7]]),
    ]
}

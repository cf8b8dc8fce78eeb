// SPDX-FileCopyrightText: © 2023 Cascade driver contributors
// SPDX-License-Identifier: Apache-2.0

pub use cascade_core;
pub use cascade_if;
pub use cascade_pcie;
pub use cascade_ref;
pub use cascade_usb;

pub mod config;

pub use cascade_ref::{detect_devices, CascadeError};

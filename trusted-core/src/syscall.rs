// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

//! The capability surface exposed to untrusted application code.
//!
//! The application never touches trusted memory, flash or the mailbox
//! directly; these enumerated operations are the only way across the
//! boundary, and each one routes through the shared slots owned by the
//! trusted side.

use ipc::IpcError;

/// Operations callable from the application image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemCall<'a> {
    /// Transmit a raw application PDU over the radio.
    SendPacket(&'a [u8]),
    /// Send a free-form message to the gateway.
    SendMessage(&'a [u8]),
    /// Fetch one byte from the entropy peripheral.
    RandomByte,
    /// This device's 64-bit identity.
    DeviceId,
    /// Emit a log record to the gateway.
    Log(&'a [u8]),
    /// Reload the application watchdog. Must be issued at least once per
    /// watchdog period while the application executes.
    ReloadWatchdog,
}

/// Values returned across the boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemCallReturn {
    Done,
    Byte(u8),
    DeviceId(u64),
}

/// Handle handed to application code; the only authority it ever receives.
pub trait SystemCalls {
    fn system_call(&mut self, call: SystemCall<'_>) -> Result<SystemCallReturn, IpcError>;
}

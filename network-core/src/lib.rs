// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

//! The untrusted network context.
//!
//! Owns the radio: parses and gates inbound frames, runs the OTA transfer
//! session (including the incremental image hash), performs the lifecycle
//! status transitions it initiates and formats every notification the
//! gateway sees. It has no access to flash or the watchdogs; privileged
//! work crosses the mailbox to the trusted core.

#![no_std]

#[cfg(test)]
extern crate std;

#[macro_use]
mod fmt;

pub mod dispatcher;
pub mod session;

pub use dispatcher::{Clock, Entropy, Transport, UntrustedDispatcher};
pub use session::{ChunkDisposition, OtaSession, TransferState};

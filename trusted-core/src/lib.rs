// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

//! The trusted management context.
//!
//! This core owns flash, both watchdogs, the reset controller and the
//! partition configuration. Untrusted input never reaches it directly: the
//! network core parses the radio and forwards validated work through the
//! mailbox, and application code only crosses the boundary through the
//! enumerated system-call surface.

#![no_std]

#[cfg(test)]
extern crate std;

#[macro_use]
mod fmt;

pub mod boot;
pub mod dispatcher;
pub mod flash;
#[cfg(any(test, feature = "mem-flash"))]
pub mod mem_flash;
pub mod syscall;
pub mod watchdog;

pub use boot::{boot_mode, BootMode, ResetReason};
pub use dispatcher::{MotionControl, PartitionConfig, ResetControl, TrustedDispatcher};
pub use flash::Programmer;
pub use syscall::{SystemCall, SystemCallReturn, SystemCalls};
pub use watchdog::{Watchdog, WatchdogSupervisor};

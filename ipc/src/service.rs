// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

use core::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use crate::{Channel, DoorbellLine, IpcError};
use consts::ACK_SPIN_BUDGET;

const SERVICE_NONE: u8 = 0;

/// Services the trusted core borrows from the network core, which owns the
/// radio and the entropy peripheral.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum ServiceRequest {
    /// Transmit the frame staged in the TX PDU slot.
    TransmitFrame = 1,
    /// Read one random byte into the shared random cell.
    ReadRandomByte = 2,
}

impl ServiceRequest {
    fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            1 => Some(ServiceRequest::TransmitFrame),
            2 => Some(ServiceRequest::ReadRandomByte),
            _ => None,
        }
    }
}

/// Single-slot synchronous call into the peer core.
///
/// Call contract: the caller stages argument slots, publishes the request,
/// rings the service doorbell and spin-waits on the acknowledgment. The
/// callee performs the action, clears the request and raises the
/// acknowledgment; the request slot is cleared before the acknowledgment is
/// published so that once the caller observes the ack the slot is free
/// again. At most one call may be outstanding; the slot has a single
/// logical owner.
pub struct ServiceSlot {
    request: AtomicU8,
    ack: AtomicBool,
    peer_ready: AtomicBool,
}

impl ServiceSlot {
    pub const fn new() -> Self {
        Self {
            request: AtomicU8::new(SERVICE_NONE),
            ack: AtomicBool::new(false),
            peer_ready: AtomicBool::new(false),
        }
    }

    /// Mark the callee side up. Calls before this fail with `PeerNotReady`.
    pub fn set_ready(&self) {
        self.peer_ready.store(true, Ordering::Release);
    }

    pub fn is_ready(&self) -> bool {
        self.peer_ready.load(Ordering::Acquire)
    }

    /// Issue a call and wait for the acknowledgment.
    ///
    /// Argument slots must be staged before calling. Returns
    /// [`IpcError::Busy`] if a call is already outstanding — issuing one is
    /// a caller bug, and this is the hook tests assert on.
    pub fn call(&self, request: ServiceRequest, doorbell: &DoorbellLine) -> Result<(), IpcError> {
        if !self.is_ready() {
            return Err(IpcError::PeerNotReady);
        }
        if self.request.load(Ordering::Acquire) != SERVICE_NONE {
            return Err(IpcError::Busy);
        }
        self.ack.store(false, Ordering::Relaxed);
        self.request.store(request as u8, Ordering::Release);
        doorbell.ring(Channel::Service);
        for _ in 0..ACK_SPIN_BUDGET {
            if self.ack.load(Ordering::Acquire) {
                return Ok(());
            }
            core::hint::spin_loop();
        }
        Err(IpcError::AckTimeout)
    }

    /// Callee: fetch the pending request, if any.
    pub fn begin(&self) -> Option<ServiceRequest> {
        ServiceRequest::from_u8(self.request.load(Ordering::Acquire))
    }

    /// Callee: publish completion. Result slots must be staged first.
    pub fn complete(&self) {
        self.request.store(SERVICE_NONE, Ordering::Relaxed);
        self.ack.store(true, Ordering::Release);
    }
}

impl Default for ServiceSlot {
    fn default() -> Self {
        Self::new()
    }
}

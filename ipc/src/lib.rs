// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Shared-memory mailbox between the two cores.
//!
//! The trusted core owns flash and the watchdogs; the network core owns the
//! radio. They exchange work through the slots here plus per-channel
//! doorbell bits — no other memory is shared. Each slot has a single writer
//! per direction; the OTA, log, message and PDU slots are additionally
//! guarded by a bounded spin-lock because both sides read-modify-write them.

#![no_std]

#[cfg(test)]
extern crate std;

mod doorbell;
mod lock;
mod service;

pub use doorbell::{Channel, DoorbellLine, EventSet};
pub use lock::{SpinLock, SpinLockGuard};
pub use service::{ServiceRequest, ServiceSlot};

use core::sync::atomic::{AtomicU8, Ordering};

use consts::{MAX_APP_PDU, MAX_LOG_DATA, MAX_MESSAGE_DATA, OTA_CHUNK_SIZE};
use radio_protocol::{ApplicationStatus, RendezvousTarget};

/// Mailbox failures. All of them leave the shared state untouched; the
/// dispatcher skips the operation and the requester retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum IpcError {
    /// A call was issued while one was still outstanding.
    Busy,
    /// The callee side has not come up yet.
    PeerNotReady,
    /// The callee did not acknowledge within the spin budget.
    AckTimeout,
    /// A slot lock could not be taken within the spin budget.
    LockTimeout,
}

/// The authoritative lifecycle status word.
pub struct StatusCell(AtomicU8);

impl StatusCell {
    pub const fn new(initial: ApplicationStatus) -> Self {
        Self(AtomicU8::new(initial as u8))
    }

    pub fn load(&self) -> ApplicationStatus {
        // Only `store` writes this cell, so the raw value is always valid.
        ApplicationStatus::from_u8(self.0.load(Ordering::Acquire))
            .unwrap_or(ApplicationStatus::Ready)
    }

    pub fn store(&self, status: ApplicationStatus) {
        self.0.store(status as u8, Ordering::Release);
    }
}

/// Outcome of the most recent trusted-side boot, published for the network
/// core so it can notify the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum BootNotice {
    None = 0,
    /// Management mode entered because a stop was requested.
    ManagementAfterStop = 1,
    /// Management mode entered because the application hung.
    ManagementAfterFault = 2,
    /// The application image was booted.
    ApplicationBooted = 3,
}

pub struct BootCell(AtomicU8);

impl BootCell {
    pub const fn new() -> Self {
        Self(AtomicU8::new(BootNotice::None as u8))
    }

    pub fn load(&self) -> BootNotice {
        match self.0.load(Ordering::Acquire) {
            1 => BootNotice::ManagementAfterStop,
            2 => BootNotice::ManagementAfterFault,
            3 => BootNotice::ApplicationBooted,
            _ => BootNotice::None,
        }
    }

    pub fn store(&self, notice: BootNotice) {
        self.0.store(notice as u8, Ordering::Release);
    }
}

impl Default for BootCell {
    fn default() -> Self {
        Self::new()
    }
}

/// State of one OTA transfer session as both cores see it. The network core
/// stages sizes and chunk bytes; the trusted core reads them to program
/// flash and reports the result through `flash_ok`.
pub struct OtaSlot {
    pub image_size: u32,
    pub chunk_count: u32,
    pub chunk_index: u32,
    pub chunk_size: u8,
    pub chunk: [u8; OTA_CHUNK_SIZE],
    /// Index of the last acknowledged chunk, -1 before the first.
    pub last_chunk_acked: i32,
    pub hashes_match: bool,
    pub flash_ok: bool,
}

impl OtaSlot {
    pub const fn new() -> Self {
        Self {
            image_size: 0,
            chunk_count: 0,
            chunk_index: 0,
            chunk_size: 0,
            chunk: [0; OTA_CHUNK_SIZE],
            last_chunk_acked: -1,
            hashes_match: false,
            flash_ok: true,
        }
    }

    /// Reset for a fresh session. The previous session's verdict and ack
    /// bookkeeping must not leak into the new one.
    pub fn reset_session(&mut self, image_size: u32, chunk_count: u32) {
        self.image_size = image_size;
        self.chunk_count = chunk_count;
        self.chunk_index = 0;
        self.chunk_size = 0;
        self.last_chunk_acked = -1;
        self.hashes_match = false;
        self.flash_ok = true;
    }

    /// Bytes of the currently staged chunk.
    pub fn chunk_bytes(&self) -> &[u8] {
        &self.chunk[..self.chunk_size as usize]
    }
}

impl Default for OtaSlot {
    fn default() -> Self {
        Self::new()
    }
}

/// A length-prefixed byte record (log data, application messages, PDUs).
pub struct RecordSlot<const N: usize> {
    pub len: u8,
    pub data: [u8; N],
}

impl<const N: usize> RecordSlot<N> {
    pub const fn new() -> Self {
        Self {
            len: 0,
            data: [0; N],
        }
    }

    /// Stage `bytes`, truncating to the slot capacity.
    pub fn set(&mut self, bytes: &[u8]) {
        let len = bytes.len().min(N);
        self.data[..len].copy_from_slice(&bytes[..len]);
        self.len = len as u8;
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data[..self.len as usize]
    }
}

impl<const N: usize> Default for RecordSlot<N> {
    fn default() -> Self {
        Self::new()
    }
}

/// The whole shared-memory region. Lives at a fixed address on hardware; in
/// tests and in the simulator it is simply a leaked allocation both
/// dispatcher threads reference.
pub struct SharedState {
    pub status: StatusCell,
    pub boot: BootCell,
    /// Doorbell line the network core rings to wake the trusted core.
    pub to_trusted: DoorbellLine,
    /// Doorbell line the trusted core rings to wake the network core.
    pub to_network: DoorbellLine,
    pub service: ServiceSlot,
    pub ota: SpinLock<OtaSlot>,
    pub log: SpinLock<RecordSlot<MAX_LOG_DATA>>,
    pub message: SpinLock<RecordSlot<MAX_MESSAGE_DATA>>,
    /// Radio PDU awaiting the running application.
    pub rx_pdu: SpinLock<RecordSlot<MAX_APP_PDU>>,
    /// Frame staged by the trusted side for transmission.
    pub tx_pdu: SpinLock<RecordSlot<MAX_APP_PDU>>,
    pub rendezvous: SpinLock<RendezvousTarget>,
    /// Entropy byte produced by the network core's peripheral.
    pub random: AtomicU8,
}

impl SharedState {
    pub const fn new() -> Self {
        Self {
            status: StatusCell::new(ApplicationStatus::Ready),
            boot: BootCell::new(),
            to_trusted: DoorbellLine::new(),
            to_network: DoorbellLine::new(),
            service: ServiceSlot::new(),
            ota: SpinLock::new(OtaSlot::new()),
            log: SpinLock::new(RecordSlot::new()),
            message: SpinLock::new(RecordSlot::new()),
            rx_pdu: SpinLock::new(RecordSlot::new()),
            tx_pdu: SpinLock::new(RecordSlot::new()),
            rendezvous: SpinLock::new(RendezvousTarget { x: 0, y: 0, z: 0 }),
            random: AtomicU8::new(0),
        }
    }
}

impl Default for SharedState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::boxed::Box;
    use std::thread;
    use std::vec::Vec;

    #[test]
    fn doorbell_drains_all_pending() {
        let line = DoorbellLine::new();
        assert!(line.take().is_empty());
        line.ring(Channel::OtaStart);
        line.ring(Channel::OtaChunk);
        let events = line.take();
        assert!(events.contains(Channel::OtaStart));
        assert!(events.contains(Channel::OtaChunk));
        assert!(!events.contains(Channel::AppStart));
        assert!(line.take().is_empty());
    }

    #[test]
    fn spinlock_times_out_instead_of_starving() {
        let lock = SpinLock::new(0u32);
        let guard = lock.try_lock().unwrap();
        assert!(lock.try_lock().is_none());
        assert_eq!(lock.lock().err(), Some(IpcError::LockTimeout));
        drop(guard);
        *lock.lock().unwrap() = 7;
        assert_eq!(*lock.lock().unwrap(), 7);
    }

    #[test]
    fn service_call_rejected_before_peer_ready() {
        let shared = SharedState::new();
        assert_eq!(
            shared
                .service
                .call(ServiceRequest::TransmitFrame, &shared.to_network),
            Err(IpcError::PeerNotReady)
        );
    }

    #[test]
    fn second_call_before_ack_is_busy() {
        let shared = SharedState::new();
        shared.service.set_ready();
        // No callee: the first call times out and leaves the slot occupied.
        assert_eq!(
            shared
                .service
                .call(ServiceRequest::ReadRandomByte, &shared.to_network),
            Err(IpcError::AckTimeout)
        );
        assert_eq!(
            shared
                .service
                .call(ServiceRequest::ReadRandomByte, &shared.to_network),
            Err(IpcError::Busy)
        );
    }

    #[test]
    fn service_call_roundtrip_across_threads() {
        let shared: &'static SharedState = Box::leak(Box::new(SharedState::new()));
        shared.service.set_ready();
        shared.tx_pdu.lock().unwrap().set(&[1, 2, 3, 4]);

        let callee = thread::spawn(move || {
            let mut seen = Vec::new();
            loop {
                let events = shared.to_network.take();
                if events.contains(Channel::Service) {
                    match shared.service.begin() {
                        Some(ServiceRequest::TransmitFrame) => {
                            seen.extend_from_slice(shared.tx_pdu.lock().unwrap().bytes());
                            shared.service.complete();
                            return seen;
                        }
                        _ => shared.service.complete(),
                    }
                }
                thread::yield_now();
            }
        });

        shared
            .service
            .call(ServiceRequest::TransmitFrame, &shared.to_network)
            .unwrap();
        // The ack implies the callee observed the staged bytes.
        assert_eq!(callee.join().unwrap(), std::vec![1, 2, 3, 4]);
        // The slot is free again.
        shared
            .service
            .call(ServiceRequest::ReadRandomByte, &shared.to_network)
            .unwrap_err(); // times out: the callee thread is gone
    }
}

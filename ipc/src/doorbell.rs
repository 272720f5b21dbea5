// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

use core::sync::atomic::{AtomicU32, Ordering};

/// Cross-core signalling channels. One bit per channel on a doorbell line;
/// a doorbell wakes the peer but carries no data itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Channel {
    /// A service call is pending in the service slot (trusted to network).
    Service = 0,
    /// An application PDU arrived over the radio (network to application).
    RadioRx = 1,
    /// Boot the application image.
    AppStart = 2,
    /// Stop the application, return to management mode.
    AppStop = 3,
    /// Begin the return-to-rendezvous sequence.
    AppReset = 4,
    /// New OTA session: erase the image region.
    OtaStart = 5,
    /// A chunk is staged in the OTA slot.
    OtaChunk = 6,
    /// Erase finished; result in the OTA slot.
    OtaStartDone = 7,
    /// Chunk programmed; result in the OTA slot.
    OtaChunkDone = 8,
    /// The rendezvous return completed.
    ResetDone = 9,
    /// A log record is staged in the log slot.
    LogEvent = 10,
    /// An application message is staged in the message slot.
    AppMessage = 11,
    /// The trusted side completed a boot; outcome in the boot cell.
    BootNotice = 12,
}

/// Pending channel bits drained from a doorbell line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventSet(u32);

impl EventSet {
    pub const EMPTY: EventSet = EventSet(0);

    pub fn contains(&self, channel: Channel) -> bool {
        self.0 & (1 << channel as u32) != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

/// One direction of the doorbell peripheral: senders set channel bits,
/// the receiving dispatcher drains them all at the top of its loop.
/// Interrupt handlers only ever set bits here.
pub struct DoorbellLine {
    pending: AtomicU32,
}

impl DoorbellLine {
    pub const fn new() -> Self {
        Self {
            pending: AtomicU32::new(0),
        }
    }

    /// Signal the peer. Writes made before the ring are visible to the
    /// peer once it observes the channel bit.
    pub fn ring(&self, channel: Channel) {
        self.pending.fetch_or(1 << channel as u32, Ordering::Release);
    }

    /// Drain every pending channel bit.
    pub fn take(&self) -> EventSet {
        EventSet(self.pending.swap(0, Ordering::Acquire))
    }

    /// True if no channel is pending.
    pub fn is_idle(&self) -> bool {
        self.pending.load(Ordering::Relaxed) == 0
    }
}

impl Default for DoorbellLine {
    fn default() -> Self {
        Self::new()
    }
}

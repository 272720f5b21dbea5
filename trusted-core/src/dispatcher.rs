// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

//! The trusted context's main loop: the only code that touches flash, the
//! watchdogs and the reset controller. It wakes on doorbell bits from the
//! network core, performs the privileged action, posts the result back into
//! the mailbox and rings the matching completion channel.

use embedded_storage::nor_flash::NorFlash;

use consts::{IMAGE_BASE_ADDRESS, IMAGE_MAX_SIZE, OTA_CHUNK_SIZE};
use ipc::{BootNotice, Channel, IpcError, ServiceRequest, SharedState};
use radio_protocol::{ApplicationStatus, RendezvousTarget};

use crate::boot::{boot_mode, BootMode};
use crate::flash::Programmer;
use crate::syscall::{SystemCall, SystemCallReturn, SystemCalls};
use crate::watchdog::{Watchdog, WatchdogSupervisor};

/// Reset-reason register and system-reset trigger.
pub trait ResetControl {
    /// Read and clear the latched reset reason.
    fn reset_reason(&mut self) -> crate::boot::ResetReason;
    /// Request a full device reset.
    fn system_reset(&mut self);
}

/// Motion-control collaborator driving the robot back to its rendezvous
/// position during a reset sequence.
pub trait MotionControl {
    fn begin_return(&mut self, target: RendezvousTarget);
    /// True once the robot reached the target.
    fn poll_complete(&mut self) -> bool;
}

/// One-shot, idempotent setup of the memory-region and peripheral trust
/// attributes. Runs before anything else at boot.
pub trait PartitionConfig {
    fn apply(&mut self);
}

pub struct TrustedDispatcher<'a, F, S, A, R, M>
where
    F: NorFlash,
    S: Watchdog,
    A: Watchdog,
    R: ResetControl,
    M: MotionControl,
{
    shared: &'a SharedState,
    programmer: Programmer<F>,
    watchdogs: WatchdogSupervisor<S, A>,
    reset: R,
    motion: M,
    device_id: u64,
    returning: bool,
}

impl<'a, F, S, A, R, M> TrustedDispatcher<'a, F, S, A, R, M>
where
    F: NorFlash,
    S: Watchdog,
    A: Watchdog,
    R: ResetControl,
    M: MotionControl,
{
    pub fn new(
        shared: &'a SharedState,
        flash: F,
        watchdogs: WatchdogSupervisor<S, A>,
        reset: R,
        motion: M,
        device_id: u64,
    ) -> Self {
        Self {
            shared,
            programmer: Programmer::new(flash, IMAGE_BASE_ADDRESS),
            watchdogs,
            reset,
            motion,
            device_id,
            returning: false,
        }
    }

    pub fn programmer(&self) -> &Programmer<F> {
        &self.programmer
    }

    /// Boot-time entry point. Applies the partition configuration, then
    /// decides between management mode and the application image. The
    /// decision is validated here, immediately before any jump: a watchdog
    /// reset reason or an interrupted transfer keeps the device in
    /// management mode.
    pub fn boot(&mut self, partitions: &mut impl PartitionConfig) -> BootMode {
        let reason = self.reset.reset_reason();
        partitions.apply();

        let status = self.shared.status.load();
        let mode = boot_mode(reason, status);
        match mode {
            BootMode::Manage => {
                let notice = if reason.contains(crate::boot::ResetReason::WATCHDOG_SUPERVISOR) {
                    BootNotice::ManagementAfterStop
                } else if reason.contains(crate::boot::ResetReason::WATCHDOG_APP) {
                    BootNotice::ManagementAfterFault
                } else {
                    BootNotice::None
                };
                info!("management mode (reason {:x})", reason.bits());
                self.shared.status.store(ApplicationStatus::Ready);
                self.shared.boot.store(notice);
                if notice != BootNotice::None {
                    self.shared.to_network.ring(Channel::BootNotice);
                }
                self.watchdogs.start_supervisor();
            }
            BootMode::RunApplication => {
                info!("booting application image");
                self.shared.status.store(ApplicationStatus::Running);
                self.shared.boot.store(BootNotice::ApplicationBooted);
                self.watchdogs.arm_application();
            }
        }
        mode
    }

    /// True once a stop has latched; the caller should stop iterating and
    /// let the supervisor watchdog complete the reset.
    pub fn stopping(&self) -> bool {
        self.watchdogs.is_halted()
    }

    /// One management-loop iteration: reload the supervisor watchdog, then
    /// drain every pending doorbell bit.
    pub fn poll(&mut self) {
        self.watchdogs.kick();

        let events = self.shared.to_trusted.take();
        if events.contains(Channel::OtaStart) {
            self.ota_start();
        }
        if events.contains(Channel::OtaChunk) {
            self.ota_chunk();
        }
        if events.contains(Channel::AppReset) {
            self.app_reset();
        }
        if events.contains(Channel::AppStop) {
            self.app_stop();
        }
        if events.contains(Channel::AppStart) {
            self.app_start();
        }
        if self.returning && self.motion.poll_complete() {
            self.returning = false;
            self.shared.to_network.ring(Channel::ResetDone);
        }
    }

    fn ota_start(&mut self) {
        let image_size = match self.shared.ota.lock() {
            Ok(slot) => slot.image_size,
            Err(_) => return,
        };
        let ok = image_size <= IMAGE_MAX_SIZE && self.programmer.erase_image(image_size).is_ok();
        if !ok {
            warn!("image erase failed ({} bytes)", image_size);
        }
        if let Ok(mut slot) = self.shared.ota.lock() {
            slot.flash_ok = ok;
        }
        self.shared.to_network.ring(Channel::OtaStartDone);
    }

    fn ota_chunk(&mut self) {
        let mut chunk = [0u8; OTA_CHUNK_SIZE];
        let (index, len) = match self.shared.ota.lock() {
            Ok(slot) => {
                let len = slot.chunk_size as usize;
                chunk[..len].copy_from_slice(slot.chunk_bytes());
                (slot.chunk_index, len)
            }
            Err(_) => return,
        };
        let ok = self.programmer.write_chunk(index, &chunk[..len]).is_ok();
        if !ok {
            warn!("chunk {} write failed", index);
        }
        if let Ok(mut slot) = self.shared.ota.lock() {
            slot.flash_ok = ok;
        }
        self.shared.to_network.ring(Channel::OtaChunkDone);
    }

    fn app_start(&mut self) {
        // Belt over the network-side gate: never reset into the
        // application while a transfer is in flight.
        if self.shared.status.load() == ApplicationStatus::Programming {
            return;
        }
        info!("start requested, resetting into application");
        self.reset.system_reset();
    }

    fn app_stop(&mut self) {
        // Cease reloading the supervisor timer; its expiry resets the
        // device and the next boot reads it as an intentional stop.
        info!("stop requested, letting supervisor watchdog fire");
        self.watchdogs.halt();
        self.watchdogs.disarm_application();
        self.returning = false;
    }

    fn app_reset(&mut self) {
        let target = match self.shared.rendezvous.lock() {
            Ok(slot) => *slot,
            Err(_) => return,
        };
        info!("returning to rendezvous ({}, {}, {})", target.x, target.y, target.z);
        self.motion.begin_return(target);
        self.returning = true;
    }
}

impl<F, S, A, R, M> SystemCalls for TrustedDispatcher<'_, F, S, A, R, M>
where
    F: NorFlash,
    S: Watchdog,
    A: Watchdog,
    R: ResetControl,
    M: MotionControl,
{
    fn system_call(&mut self, call: SystemCall<'_>) -> Result<SystemCallReturn, IpcError> {
        match call {
            SystemCall::SendPacket(payload) => {
                self.shared.tx_pdu.lock()?.set(payload);
                self.shared
                    .service
                    .call(ServiceRequest::TransmitFrame, &self.shared.to_network)?;
                Ok(SystemCallReturn::Done)
            }
            SystemCall::SendMessage(payload) => {
                self.shared.message.lock()?.set(payload);
                self.shared.to_network.ring(Channel::AppMessage);
                Ok(SystemCallReturn::Done)
            }
            SystemCall::RandomByte => {
                self.shared
                    .service
                    .call(ServiceRequest::ReadRandomByte, &self.shared.to_network)?;
                Ok(SystemCallReturn::Byte(
                    self.shared.random.load(core::sync::atomic::Ordering::Acquire),
                ))
            }
            SystemCall::DeviceId => Ok(SystemCallReturn::DeviceId(self.device_id)),
            SystemCall::Log(record) => {
                self.shared.log.lock()?.set(record);
                self.shared.to_network.ring(Channel::LogEvent);
                Ok(SystemCallReturn::Done)
            }
            SystemCall::ReloadWatchdog => {
                self.watchdogs.reload_application();
                Ok(SystemCallReturn::Done)
            }
        }
    }
}

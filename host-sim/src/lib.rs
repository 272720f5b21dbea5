// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Whole-device simulation on host threads.
//!
//! One thread runs the trusted dispatcher (plus the simulated application
//! when it is booted), one thread runs the network dispatcher; they share a
//! leaked mailbox exactly as the two cores share SRAM. The radio is a pair
//! of in-process channels, flash is the in-memory NOR double, and the
//! watchdog/reset hardware is reduced to its observable contract: who armed
//! what, and which reset reason the next boot sees.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use consts::OTA_CHUNK_SIZE;
use ipc::{Channel, SharedState};
use network_core::{Clock, Entropy, Transport, UntrustedDispatcher};
use radio_protocol::{
    decode, encode_request, Notification, OtaChunk, OtaImageInfo, Packet, Request,
};
use sha2::{Digest, Sha256};
use trusted_core::mem_flash::MemFlash;
use trusted_core::{
    BootMode, MotionControl, PartitionConfig, ResetControl, ResetReason, SystemCall, SystemCalls,
    TrustedDispatcher, Watchdog, WatchdogSupervisor,
};

/// Simulated flash part: management partition plus the full image region.
pub const SIM_FLASH_SIZE: usize = 0x40000;

/// How the simulated application firmware behaves once booted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppBehavior {
    /// Reloads its watchdog every iteration until stopped.
    WellBehaved,
    /// Stops reloading its watchdog after `after` iterations.
    Hang { after: u32 },
}

struct SimTransport(Sender<Vec<u8>>);

impl Transport for SimTransport {
    fn transmit(&mut self, frame: &[u8]) {
        // A dropped receiver means the gateway went away; the radio does
        // not care.
        let _ = self.0.send(frame.to_vec());
    }
}

struct SimClock(Instant);

impl Clock for SimClock {
    fn timestamp(&self) -> u32 {
        self.0.elapsed().as_micros() as u32
    }
}

struct SimEntropy(u32);

impl Entropy for SimEntropy {
    fn random_byte(&mut self) -> u8 {
        // xorshift32; entropy quality is irrelevant here.
        self.0 ^= self.0 << 13;
        self.0 ^= self.0 >> 17;
        self.0 ^= self.0 << 5;
        self.0 as u8
    }
}

#[derive(Clone, Default)]
struct SimWatchdog {
    armed: Arc<AtomicBool>,
    reloads: Arc<AtomicU64>,
}

impl Watchdog for SimWatchdog {
    fn start(&mut self, _period_ms: u32) {
        self.armed.store(true, Ordering::Relaxed);
    }

    fn reload(&mut self) {
        self.reloads.fetch_add(1, Ordering::Relaxed);
    }

    fn stop(&mut self) {
        self.armed.store(false, Ordering::Relaxed);
    }
}

struct SimReset {
    /// Reason the next boot will read.
    next_reason: Arc<AtomicU32>,
    reset_requested: Arc<AtomicBool>,
}

impl ResetControl for SimReset {
    fn reset_reason(&mut self) -> ResetReason {
        ResetReason::from_bits_truncate(self.next_reason.swap(0, Ordering::AcqRel))
    }

    fn system_reset(&mut self) {
        self.reset_requested.store(true, Ordering::Release);
    }
}

/// Rendezvous return that completes after a few management-loop polls.
struct SimMotion {
    remaining: u32,
}

impl MotionControl for SimMotion {
    fn begin_return(&mut self, _target: radio_protocol::RendezvousTarget) {
        self.remaining = 20;
    }

    fn poll_complete(&mut self) -> bool {
        if self.remaining > 0 {
            self.remaining -= 1;
            false
        } else {
            true
        }
    }
}

#[derive(Default)]
struct SimPartitions;

impl PartitionConfig for SimPartitions {
    fn apply(&mut self) {
        // Idempotent by contract; nothing to configure on the host.
    }
}

/// Counters exposed for assertions after shutdown.
pub struct DeviceReport {
    /// Full flash content at power-off.
    pub flash: Vec<u8>,
    pub supervisor_reloads: u64,
    pub app_wdt_reloads: u64,
    pub app_wdt_armed: bool,
}

pub struct Device {
    pub device_id: u64,
    shutdown: Arc<AtomicBool>,
    to_device: Sender<Vec<u8>>,
    from_device: Receiver<Vec<u8>>,
    net_thread: Option<JoinHandle<()>>,
    trusted_thread: Option<JoinHandle<Vec<u8>>>,
    supervisor_reloads: Arc<AtomicU64>,
    app_wdt_reloads: Arc<AtomicU64>,
    app_wdt_armed: Arc<AtomicBool>,
}

impl Device {
    /// Power the device on. Like the real part, a clean power-on boots
    /// straight into the application image; send a stop request to bring it
    /// into management mode.
    pub fn spawn(device_id: u64, app: AppBehavior) -> Device {
        let shared: &'static SharedState = Box::leak(Box::new(SharedState::new()));
        let shutdown = Arc::new(AtomicBool::new(false));
        let (to_device, device_rx) = mpsc::channel::<Vec<u8>>();
        let (device_tx, from_device) = mpsc::channel::<Vec<u8>>();

        let supervisor = SimWatchdog::default();
        let app_wdt = SimWatchdog::default();
        let supervisor_reloads = supervisor.reloads.clone();
        let app_wdt_reloads = app_wdt.reloads.clone();
        let app_wdt_armed = app_wdt.armed.clone();

        let net_shutdown = shutdown.clone();
        let net_thread = thread::spawn(move || {
            let mut dispatcher = UntrustedDispatcher::new(
                shared,
                SimTransport(device_tx),
                SimClock(Instant::now()),
                SimEntropy(0x1234_5678),
                device_id,
            );
            while !net_shutdown.load(Ordering::Relaxed) {
                while let Ok(frame) = device_rx.try_recv() {
                    dispatcher.handle_frame(&frame);
                }
                dispatcher.poll();
                thread::yield_now();
            }
        });

        let trusted_shutdown = shutdown.clone();
        let trusted_thread = thread::spawn(move || {
            let next_reason = Arc::new(AtomicU32::new(ResetReason::POWER_ON.bits()));
            let reset_requested = Arc::new(AtomicBool::new(false));
            let mut flash: MemFlash<SIM_FLASH_SIZE> = MemFlash::new();
            // A previous image occupies the region; transfers must erase it.
            flash.fill_junk();

            let mut partitions = SimPartitions::default();
            let mut dispatcher = TrustedDispatcher::new(
                shared,
                flash,
                WatchdogSupervisor::new(supervisor, app_wdt),
                SimReset {
                    next_reason: next_reason.clone(),
                    reset_requested: reset_requested.clone(),
                },
                SimMotion { remaining: 0 },
                device_id,
            );

            while !trusted_shutdown.load(Ordering::Relaxed) {
                let reason = match dispatcher.boot(&mut partitions) {
                    BootMode::Manage => loop {
                        if trusted_shutdown.load(Ordering::Relaxed) {
                            return dispatcher.programmer().flash().mem.to_vec();
                        }
                        dispatcher.poll();
                        if dispatcher.stopping() {
                            // Nothing reloads the supervisor timer any
                            // more; it fires and resets the device.
                            break ResetReason::WATCHDOG_SUPERVISOR;
                        }
                        if reset_requested.swap(false, Ordering::AcqRel) {
                            break ResetReason::SOFT_RESET;
                        }
                        thread::yield_now();
                    },
                    BootMode::RunApplication => {
                        run_application(shared, &mut dispatcher, app, &trusted_shutdown)
                    }
                };
                next_reason.store(reason.bits(), Ordering::Release);
            }
            dispatcher.programmer().flash().mem.to_vec()
        });

        Device {
            device_id,
            shutdown,
            to_device,
            from_device,
            net_thread: Some(net_thread),
            trusted_thread: Some(trusted_thread),
            supervisor_reloads,
            app_wdt_reloads,
            app_wdt_armed,
        }
    }

    pub fn send_frame(&self, frame: &[u8]) {
        let _ = self.to_device.send(frame.to_vec());
    }

    pub fn send_request(&self, request: &Request) {
        let frame = encode_request(self.device_id, consts::GATEWAY_ADDRESS, request);
        self.send_frame(&frame);
    }

    /// Next notification matching `pred`, skipping everything else.
    pub fn wait_for<F>(&self, timeout: Duration, pred: F) -> Option<Notification>
    where
        F: Fn(&Notification) -> bool,
    {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.checked_duration_since(Instant::now())?;
            let frame = self.from_device.recv_timeout(remaining).ok()?;
            if let Ok((_, Packet::Notification(notification))) = decode(&frame) {
                if pred(&notification) {
                    return Some(notification);
                }
            }
        }
    }

    /// Poll the device status word.
    pub fn query_status(&self, timeout: Duration) -> Option<radio_protocol::ApplicationStatus> {
        self.send_request(&Request::Status {
            target: self.device_id,
        });
        match self.wait_for(timeout, |n| matches!(n, Notification::Status { .. }))? {
            Notification::Status { status, .. } => Some(status),
            _ => unreachable!(),
        }
    }

    /// Keep polling until the status word reads `want`.
    pub fn await_status(
        &self,
        want: radio_protocol::ApplicationStatus,
        timeout: Duration,
    ) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if self.query_status(Duration::from_millis(200)) == Some(want) {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        false
    }

    /// Stop the running application and wait for the device to come back in
    /// management mode.
    pub fn stop_application(&self, timeout: Duration) -> bool {
        self.send_request(&Request::Stop {
            target: self.device_id,
        });
        self.wait_for(timeout, |n| matches!(n, Notification::Stopped { .. }))
            .is_some()
    }

    /// Boot the application image.
    pub fn start_application(&self, timeout: Duration) -> bool {
        self.send_request(&Request::Start {
            target: self.device_id,
        });
        self.wait_for(timeout, |n| matches!(n, Notification::Started { .. }))
            .is_some()
    }

    /// Run one complete OTA session. Returns the final hash verdict, or
    /// `None` if an ack never arrived.
    pub fn update_firmware(&self, image: &[u8], timeout: Duration) -> Option<bool> {
        self.update_firmware_with_hash(image, Sha256::digest(image).into(), timeout)
    }

    pub fn update_firmware_with_hash(
        &self,
        image: &[u8],
        expected_hash: [u8; 32],
        timeout: Duration,
    ) -> Option<bool> {
        let chunk_count = (image.len() as u32).div_ceil(OTA_CHUNK_SIZE as u32);
        self.send_request(&Request::OtaStart {
            target: self.device_id,
            image: OtaImageInfo {
                image_size: image.len() as u32,
                chunk_count,
                expected_hash,
            },
        });
        self.wait_for(timeout, |n| matches!(n, Notification::OtaStartAck { .. }))?;
        log::info!("transfer opened, sending {chunk_count} chunks");

        let mut verdict = false;
        for (index, data) in image.chunks(OTA_CHUNK_SIZE).enumerate() {
            let index = index as u32;
            let mut chunk = heapless::Vec::new();
            chunk.extend_from_slice(data).unwrap();
            self.send_request(&Request::OtaChunk {
                target: self.device_id,
                chunk: OtaChunk { index, data: chunk },
            });
            match self.wait_for(
                timeout,
                |n| matches!(n, Notification::OtaChunkAck { index: i, .. } if *i == index),
            )? {
                Notification::OtaChunkAck { hashes_match, .. } => verdict = hashes_match,
                _ => unreachable!(),
            }
        }
        Some(verdict)
    }

    /// Power off and collect the post-mortem.
    pub fn shutdown(mut self) -> DeviceReport {
        self.shutdown.store(true, Ordering::Relaxed);
        let flash = self
            .trusted_thread
            .take()
            .map(|t| t.join().expect("trusted thread panicked"))
            .unwrap_or_default();
        if let Some(t) = self.net_thread.take() {
            t.join().expect("network thread panicked");
        }
        DeviceReport {
            flash,
            supervisor_reloads: self.supervisor_reloads.load(Ordering::Relaxed),
            app_wdt_reloads: self.app_wdt_reloads.load(Ordering::Relaxed),
            app_wdt_armed: self.app_wdt_armed.load(Ordering::Relaxed),
        }
    }
}

/// The simulated application core firmware, sharing the trusted thread the
/// way the real image replaces the management loop after the jump. It only
/// reaches the system through the capability handle.
fn run_application(
    shared: &SharedState,
    syscalls: &mut dyn SystemCalls,
    behavior: AppBehavior,
    shutdown: &AtomicBool,
) -> ResetReason {
    let _ = syscalls.system_call(SystemCall::Log(b"application up"));
    let mut iterations: u32 = 0;
    loop {
        if shutdown.load(Ordering::Relaxed) {
            // Power-off while running; reason is irrelevant.
            return ResetReason::POWER_ON;
        }
        let events = shared.to_trusted.take();
        if events.contains(Channel::AppStop) {
            // The stop doorbell is wired straight to the supervisor
            // timer's start trigger; nothing reloads it while the
            // application runs, so it fires.
            return ResetReason::WATCHDOG_SUPERVISOR;
        }
        if events.contains(Channel::RadioRx) {
            // Echo application traffic back out.
            let pdu: Option<Vec<u8>> = shared
                .rx_pdu
                .lock()
                .ok()
                .map(|slot| slot.bytes().to_vec());
            if let Some(pdu) = pdu {
                let _ = syscalls.system_call(SystemCall::SendPacket(&pdu));
            }
        }
        match behavior {
            AppBehavior::WellBehaved => {
                let _ = syscalls.system_call(SystemCall::ReloadWatchdog);
            }
            AppBehavior::Hang { after } => {
                if iterations >= after {
                    // The reload stops coming; the application watchdog
                    // expires and resets the device.
                    return ResetReason::WATCHDOG_APP;
                }
                let _ = syscalls.system_call(SystemCall::ReloadWatchdog);
            }
        }
        iterations = iterations.wrapping_add(1);
        thread::yield_now();
    }
}

/// Deterministic pseudo-firmware for transfers.
pub fn test_image(len: usize) -> Vec<u8> {
    (0..len).map(|i| ((i * 31) ^ (i >> 3)) as u8).collect()
}

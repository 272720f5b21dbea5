// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

//! The network context's main loop.
//!
//! Everything the radio delivers lands here first: frames are decoded,
//! checked against this device's identity, gated by the lifecycle status
//! word and only then turned into mailbox work for the trusted core. The
//! reverse path formats completion results, log records and application
//! messages into notifications for the gateway.

use consts::{BROADCAST_ADDRESS, GATEWAY_ADDRESS, IMAGE_MAX_SIZE, MAX_APP_PDU, OTA_CHUNK_SIZE};
use core::sync::atomic::Ordering;
use heapless::Vec;
use ipc::{BootNotice, Channel, ServiceRequest, SharedState};
use radio_protocol::{
    decode, encode_application, encode_notification, ApplicationStatus, GpioEvent, Notification,
    OtaChunk, OtaImageInfo, Packet, Request,
};

use crate::session::{ChunkDisposition, OtaSession};

/// Radio transmit path. Receive is push-based: the platform calls
/// [`UntrustedDispatcher::handle_frame`] for every frame the radio delivers.
pub trait Transport {
    fn transmit(&mut self, frame: &[u8]);
}

/// Monotonic event timestamp source, in microseconds.
pub trait Clock {
    fn timestamp(&self) -> u32;
}

/// The entropy peripheral, owned by this core.
pub trait Entropy {
    fn random_byte(&mut self) -> u8;
}

pub struct UntrustedDispatcher<'a, T: Transport, C: Clock, E: Entropy> {
    shared: &'a SharedState,
    transport: T,
    clock: C,
    entropy: E,
    device_id: u64,
    session: OtaSession,
    /// Chunk index staged for the trusted side, awaiting `OtaChunkDone`.
    pending_chunk: Option<(u32, bool)>,
}

impl<'a, T: Transport, C: Clock, E: Entropy> UntrustedDispatcher<'a, T, C, E> {
    pub fn new(shared: &'a SharedState, transport: T, clock: C, entropy: E, device_id: u64) -> Self {
        // Service calls from the trusted side may begin once we run.
        shared.service.set_ready();
        Self {
            shared,
            transport,
            clock,
            entropy,
            device_id,
            session: OtaSession::new(),
            pending_chunk: None,
        }
    }

    /// Entry point for every frame the radio delivers.
    pub fn handle_frame(&mut self, frame: &[u8]) {
        // Malformed frames are dropped without a response.
        let Ok((header, packet)) = decode(frame) else {
            return;
        };
        if header.dst != self.device_id && header.dst != BROADCAST_ADDRESS {
            return;
        }
        match packet {
            Packet::Application(pdu) => self.forward_pdu(&pdu),
            Packet::Request(request) => self.handle_request(request),
            // Devices do not consume notifications.
            Packet::Notification(_) => {}
        }
    }

    /// One loop iteration: drain completion doorbells from the trusted side.
    pub fn poll(&mut self) {
        let events = self.shared.to_network.take();
        if events.is_empty() {
            return;
        }
        if events.contains(Channel::Service) {
            self.service();
        }
        if events.contains(Channel::OtaStartDone) {
            self.ota_start_done();
        }
        if events.contains(Channel::OtaChunkDone) {
            self.ota_chunk_done();
        }
        if events.contains(Channel::ResetDone) {
            self.shared.status.store(ApplicationStatus::Ready);
        }
        if events.contains(Channel::LogEvent) {
            self.relay_log();
        }
        if events.contains(Channel::AppMessage) {
            self.relay_message();
        }
        if events.contains(Channel::BootNotice) {
            self.boot_notice();
        }
    }

    /// Report a monitored GPIO edge to the gateway.
    pub fn report_gpio(&mut self, event: GpioEvent) {
        let timestamp = self.clock.timestamp();
        self.notify(&Notification::Gpio {
            device_id: self.device_id,
            timestamp,
            event,
        });
    }

    fn notify(&mut self, notification: &Notification) {
        let frame = encode_notification(GATEWAY_ADDRESS, self.device_id, notification);
        self.transport.transmit(&frame);
    }

    fn forward_pdu(&mut self, pdu: &[u8]) {
        if self.shared.status.load() != ApplicationStatus::Running {
            return;
        }
        if let Ok(mut slot) = self.shared.rx_pdu.lock() {
            slot.set(pdu);
            self.shared.to_trusted.ring(Channel::RadioRx);
        }
    }

    fn handle_request(&mut self, request: Request) {
        let target = request.target();
        if target != self.device_id && target != BROADCAST_ADDRESS {
            // Not for this device; no response of any kind.
            return;
        }
        let status = self.shared.status.load();
        match request {
            Request::Status { .. } => {
                let device_id = self.device_id;
                self.notify(&Notification::Status { device_id, status });
            }
            Request::Start { .. } => {
                if status != ApplicationStatus::Ready {
                    return;
                }
                info!("start request accepted");
                self.shared.to_trusted.ring(Channel::AppStart);
                let device_id = self.device_id;
                self.notify(&Notification::Started { device_id });
            }
            Request::Stop { .. } => {
                if !matches!(
                    status,
                    ApplicationStatus::Running | ApplicationStatus::Resetting
                ) {
                    return;
                }
                info!("stop request accepted");
                self.shared.status.store(ApplicationStatus::Stopping);
                self.shared.to_trusted.ring(Channel::AppStop);
            }
            Request::Reset { rendezvous, .. } => {
                if status != ApplicationStatus::Ready {
                    return;
                }
                let Ok(mut slot) = self.shared.rendezvous.lock() else {
                    return;
                };
                *slot = rendezvous;
                drop(slot);
                info!("reset request accepted");
                self.shared.status.store(ApplicationStatus::Resetting);
                self.shared.to_trusted.ring(Channel::AppReset);
            }
            Request::OtaStart { image, .. } => self.ota_start(status, &image),
            Request::OtaChunk { chunk, .. } => self.ota_chunk(status, &chunk),
        }
    }

    fn ota_start(&mut self, status: ApplicationStatus, image: &OtaImageInfo) {
        if status != ApplicationStatus::Ready {
            return;
        }
        if !image_info_valid(image) {
            warn!("rejecting transfer with inconsistent sizes");
            return;
        }
        let Ok(mut slot) = self.shared.ota.lock() else {
            return;
        };
        slot.reset_session(image.image_size, image.chunk_count);
        drop(slot);
        self.session.begin(image);
        self.pending_chunk = None;
        info!(
            "transfer opened ({} bytes, {} chunks)",
            image.image_size, image.chunk_count
        );
        self.shared.status.store(ApplicationStatus::Programming);
        self.shared.to_trusted.ring(Channel::OtaStart);
        // The ack goes out once the trusted side reports the erase done.
    }

    fn ota_chunk(&mut self, status: ApplicationStatus, chunk: &OtaChunk) {
        if status != ApplicationStatus::Programming {
            return;
        }
        match self.session.classify(chunk.index) {
            ChunkDisposition::Ignore => {}
            ChunkDisposition::Retransmit => {
                // Already programmed; its ack was lost. Do not touch flash
                // or the hash, just answer again.
                let device_id = self.device_id;
                let hashes_match = self.session.hashes_match();
                self.notify(&Notification::OtaChunkAck {
                    device_id,
                    index: chunk.index,
                    hashes_match,
                });
            }
            ChunkDisposition::Accept => {
                if self.pending_chunk.is_some() {
                    // The previous chunk is still in flight to flash.
                    return;
                }
                let Ok(mut slot) = self.shared.ota.lock() else {
                    return;
                };
                slot.chunk_index = chunk.index;
                slot.chunk_size = chunk.data.len() as u8;
                slot.chunk[..chunk.data.len()].copy_from_slice(&chunk.data);
                drop(slot);

                let finalized = self.session.accept(chunk.index, &chunk.data);
                if finalized {
                    if let Ok(mut slot) = self.shared.ota.lock() {
                        slot.hashes_match = self.session.hashes_match();
                    }
                }
                self.pending_chunk = Some((chunk.index, finalized));
                self.shared.to_trusted.ring(Channel::OtaChunk);
            }
        }
    }

    fn ota_start_done(&mut self) {
        let flash_ok = match self.shared.ota.lock() {
            Ok(slot) => slot.flash_ok,
            Err(_) => return,
        };
        if flash_ok {
            let device_id = self.device_id;
            self.notify(&Notification::OtaStartAck { device_id });
        } else {
            warn!("erase failed, aborting transfer");
            self.abort_session();
        }
    }

    fn ota_chunk_done(&mut self) {
        let Some((index, finalized)) = self.pending_chunk.take() else {
            return;
        };
        let flash_ok = match self.shared.ota.lock() {
            Ok(mut slot) => {
                if slot.flash_ok {
                    slot.last_chunk_acked = index as i32;
                }
                slot.flash_ok
            }
            Err(_) => return,
        };
        if !flash_ok {
            warn!("chunk {} write failed, aborting transfer", index);
            self.abort_session();
            return;
        }
        let device_id = self.device_id;
        let hashes_match = self.session.hashes_match();
        self.notify(&Notification::OtaChunkAck {
            device_id,
            index,
            hashes_match,
        });
        if finalized {
            info!("transfer complete, hashes match: {}", hashes_match);
            self.shared.status.store(ApplicationStatus::Ready);
        }
    }

    fn abort_session(&mut self) {
        self.session.abort();
        self.pending_chunk = None;
        // A fresh OtaStart is required; the gateway discovers the abort by
        // polling the status word.
        self.shared.status.store(ApplicationStatus::Ready);
    }

    fn service(&mut self) {
        match self.shared.service.begin() {
            Some(ServiceRequest::TransmitFrame) => {
                let mut pdu = [0u8; MAX_APP_PDU];
                let len = match self.shared.tx_pdu.lock() {
                    Ok(slot) => {
                        let bytes = slot.bytes();
                        pdu[..bytes.len()].copy_from_slice(bytes);
                        bytes.len()
                    }
                    Err(_) => 0,
                };
                if let Ok(frame) = encode_application(GATEWAY_ADDRESS, self.device_id, &pdu[..len])
                {
                    self.transport.transmit(&frame);
                }
            }
            Some(ServiceRequest::ReadRandomByte) => {
                let byte = self.entropy.random_byte();
                self.shared.random.store(byte, Ordering::Release);
            }
            None => {}
        }
        self.shared.service.complete();
    }

    fn relay_log(&mut self) {
        let mut data = Vec::new();
        match self.shared.log.lock() {
            Ok(slot) => {
                let _ = data.extend_from_slice(slot.bytes());
            }
            Err(_) => return,
        }
        let device_id = self.device_id;
        let timestamp = self.clock.timestamp();
        self.notify(&Notification::Log {
            device_id,
            timestamp,
            data,
        });
    }

    fn relay_message(&mut self) {
        let mut data = Vec::new();
        match self.shared.message.lock() {
            Ok(slot) => {
                let _ = data.extend_from_slice(slot.bytes());
            }
            Err(_) => return,
        }
        let device_id = self.device_id;
        self.notify(&Notification::Message { device_id, data });
    }

    fn boot_notice(&mut self) {
        let notice = self.shared.boot.load();
        self.shared.boot.store(BootNotice::None);
        match notice {
            BootNotice::ManagementAfterStop => {
                let device_id = self.device_id;
                self.notify(&Notification::Stopped { device_id });
            }
            BootNotice::ManagementAfterFault => {
                warn!("application hung, recovered to management mode");
            }
            _ => {}
        }
    }
}

/// The chunk count must cover the image exactly.
fn image_info_valid(image: &OtaImageInfo) -> bool {
    image.image_size > 0
        && image.image_size <= IMAGE_MAX_SIZE
        && image.chunk_count == image.image_size.div_ceil(OTA_CHUNK_SIZE as u32)
}

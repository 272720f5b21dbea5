// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Gateway to device radio protocol.
//! The gateway is the host and addresses individual devices (or the whole
//! fleet, via the broadcast address) with management requests; devices answer
//! with notifications. Frames are a fixed-layout byte format dictated by the
//! radio infrastructure: `[version][packet_type][dst:8][src:8][opcode][payload]`,
//! all multi-byte fields little-endian.

#![no_std]

use consts::{
    MAX_APP_PDU, MAX_FRAME_SIZE, MAX_LOG_DATA, MAX_MESSAGE_DATA, OTA_CHUNK_SIZE, OTA_HASH_SIZE,
    PROTOCOL_VERSION,
};
use heapless::Vec;

#[cfg(test)]
mod tests;

/// Size of the frame header preceding the opcode byte.
pub const HEADER_SIZE: usize = 18;

/// An encoded frame, ready for the radio.
pub type FrameBuffer = Vec<u8, MAX_FRAME_SIZE>;

/// Errors produced while decoding a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CodecError {
    /// Frame ended before the advertised payload did.
    TooShort,
    /// Unknown packet type, opcode or field discriminant.
    UnknownType,
    /// A length field exceeds what the protocol allows.
    Oversize,
}

/// Class of traffic carried by a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum PacketType {
    /// Application-defined payload, relayed to the running firmware.
    ApplicationData = 0x00,
    /// Management traffic handled by this subsystem.
    Management = 0x10,
}

impl PacketType {
    fn from_u8(raw: u8) -> Result<Self, CodecError> {
        match raw {
            0x00 => Ok(PacketType::ApplicationData),
            0x10 => Ok(PacketType::Management),
            _ => Err(CodecError::UnknownType),
        }
    }
}

/// Fixed-layout prefix of every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ProtocolHeader {
    pub version: u8,
    pub packet_type: PacketType,
    pub dst: u64,
    pub src: u64,
}

impl ProtocolHeader {
    /// Header for a management frame from `src` to `dst`.
    pub fn management(dst: u64, src: u64) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            packet_type: PacketType::Management,
            dst,
            src,
        }
    }

    /// Split a raw frame into its header and payload.
    pub fn parse(frame: &[u8]) -> Result<(Self, &[u8]), CodecError> {
        if frame.len() < HEADER_SIZE {
            return Err(CodecError::TooShort);
        }
        let header = Self {
            version: frame[0],
            packet_type: PacketType::from_u8(frame[1])?,
            dst: u64::from_le_bytes(frame[2..10].try_into().unwrap()),
            src: u64::from_le_bytes(frame[10..18].try_into().unwrap()),
        };
        Ok((header, &frame[HEADER_SIZE..]))
    }

    fn write(&self, out: &mut FrameBuffer) {
        put(out, &[self.version, self.packet_type as u8]);
        put(out, &self.dst.to_le_bytes());
        put(out, &self.src.to_le_bytes());
    }
}

/// Authoritative lifecycle state of the application firmware. Shared between
/// both cores and reported verbatim in status notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum ApplicationStatus {
    Ready = 0,
    Running = 1,
    Stopping = 2,
    Resetting = 3,
    Programming = 4,
}

impl ApplicationStatus {
    pub fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(ApplicationStatus::Ready),
            1 => Some(ApplicationStatus::Running),
            2 => Some(ApplicationStatus::Stopping),
            3 => Some(ApplicationStatus::Resetting),
            4 => Some(ApplicationStatus::Programming),
            _ => None,
        }
    }
}

/// Parameters announcing a new image transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct OtaImageInfo {
    /// Total image size in bytes.
    pub image_size: u32,
    /// Number of chunks the gateway will send.
    pub chunk_count: u32,
    /// SHA-256 over the whole image.
    pub expected_hash: [u8; OTA_HASH_SIZE],
}

/// One fragment of the image being transferred.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct OtaChunk {
    pub index: u32,
    pub data: Vec<u8, OTA_CHUNK_SIZE>,
}

/// Position the robot returns to on a reset request, in the coordinate
/// system of the motion-control collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RendezvousTarget {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

/// A sampled GPIO edge reported to the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct GpioEvent {
    pub port: u8,
    pub pin: u8,
    pub value: u8,
}

/// Management requests, gateway to device. Every variant carries the id of
/// the device it targets; the broadcast address targets the whole fleet.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Request {
    /// Report the current lifecycle status.
    Status { target: u64 },
    /// Boot the application image.
    Start { target: u64 },
    /// Stop the application and return to management mode.
    Stop { target: u64 },
    /// Return the robot to its rendezvous position.
    Reset {
        target: u64,
        rendezvous: RendezvousTarget,
    },
    /// Open a new image transfer session.
    OtaStart { target: u64, image: OtaImageInfo },
    /// One fragment of the image.
    OtaChunk { target: u64, chunk: OtaChunk },
}

impl Request {
    /// Device id this request is addressed to.
    pub fn target(&self) -> u64 {
        match self {
            Request::Status { target }
            | Request::Start { target }
            | Request::Stop { target }
            | Request::Reset { target, .. }
            | Request::OtaStart { target, .. }
            | Request::OtaChunk { target, .. } => *target,
        }
    }
}

/// Notifications, device to gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Notification {
    /// Answer to a status request.
    Status {
        device_id: u64,
        status: ApplicationStatus,
    },
    /// The application image is about to boot.
    Started { device_id: u64 },
    /// The device returned to management mode after a stop request.
    Stopped { device_id: u64 },
    /// The image region is erased; chunks may follow.
    OtaStartAck { device_id: u64 },
    /// A chunk has been programmed. On the final chunk `hashes_match`
    /// reports the image integrity verdict.
    OtaChunkAck {
        device_id: u64,
        index: u32,
        hashes_match: bool,
    },
    /// A monitored GPIO changed state.
    Gpio {
        device_id: u64,
        timestamp: u32,
        event: GpioEvent,
    },
    /// A log record emitted by the device.
    Log {
        device_id: u64,
        timestamp: u32,
        data: Vec<u8, MAX_LOG_DATA>,
    },
    /// Free-form message from the application firmware.
    Message {
        device_id: u64,
        data: Vec<u8, MAX_MESSAGE_DATA>,
    },
}

/// Decoded frame body.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Packet {
    Request(Request),
    Notification(Notification),
    /// Non-management traffic, relayed opaquely to the application.
    Application(Vec<u8, MAX_APP_PDU>),
}

mod opcode {
    pub const STATUS_REQUEST: u8 = 0x80;
    pub const START: u8 = 0x81;
    pub const STOP: u8 = 0x82;
    pub const RESET: u8 = 0x83;
    pub const OTA_START: u8 = 0x84;
    pub const OTA_CHUNK: u8 = 0x85;
    pub const STATUS: u8 = 0x86;
    pub const STARTED: u8 = 0x87;
    pub const STOPPED: u8 = 0x88;
    pub const OTA_START_ACK: u8 = 0x89;
    pub const OTA_CHUNK_ACK: u8 = 0x8A;
    pub const GPIO_EVENT: u8 = 0x8B;
    pub const LOG_EVENT: u8 = 0x8C;
    pub const MESSAGE: u8 = 0x8D;
}

// Frame sizes are bounded by the payload types, so pushes cannot fail.
fn put(out: &mut FrameBuffer, bytes: &[u8]) {
    out.extend_from_slice(bytes).unwrap();
}

/// Encode a management request into a frame addressed to `dst`.
pub fn encode_request(dst: u64, src: u64, request: &Request) -> FrameBuffer {
    let mut out = FrameBuffer::new();
    ProtocolHeader::management(dst, src).write(&mut out);
    match request {
        Request::Status { target } => {
            put(&mut out, &[opcode::STATUS_REQUEST]);
            put(&mut out, &target.to_le_bytes());
        }
        Request::Start { target } => {
            put(&mut out, &[opcode::START]);
            put(&mut out, &target.to_le_bytes());
        }
        Request::Stop { target } => {
            put(&mut out, &[opcode::STOP]);
            put(&mut out, &target.to_le_bytes());
        }
        Request::Reset { target, rendezvous } => {
            put(&mut out, &[opcode::RESET]);
            put(&mut out, &target.to_le_bytes());
            put(&mut out, &rendezvous.x.to_le_bytes());
            put(&mut out, &rendezvous.y.to_le_bytes());
            put(&mut out, &rendezvous.z.to_le_bytes());
        }
        Request::OtaStart { target, image } => {
            put(&mut out, &[opcode::OTA_START]);
            put(&mut out, &target.to_le_bytes());
            put(&mut out, &image.image_size.to_le_bytes());
            put(&mut out, &image.chunk_count.to_le_bytes());
            put(&mut out, &image.expected_hash);
        }
        Request::OtaChunk { target, chunk } => {
            put(&mut out, &[opcode::OTA_CHUNK]);
            put(&mut out, &target.to_le_bytes());
            put(&mut out, &chunk.index.to_le_bytes());
            put(&mut out, &[chunk.data.len() as u8]);
            put(&mut out, &chunk.data);
        }
    }
    out
}

/// Encode a notification into a frame addressed to `dst` (the gateway).
pub fn encode_notification(dst: u64, src: u64, notification: &Notification) -> FrameBuffer {
    let mut out = FrameBuffer::new();
    ProtocolHeader::management(dst, src).write(&mut out);
    match notification {
        Notification::Status { device_id, status } => {
            put(&mut out, &[opcode::STATUS]);
            put(&mut out, &device_id.to_le_bytes());
            put(&mut out, &[*status as u8]);
        }
        Notification::Started { device_id } => {
            put(&mut out, &[opcode::STARTED]);
            put(&mut out, &device_id.to_le_bytes());
        }
        Notification::Stopped { device_id } => {
            put(&mut out, &[opcode::STOPPED]);
            put(&mut out, &device_id.to_le_bytes());
        }
        Notification::OtaStartAck { device_id } => {
            put(&mut out, &[opcode::OTA_START_ACK]);
            put(&mut out, &device_id.to_le_bytes());
        }
        Notification::OtaChunkAck {
            device_id,
            index,
            hashes_match,
        } => {
            put(&mut out, &[opcode::OTA_CHUNK_ACK]);
            put(&mut out, &device_id.to_le_bytes());
            put(&mut out, &index.to_le_bytes());
            put(&mut out, &[*hashes_match as u8]);
        }
        Notification::Gpio {
            device_id,
            timestamp,
            event,
        } => {
            put(&mut out, &[opcode::GPIO_EVENT]);
            put(&mut out, &device_id.to_le_bytes());
            put(&mut out, &timestamp.to_le_bytes());
            put(&mut out, &[event.port, event.pin, event.value]);
        }
        Notification::Log {
            device_id,
            timestamp,
            data,
        } => {
            put(&mut out, &[opcode::LOG_EVENT]);
            put(&mut out, &device_id.to_le_bytes());
            put(&mut out, &timestamp.to_le_bytes());
            put(&mut out, &[data.len() as u8]);
            put(&mut out, data);
        }
        Notification::Message { device_id, data } => {
            put(&mut out, &[opcode::MESSAGE]);
            put(&mut out, &device_id.to_le_bytes());
            put(&mut out, &[data.len() as u8]);
            put(&mut out, data);
        }
    }
    out
}

/// Encode an application PDU for the radio.
pub fn encode_application(dst: u64, src: u64, payload: &[u8]) -> Result<FrameBuffer, CodecError> {
    if payload.len() > MAX_APP_PDU {
        return Err(CodecError::Oversize);
    }
    let mut out = FrameBuffer::new();
    ProtocolHeader {
        version: PROTOCOL_VERSION,
        packet_type: PacketType::ApplicationData,
        dst,
        src,
    }
    .write(&mut out);
    put(&mut out, payload);
    Ok(out)
}

/// Decode a complete frame.
pub fn decode(frame: &[u8]) -> Result<(ProtocolHeader, Packet), CodecError> {
    let (header, payload) = ProtocolHeader::parse(frame)?;
    let packet = match header.packet_type {
        PacketType::ApplicationData => {
            let mut data = Vec::new();
            data.extend_from_slice(payload)
                .map_err(|_| CodecError::Oversize)?;
            Packet::Application(data)
        }
        PacketType::Management => decode_management(payload)?,
    };
    Ok((header, packet))
}

fn decode_management(payload: &[u8]) -> Result<Packet, CodecError> {
    let mut r = Reader::new(payload);
    let op = r.u8()?;
    let packet = match op {
        opcode::STATUS_REQUEST => Packet::Request(Request::Status { target: r.u64()? }),
        opcode::START => Packet::Request(Request::Start { target: r.u64()? }),
        opcode::STOP => Packet::Request(Request::Stop { target: r.u64()? }),
        opcode::RESET => Packet::Request(Request::Reset {
            target: r.u64()?,
            rendezvous: RendezvousTarget {
                x: r.u32()?,
                y: r.u32()?,
                z: r.u32()?,
            },
        }),
        opcode::OTA_START => Packet::Request(Request::OtaStart {
            target: r.u64()?,
            image: OtaImageInfo {
                image_size: r.u32()?,
                chunk_count: r.u32()?,
                expected_hash: r.array()?,
            },
        }),
        opcode::OTA_CHUNK => {
            let target = r.u64()?;
            let index = r.u32()?;
            let chunk_size = r.u8()? as usize;
            if chunk_size > OTA_CHUNK_SIZE {
                return Err(CodecError::Oversize);
            }
            let mut data = Vec::new();
            data.extend_from_slice(r.take(chunk_size)?).unwrap();
            Packet::Request(Request::OtaChunk {
                target,
                chunk: OtaChunk { index, data },
            })
        }
        opcode::STATUS => Packet::Notification(Notification::Status {
            device_id: r.u64()?,
            status: ApplicationStatus::from_u8(r.u8()?).ok_or(CodecError::UnknownType)?,
        }),
        opcode::STARTED => Packet::Notification(Notification::Started {
            device_id: r.u64()?,
        }),
        opcode::STOPPED => Packet::Notification(Notification::Stopped {
            device_id: r.u64()?,
        }),
        opcode::OTA_START_ACK => Packet::Notification(Notification::OtaStartAck {
            device_id: r.u64()?,
        }),
        opcode::OTA_CHUNK_ACK => Packet::Notification(Notification::OtaChunkAck {
            device_id: r.u64()?,
            index: r.u32()?,
            hashes_match: r.u8()? != 0,
        }),
        opcode::GPIO_EVENT => Packet::Notification(Notification::Gpio {
            device_id: r.u64()?,
            timestamp: r.u32()?,
            event: GpioEvent {
                port: r.u8()?,
                pin: r.u8()?,
                value: r.u8()?,
            },
        }),
        opcode::LOG_EVENT => {
            let device_id = r.u64()?;
            let timestamp = r.u32()?;
            let len = r.u8()? as usize;
            if len > MAX_LOG_DATA {
                return Err(CodecError::Oversize);
            }
            let mut data = Vec::new();
            data.extend_from_slice(r.take(len)?).unwrap();
            Packet::Notification(Notification::Log {
                device_id,
                timestamp,
                data,
            })
        }
        opcode::MESSAGE => {
            let device_id = r.u64()?;
            let len = r.u8()? as usize;
            if len > MAX_MESSAGE_DATA {
                return Err(CodecError::Oversize);
            }
            let mut data = Vec::new();
            data.extend_from_slice(r.take(len)?).unwrap();
            Packet::Notification(Notification::Message { device_id, data })
        }
        _ => return Err(CodecError::UnknownType),
    };
    Ok(packet)
}

struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        if self.buf.len() < n {
            return Err(CodecError::TooShort);
        }
        let (head, rest) = self.buf.split_at(n);
        self.buf = rest;
        Ok(head)
    }

    fn u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.take(1)?[0])
    }

    fn u32(&mut self) -> Result<u32, CodecError> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn u64(&mut self) -> Result<u64, CodecError> {
        Ok(u64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], CodecError> {
        Ok(self.take(N)?.try_into().unwrap())
    }
}

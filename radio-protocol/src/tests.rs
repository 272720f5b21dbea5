use super::*;
use consts::BROADCAST_ADDRESS;

const DEVICE: u64 = 0x1122_3344_5566_7788;
const GATEWAY: u64 = 0;

fn roundtrip_request(request: Request) {
    let frame = encode_request(DEVICE, GATEWAY, &request);
    let (header, packet) = decode(&frame).unwrap();
    assert_eq!(header, ProtocolHeader::management(DEVICE, GATEWAY));
    assert_eq!(packet, Packet::Request(request));
}

fn roundtrip_notification(notification: Notification) {
    let frame = encode_notification(GATEWAY, DEVICE, &notification);
    let (header, packet) = decode(&frame).unwrap();
    assert_eq!(header, ProtocolHeader::management(GATEWAY, DEVICE));
    assert_eq!(packet, Packet::Notification(notification));
}

#[test]
fn requests_roundtrip() {
    roundtrip_request(Request::Status { target: DEVICE });
    roundtrip_request(Request::Status {
        target: BROADCAST_ADDRESS,
    });
    roundtrip_request(Request::Start { target: DEVICE });
    roundtrip_request(Request::Stop { target: DEVICE });
    roundtrip_request(Request::Reset {
        target: DEVICE,
        rendezvous: RendezvousTarget { x: 1, y: 2, z: 3 },
    });
    roundtrip_request(Request::OtaStart {
        target: DEVICE,
        image: OtaImageInfo {
            image_size: 8192,
            chunk_count: 64,
            expected_hash: [0xA5; 32],
        },
    });
    let mut data = Vec::new();
    data.extend_from_slice(&[0x42; OTA_CHUNK_SIZE]).unwrap();
    roundtrip_request(Request::OtaChunk {
        target: DEVICE,
        chunk: OtaChunk { index: 17, data },
    });
}

#[test]
fn notifications_roundtrip() {
    roundtrip_notification(Notification::Status {
        device_id: DEVICE,
        status: ApplicationStatus::Programming,
    });
    roundtrip_notification(Notification::Started { device_id: DEVICE });
    roundtrip_notification(Notification::Stopped { device_id: DEVICE });
    roundtrip_notification(Notification::OtaStartAck { device_id: DEVICE });
    roundtrip_notification(Notification::OtaChunkAck {
        device_id: DEVICE,
        index: 63,
        hashes_match: true,
    });
    roundtrip_notification(Notification::Gpio {
        device_id: DEVICE,
        timestamp: 123_456,
        event: GpioEvent {
            port: 1,
            pin: 4,
            value: 1,
        },
    });
    let mut data = Vec::new();
    data.extend_from_slice(b"wheel slip detected").unwrap();
    roundtrip_notification(Notification::Log {
        device_id: DEVICE,
        timestamp: 99,
        data,
    });
    let mut data = Vec::new();
    data.extend_from_slice(&[7; MAX_MESSAGE_DATA]).unwrap();
    roundtrip_notification(Notification::Message {
        device_id: DEVICE,
        data,
    });
}

#[test]
fn application_roundtrip() {
    let payload = [0x5A; 64];
    let frame = encode_application(DEVICE, GATEWAY, &payload).unwrap();
    let (header, packet) = decode(&frame).unwrap();
    assert_eq!(header.packet_type, PacketType::ApplicationData);
    assert_eq!(header.dst, DEVICE);
    match packet {
        Packet::Application(data) => assert_eq!(&data[..], &payload[..]),
        other => panic!("unexpected packet {other:?}"),
    }
    assert_eq!(
        encode_application(DEVICE, GATEWAY, &[0; MAX_APP_PDU + 1]),
        Err(CodecError::Oversize)
    );
}

#[test]
fn chunk_request_layout() {
    let mut data = Vec::new();
    data.extend_from_slice(&[0xEE; 3]).unwrap();
    let frame = encode_request(
        DEVICE,
        GATEWAY,
        &Request::OtaChunk {
            target: DEVICE,
            chunk: OtaChunk { index: 2, data },
        },
    );

    // Header.
    assert_eq!(frame[0], consts::PROTOCOL_VERSION);
    assert_eq!(frame[1], PacketType::Management as u8);
    assert_eq!(&frame[2..10], &DEVICE.to_le_bytes());
    assert_eq!(&frame[10..18], &GATEWAY.to_le_bytes());
    // Opcode and target.
    assert_eq!(frame[18], 0x85);
    assert_eq!(&frame[19..27], &DEVICE.to_le_bytes());
    // Chunk index, size, bytes.
    assert_eq!(&frame[27..31], &2u32.to_le_bytes());
    assert_eq!(frame[31], 3);
    assert_eq!(&frame[32..], &[0xEE; 3]);
    assert_eq!(frame.len(), 35);
}

#[test]
fn truncated_frames_fail() {
    let frame = encode_request(DEVICE, GATEWAY, &Request::Start { target: DEVICE });
    for len in 0..frame.len() {
        assert_eq!(decode(&frame[..len]).unwrap_err(), CodecError::TooShort);
    }
}

#[test]
fn unknown_opcode_fails() {
    let mut frame = encode_request(DEVICE, GATEWAY, &Request::Start { target: DEVICE });
    frame[18] = 0x7F;
    assert_eq!(decode(&frame).unwrap_err(), CodecError::UnknownType);
    frame[18] = 0xFE;
    assert_eq!(decode(&frame).unwrap_err(), CodecError::UnknownType);
}

#[test]
fn unknown_packet_type_fails() {
    let mut frame = encode_request(DEVICE, GATEWAY, &Request::Start { target: DEVICE });
    frame[1] = 0x33;
    assert_eq!(decode(&frame).unwrap_err(), CodecError::UnknownType);
}

#[test]
fn bad_status_byte_fails() {
    let mut frame = encode_notification(
        GATEWAY,
        DEVICE,
        &Notification::Status {
            device_id: DEVICE,
            status: ApplicationStatus::Ready,
        },
    );
    *frame.last_mut().unwrap() = 9;
    assert_eq!(decode(&frame).unwrap_err(), CodecError::UnknownType);
}

#[test]
fn oversized_chunk_fails() {
    // Hand-build a chunk frame whose size byte exceeds the chunk limit.
    let mut frame = FrameBuffer::new();
    ProtocolHeader::management(DEVICE, GATEWAY).write(&mut frame);
    frame.push(0x85).unwrap();
    frame.extend_from_slice(&DEVICE.to_le_bytes()).unwrap();
    frame.extend_from_slice(&0u32.to_le_bytes()).unwrap();
    frame.push((OTA_CHUNK_SIZE + 1) as u8).unwrap();
    frame.extend_from_slice(&[0; OTA_CHUNK_SIZE + 1]).unwrap();
    assert_eq!(decode(&frame).unwrap_err(), CodecError::Oversize);
}

#[test]
fn short_log_data_fails() {
    let mut data = Vec::new();
    data.extend_from_slice(&[1, 2, 3, 4]).unwrap();
    let mut frame = encode_notification(
        GATEWAY,
        DEVICE,
        &Notification::Log {
            device_id: DEVICE,
            timestamp: 0,
            data,
        },
    );
    // Claim more data than the frame carries.
    frame[31] = 60;
    assert_eq!(decode(&frame).unwrap_err(), CodecError::TooShort);
}

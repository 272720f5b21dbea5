// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Whole-device scenarios: both dispatchers on their own threads, a real
//! transfer over the loopback radio, watchdog-driven recovery.

use std::time::Duration;

use consts::{IMAGE_BASE_ADDRESS, OTA_CHUNK_SIZE};
use host_sim::{test_image, AppBehavior, Device};
use radio_protocol::{ApplicationStatus, Notification, OtaChunk, OtaImageInfo, Request};
use sha2::{Digest, Sha256};

const TIMEOUT: Duration = Duration::from_secs(10);
const DEVICE_ID: u64 = 0xBEEF_0001;

fn managed_device(app: AppBehavior) -> Device {
    let device = Device::spawn(DEVICE_ID, app);
    assert!(
        device.await_status(ApplicationStatus::Running, TIMEOUT),
        "device did not boot the application"
    );
    assert!(
        device.stop_application(TIMEOUT),
        "device did not stop into management mode"
    );
    device
}

#[test]
fn full_transfer_programs_flash_and_restarts() {
    let device = managed_device(AppBehavior::WellBehaved);
    assert_eq!(device.query_status(TIMEOUT), Some(ApplicationStatus::Ready));

    let image = test_image(2 * 4096 + 300);
    assert_eq!(device.update_firmware(&image, TIMEOUT), Some(true));
    assert_eq!(device.query_status(TIMEOUT), Some(ApplicationStatus::Ready));

    assert!(device.start_application(TIMEOUT));
    assert!(device.await_status(ApplicationStatus::Running, TIMEOUT));

    let report = device.shutdown();
    let base = IMAGE_BASE_ADDRESS as usize;
    assert_eq!(&report.flash[base..base + image.len()], &image[..]);
    assert!(report.app_wdt_reloads > 0, "application never fed its watchdog");
}

#[test]
fn tampered_image_is_flagged_by_the_final_ack() {
    let device = managed_device(AppBehavior::WellBehaved);

    let image = test_image(512);
    let mut wrong_hash: [u8; 32] = Sha256::digest(&image).into();
    wrong_hash[7] ^= 0x01;
    assert_eq!(
        device.update_firmware_with_hash(&image, wrong_hash, TIMEOUT),
        Some(false)
    );

    // The verdict is advisory; the device is back in Ready and a correct
    // transfer still goes through.
    assert!(device.await_status(ApplicationStatus::Ready, TIMEOUT));
    assert_eq!(device.update_firmware(&image, TIMEOUT), Some(true));
    device.shutdown();
}

#[test]
fn start_is_ignored_mid_transfer() {
    let device = managed_device(AppBehavior::WellBehaved);
    let image = test_image(3 * OTA_CHUNK_SIZE);
    let hash: [u8; 32] = Sha256::digest(&image).into();

    device.send_request(&Request::OtaStart {
        target: DEVICE_ID,
        image: OtaImageInfo {
            image_size: image.len() as u32,
            chunk_count: 3,
            expected_hash: hash,
        },
    });
    assert!(device
        .wait_for(TIMEOUT, |n| matches!(n, Notification::OtaStartAck { .. }))
        .is_some());

    // A start request while programming must change nothing.
    device.send_request(&Request::Start { target: DEVICE_ID });
    assert_eq!(
        device.query_status(TIMEOUT),
        Some(ApplicationStatus::Programming)
    );

    // The transfer continues undisturbed.
    for (index, data) in image.chunks(OTA_CHUNK_SIZE).enumerate() {
        let index = index as u32;
        let mut chunk = heapless::Vec::new();
        chunk.extend_from_slice(data).unwrap();
        device.send_request(&Request::OtaChunk {
            target: DEVICE_ID,
            chunk: OtaChunk { index, data: chunk },
        });
        let ack = device
            .wait_for(
                TIMEOUT,
                |n| matches!(n, Notification::OtaChunkAck { index: i, .. } if *i == index),
            )
            .unwrap();
        if index == 2 {
            assert_eq!(
                ack,
                Notification::OtaChunkAck {
                    device_id: DEVICE_ID,
                    index,
                    hashes_match: true,
                }
            );
        }
    }
    device.shutdown();
}

#[test]
fn retransmitted_chunk_leaves_the_image_intact() {
    let device = managed_device(AppBehavior::WellBehaved);
    let image = test_image(2 * OTA_CHUNK_SIZE);
    let hash: [u8; 32] = Sha256::digest(&image).into();

    device.send_request(&Request::OtaStart {
        target: DEVICE_ID,
        image: OtaImageInfo {
            image_size: image.len() as u32,
            chunk_count: 2,
            expected_hash: hash,
        },
    });
    assert!(device
        .wait_for(TIMEOUT, |n| matches!(n, Notification::OtaStartAck { .. }))
        .is_some());

    // Chunk 0, twice (the first ack is "lost" and the gateway retries).
    for _ in 0..2 {
        let mut chunk = heapless::Vec::new();
        chunk.extend_from_slice(&image[..OTA_CHUNK_SIZE]).unwrap();
        device.send_request(&Request::OtaChunk {
            target: DEVICE_ID,
            chunk: OtaChunk {
                index: 0,
                data: chunk,
            },
        });
        assert!(device
            .wait_for(
                TIMEOUT,
                |n| matches!(n, Notification::OtaChunkAck { index: 0, .. })
            )
            .is_some());
    }

    let mut chunk = heapless::Vec::new();
    chunk.extend_from_slice(&image[OTA_CHUNK_SIZE..]).unwrap();
    device.send_request(&Request::OtaChunk {
        target: DEVICE_ID,
        chunk: OtaChunk {
            index: 1,
            data: chunk,
        },
    });
    let ack = device
        .wait_for(
            TIMEOUT,
            |n| matches!(n, Notification::OtaChunkAck { index: 1, .. }),
        )
        .unwrap();
    assert_eq!(
        ack,
        Notification::OtaChunkAck {
            device_id: DEVICE_ID,
            index: 1,
            hashes_match: true,
        }
    );

    let report = device.shutdown();
    let base = IMAGE_BASE_ADDRESS as usize;
    assert_eq!(&report.flash[base..base + image.len()], &image[..]);
}

#[test]
fn hung_application_recovers_to_management_mode() {
    let device = Device::spawn(DEVICE_ID, AppBehavior::Hang { after: 32 });

    // No request from here: the application watchdog must bring the device
    // back on its own, and the boot gate must keep the faulty image down.
    assert!(
        device.await_status(ApplicationStatus::Ready, TIMEOUT),
        "device never recovered from the hang"
    );

    // The recovered device accepts management work.
    let image = test_image(OTA_CHUNK_SIZE);
    assert_eq!(device.update_firmware(&image, TIMEOUT), Some(true));
    device.shutdown();
}

#[test]
fn status_is_answered_in_every_mode() {
    let device = Device::spawn(DEVICE_ID, AppBehavior::WellBehaved);
    assert!(device.await_status(ApplicationStatus::Running, TIMEOUT));
    assert!(device.stop_application(TIMEOUT));
    assert_eq!(device.query_status(TIMEOUT), Some(ApplicationStatus::Ready));
    device.shutdown();
}

// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Gateway-side driver for the simulated device. Each scenario exercises
//! one slice of the management protocol end to end.

use std::error::Error;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use consts::{IMAGE_BASE_ADDRESS, OTA_CHUNK_SIZE};
use host_sim::{test_image, AppBehavior, Device};
use radio_protocol::ApplicationStatus;

const TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone, Debug, PartialEq, ValueEnum)]
enum Scenario {
    /// Stop the application, transfer a fresh image, boot it.
    Ota,
    /// Walk the lifecycle: stop, rendezvous reset, start, stop.
    Lifecycle,
    /// Let the application hang and watch the watchdog recover the device.
    Recovery,
}

#[derive(Debug, Parser)]
struct Args {
    #[arg(short, long, value_enum, default_value = "ota")]
    scenario: Scenario,
    /// Size of the generated firmware image in bytes.
    #[arg(long, default_value_t = 8192)]
    image_size: usize,
    #[arg(long, default_value_t = 0xD0_7B_07)]
    device_id: u64,
}

fn main() {
    pretty_env_logger::init();
    let args = Args::parse();
    let result = match args.scenario {
        Scenario::Ota => ota(&args),
        Scenario::Lifecycle => lifecycle(&args),
        Scenario::Recovery => recovery(&args),
    };
    if let Err(err) = result {
        log::error!("scenario failed: {err}");
        std::process::exit(1);
    }
    log::info!("scenario passed");
}

fn ota(args: &Args) -> Result<(), Box<dyn Error>> {
    let device = Device::spawn(args.device_id, AppBehavior::WellBehaved);

    // Power-on boots the old application; bring the device to management
    // mode first.
    if !device.await_status(ApplicationStatus::Running, TIMEOUT) {
        return Err("device did not boot".into());
    }
    if !device.stop_application(TIMEOUT) {
        return Err("no stopped notification".into());
    }
    if device.query_status(TIMEOUT) != Some(ApplicationStatus::Ready) {
        return Err("device not ready after stop".into());
    }

    let image = test_image(args.image_size);
    log::info!(
        "transferring {} bytes ({} chunks)",
        image.len(),
        image.len().div_ceil(OTA_CHUNK_SIZE)
    );
    match device.update_firmware(&image, TIMEOUT) {
        Some(true) => log::info!("image verified"),
        Some(false) => return Err("hash mismatch on a clean transfer".into()),
        None => return Err("transfer timed out".into()),
    }

    if !device.start_application(TIMEOUT) {
        return Err("no started notification".into());
    }
    if !device.await_status(ApplicationStatus::Running, TIMEOUT) {
        return Err("application did not come up".into());
    }

    let report = device.shutdown();
    let base = IMAGE_BASE_ADDRESS as usize;
    if report.flash[base..base + image.len()] != image[..] {
        return Err("flash content differs from the transferred image".into());
    }
    log::info!(
        "flash verified against the image, supervisor reloads: {}",
        report.supervisor_reloads
    );
    Ok(())
}

fn lifecycle(args: &Args) -> Result<(), Box<dyn Error>> {
    let device = Device::spawn(args.device_id, AppBehavior::WellBehaved);

    if !device.await_status(ApplicationStatus::Running, TIMEOUT) {
        return Err("device did not boot".into());
    }
    if !device.stop_application(TIMEOUT) {
        return Err("no stopped notification".into());
    }

    device.send_request(&radio_protocol::Request::Reset {
        target: args.device_id,
        rendezvous: radio_protocol::RendezvousTarget { x: 120, y: 80, z: 0 },
    });
    if !device.await_status(ApplicationStatus::Ready, TIMEOUT) {
        return Err("rendezvous return never completed".into());
    }
    log::info!("rendezvous return complete");

    if !device.start_application(TIMEOUT) {
        return Err("no started notification".into());
    }
    if !device.await_status(ApplicationStatus::Running, TIMEOUT) {
        return Err("application did not come up".into());
    }
    if !device.stop_application(TIMEOUT) {
        return Err("no stopped notification after restart".into());
    }

    device.shutdown();
    Ok(())
}

fn recovery(args: &Args) -> Result<(), Box<dyn Error>> {
    let device = Device::spawn(args.device_id, AppBehavior::Hang { after: 64 });

    // The application hangs on its own; the watchdog must bring the device
    // back to management mode without any request from here.
    if !device.await_status(ApplicationStatus::Ready, TIMEOUT) {
        return Err("device never recovered from the hang".into());
    }
    log::info!("watchdog recovery observed");

    // The recovered device must accept a fresh image.
    let image = test_image(args.image_size);
    match device.update_firmware(&image, TIMEOUT) {
        Some(true) => {}
        _ => return Err("transfer after recovery failed".into()),
    }

    let report = device.shutdown();
    if report.app_wdt_reloads == 0 {
        return Err("application never reloaded its watchdog".into());
    }
    Ok(())
}

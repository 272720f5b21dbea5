// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Boot-time decision: jump to the application image or stay in management
//! mode. The reset reason is the only record of why the previous run ended,
//! so it is read and cleared exactly once, here.

use bitflags::bitflags;
use radio_protocol::ApplicationStatus;

bitflags! {
    /// Latched hardware reset reasons.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ResetReason: u32 {
        const POWER_ON = 1 << 0;
        const RESET_PIN = 1 << 1;
        const SOFT_RESET = 1 << 2;
        /// The application watchdog fired: untrusted code hung.
        const WATCHDOG_APP = 1 << 3;
        /// The supervisor watchdog fired: a requested stop completed.
        const WATCHDOG_SUPERVISOR = 1 << 4;
    }
}

impl ResetReason {
    /// True if either watchdog ended the previous run.
    pub fn watchdog_fired(&self) -> bool {
        self.intersects(ResetReason::WATCHDOG_APP | ResetReason::WATCHDOG_SUPERVISOR)
    }
}

/// What the trusted context does after reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BootMode {
    /// Jump to the application image.
    RunApplication,
    /// Remain in management mode and serve the gateway.
    Manage,
}

/// Decide the boot mode from the reset reason and the status word left in
/// shared memory. A watchdog reset means either an intentional stop or a
/// hung application; a `Programming` status means a transfer was interrupted
/// mid-flight. Neither may boot the (possibly half-written or faulty)
/// application image.
pub fn boot_mode(reason: ResetReason, status: ApplicationStatus) -> BootMode {
    if reason.watchdog_fired() || status == ApplicationStatus::Programming {
        BootMode::Manage
    } else {
        BootMode::RunApplication
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_resets_boot_the_application() {
        for reason in [
            ResetReason::POWER_ON,
            ResetReason::RESET_PIN,
            ResetReason::SOFT_RESET,
            ResetReason::empty(),
        ] {
            assert_eq!(
                boot_mode(reason, ApplicationStatus::Ready),
                BootMode::RunApplication
            );
        }
    }

    #[test]
    fn watchdog_resets_stay_in_management_mode() {
        assert_eq!(
            boot_mode(ResetReason::WATCHDOG_APP, ApplicationStatus::Ready),
            BootMode::Manage
        );
        assert_eq!(
            boot_mode(ResetReason::WATCHDOG_SUPERVISOR, ApplicationStatus::Ready),
            BootMode::Manage
        );
        assert_eq!(
            boot_mode(
                ResetReason::SOFT_RESET | ResetReason::WATCHDOG_APP,
                ApplicationStatus::Ready
            ),
            BootMode::Manage
        );
    }

    #[test]
    fn interrupted_transfer_stays_in_management_mode() {
        assert_eq!(
            boot_mode(ResetReason::SOFT_RESET, ApplicationStatus::Programming),
            BootMode::Manage
        );
    }
}

// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Two-timer watchdog supervision.
//!
//! The supervisor timer runs in management mode and is reloaded once per
//! dispatcher loop iteration; executing a stop means ceasing to reload it
//! and letting it fire, so the resulting reset reason reads "returned to
//! management mode intentionally". While the application runs, the stop
//! doorbell is wired by the platform straight to the supervisor timer's
//! start trigger, without trusted software in the path.
//!
//! The application timer is armed immediately before the jump to the
//! application image and must be reloaded from the application through the
//! `ReloadWatchdog` system call. Its expiry marks the application faulty.

use consts::{APP_WDT_PERIOD_MS, SUPERVISOR_WDT_PERIOD_MS};

/// One hardware countdown timer. Only the trusted context holds these.
pub trait Watchdog {
    /// Arm the timer. It resets the device `period_ms` after the last
    /// reload.
    fn start(&mut self, period_ms: u32);
    /// Push the deadline out by the armed period.
    fn reload(&mut self);
    /// Disarm, where the hardware allows it.
    fn stop(&mut self);
}

pub struct WatchdogSupervisor<S: Watchdog, A: Watchdog> {
    supervisor: S,
    application: A,
    halted: bool,
}

impl<S: Watchdog, A: Watchdog> WatchdogSupervisor<S, A> {
    pub fn new(supervisor: S, application: A) -> Self {
        Self {
            supervisor,
            application,
            halted: false,
        }
    }

    /// Arm the supervisor timer for management mode.
    pub fn start_supervisor(&mut self) {
        self.halted = false;
        self.supervisor.start(SUPERVISOR_WDT_PERIOD_MS);
    }

    /// Reload the supervisor timer; called once per loop iteration.
    /// Does nothing once a stop is latched, so the timer fires.
    pub fn kick(&mut self) {
        if !self.halted {
            self.supervisor.reload();
        }
    }

    /// Latch a stop: the supervisor timer expires and resets the device.
    pub fn halt(&mut self) {
        self.halted = true;
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    /// Arm the application timer; called immediately before the jump.
    pub fn arm_application(&mut self) {
        self.application.start(APP_WDT_PERIOD_MS);
    }

    pub fn disarm_application(&mut self) {
        self.application.stop();
    }

    /// Reload on behalf of the application (`ReloadWatchdog` system call).
    pub fn reload_application(&mut self) {
        self.application.reload();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct RecordingWatchdog {
        started_with: Option<u32>,
        reloads: u32,
        stopped: bool,
    }

    impl Watchdog for RecordingWatchdog {
        fn start(&mut self, period_ms: u32) {
            self.started_with = Some(period_ms);
        }

        fn reload(&mut self) {
            self.reloads += 1;
        }

        fn stop(&mut self) {
            self.stopped = true;
        }
    }

    fn supervisor() -> WatchdogSupervisor<RecordingWatchdog, RecordingWatchdog> {
        WatchdogSupervisor::new(RecordingWatchdog::default(), RecordingWatchdog::default())
    }

    #[test]
    fn kick_reloads_until_halted() {
        let mut wdt = supervisor();
        wdt.start_supervisor();
        assert_eq!(wdt.supervisor.started_with, Some(SUPERVISOR_WDT_PERIOD_MS));
        wdt.kick();
        wdt.kick();
        assert_eq!(wdt.supervisor.reloads, 2);
        wdt.halt();
        wdt.kick();
        // No reload after the halt: the timer must be allowed to fire.
        assert_eq!(wdt.supervisor.reloads, 2);
    }

    #[test]
    fn application_timer_is_armed_and_reloaded() {
        let mut wdt = supervisor();
        wdt.arm_application();
        assert_eq!(wdt.application.started_with, Some(APP_WDT_PERIOD_MS));
        wdt.reload_application();
        assert_eq!(wdt.application.reloads, 1);
        wdt.disarm_application();
        assert!(wdt.application.stopped);
    }
}

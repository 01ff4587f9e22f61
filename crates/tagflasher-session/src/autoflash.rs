//! Batch mode: flash every board that gets connected
//!
//! The loop waits for a board to answer a probe-only connect, provisions
//! the next device number onto it, then waits for the board to go away
//! before looking for the next one. Connection failures and timeouts while
//! waiting are expected and retried after a debounce delay. A locked board,
//! a tool that cannot run, or anything that fails once a board is connected
//! ends the loop.

use std::thread;
use std::time::{Duration, Instant};

use tagflasher_core::chip::ChipProfile;
use tagflasher_core::error::{ConfigError, FlashError, HardwareError};
use tagflasher_core::Result;
use tagflasher_flash::{AttemptStage, FailureKind, ProgrammerOrchestrator};

use crate::controller::{ProgressState, ProvisioningSession};
use crate::workspace::SessionDir;

/// Longest uninterrupted sleep while waiting
const STOP_POLL: Duration = Duration::from_millis(50);

impl ProvisioningSession {
    pub(crate) fn auto_flash(
        &self,
        chip: &ChipProfile,
        orchestrator: &ProgrammerOrchestrator,
        dir: &SessionDir,
    ) -> Result<()> {
        let settings = &self.context().config.autoflash;
        let debounce = Duration::from_millis(settings.debounce_ms);
        let mut number = self.request().start_number;

        self.note(format!("Auto-flash started at device number {}", number));
        loop {
            self.check_stop()?;
            self.set_state(ProgressState::WaitingForBoard);
            if !self.board_present(chip, orchestrator, dir)? {
                self.pause(debounce)?;
                continue;
            }

            self.note("Board connected");
            self.identify(orchestrator, chip, dir)?;
            self.check_stop()?;
            let name = self.prepare_image(chip, number, dir)?;
            self.check_stop()?;
            self.flash_image(orchestrator, chip, &name, dir)?;

            number = number.checked_add(1).ok_or(ConfigError::InvalidValue {
                field: "start_number",
                reason: "device numbers exhausted".into(),
            })?;
            self.set_state(ProgressState::WaitingForRemoval);
            self.note(format!("Remove {} to continue", name));
            self.wait_for_removal(chip, orchestrator, dir)?;
        }
    }

    fn wait_for_removal(
        &self,
        chip: &ChipProfile,
        orchestrator: &ProgrammerOrchestrator,
        dir: &SessionDir,
    ) -> Result<()> {
        let poll = Duration::from_millis(self.context().config.autoflash.removal_poll_ms);
        loop {
            self.pause(poll)?;
            if !self.board_present(chip, orchestrator, dir)? {
                self.note("Board removed");
                return Ok(());
            }
        }
    }

    /// Probe-only connect. Only connection failures and timeouts mean "no board".
    fn board_present(
        &self,
        chip: &ChipProfile,
        orchestrator: &ProgrammerOrchestrator,
        dir: &SessionDir,
    ) -> Result<bool> {
        let timeout = self.context().config.timeouts.probe();
        let Err(failure) = orchestrator.probe(chip, Some(dir.path()), timeout) else {
            return Ok(true);
        };
        match failure.kind {
            FailureKind::Connection | FailureKind::Timeout => {
                log::debug!("No board: {}", failure.detail);
                Ok(false)
            }
            FailureKind::Protected => Err(HardwareError::ChipProtected(failure.detail).into()),
            FailureKind::Other => Err(FlashError::BackendFailed {
                backend: orchestrator.probe_backend(chip).to_string(),
                stage: AttemptStage::ProbeOnly.to_string(),
                detail: failure.detail,
            }
            .into()),
        }
    }

    /// Sleep for `duration`, waking early with an error if stop is requested
    fn pause(&self, duration: Duration) -> Result<()> {
        let deadline = Instant::now() + duration;
        loop {
            self.check_stop()?;
            let now = Instant::now();
            if now >= deadline {
                return Ok(());
            }
            thread::sleep((deadline - now).min(STOP_POLL));
        }
    }
}

//! Provision command implementation

use indicatif::{ProgressBar, ProgressStyle};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tagflasher_core::chip::ChipCatalog;
use tagflasher_core::config::ProvisionConfig;
use tagflasher_session::{
    ProvisioningContext, ProvisioningRequest, ProvisioningSession, SessionStatus,
};

/// How often the spinner refreshes from the session status
const STATUS_POLL: Duration = Duration::from_millis(100);

fn create_spinner_style() -> Result<ProgressStyle, Box<dyn std::error::Error>> {
    Ok(ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed_precise}] {msg}")?)
}

fn status_message(status: &SessionStatus) -> String {
    let device = status.device_name.as_deref().unwrap_or("-");
    match status.log.last() {
        Some(line) => format!("{} {}: {}", device, status.state, line),
        None => format!("{} {}", device, status.state),
    }
}

/// Stop the session on Ctrl-C; a second Ctrl-C exits immediately
fn install_interrupt_handler(stop: Arc<AtomicBool>) -> std::io::Result<()> {
    tagflasher_flash::runner::spawn_background(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        log::warn!("Interrupted, stopping after the current step (Ctrl-C again to abort)");
        stop.store(true, Ordering::SeqCst);
        if tokio::signal::ctrl_c().await.is_ok() {
            std::process::exit(130);
        }
    })
}

/// Run the provision command
pub fn run(
    config: ProvisionConfig,
    catalog: ChipCatalog,
    request: ProvisioningRequest,
) -> Result<(), Box<dyn std::error::Error>> {
    let auto = request.auto_flash;
    let ctx = Arc::new(ProvisioningContext::new(config, catalog));

    let stop = Arc::new(AtomicBool::new(false));
    install_interrupt_handler(stop.clone())?;

    let handle = ProvisioningSession::new(ctx, request)
        .with_stop_flag(stop)
        .spawn()?;
    log::debug!("Session {} started", handle.id());

    let pb = ProgressBar::new_spinner();
    pb.set_style(create_spinner_style().unwrap_or_else(|_| ProgressStyle::default_spinner()));
    pb.enable_steady_tick(STATUS_POLL);

    while !handle.is_finished() {
        pb.set_message(status_message(&handle.status()));
        std::thread::sleep(STATUS_POLL);
    }

    match handle.join() {
        Ok(summary) => {
            let verb = if summary.stopped { "Stopped" } else { "Done" };
            pb.finish_with_message(format!(
                "{}: {} device(s) flashed",
                verb,
                summary.flashed.len()
            ));
            for name in &summary.flashed {
                println!("  {}", name);
            }
            if summary.stopped && !auto {
                return Err("provisioning stopped before completion".into());
            }
            Ok(())
        }
        Err(e) => {
            pb.abandon_with_message(format!("Failed: {}", e));
            Err(e.into())
        }
    }
}

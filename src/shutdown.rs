use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::monitor;
use crate::supervisor::ProcessSupervisor;

/// Exit status reserved for interrupted runs (128 + SIGINT).
pub const INTERRUPTED_EXIT_CODE: i32 = 130;

/// Install interrupt handling for the run.
///
/// On SIGINT/SIGTERM: flip the cancellation flag (monotonic, never reset),
/// restore the terminal if the full-screen display is active, reclaim every
/// tracked client process, and exit with the interrupted-run status code.
pub fn install(
	cancel: Arc<AtomicBool>,
	supervisor: Arc<ProcessSupervisor>,
	process_timeout: Duration,
	fullscreen: bool,
) {
	tokio::spawn(async move {
		wait_for_signal().await;

		cancel.store(true, Ordering::SeqCst);

		if fullscreen {
			monitor::restore_terminal();
		}

		eprintln!("\n\nInterrupted! Cleaning up...");
		let sup = supervisor.clone();
		let _ = tokio::task::spawn_blocking(move || {
			sup.terminate_all(process_timeout);
		})
		.await;

		eprintln!("Cleanup complete. Exiting...");
		std::process::exit(INTERRUPTED_EXIT_CODE);
	});
}

async fn wait_for_signal() {
	#[cfg(unix)]
	{
		use tokio::signal::unix::{signal, SignalKind};

		let mut sigterm =
			signal(SignalKind::terminate()).expect("failed to register SIGTERM handler");
		let mut sigint =
			signal(SignalKind::interrupt()).expect("failed to register SIGINT handler");

		tokio::select! {
			_ = sigterm.recv() => {}
			_ = sigint.recv() => {}
		}
	}

	#[cfg(not(unix))]
	{
		tokio::signal::ctrl_c()
			.await
			.expect("failed to listen for Ctrl+C");
	}
}

use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};

use crate::config::{CheckerConfig, ErrorKind, Protocol, ResolverCandidate, TestOutcome};
use crate::monitor::{GREEN, RED, RESET, YELLOW};
use crate::probe;
use crate::supervisor::ProcessSupervisor;

/// Drive the full test lifecycle for one resolver candidate.
///
/// Spawns slipstream-client against the candidate, waits the fixed startup
/// interval for tunnel establishment, probes connectivity through the local
/// SOCKS5 proxy, optionally samples throughput, and retries on failure with
/// a fixed backoff. The spawned client is terminated and untracked on every
/// path, including unexpected probe faults. The cancellation flag is honored
/// at entry and at each retry boundary.
pub async fn test_candidate(
	candidate: &ResolverCandidate,
	listen_port: u16,
	config: &CheckerConfig,
	supervisor: &ProcessSupervisor,
	cancel: &AtomicBool,
) -> TestOutcome {
	if cancel.load(Ordering::SeqCst) {
		return failure(candidate, 0.0, None);
	}

	// slipstream-client only supports UDP resolvers
	if candidate.protocol != Protocol::Udp {
		if config.verbose {
			println!(
				"Skipping {} server {} - slipstream-client only supports UDP",
				candidate.protocol,
				candidate.target(),
			);
		}
		return failure(candidate, 0.0, Some(ErrorKind::UnsupportedProtocol));
	}

	let mut last_error: Option<ErrorKind> = None;
	let mut elapsed_secs = 0.0;

	for attempt in 0..=config.max_retries {
		if cancel.load(Ordering::SeqCst) {
			return failure(candidate, elapsed_secs, last_error);
		}

		if config.verbose {
			let retry_str = if attempt > 0 {
				format!(" (retry {})", attempt)
			} else {
				String::new()
			};
			println!(
				"\n--- Testing UDP resolver: {}{} ---",
				candidate.target(),
				retry_str,
			);
		}

		match run_attempt(candidate, listen_port, config, supervisor).await {
			Ok((elapsed, speed_kbps)) => {
				if config.verbose {
					let speed_str = match speed_kbps {
						Some(kbps) => format!(" {:.1}KB/s", kbps),
						None => String::new(),
					};
					println!(
						"{}✓{} {} {:.2}s{}",
						GREEN, RESET, candidate, elapsed, speed_str,
					);
				}
				return TestOutcome {
					candidate: candidate.clone(),
					success: true,
					elapsed_secs: elapsed,
					speed_kbps,
					error: None,
				};
			}
			Err((elapsed, kind)) => {
				if config.verbose {
					println!(
						"{}FAILED: {} - {}{}",
						RED,
						candidate.target(),
						kind,
						RESET,
					);
				}
				elapsed_secs = elapsed;
				last_error = Some(kind);
			}
		}

		if attempt < config.max_retries && !cancel.load(Ordering::SeqCst) {
			if config.verbose {
				println!(
					"{}Retrying in {} seconds...{}",
					YELLOW,
					config.retry_backoff.as_secs(),
					RESET,
				);
			}
			tokio::time::sleep(config.retry_backoff).await;
		}
	}

	failure(candidate, elapsed_secs, last_error)
}

/// One attempt: spawn, wait, probe, cleanup.
///
/// Returns Ok((elapsed, speed)) on a passing probe, Err((elapsed, kind))
/// otherwise. Cleanup of the spawned client runs on both arms.
async fn run_attempt(
	candidate: &ResolverCandidate,
	listen_port: u16,
	config: &CheckerConfig,
	supervisor: &ProcessSupervisor,
) -> Result<(f64, Option<f64>), (f64, ErrorKind)> {
	let mut child = match Command::new(&config.client_executable)
		.args([
			"--domain", &config.domain,
			"--resolver", &candidate.target(),
			"--listen", &format!("127.0.0.1:{}", listen_port),
			"--pubkey-file", &config.pubkey_file.to_string_lossy(),
			"--log-level", "error",
		])
		.stdin(Stdio::null())
		.stdout(Stdio::null())
		.stderr(Stdio::piped())
		.spawn()
	{
		Ok(child) => child,
		Err(e) => {
			if config.verbose {
				println!("{}failed to start slipstream-client: {}{}", RED, e, RESET);
			}
			return Err((0.0, ErrorKind::ClientStartupFailed));
		}
	};

	// Register before any blocking wait so a concurrent shutdown can find it
	let pid = child.id();
	if let Some(pid) = pid {
		supervisor.track(pid);
	}

	// Fixed-delay wait for tunnel establishment; no readiness probe
	tokio::time::sleep(config.startup_wait).await;

	// Early exit means the client never got a tunnel up
	if matches!(child.try_wait(), Ok(Some(_)) | Err(_)) {
		if config.verbose {
			let stderr_output = read_stderr(&mut child).await;
			println!(
				"{}slipstream-client exited early: {}{}",
				RED, stderr_output, RESET,
			);
		}
		cleanup_client(child, pid, config, supervisor).await;
		return Err((0.0, ErrorKind::ClientStartupFailed));
	}

	if config.verbose {
		println!("Making connectivity test...");
	}

	let result = probe::run_connectivity_probe(listen_port, config.curl_timeout).await;
	let elapsed = result.elapsed.as_secs_f64();

	if config.verbose {
		println!("\n----- Curl Output -----");
		println!("{}", result.stdout);
		println!("{}", result.stderr);
		println!("-----------------------");
	}

	let outcome = match result.outcome {
		Ok(()) => {
			// Optional throughput sample; failure yields no figure but
			// does not invalidate the success
			let speed_kbps = if config.speed_test {
				if config.verbose {
					println!("Running speed test (100KB download)...");
				}
				let speed = probe::run_speed_test(listen_port, config.curl_timeout).await;
				if config.verbose {
					match speed {
						Some(kbps) => println!("Speed: {:.1} KB/sec", kbps),
						None => println!("{}Speed test failed{}", YELLOW, RESET),
					}
				}
				speed
			} else {
				None
			};
			Ok((elapsed, speed_kbps))
		}
		Err(kind) => Err((elapsed, kind)),
	};

	cleanup_client(child, pid, config, supervisor).await;
	outcome
}

/// Untrack and reclaim the client: graceful termination, bounded wait,
/// force-kill if still alive.
async fn cleanup_client(
	mut child: Child,
	pid: Option<u32>,
	config: &CheckerConfig,
	supervisor: &ProcessSupervisor,
) {
	if let Some(pid) = pid {
		supervisor.untrack(pid);
	}

	if let Ok(Some(_)) = child.try_wait() {
		return;
	}

	if config.verbose {
		println!("Terminating slipstream-client...");
	}

	#[cfg(unix)]
	if let Some(pid) = pid {
		use nix::sys::signal::{kill, Signal};
		use nix::unistd::Pid;
		let _ = kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
	}

	match tokio::time::timeout(config.process_timeout, child.wait()).await {
		Ok(_) => {}
		Err(_) => {
			let _ = child.kill().await;
		}
	}
}

async fn read_stderr(child: &mut Child) -> String {
	let mut buf = String::new();
	if let Some(mut stderr) = child.stderr.take() {
		let _ = stderr.read_to_string(&mut buf).await;
	}
	buf.trim_end().to_string()
}

fn failure(candidate: &ResolverCandidate, elapsed_secs: f64, error: Option<ErrorKind>) -> TestOutcome {
	TestOutcome {
		candidate: candidate.clone(),
		success: false,
		elapsed_secs,
		speed_kbps: None,
		error,
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::path::PathBuf;

	fn test_config() -> CheckerConfig {
		CheckerConfig {
			client_executable: PathBuf::from("/bin/sh"),
			pubkey_file: PathBuf::from("/dev/null"),
			domain: "t.example.org".to_string(),
			curl_timeout: Duration::from_secs(2),
			process_timeout: Duration::from_secs(1),
			startup_wait: Duration::from_millis(50),
			retry_backoff: Duration::from_millis(50),
			max_retries: 1,
			speed_test: false,
			verbose: false,
		}
	}

	fn udp_candidate() -> ResolverCandidate {
		ResolverCandidate {
			protocol: Protocol::Udp,
			address: "192.0.2.1".to_string(),
			port: 53,
		}
	}

	#[tokio::test]
	async fn test_cancelled_before_start() {
		let config = test_config();
		let supervisor = ProcessSupervisor::new();
		let cancel = AtomicBool::new(true);

		let outcome =
			test_candidate(&udp_candidate(), 41999, &config, &supervisor, &cancel).await;
		assert!(!outcome.success);
		assert!(outcome.error.is_none());
		assert!(supervisor.is_empty());
	}

	#[tokio::test]
	async fn test_non_udp_rejected_without_spawn() {
		let config = test_config();
		let supervisor = ProcessSupervisor::new();
		let cancel = AtomicBool::new(false);
		let candidate = ResolverCandidate {
			protocol: Protocol::Other("TCP".to_string()),
			address: "192.0.2.1".to_string(),
			port: 53,
		};

		let outcome =
			test_candidate(&candidate, 41999, &config, &supervisor, &cancel).await;
		assert!(!outcome.success);
		assert_eq!(outcome.error, Some(ErrorKind::UnsupportedProtocol));
		assert!(supervisor.is_empty());
	}

	#[cfg(unix)]
	#[tokio::test]
	async fn test_failing_candidate_attempts_max_retries_plus_one() {
		use std::os::unix::fs::PermissionsExt;

		// Fake client that records each invocation and dies at once, so
		// every attempt takes the startup-failed path
		let dir = std::env::temp_dir();
		let counter = dir.join(format!(
			"tunnel_checker_attempts_{}.txt",
			std::process::id(),
		));
		let script = dir.join(format!(
			"tunnel_checker_fake_client_{}.sh",
			std::process::id(),
		));
		std::fs::remove_file(&counter).ok();
		std::fs::write(
			&script,
			format!("#!/bin/sh\necho run >> {}\nexit 1\n", counter.display()),
		)
		.unwrap();
		std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

		let mut config = test_config();
		config.client_executable = script.clone();
		config.max_retries = 2;
		// Generous enough for the script to run and exit before the
		// early-exit check on slow filesystems
		config.startup_wait = Duration::from_millis(200);

		let supervisor = ProcessSupervisor::new();
		let cancel = AtomicBool::new(false);
		let outcome =
			test_candidate(&udp_candidate(), 41999, &config, &supervisor, &cancel).await;

		let runs = std::fs::read_to_string(&counter).unwrap();
		std::fs::remove_file(&counter).ok();
		std::fs::remove_file(&script).ok();

		assert!(!outcome.success);
		assert_eq!(outcome.error, Some(ErrorKind::ClientStartupFailed));
		// Exactly max_retries + 1 spawns, each cleaned up
		assert_eq!(runs.lines().count(), 3);
		assert!(supervisor.is_empty());
	}

	#[cfg(unix)]
	#[tokio::test]
	async fn test_early_exit_retries_and_cleans_up() {
		// /bin/sh rejects the client flags and exits immediately, so every
		// attempt takes the client_startup_failed path
		let config = test_config();
		let supervisor = ProcessSupervisor::new();
		let cancel = AtomicBool::new(false);

		let outcome =
			test_candidate(&udp_candidate(), 41999, &config, &supervisor, &cancel).await;
		assert!(!outcome.success);
		assert_eq!(outcome.error, Some(ErrorKind::ClientStartupFailed));
		assert!(supervisor.is_empty());
	}
}

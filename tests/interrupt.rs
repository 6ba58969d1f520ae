//! End-to-end interrupt handling: SIGINT mid-run must reclaim every spawned
//! client and exit with the reserved interrupted-run status code.

#![cfg(unix)]

use std::os::unix::fs::PermissionsExt;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;

fn wait_for(cond: impl Fn() -> bool, timeout: Duration) -> bool {
	let deadline = Instant::now() + timeout;
	while Instant::now() < deadline {
		if cond() {
			return true;
		}
		std::thread::sleep(Duration::from_millis(100));
	}
	false
}

/// Gone, or a zombie awaiting reaping; either way it no longer runs.
fn client_terminated(pid: u32) -> bool {
	let stat = match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
		Ok(s) => s,
		Err(_) => return true,
	};
	// State is the first field after the parenthesized comm
	stat.rsplit(')')
		.next()
		.and_then(|rest| rest.split_whitespace().next())
		.map(|state| state == "Z" || state == "X")
		.unwrap_or(true)
}

#[test]
fn interrupt_terminates_clients_and_exits_130() {
	let dir = std::env::temp_dir().join(format!(
		"tunnel_checker_interrupt_{}",
		std::process::id(),
	));
	std::fs::create_dir_all(&dir).unwrap();

	let pidfile = dir.join("client.pid");
	let script = dir.join("fake-client.sh");
	let pubkey = dir.join("server.pub");
	let resolvers = dir.join("resolvers.txt");
	let output = dir.join("successful.txt");

	// Fake client: record our pid, then hang long enough to be interrupted.
	// exec keeps the pid stable so SIGTERM reaches the sleeper itself.
	std::fs::write(
		&script,
		format!("#!/bin/sh\necho $$ > {}\nexec sleep 30\n", pidfile.display()),
	)
	.unwrap();
	std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
	std::fs::write(&pubkey, "test-key\n").unwrap();
	std::fs::write(&resolvers, "UDP: 192.0.2.1:53\n").unwrap();

	let mut checker = Command::new(env!("CARGO_BIN_EXE_tunnel-checker"))
		.arg(&resolvers)
		.arg(&pubkey)
		.arg("t.example.org")
		.arg("--client")
		.arg(&script)
		.arg("--output")
		.arg(&output)
		.args([
			"--workers", "2",
			"--listen-port", "42100",
			"--startup-wait", "15",
			"--process-timeout", "1",
			"--curl-timeout", "2",
		])
		.stdout(Stdio::null())
		.stderr(Stdio::null())
		.spawn()
		.expect("spawn tunnel-checker");

	// The pid file appears once the worker has spawned its client; the
	// worker is then parked in its startup wait
	assert!(
		wait_for(|| pidfile.exists(), Duration::from_secs(10)),
		"client never started",
	);
	let client_pid: u32 = std::fs::read_to_string(&pidfile)
		.unwrap()
		.trim()
		.parse()
		.unwrap();

	std::thread::sleep(Duration::from_millis(300));
	kill(Pid::from_raw(checker.id() as i32), Signal::SIGINT).unwrap();

	let deadline = Instant::now() + Duration::from_secs(15);
	let status = loop {
		if let Some(status) = checker.try_wait().unwrap() {
			break status;
		}
		if Instant::now() > deadline {
			checker.kill().ok();
			panic!("tunnel-checker did not exit after SIGINT");
		}
		std::thread::sleep(Duration::from_millis(100));
	};

	assert_eq!(status.code(), Some(130));
	assert!(
		wait_for(|| client_terminated(client_pid), Duration::from_secs(5)),
		"client outlived the run",
	);

	std::fs::remove_dir_all(&dir).ok();
}

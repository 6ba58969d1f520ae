use std::collections::HashSet;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Registry of live slipstream-client pids.
///
/// Workers track a pid before any blocking wait and untrack it during their
/// cleanup step, so a concurrent shutdown can always enumerate exactly the
/// live set. `terminate_all` is sync so the signal path can call it directly.
#[derive(Debug, Default)]
pub struct ProcessSupervisor {
	pids: Mutex<HashSet<u32>>,
}

impl ProcessSupervisor {
	pub fn new() -> ProcessSupervisor {
		ProcessSupervisor::default()
	}

	pub fn track(&self, pid: u32) {
		self.pids.lock().unwrap().insert(pid);
	}

	pub fn untrack(&self, pid: u32) {
		self.pids.lock().unwrap().remove(&pid);
	}

	pub fn is_empty(&self) -> bool {
		self.pids.lock().unwrap().is_empty()
	}

	/// Terminate every tracked process: SIGTERM, wait up to `timeout` for
	/// exit, then SIGKILL. Already-exited pids are tolerated. All pids are
	/// untracked afterwards.
	pub fn terminate_all(&self, timeout: Duration) {
		let pids: Vec<u32> = self.pids.lock().unwrap().iter().copied().collect();
		for pid in pids {
			terminate_gracefully(pid, timeout);
			self.untrack(pid);
		}
	}
}

/// SIGTERM a process and poll for exit; SIGKILL if it outlives `timeout`.
#[cfg(unix)]
fn terminate_gracefully(pid: u32, timeout: Duration) {
	use nix::sys::signal::{kill, Signal};
	use nix::unistd::Pid;

	let nix_pid = Pid::from_raw(pid as i32);
	if kill(nix_pid, Signal::SIGTERM).is_err() {
		// Already gone
		return;
	}

	let deadline = Instant::now() + timeout;
	while Instant::now() < deadline {
		if !process_exists(pid) {
			return;
		}
		std::thread::sleep(Duration::from_millis(100));
	}
	let _ = kill(nix_pid, Signal::SIGKILL);
}

#[cfg(not(unix))]
fn terminate_gracefully(_pid: u32, _timeout: Duration) {}

/// Check whether a process is still alive using `kill(pid, 0)`.
///
/// EPERM means the process exists but belongs to someone else; treat as alive.
#[cfg(unix)]
pub fn process_exists(pid: u32) -> bool {
	use nix::sys::signal::kill;
	use nix::unistd::Pid;

	match kill(Pid::from_raw(pid as i32), None) {
		Ok(_) => true,
		Err(nix::errno::Errno::EPERM) => true,
		Err(_) => false,
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_track_untrack() {
		let sup = ProcessSupervisor::new();
		assert!(sup.is_empty());
		sup.track(1234);
		sup.track(5678);
		assert!(!sup.is_empty());
		sup.untrack(1234);
		sup.untrack(5678);
		assert!(sup.is_empty());
	}

	#[test]
	fn test_untrack_unknown_pid_is_harmless() {
		let sup = ProcessSupervisor::new();
		sup.untrack(99999);
		assert!(sup.is_empty());
	}

	#[test]
	fn test_terminate_all_empties_set() {
		let sup = ProcessSupervisor::new();
		// Above the kernel pid_max, so it can never exist; terminate_all
		// must tolerate the ESRCH
		sup.track(99_999_999);
		sup.terminate_all(Duration::from_millis(200));
		assert!(sup.is_empty());
	}

	#[cfg(unix)]
	#[test]
	fn test_terminate_all_kills_live_child() {
		let child = std::process::Command::new("sleep")
			.arg("30")
			.spawn()
			.expect("spawn sleep");
		let pid = child.id();

		let sup = ProcessSupervisor::new();
		sup.track(pid);
		// The child stays a zombie until reaped below, so the graceful wait
		// runs its full course; keep it short.
		sup.terminate_all(Duration::from_millis(300));
		assert!(sup.is_empty());

		// Reap and verify the child is gone
		let mut child = child;
		let status = child.wait().expect("wait");
		assert!(!status.success());
	}
}

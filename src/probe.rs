use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::process::Command;

use crate::config::ErrorKind;

/// Low-weight URL used for the connectivity check.
const PROBE_URL: &str = "http://www.gstatic.com/generate_204";

/// 100KB payload used for the throughput sample.
const SPEED_TEST_URL: &str = "http://speed.cloudflare.com/__down?bytes=102400";

/// Output captured from one curl invocation.
pub struct ProbeResult {
	pub elapsed: Duration,
	pub outcome: Result<(), ErrorKind>,
	pub stdout: String,
	pub stderr: String,
}

/// Classify a non-zero curl exit by code and stderr phrasing.
pub fn classify_curl_failure(code: i32, stderr: &str) -> ErrorKind {
	if code == 28 {
		ErrorKind::CurlTimeout
	} else if stderr.contains("Connection refused") || stderr.contains("Failed to connect") {
		ErrorKind::ConnectionRefused
	} else if stderr.contains("Could not resolve proxy") {
		ErrorKind::ProxyError
	} else {
		ErrorKind::CurlFailed(code)
	}
}

/// Fetch the probe URL through the local SOCKS5 proxy and time it.
///
/// Curl's own --max-time bounds the request; classification of failures is
/// by exit code and stderr. A missing curl binary maps to `CurlNotFound`,
/// any other spawn fault to `Exception`.
pub async fn run_connectivity_probe(listen_port: u16, timeout: Duration) -> ProbeResult {
	let start = Instant::now();
	let output = Command::new("curl")
		.args([
			"-s",
			"--max-time", &timeout.as_secs().to_string(),
			"-i",
			"--proxy", &format!("socks5://127.0.0.1:{}", listen_port),
			PROBE_URL,
		])
		.stdin(Stdio::null())
		.stdout(Stdio::piped())
		.stderr(Stdio::piped())
		.output()
		.await;
	let elapsed = start.elapsed();

	match output {
		Ok(output) => {
			let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
			let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
			let outcome = if output.status.success() {
				Ok(())
			} else {
				let code = output.status.code().unwrap_or(-1);
				Err(classify_curl_failure(code, &stderr))
			};
			ProbeResult { elapsed, outcome, stdout, stderr }
		}
		Err(e) => {
			let kind = if e.kind() == std::io::ErrorKind::NotFound {
				ErrorKind::CurlNotFound
			} else {
				ErrorKind::Exception
			};
			ProbeResult {
				elapsed,
				outcome: Err(kind),
				stdout: String::new(),
				stderr: String::new(),
			}
		}
	}
}

/// Download the 100KB sample through the proxy and report KB/s.
///
/// Returns None on any failure; a failed sample never invalidates the
/// connectivity result.
pub async fn run_speed_test(listen_port: u16, timeout: Duration) -> Option<f64> {
	let output = Command::new("curl")
		.args([
			"-s",
			"--max-time", &timeout.as_secs().to_string(),
			"-o", "/dev/null",
			"-w", "%{speed_download}",
			"--proxy", &format!("socks5://127.0.0.1:{}", listen_port),
			SPEED_TEST_URL,
		])
		.stdin(Stdio::null())
		.stdout(Stdio::piped())
		.stderr(Stdio::null())
		.output()
		.await
		.ok()?;

	if !output.status.success() {
		return None;
	}
	let speed_bytes: f64 = String::from_utf8_lossy(&output.stdout)
		.trim()
		.parse()
		.ok()?;
	Some(speed_bytes / 1024.0)
}

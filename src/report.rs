use std::fmt::Write as _;
use std::io::Write as _;
use std::path::PathBuf;
use std::sync::Mutex;

use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};

use crate::aggregate::SuccessEntry;
use crate::config::ErrorKind;

/// Canonical ranking of successful entries for the output file.
///
/// With speed testing: descending throughput, ties by ascending latency,
/// entries without a figure last. Without: ascending latency.
pub fn rank_entries(mut entries: Vec<SuccessEntry>, speed_test: bool) -> Vec<SuccessEntry> {
	if speed_test {
		entries.sort_by(|a, b| {
			let ka = (-a.speed_kbps.unwrap_or(0.0), a.elapsed_secs);
			let kb = (-b.speed_kbps.unwrap_or(0.0), b.elapsed_secs);
			ka.partial_cmp(&kb).unwrap_or(std::cmp::Ordering::Equal)
		});
	} else {
		entries.sort_by(|a, b| {
			a.elapsed_secs
				.partial_cmp(&b.elapsed_secs)
				.unwrap_or(std::cmp::Ordering::Equal)
		});
	}
	entries
}

/// Render the output-file body: one line per successful candidate.
pub fn render_success_lines(entries: &[SuccessEntry]) -> String {
	let mut body = String::new();
	for entry in entries {
		match entry.speed_kbps {
			Some(kbps) => {
				let _ = writeln!(
					body,
					"{}: {}:{} {:.2}s {:.1}KB/s",
					entry.protocol, entry.address, entry.port, entry.elapsed_secs, kbps,
				);
			}
			None => {
				let _ = writeln!(
					body,
					"{}: {}:{} {:.2}s",
					entry.protocol, entry.address, entry.port, entry.elapsed_secs,
				);
			}
		}
	}
	body
}

/// Maintains the success output file as a live mirror of the ranked list.
///
/// The file is its own shared resource; a mutex serializes concurrent
/// writers. Live flush failures are swallowed (the run must not stall on a
/// full disk); the final write reports its failure to the operator.
#[derive(Debug)]
pub struct ReportWriter {
	path: PathBuf,
	lock: Mutex<()>,
}

impl ReportWriter {
	pub fn new(path: impl Into<PathBuf>) -> ReportWriter {
		ReportWriter {
			path: path.into(),
			lock: Mutex::new(()),
		}
	}

	/// Rewrite the file with the current success list (called on each new
	/// success for real-time durability).
	///
	/// The ranked list is re-read while the file lock is held, so two
	/// successes flushing concurrently cannot leave an older snapshot as
	/// the last write.
	pub fn flush_live(&self, aggregate: &crate::aggregate::AggregateState) {
		let _guard = self.lock.lock().unwrap();
		let entries = aggregate.successes();
		let _ = std::fs::write(&self.path, render_success_lines(&entries));
	}

	/// One final write with the fully-drained, canonically ranked list.
	pub fn finalize(&self, entries: Vec<SuccessEntry>, speed_test: bool) {
		let ranked = rank_entries(entries, speed_test);
		let _guard = self.lock.lock().unwrap();
		match std::fs::write(&self.path, render_success_lines(&ranked)) {
			Ok(()) => {
				let sort_kind = if speed_test { "highest speed" } else { "lowest latency" };
				println!(
					"\nResults written to {} (sorted by {})",
					self.path.display(),
					sort_kind,
				);
			}
			Err(e) => {
				eprintln!("\nError writing results to {}: {}", self.path.display(), e);
			}
		}
	}
}

/// Append-only log of exhausted failures, one line per candidate.
#[derive(Debug)]
pub struct ErrorLog {
	path: PathBuf,
	lock: Mutex<()>,
}

impl ErrorLog {
	pub fn new(path: impl Into<PathBuf>) -> ErrorLog {
		ErrorLog {
			path: path.into(),
			lock: Mutex::new(()),
		}
	}

	pub fn append(&self, candidate: &crate::config::ResolverCandidate, kind: &ErrorKind, verbose: bool) {
		let _guard = self.lock.lock().unwrap();
		let result = std::fs::OpenOptions::new()
			.create(true)
			.append(true)
			.open(&self.path)
			.and_then(|mut f| writeln!(f, "{} | {}", candidate, kind));
		if let Err(e) = result {
			if verbose {
				eprintln!("Error writing to error log: {}", e);
			}
		}
	}

	pub fn path(&self) -> &std::path::Path {
		&self.path
	}
}

/// Print the end-of-run summary: success ratio, speed statistics when the
/// speed test ran, and the failure histogram in descending frequency.
pub fn print_summary(
	total: usize,
	succeeded: usize,
	skipped_non_udp: usize,
	histogram: &[(ErrorKind, u64)],
	successes: &[SuccessEntry],
	speed_test: bool,
	error_log: Option<&ErrorLog>,
) {
	let failed = total.saturating_sub(succeeded);

	println!("\n{}", "=".repeat(60));
	println!("SUMMARY");
	println!("{}", "=".repeat(60));
	println!("Completed: {}/{} successful", succeeded, total);
	if skipped_non_udp > 0 {
		println!("Skipped: {} non-UDP servers (not tested)", skipped_non_udp);
	}

	if speed_test {
		let speeds: Vec<f64> = successes.iter().filter_map(|e| e.speed_kbps).collect();
		if !speeds.is_empty() {
			let sum: f64 = speeds.iter().sum();
			let avg = sum / speeds.len() as f64;
			let best = speeds.iter().cloned().fold(f64::MIN, f64::max);
			let worst = speeds.iter().cloned().fold(f64::MAX, f64::min);
			println!("\nSpeed Statistics:");
			println!("  - Average: {:.1} KB/sec", avg);
			println!("  - Best:    {:.1} KB/sec", best);
			println!("  - Worst:   {:.1} KB/sec", worst);
		}
	}

	if failed > 0 && !histogram.is_empty() {
		println!("\nErrors ({} total):", failed);
		let mut table = Table::new();
		table.load_preset(UTF8_FULL);
		table.set_content_arrangement(ContentArrangement::Dynamic);
		table.set_header(vec!["Error", "Count"]);
		for (kind, count) in histogram {
			table.add_row(vec![kind.to_string(), count.to_string()]);
		}
		println!("{table}");
	}

	if let Some(log) = error_log {
		println!("\nError log written to: {}", log.path().display());
	}

	println!("{}", "=".repeat(60));
}

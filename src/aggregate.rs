use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use crate::config::{ErrorKind, TestOutcome};

/// Bound on the recent-activity ring buffer.
const RECENT_CAPACITY: usize = 50;

/// One entry in the ranked success list.
#[derive(Debug, Clone)]
pub struct SuccessEntry {
	pub protocol: crate::config::Protocol,
	pub address: String,
	pub port: u16,
	pub elapsed_secs: f64,
	pub speed_kbps: Option<f64>,
	/// Compact line for the ranked display panel.
	pub display: String,
}

impl SuccessEntry {
	/// Sort key: highest speed first, then lowest latency; entries without
	/// a throughput figure sort as zero speed, i.e. last.
	fn sort_key(&self) -> (f64, f64) {
		(-self.speed_kbps.unwrap_or(0.0), self.elapsed_secs)
	}
}

/// Consistent snapshot of the run state for the progress display.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
	pub completed: usize,
	pub succeeded: usize,
	pub recent: Vec<String>,
	pub success_lines: Vec<String>,
}

#[derive(Debug, Default)]
struct RunStats {
	completed: usize,
	succeeded: usize,
	errors: HashMap<ErrorKind, u64>,
	successes: Vec<SuccessEntry>,
	recent: VecDeque<String>,
}

/// Thread-safe accumulation of run-wide counters, the error histogram, the
/// ranked success list, and the bounded recent-activity log.
///
/// All mutation happens in `record_outcome` under one mutex, so readers
/// never observe a completed count without its matching list state.
#[derive(Debug, Default)]
pub struct AggregateState {
	stats: Mutex<RunStats>,
}

impl AggregateState {
	pub fn new() -> AggregateState {
		AggregateState::default()
	}

	/// Fold one terminal outcome into the shared state. Returns whether the
	/// outcome was a success (the caller flushes the live report on true).
	pub fn record_outcome(&self, outcome: &TestOutcome) -> bool {
		let mut stats = self.stats.lock().unwrap();
		stats.completed += 1;

		if outcome.success {
			stats.succeeded += 1;

			let speed_label = match outcome.speed_kbps {
				Some(kbps) => format!("{:.0}KB/s", kbps),
				None => "--KB/s".to_string(),
			};
			let entry = SuccessEntry {
				protocol: outcome.candidate.protocol.clone(),
				address: outcome.candidate.address.clone(),
				port: outcome.candidate.port,
				elapsed_secs: outcome.elapsed_secs,
				speed_kbps: outcome.speed_kbps,
				display: format!(
					"{} {:.1}s {}",
					outcome.candidate.target(),
					outcome.elapsed_secs,
					speed_label,
				),
			};
			stats.successes.push(entry);
			stats.successes.sort_by(|a, b| {
				a.sort_key()
					.partial_cmp(&b.sort_key())
					.unwrap_or(std::cmp::Ordering::Equal)
			});

			let line = match outcome.speed_kbps {
				Some(kbps) => format!(
					"✓ {} {:.2}s {:.1}KB/s",
					outcome.candidate, outcome.elapsed_secs, kbps,
				),
				None => format!("✓ {} {:.2}s", outcome.candidate, outcome.elapsed_secs),
			};
			push_recent(&mut stats.recent, line);

			true
		} else {
			if let Some(kind) = &outcome.error {
				*stats.errors.entry(kind.clone()).or_insert(0) += 1;
				push_recent(
					&mut stats.recent,
					format!("✗ {} {}", outcome.candidate, kind),
				);
			}
			false
		}
	}

	/// Snapshot for the progress display; copies are taken under the lock
	/// and the lock is released before any rendering happens.
	pub fn snapshot(&self) -> Snapshot {
		let stats = self.stats.lock().unwrap();
		Snapshot {
			completed: stats.completed,
			succeeded: stats.succeeded,
			recent: stats.recent.iter().cloned().collect(),
			success_lines: stats.successes.iter().map(|e| e.display.clone()).collect(),
		}
	}

	/// Copy of the ranked success list (for the final report write).
	pub fn successes(&self) -> Vec<SuccessEntry> {
		self.stats.lock().unwrap().successes.clone()
	}

	pub fn completed(&self) -> usize {
		self.stats.lock().unwrap().completed
	}

	pub fn succeeded(&self) -> usize {
		self.stats.lock().unwrap().succeeded
	}

	/// Error histogram sorted by descending frequency.
	pub fn error_histogram(&self) -> Vec<(ErrorKind, u64)> {
		let stats = self.stats.lock().unwrap();
		let mut entries: Vec<(ErrorKind, u64)> =
			stats.errors.iter().map(|(k, v)| (k.clone(), *v)).collect();
		entries.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.to_string().cmp(&b.0.to_string())));
		entries
	}
}

fn push_recent(recent: &mut VecDeque<String>, line: String) {
	recent.push_back(line);
	while recent.len() > RECENT_CAPACITY {
		recent.pop_front();
	}
}

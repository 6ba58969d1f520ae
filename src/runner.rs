use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Semaphore;

use crate::aggregate::AggregateState;
use crate::checker;
use crate::config::{CheckerConfig, ErrorKind, ResolverCandidate, TestOutcome};
use crate::report::{ErrorLog, ReportWriter};
use crate::supervisor::ProcessSupervisor;

/// Everything a worker task needs, shared across the pool.
pub struct RunContext {
	pub config: CheckerConfig,
	pub aggregate: Arc<AggregateState>,
	pub supervisor: Arc<ProcessSupervisor>,
	pub cancel: Arc<AtomicBool>,
	pub report: Arc<ReportWriter>,
	pub error_log: Option<Arc<ErrorLog>>,
}

/// Run one test task per candidate across a bounded worker pool.
///
/// Each candidate gets a round-robin port from the allocated set and one
/// spawned task gated by a semaphore of `workers` permits. Outcomes are
/// folded into the aggregator in completion order; each new success triggers
/// a live report flush, each exhausted failure an error-log append. No new
/// tasks are submitted once cancellation is observed, but in-flight tasks
/// run their cleanup to completion.
pub async fn run_pool(
	candidates: Vec<ResolverCandidate>,
	ports: Vec<u16>,
	workers: usize,
	ctx: RunContext,
) {
	let semaphore = Arc::new(Semaphore::new(workers));
	let mut handles = Vec::new();

	for (idx, candidate) in candidates.into_iter().enumerate() {
		if ctx.cancel.load(Ordering::SeqCst) {
			break;
		}

		let assigned_port = ports[idx % workers];
		let sem = semaphore.clone();
		let config = ctx.config.clone();
		let aggregate = ctx.aggregate.clone();
		let supervisor = ctx.supervisor.clone();
		let cancel = ctx.cancel.clone();
		let report = ctx.report.clone();
		let error_log = ctx.error_log.clone();

		let task_candidate = candidate.clone();
		handles.push((
			candidate,
			tokio::spawn(async move {
				let _permit = sem.acquire().await.unwrap();

				let outcome = checker::test_candidate(
					&task_candidate,
					assigned_port,
					&config,
					&supervisor,
					&cancel,
				)
				.await;

				// A cancelled run drops its partial outcomes; the shutdown
				// path owns the exit
				if cancel.load(Ordering::SeqCst) {
					return;
				}

				record(&aggregate, &report, &error_log, &config, &outcome);
			}),
		));
	}

	for (candidate, handle) in handles {
		if let Err(e) = handle.await {
			if ctx.config.verbose {
				eprintln!("Warning: task for {} failed: {}", candidate, e);
			}
			// A panicked task still produces exactly one outcome
			let outcome = TestOutcome {
				candidate,
				success: false,
				elapsed_secs: 0.0,
				speed_kbps: None,
				error: Some(ErrorKind::Exception),
			};
			record(
				&ctx.aggregate,
				&ctx.report,
				&ctx.error_log,
				&ctx.config,
				&outcome,
			);
		}
	}
}

fn record(
	aggregate: &AggregateState,
	report: &ReportWriter,
	error_log: &Option<Arc<ErrorLog>>,
	config: &CheckerConfig,
	outcome: &TestOutcome,
) {
	if aggregate.record_outcome(outcome) {
		report.flush_live(aggregate);
	} else if let (Some(log), Some(kind)) = (error_log, &outcome.error) {
		log.append(&outcome.candidate, kind, config.verbose);
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::config::Protocol;
	use std::path::PathBuf;
	use std::time::Duration;

	fn test_context(max_retries: u32) -> RunContext {
		let output = std::env::temp_dir().join(format!(
			"tunnel_checker_pool_{}_{}.txt",
			std::process::id(),
			max_retries,
		));
		RunContext {
			config: CheckerConfig {
				// /bin/sh exits immediately on the unknown client flags,
				// driving every candidate down the startup-failed path
				client_executable: PathBuf::from("/bin/sh"),
				pubkey_file: PathBuf::from("/dev/null"),
				domain: "t.example.org".to_string(),
				curl_timeout: Duration::from_secs(1),
				process_timeout: Duration::from_secs(1),
				startup_wait: Duration::from_millis(30),
				retry_backoff: Duration::from_millis(30),
				max_retries,
				speed_test: false,
				verbose: false,
			},
			aggregate: Arc::new(AggregateState::new()),
			supervisor: Arc::new(ProcessSupervisor::new()),
			cancel: Arc::new(AtomicBool::new(false)),
			report: Arc::new(ReportWriter::new(output)),
			error_log: None,
		}
	}

	fn candidates(n: usize) -> Vec<ResolverCandidate> {
		(0..n)
			.map(|i| ResolverCandidate {
				protocol: Protocol::Udp,
				address: format!("192.0.2.{}", i + 1),
				port: 53,
			})
			.collect()
	}

	#[cfg(unix)]
	#[tokio::test]
	async fn test_pool_drains_all_candidates() {
		let ctx = test_context(0);
		let aggregate = ctx.aggregate.clone();
		let supervisor = ctx.supervisor.clone();

		run_pool(candidates(5), vec![42001, 42002], 2, ctx).await;

		assert_eq!(aggregate.completed(), 5);
		assert_eq!(aggregate.succeeded(), 0);
		assert!(supervisor.is_empty());

		let histogram = aggregate.error_histogram();
		assert_eq!(histogram.len(), 1);
		assert_eq!(histogram[0], (ErrorKind::ClientStartupFailed, 5));
	}

	#[tokio::test]
	async fn test_pool_cancelled_before_start_records_nothing() {
		let ctx = test_context(0);
		ctx.cancel.store(true, Ordering::SeqCst);
		let aggregate = ctx.aggregate.clone();

		run_pool(candidates(4), vec![42003], 1, ctx).await;

		assert_eq!(aggregate.completed(), 0);
	}
}

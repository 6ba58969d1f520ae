mod aggregate;
mod checker;
mod cli;
mod config;
mod monitor;
mod ports;
mod probe;
mod report;
mod resolver;
mod runner;
mod shutdown;
mod supervisor;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::bail;
use clap::Parser;

use crate::aggregate::AggregateState;
use crate::cli::Cli;
use crate::config::{CheckerConfig, Protocol};
use crate::report::{ErrorLog, ReportWriter};
use crate::runner::RunContext;
use crate::supervisor::ProcessSupervisor;

/// Fixed pause between retry attempts for one candidate.
const RETRY_BACKOFF: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	let cli = Cli::parse();

	// Single-worker runs are verbose by default; the full-screen display
	// owns the terminal in multi-worker mode, so narration is suppressed
	let fullscreen = cli.workers > 1;
	let verbose = if fullscreen {
		false
	} else {
		cli.verbose || cli.workers == 1
	};

	// Preflight: global fatal conditions abort before any testing
	let client_executable = PathBuf::from(&cli.client_executable);
	if !client_executable.exists() {
		bail!(
			"slipstream-client executable not found at {}\n\
			 Build it with: go build -o slipstream-client ./cmd/client",
			client_executable.display(),
		);
	}
	if !Path::new(&cli.pubkey_file).exists() {
		bail!("public key file not found at {}", cli.pubkey_file);
	}

	// Read and split the candidate list; only UDP resolvers are eligible
	let all_candidates = resolver::read_candidate_file(&cli.dns_servers_file)?;
	if all_candidates.is_empty() {
		println!("No DNS servers found in the file.");
		return Ok(());
	}

	let (udp_candidates, skipped): (Vec<_>, Vec<_>) = all_candidates
		.into_iter()
		.partition(|c| c.protocol == Protocol::Udp);
	let skipped_count = skipped.len();
	if skipped_count > 0 {
		println!(
			"Note: Skipping {} non-UDP servers (slipstream-client only supports UDP resolvers)",
			skipped_count,
		);
	}
	if udp_candidates.is_empty() {
		println!("No UDP DNS servers found in the file. slipstream-client only supports UDP resolvers.");
		return Ok(());
	}

	let total = udp_candidates.len();
	println!("Found {} UDP DNS servers to test.", total);

	let workers = cli.workers as usize;
	let allocated_ports = ports::allocate_ports(cli.listen_port, workers)?;
	println!(
		"Allocated ports: {}-{}",
		allocated_ports[0],
		allocated_ports[allocated_ports.len() - 1],
	);

	let config = CheckerConfig {
		client_executable,
		pubkey_file: PathBuf::from(&cli.pubkey_file),
		domain: cli.domain_string.clone(),
		curl_timeout: Duration::from_secs(cli.curl_timeout),
		process_timeout: Duration::from_secs(cli.process_timeout),
		startup_wait: Duration::from_secs(cli.startup_wait),
		retry_backoff: RETRY_BACKOFF,
		max_retries: cli.retries,
		speed_test: cli.speed_test,
		verbose,
	};

	// Shared run state
	let aggregate = Arc::new(AggregateState::new());
	let supervisor = Arc::new(ProcessSupervisor::new());
	let cancel = Arc::new(AtomicBool::new(false));
	let report = Arc::new(ReportWriter::new(&cli.output));
	let error_log = cli.error_log.as_ref().map(|p| Arc::new(ErrorLog::new(p)));

	shutdown::install(
		cancel.clone(),
		supervisor.clone(),
		config.process_timeout,
		fullscreen,
	);

	let start_time = Instant::now();

	// Progress display runs only in multi-worker mode
	let stop_monitor = Arc::new(AtomicBool::new(false));
	let monitor_handle = if fullscreen {
		Some(tokio::spawn(monitor::run_monitor(
			aggregate.clone(),
			total,
			start_time,
			stop_monitor.clone(),
		)))
	} else {
		None
	};

	runner::run_pool(
		udp_candidates,
		allocated_ports,
		workers,
		RunContext {
			config,
			aggregate: aggregate.clone(),
			supervisor: supervisor.clone(),
			cancel,
			report: report.clone(),
			error_log: error_log.clone(),
		},
	)
	.await;

	// Drain the display before writing to the main screen again
	stop_monitor.store(true, Ordering::SeqCst);
	if let Some(handle) = monitor_handle {
		let _ = tokio::time::timeout(Duration::from_secs(2), handle).await;
		monitor::restore_terminal();
	}

	report.finalize(aggregate.successes(), cli.speed_test);
	report::print_summary(
		total,
		aggregate.succeeded(),
		skipped_count,
		&aggregate.error_histogram(),
		&aggregate.successes(),
		cli.speed_test,
		error_log.as_deref(),
	);

	Ok(())
}

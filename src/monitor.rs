use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossterm::{cursor, execute, terminal};

use crate::aggregate::{AggregateState, Snapshot};

pub const GREEN: &str = "\x1b[92m";
pub const RED: &str = "\x1b[91m";
pub const CYAN: &str = "\x1b[96m";
pub const YELLOW: &str = "\x1b[93m";
pub const BOLD: &str = "\x1b[1m";
pub const RESET: &str = "\x1b[0m";

/// Redraw cadence of the progress display.
const POLL_INTERVAL: Duration = Duration::from_millis(300);

/// Fallback terminal geometry when size detection fails.
const DEFAULT_SIZE: (u16, u16) = (100, 30);

/// Run the full-screen progress display until `stop` is set.
///
/// Read-only consumer: every tick takes one snapshot from the aggregator and
/// renders from the copy, so workers are never blocked by terminal I/O.
/// Redundant redraws are suppressed by comparing rendered frames.
pub async fn run_monitor(
	aggregate: Arc<AggregateState>,
	total: usize,
	start_time: Instant,
	stop: Arc<AtomicBool>,
) {
	let mut stdout = std::io::stdout();
	let _ = execute!(stdout, terminal::EnterAlternateScreen, cursor::Hide);

	let mut interval = tokio::time::interval(POLL_INTERVAL);
	let mut last_frame = String::new();

	while !stop.load(Ordering::SeqCst) {
		interval.tick().await;

		let (cols, rows) = terminal::size().unwrap_or(DEFAULT_SIZE);
		let snapshot = aggregate.snapshot();
		let frame = render_frame(&snapshot, total, start_time.elapsed(), cols, rows);

		if frame != last_frame {
			// Home the cursor and repaint; each line ends in erase-to-EOL
			let _ = execute!(stdout, cursor::MoveTo(0, 0));
			let _ = stdout.write_all(frame.as_bytes());
			let _ = stdout.flush();
			last_frame = frame;
		}
	}

	restore_terminal();
}

/// Leave the alternate screen and show the cursor again. Safe to call more
/// than once or when the alternate screen was never entered.
pub fn restore_terminal() {
	let mut stdout = std::io::stdout();
	let _ = execute!(stdout, cursor::Show, terminal::LeaveAlternateScreen);
}

/// Render the two-panel frame: recent activity left, ranked successes right.
pub fn render_frame(
	snapshot: &Snapshot,
	total: usize,
	elapsed: Duration,
	cols: u16,
	rows: u16,
) -> String {
	let width = cols.max(40) as usize;
	let height = rows.max(15) as usize;

	// Fixed column split
	let lw = width / 2 - 2;
	let rw = width - lw - 5;

	let done = snapshot.completed;
	let ok = snapshot.succeeded;
	let fail = done - ok;

	let pct = if total > 0 {
		done as f64 / total as f64 * 100.0
	} else {
		0.0
	};
	let eta = if done > 0 {
		let per_item = elapsed.as_secs_f64() / done as f64;
		format_duration((per_item * (total - done) as f64) as u64)
	} else {
		"--:--".to_string()
	};
	let elapsed_s = format_duration(elapsed.as_secs());

	// Progress bar
	let bw = if lw > 24 { lw - 14 } else { 10 };
	let bf = (bw as f64 * pct / 100.0) as usize;
	let bar = format!("{}{}", "#".repeat(bf.min(bw)), "-".repeat(bw - bf.min(bw)));

	let succs = &snapshot.success_lines;
	let succ_cell = |i: usize| -> String {
		match succs.get(i) {
			Some(line) => format!(" {}", truncate(line, rw.saturating_sub(2))),
			None => String::new(),
		}
	};

	let hborder = format!(
		"{C}+{}+{N} {G}+{}+{N}",
		"-".repeat(lw),
		"-".repeat(rw),
		C = CYAN,
		G = GREEN,
		N = RESET,
	);
	let row = |left: &str, right: &str| -> String {
		format!(
			"{C}|{N}{}{C}|{N} {G}|{N}{}{G}|{N}",
			pad(left, lw),
			pad(right, rw),
			C = CYAN,
			G = GREEN,
			N = RESET,
		)
	};

	let mut lines = Vec::new();
	lines.push(hborder.clone());
	lines.push(row(
		&format!(" {}SLIPSTREAM TUNNEL CHECKER{}", BOLD, RESET),
		&format!(" {}SUCCESS (best first){}", BOLD, RESET),
	));
	lines.push(hborder.clone());
	lines.push(row(
		&format!(" [{}] {:5.1}%", bar, pct),
		&if succs.is_empty() {
			" (waiting...)".to_string()
		} else {
			succ_cell(0)
		},
	));
	lines.push(row(
		&format!(" {}OK:{}{} {}FAIL:{}{} / {}", GREEN, ok, RESET, RED, fail, RESET, total),
		&succ_cell(1),
	));
	lines.push(row(
		&format!(" Elapsed: {}  ETA: {}", elapsed_s, eta),
		&succ_cell(2),
	));
	// Left panel separator before the recent-tests section
	lines.push(format!(
		"{C}+{}+{N} {G}|{N}{}{G}|{N}",
		"-".repeat(lw),
		pad(&succ_cell(3), rw),
		C = CYAN,
		G = GREEN,
		N = RESET,
	));
	lines.push(row(&format!(" {}Recent Tests:{}", BOLD, RESET), &succ_cell(4)));

	// Fill the rest of the screen with recent tests (most recent first)
	// and the success-list tail
	let data_rows = (height.saturating_sub(lines.len() + 1)).max(5);
	for i in 0..data_rows {
		let left = match snapshot.recent.iter().rev().nth(i) {
			Some(raw) => {
				let text = truncate(raw, lw.saturating_sub(5));
				if let Some(rest) = text.strip_prefix('✓') {
					format!(" {}OK{}{}", GREEN, RESET, rest)
				} else if let Some(rest) = text.strip_prefix('✗') {
					format!(" {}X{} {}", RED, RESET, rest)
				} else {
					format!(" {}", text)
				}
			}
			None => String::new(),
		};
		lines.push(row(&left, &succ_cell(5 + i)));
	}
	lines.push(hborder);

	// Erase-to-EOL after each line prevents stale tails without a full clear
	let mut frame = String::new();
	for line in lines {
		frame.push_str(&line);
		frame.push_str("\x1b[K\n");
	}
	frame
}

/// Format whole seconds as H:MM:SS.
pub fn format_duration(total_secs: u64) -> String {
	let hours = total_secs / 3600;
	let minutes = (total_secs % 3600) / 60;
	let seconds = total_secs % 60;
	format!("{}:{:02}:{:02}", hours, minutes, seconds)
}

/// Visible length of a string, ignoring ANSI SGR escape sequences.
fn visible_len(s: &str) -> usize {
	let mut len = 0;
	let mut chars = s.chars();
	while let Some(c) = chars.next() {
		if c == '\x1b' {
			// Skip to the terminating 'm' of the SGR sequence
			for e in chars.by_ref() {
				if e == 'm' {
					break;
				}
			}
		} else {
			len += 1;
		}
	}
	len
}

/// Pad text to `width` visible columns, accounting for ANSI codes.
fn pad(text: &str, width: usize) -> String {
	let visible = visible_len(text);
	let mut out = text.to_string();
	for _ in visible..width {
		out.push(' ');
	}
	out
}

fn truncate(s: &str, max_chars: usize) -> String {
	s.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_format_duration() {
		assert_eq!(format_duration(0), "0:00:00");
		assert_eq!(format_duration(61), "0:01:01");
		assert_eq!(format_duration(3723), "1:02:03");
	}

	#[test]
	fn test_visible_len_ignores_ansi() {
		assert_eq!(visible_len("plain"), 5);
		assert_eq!(visible_len("\x1b[92mOK\x1b[0m"), 2);
	}

	#[test]
	fn test_pad_accounts_for_ansi() {
		let padded = pad("\x1b[1mhi\x1b[0m", 5);
		assert_eq!(visible_len(&padded), 5);
	}

	#[test]
	fn test_truncate_is_char_safe() {
		assert_eq!(truncate("✓ UDP: 1.1.1.1:53", 5), "✓ UDP");
		assert_eq!(truncate("short", 50), "short");
	}

	#[test]
	fn test_render_frame_stable_for_same_snapshot() {
		let snapshot = Snapshot {
			completed: 3,
			succeeded: 2,
			recent: vec!["✓ UDP: 1.1.1.1:53 0.20s".to_string()],
			success_lines: vec!["1.1.1.1:53 0.2s --KB/s".to_string()],
		};
		let a = render_frame(&snapshot, 10, Duration::from_secs(9), 100, 30);
		let b = render_frame(&snapshot, 10, Duration::from_secs(9), 100, 30);
		assert_eq!(a, b);
	}

	#[test]
	fn test_render_frame_shows_counts() {
		let snapshot = Snapshot {
			completed: 4,
			succeeded: 1,
			recent: Vec::new(),
			success_lines: Vec::new(),
		};
		let frame = render_frame(&snapshot, 8, Duration::from_secs(10), 100, 30);
		assert!(frame.contains("OK:"));
		assert!(frame.contains("FAIL:"));
		assert!(frame.contains("/ 8"));
		assert!(frame.contains("(waiting...)"));
	}
}

use anyhow::{anyhow, Result};

use crate::config::{Protocol, ResolverCandidate};

/// Parse one resolver list line of the form "PROTOCOL: address:port".
///
/// Returns None for lines that do not match the format or carry an invalid
/// port; callers warn and skip those.
pub fn parse_line(line: &str) -> Option<ResolverCandidate> {
	let (protocol_part, server_part) = line.split_once(':')?;
	let protocol = Protocol::parse(protocol_part);

	// server_part is "address:port"; IPv6 addresses keep their inner colons
	let (address, port_part) = server_part.trim().rsplit_once(':')?;
	let address = address.trim();
	if address.is_empty() {
		return None;
	}
	let port: u16 = port_part.trim().parse().ok()?;

	Some(ResolverCandidate {
		protocol,
		address: address.to_string(),
		port,
	})
}

/// Read resolver candidates from a file, one per line.
///
/// Blank lines and lines starting with '#' are skipped. Malformed lines
/// produce a warning on stderr and are skipped, never fatal.
pub fn read_candidate_file(path: &str) -> Result<Vec<ResolverCandidate>> {
	let content = std::fs::read_to_string(path)
		.map_err(|e| anyhow!("failed to read DNS servers file '{}': {}", path, e))?;
	let mut candidates = Vec::new();
	for line in content.lines() {
		let trimmed = line.trim();
		if trimmed.is_empty() || trimmed.starts_with('#') {
			continue;
		}
		match parse_line(trimmed) {
			Some(candidate) => candidates.push(candidate),
			None => eprintln!("Warning: invalid format in line: {}", trimmed),
		}
	}
	Ok(candidates)
}

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Transport protocol of a resolver candidate.
///
/// Only UDP resolvers can anchor a slipstream tunnel; everything else
/// (TCP, DOH, DOT, ...) is preserved for reporting but never tested.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Protocol {
	Udp,
	Other(String),
}

impl Protocol {
	pub fn parse(s: &str) -> Protocol {
		let upper = s.trim().to_uppercase();
		if upper == "UDP" {
			Protocol::Udp
		} else {
			Protocol::Other(upper)
		}
	}
}

impl fmt::Display for Protocol {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Protocol::Udp => write!(f, "UDP"),
			Protocol::Other(name) => write!(f, "{}", name),
		}
	}
}

/// One resolver endpoint under test. Immutable once parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolverCandidate {
	pub protocol: Protocol,
	pub address: String,
	pub port: u16,
}

impl ResolverCandidate {
	/// Resolver target in the form the tunnel client expects.
	pub fn target(&self) -> String {
		format!("{}:{}", self.address, self.port)
	}
}

impl fmt::Display for ResolverCandidate {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}: {}:{}", self.protocol, self.address, self.port)
	}
}

/// Terminal failure classification for one candidate.
///
/// Display output is the stable wire form used in the error log and the
/// summary histogram.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ErrorKind {
	UnsupportedProtocol,
	ClientStartupFailed,
	CurlTimeout,
	ConnectionRefused,
	ProxyError,
	CurlFailed(i32),
	CurlNotFound,
	Exception,
}

impl fmt::Display for ErrorKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			ErrorKind::UnsupportedProtocol => write!(f, "unsupported_protocol"),
			ErrorKind::ClientStartupFailed => write!(f, "client_startup_failed"),
			ErrorKind::CurlTimeout => write!(f, "curl_timeout"),
			ErrorKind::ConnectionRefused => write!(f, "connection_refused"),
			ErrorKind::ProxyError => write!(f, "proxy_error"),
			ErrorKind::CurlFailed(code) => write!(f, "curl_failed_code_{}", code),
			ErrorKind::CurlNotFound => write!(f, "curl_not_found"),
			ErrorKind::Exception => write!(f, "exception"),
		}
	}
}

/// Final result of testing one candidate, produced exactly once after the
/// retry loop is exhausted.
#[derive(Debug, Clone)]
pub struct TestOutcome {
	pub candidate: ResolverCandidate,
	pub success: bool,
	pub elapsed_secs: f64,
	pub speed_kbps: Option<f64>,
	pub error: Option<ErrorKind>,
}

/// Checker configuration shared by every worker
#[derive(Debug, Clone)]
pub struct CheckerConfig {
	pub client_executable: PathBuf,
	pub pubkey_file: PathBuf,
	pub domain: String,
	pub curl_timeout: Duration,
	pub process_timeout: Duration,
	pub startup_wait: Duration,
	pub retry_backoff: Duration,
	pub max_retries: u32,
	pub speed_test: bool,
	pub verbose: bool,
}

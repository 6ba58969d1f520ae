use clap::Parser;

/// Slipstream tunnel resolver checker
#[derive(Parser, Debug)]
#[command(name = "tunnel-checker")]
#[command(about = "Test DNS resolvers for slipstream tunnel connectivity")]
pub struct Cli {
	/// File containing DNS servers to test (format: 'UDP: address:port')
	pub dns_servers_file: String,

	/// Server public key file for slipstream-client
	pub pubkey_file: String,

	/// Tunnel domain for slipstream-client (e.g. f.example.org)
	pub domain_string: String,

	/// Base local SOCKS5 port; workers are assigned consecutive free ports
	#[arg(long = "listen-port", default_value = "56345")]
	pub listen_port: u16,

	/// Curl request timeout in seconds
	#[arg(long = "curl-timeout", default_value = "30")]
	pub curl_timeout: u64,

	/// Output file for successful DNS servers
	#[arg(short = 'o', long = "output", default_value = "tunnel_check_successful.txt")]
	pub output: String,

	/// Number of concurrent workers (each holds one port and one client process)
	#[arg(short = 'w', long = "workers", default_value = "5",
		value_parser = clap::value_parser!(u16).range(1..=20))]
	pub workers: u16,

	/// Show details for each test (implied by --workers 1)
	#[arg(short = 'v', long = "verbose")]
	pub verbose: bool,

	/// Optional file to log failed DNS servers with error kinds
	#[arg(long = "error-log")]
	pub error_log: Option<String>,

	/// Seconds to wait for slipstream-client termination before force-kill
	#[arg(long = "process-timeout", default_value = "5")]
	pub process_timeout: u64,

	/// Seconds to wait for tunnel establishment before probing
	#[arg(long = "startup-wait", default_value = "5")]
	pub startup_wait: u64,

	/// Number of retries for failed resolvers
	#[arg(long = "retries", default_value = "1")]
	pub retries: u32,

	/// Run a 100KB download speed test for each successful resolver
	#[arg(long = "speed-test")]
	pub speed_test: bool,

	/// Path to the slipstream-client executable
	#[arg(long = "client", default_value = "./slipstream-client")]
	pub client_executable: String,
}

use std::net::TcpListener;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PortAllocError {
	#[error("not enough allocatable ports available: only allocated {found} out of {needed} required ports")]
	Exhausted { found: usize, needed: usize },
}

/// Allocate `count` free loopback ports scanning upward from `base_port`.
///
/// Each returned port was bindable at call time; the OS may hand it to
/// someone else before the worker binds it. That race is accepted.
pub fn allocate_ports(base_port: u16, count: usize) -> Result<Vec<u16>, PortAllocError> {
	let mut allocated = Vec::with_capacity(count);
	let mut current = base_port as u32;

	while allocated.len() < count {
		if current > u16::MAX as u32 {
			return Err(PortAllocError::Exhausted {
				found: allocated.len(),
				needed: count,
			});
		}
		// Bind-probe; the listener is dropped immediately
		if TcpListener::bind(("127.0.0.1", current as u16)).is_ok() {
			allocated.push(current as u16);
		}
		current += 1;
	}

	Ok(allocated)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_allocates_increasing_ports() {
		let ports = allocate_ports(41800, 3).unwrap();
		assert_eq!(ports.len(), 3);
		assert!(ports.windows(2).all(|w| w[0] < w[1]));
		assert!(ports[0] >= 41800);
	}

	#[test]
	fn test_skips_occupied_port() {
		// Hold the base port so the allocator must move past it
		let holder = TcpListener::bind(("127.0.0.1", 0)).unwrap();
		let held = holder.local_addr().unwrap().port();

		let ports = allocate_ports(held, 2).unwrap();
		assert_eq!(ports.len(), 2);
		assert!(ports.iter().all(|&p| p != held));
		assert!(ports[0] > held);
	}

	#[test]
	fn test_exhaustion_near_max_port() {
		// Fewer than 40 ports exist above the base; asking for more must fail
		let err = allocate_ports(65530, 40).unwrap_err();
		match err {
			PortAllocError::Exhausted { needed, .. } => assert_eq!(needed, 40),
		}
	}
}

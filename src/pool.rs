//! Bounded FIFO connection pool keyed by endpoint label, with the
//! peek-and-rotate discipline of `original_source/reverse-proxy/proxy.go`'s
//! `resolveServerConnection`.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tonic::transport::Channel;

use crate::dial::{self, TlsOptions};
use crate::error::PoolError;
use crate::metrics::{DialAttempted, DialFailed, GatewayMetrics, IncrementRecorder};

#[derive(Debug, Clone)]
pub struct PoolConfig {
	pub capacity: usize,
	pub tls: TlsOptions,
	pub dial_timeout: Duration,
}

impl Default for PoolConfig {
	fn default() -> Self {
		Self {
			capacity: 3,
			tls: TlsOptions::default(),
			dial_timeout: dial::DEFAULT_DIAL_TIMEOUT,
		}
	}
}

/// A keyed ring of ready backend connections. At most `capacity` connections
/// are ever held per endpoint; `acquire` rotates the head rather than leasing
/// it exclusively, since a single connection multiplexes many streams.
pub struct ConnectionPool {
	conns: Mutex<HashMap<String, VecDeque<Channel>>>,
	config: PoolConfig,
	metrics: Option<Arc<GatewayMetrics>>,
}

impl ConnectionPool {
	pub fn new(config: PoolConfig) -> Self {
		Self {
			conns: Mutex::new(HashMap::new()),
			config,
			metrics: None,
		}
	}

	pub fn with_metrics(mut self, metrics: Arc<GatewayMetrics>) -> Self {
		self.metrics = Some(metrics);
		self
	}

	/// Acquires a connection for `target` (an address or `discovery:///label`
	/// URI), dialing an additional connection only while under capacity.
	pub async fn acquire(&self, target: &str) -> Result<Channel, PoolError> {
		let mut conns = self.conns.lock().await;
		let fifo = conns.entry(target.to_string()).or_default();

		debug_assert!(fifo.len() <= self.config.capacity);

		let result = if let Some(head) = fifo.pop_front() {
			fifo.push_back(head.clone());
			if fifo.len() >= self.config.capacity {
				Ok(head)
			} else {
				match self.dial(target).await {
					Ok(dialed) => {
						fifo.push_back(dialed.clone());
						Ok(dialed)
					},
					Err(err) => Err(err),
				}
			}
		} else {
			match self.dial(target).await {
				Ok(dialed) => {
					fifo.push_back(dialed.clone());
					Ok(dialed)
				},
				Err(err) => Err(err),
			}
		};

		if let Some(metrics) = &self.metrics {
			metrics.set_pool_size(target, fifo.len() as i64);
		}
		result
	}

	async fn dial(&self, target: &str) -> Result<Channel, PoolError> {
		if let Some(metrics) = &self.metrics {
			metrics.increment(&DialAttempted(target));
		}
		let result = dial::dial(target, &self.config.tls, self.config.dial_timeout)
			.await
			.map_err(PoolError::from);
		if result.is_err() {
			if let Some(metrics) = &self.metrics {
				metrics.increment(&DialFailed(target));
			}
		}
		result
	}

	#[cfg(test)]
	async fn len(&self, target: &str) -> usize {
		self.conns
			.lock()
			.await
			.get(target)
			.map(|fifo| fifo.len())
			.unwrap_or(0)
	}
}

pub type SharedPool = Arc<ConnectionPool>;

#[cfg(test)]
mod tests {
	use super::*;

	// The pool's `dial` always goes through tonic's real `Endpoint::connect`,
	// which requires an actual listener. These tests exercise the FIFO/capacity
	// bookkeeping directly rather than spinning up a server, by driving the
	// pool with a capacity of 0 (never dials) to assert the shape of the
	// rotation invariants that do not require a live connection.

	#[tokio::test]
	async fn disjoint_endpoints_get_disjoint_fifos() {
		let pool = ConnectionPool::new(PoolConfig {
			capacity: 0,
			..PoolConfig::default()
		});
		// capacity 0 forces every acquire through the dial path; with no
		// listener present the dial fails, but the map entries should still
		// have been created independently per key.
		let _ = pool.acquire("a").await;
		let _ = pool.acquire("b").await;
		assert_eq!(pool.len("a").await, 0);
		assert_eq!(pool.len("b").await, 0);
	}

	#[tokio::test]
	async fn failed_dial_leaves_pool_unchanged() {
		let pool = ConnectionPool::new(PoolConfig {
			capacity: 3,
			dial_timeout: Duration::from_millis(1),
			..PoolConfig::default()
		});
		let before = pool.len("127.0.0.1:1").await;
		let _ = pool.acquire("127.0.0.1:1").await;
		assert_eq!(pool.len("127.0.0.1:1").await, before);
	}

	#[test]
	fn pool_config_default_matches_spec() {
		let cfg = PoolConfig::default();
		assert_eq!(cfg.capacity, 3);
		assert_eq!(cfg.dial_timeout, dial::DEFAULT_DIAL_TIMEOUT);
	}
}

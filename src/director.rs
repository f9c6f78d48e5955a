//! Per-call routing: derives the outbound target and acquires a pooled
//! connection. Grounded on `original_source/reverse-proxy/proxy.go`'s
//! `streamDirector`.

use std::sync::Arc;

use tonic::transport::Channel;
use tonic::Status;

use crate::endpoint::EndpointParser;
use crate::error::DirectorError;
use crate::metrics::{DirectorCall, GatewayMetrics, IncrementRecorder};
use crate::pool::SharedPool;

pub struct Directed {
	pub channel: Channel,
	pub target: String,
}

pub struct Director {
	parser: Box<dyn EndpointParser>,
	pool: SharedPool,
	backend_address: Option<String>,
	metrics: Option<Arc<GatewayMetrics>>,
}

impl Director {
	pub fn new(
		parser: Box<dyn EndpointParser>,
		pool: SharedPool,
		backend_address: Option<String>,
	) -> Self {
		Self {
			parser,
			pool,
			backend_address,
			metrics: None,
		}
	}

	pub fn with_metrics(mut self, metrics: Arc<GatewayMetrics>) -> Self {
		self.metrics = Some(metrics);
		self
	}

	/// Resolves `full_method` to a backend connection, acquiring it from the
	/// pool. Does not inspect the request body.
	pub async fn direct(&self, full_method: &str) -> Result<Directed, DirectorError> {
		let target = match &self.backend_address {
			Some(literal) => literal.clone(),
			None => {
				let label = self.parser.parse(full_method)?;
				format!("discovery:///{label}")
			},
		};

		let result = self.pool.acquire(&target).await;
		if let Some(metrics) = &self.metrics {
			let outcome = if result.is_ok() { "ok" } else { "err" };
			metrics.increment(&DirectorCall { endpoint: &target, outcome });
		}
		let channel = result?;
		Ok(Directed { channel, target })
	}
}

pub fn map_director_error(err: DirectorError, full_method: &str) -> Status {
	if let DirectorError::Pool(crate::error::PoolError::Dial(dial_err)) = err {
		return crate::dial::map_dial_timeout_for_method(dial_err, full_method);
	}
	err.into()
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::error::{DialError, PoolError};

	#[test]
	fn map_director_error_rewrites_dial_timeout_with_method_name() {
		let err = DirectorError::Pool(PoolError::Dial(DialError::DeadlineExceeded {
			target: "127.0.0.1:9000".to_string(),
			deadline_ms: 2000,
		}));
		let status = map_director_error(err, "/a.b.c.Svc/M");
		assert_eq!(status.code(), tonic::Code::NotFound);
		assert!(status.message().contains("/a.b.c.Svc/M"));
	}

	#[test]
	fn map_director_error_passes_through_endpoint_errors() {
		let err = DirectorError::Endpoint(crate::error::EndpointError::InvalidPath);
		let status = map_director_error(err, "/a.b.c.Svc/M");
		assert_eq!(status.code(), tonic::Code::InvalidArgument);
	}
}

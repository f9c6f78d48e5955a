use tonic::Status;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
	#[error("failed to read config file {path}: {source}")]
	Read {
		path: String,
		#[source]
		source: std::io::Error,
	},

	#[error("failed to parse config file {path}: {source}")]
	Parse {
		path: String,
		#[source]
		source: serde_yaml::Error,
	},

	#[error(
		"ambiguous origin configuration: allowAllOrigins is true but allowedOrigins is non-empty"
	)]
	AmbiguousOrigins,
}

#[derive(Debug, thiserror::Error)]
pub enum EndpointError {
	#[error("path does not begin with '/'")]
	InvalidPath,

	#[error("path has no service segment (missing second '/')")]
	MissingServiceSegment,

	#[error("first path segment has no dotted prefix")]
	NoDottedPrefix,
}

#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
	#[error("discovery registry unavailable: {0}")]
	Unavailable(String),

	#[error("discovery request failed: {0}")]
	Request(#[from] reqwest::Error),

	#[error("discovery response could not be decoded: {0}")]
	Decode(#[from] serde_json::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum DialError {
	#[error("dial to {target} timed out after {deadline_ms}ms")]
	DeadlineExceeded { target: String, deadline_ms: u64 },

	#[error("failed to dial {target}: {source}")]
	Transport {
		target: String,
		#[source]
		source: tonic::transport::Error,
	},

	#[error("tls configuration error: {0}")]
	Tls(String),
}

#[derive(Debug, thiserror::Error)]
pub enum PoolError {
	#[error(transparent)]
	Dial(#[from] DialError),

	#[error("no backend address available for endpoint {0}")]
	NoAddress(String),
}

#[derive(Debug, thiserror::Error)]
pub enum DirectorError {
	#[error(transparent)]
	Endpoint(#[from] EndpointError),

	#[error(transparent)]
	Pool(#[from] PoolError),
}

impl From<EndpointError> for Status {
	fn from(err: EndpointError) -> Self {
		Status::invalid_argument(err.to_string())
	}
}

impl From<DiscoveryError> for Status {
	fn from(err: DiscoveryError) -> Self {
		Status::unavailable(err.to_string())
	}
}

impl From<DialError> for Status {
	fn from(err: DialError) -> Self {
		match &err {
			DialError::DeadlineExceeded { target, .. } => {
				Status::not_found(format!("backend {target} did not become ready in time"))
			},
			DialError::Transport { .. } | DialError::Tls(_) => {
				Status::unavailable(err.to_string())
			},
		}
	}
}

impl From<PoolError> for Status {
	fn from(err: PoolError) -> Self {
		match err {
			PoolError::Dial(dial) => dial.into(),
			PoolError::NoAddress(endpoint) => {
				Status::not_found(format!("no address known for endpoint {endpoint}"))
			},
		}
	}
}

impl From<DirectorError> for Status {
	fn from(err: DirectorError) -> Self {
		match err {
			DirectorError::Endpoint(e) => e.into(),
			DirectorError::Pool(e) => e.into(),
		}
	}
}

//! HTTP/1.1-to-gRPC edge transcoding and CORS policy for the web-facing
//! listener. Grounded on `original_source/command.go`'s `grpcweb.WrapServer`
//! origin-func and allowed-headers wiring.

use std::time::Duration;

use http::HeaderName;
use tower_http::cors::{AllowOrigin, CorsLayer};

use crate::config::Config;

/// Builds the CORS layer for the HTTP/1.1 listener from the configured
/// origin policy: either allow-all, or membership in an explicit allow-set
/// (mutually exclusive — enforced at config-validation time, spec §6).
pub fn cors_layer(cfg: &Config) -> CorsLayer {
	let allow_origin = if cfg.allow_all_origins {
		AllowOrigin::any()
	} else {
		let origins = cfg.allowed_origins.clone();
		AllowOrigin::predicate(move |origin, _| {
			origins
				.iter()
				.any(|allowed| origin.as_bytes() == allowed.as_bytes())
		})
	};

	let allowed_headers: Vec<HeaderName> = cfg
		.allowed_headers
		.iter()
		.filter_map(|h| HeaderName::from_bytes(h.as_bytes()).ok())
		.collect();

	let mut layer = CorsLayer::new()
		.allow_origin(allow_origin)
		.allow_methods(tower_http::cors::Any)
		.max_age(Duration::from_secs(86_400));

	layer = if allowed_headers.is_empty() {
		layer.allow_headers(tower_http::cors::Any)
	} else {
		layer.allow_headers(allowed_headers)
	};

	layer
}

/// The grpc-web <-> native gRPC framing layer applied to the transparent
/// handler on the HTTP/1.1 listener.
pub fn grpc_web_layer() -> tonic_web::GrpcWebLayer {
	tonic_web::GrpcWebLayer::new()
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn cors_layer_builds_for_allow_all() {
		let cfg = Config::default();
		let _layer = cors_layer(&cfg);
	}

	#[test]
	fn cors_layer_builds_for_allow_set() {
		let cfg = Config {
			allow_all_origins: false,
			allowed_origins: vec!["https://example.com".to_string()],
			allowed_headers: vec!["x-custom".to_string()],
			..Config::default()
		};
		let _layer = cors_layer(&cfg);
	}
}

//! Schema-agnostic transparent handler: pipes an inbound RPC frame stream to
//! the backend connection chosen by the director and streams the response
//! (including trailers) back, without decoding any message body. Grounded on
//! `original_source/reverse-proxy/proxy.go`'s `TransparentHandler`.

use std::sync::Arc;
use std::time::Instant;

use http::{Request, Response};
use tonic::body::BoxBody;
use tower::Service;

use crate::admin::{CompletedCall, RequestLog};
use crate::director::{map_director_error, Director};

#[derive(Clone)]
pub struct TransparentHandler {
	director: Arc<Director>,
	request_log: Option<RequestLog>,
}

impl TransparentHandler {
	pub fn new(director: Arc<Director>) -> Self {
		Self { director, request_log: None }
	}

	pub fn with_request_log(mut self, request_log: RequestLog) -> Self {
		self.request_log = Some(request_log);
		self
	}

	/// Forwards one inbound request to its resolved backend and returns the
	/// backend's response verbatim (headers, body frames, and trailers).
	pub async fn forward(&self, req: Request<BoxBody>) -> Result<Response<BoxBody>, tonic::Status> {
		let started = Instant::now();
		let full_method = req.uri().path().to_string();

		let result = self.forward_inner(req, &full_method).await;

		if let Some(log) = &self.request_log {
			let endpoint = match &result {
				Ok((directed_target, _)) => directed_target.clone(),
				Err(_) => String::new(),
			};
			let outcome = match &result {
				Ok(_) => "ok".to_string(),
				Err(status) => status.code().to_string(),
			};
			log.record_call(CompletedCall {
				method: full_method,
				endpoint,
				outcome,
				duration_ms: started.elapsed().as_millis() as u64,
			});
		}

		result.map(|(_, response)| response)
	}

	async fn forward_inner(
		&self,
		req: Request<BoxBody>,
		full_method: &str,
	) -> Result<(String, Response<BoxBody>), tonic::Status> {
		let directed = self
			.director
			.direct(full_method)
			.await
			.map_err(|e| map_director_error(e, full_method))?;

		let (parts, body) = req.into_parts();
		let sanitized = sanitize_http_headers(&parts.headers);

		let mut out_req = Request::builder().method(parts.method).uri(parts.uri);
		*out_req.headers_mut().unwrap() = sanitized;
		let out_req = out_req
			.body(body)
			.map_err(|e| tonic::Status::internal(e.to_string()))?;

		let mut channel = directed.channel;
		let response = channel
			.call(out_req)
			.await
			.map_err(|e| tonic::Status::unavailable(e.to_string()))?;

		let (parts, body) = response.into_parts();
		Ok((directed.target, Response::from_parts(parts, body)))
	}
}

fn sanitize_http_headers(headers: &http::HeaderMap) -> http::HeaderMap {
	let mut out = http::HeaderMap::with_capacity(headers.len());
	for (name, value) in headers.iter() {
		if name.as_str() == "user-agent" || name.as_str() == "connection" {
			continue;
		}
		out.append(name.clone(), value.clone());
	}
	out
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn sanitize_http_headers_strips_hop_by_hop() {
		let mut headers = http::HeaderMap::new();
		headers.insert("user-agent", "grpc-go/1.0".parse().unwrap());
		headers.insert("connection", "keep-alive".parse().unwrap());
		headers.insert("x-request-id", "abc".parse().unwrap());

		let out = sanitize_http_headers(&headers);
		assert!(!out.contains_key("user-agent"));
		assert!(!out.contains_key("connection"));
		assert_eq!(out.get("x-request-id").unwrap(), "abc");
	}
}

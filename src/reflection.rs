//! Unified server-reflection facade: fans each inbound reflection message out
//! to every backend known to discovery and merges the responses. Grounded on
//! `original_source/reverse-proxy/serverreflection.go`; the generated
//! protobuf types come from `tonic_reflection::pb::v1`, confirmed against
//! `Shuozeli-grpcurl-rs/grpcurl-core/src/reflection.rs`.

use std::pin::Pin;
use std::sync::Arc;

use futures::stream::{self, Stream};
use tonic::{Request, Response, Status, Streaming};
use tonic_reflection::pb::v1::server_reflection_request::MessageRequest;
use tonic_reflection::pb::v1::server_reflection_response::MessageResponse;
use tonic_reflection::pb::v1::server_reflection_server::ServerReflection;
use tonic_reflection::pb::v1::{
	ExtensionNumberResponse, FileDescriptorResponse, ListServiceResponse, ServerReflectionRequest,
	ServerReflectionResponse, ServiceResponse,
};

use crate::dial::{self, TlsOptions};
use crate::discovery::ConsulDiscovery;
use crate::metrics::{GatewayMetrics, IncrementRecorder, ReflectionFanout};

pub struct ReflectionAggregator {
	discovery: Arc<ConsulDiscovery>,
	tls: TlsOptions,
	metrics: Option<Arc<GatewayMetrics>>,
}

impl ReflectionAggregator {
	pub fn new(discovery: Arc<ConsulDiscovery>, tls: TlsOptions) -> Self {
		Self { discovery, tls, metrics: None }
	}

	pub fn with_metrics(mut self, metrics: Arc<GatewayMetrics>) -> Self {
		self.metrics = Some(metrics);
		self
	}

	/// Snapshot of backend addresses for one reflection session: one entry per
	/// service instance, taking only its first `grpc://` endpoint (spec §4.6,
	/// step 1 — "SearchEP" in the original).
	async fn session_backends(&self) -> Vec<String> {
		let services = match self.discovery.list_services().await {
			Ok(services) => services,
			Err(_) => return Vec::new(),
		};
		let mut backends = Vec::new();
		for (_, instances) in services {
			for instance in instances {
				if let Some(addr) = instance.first_grpc_endpoint() {
					backends.push(addr);
					break;
				}
			}
		}
		backends
	}

	async fn fan_out(
		&self,
		backends: &[String],
		request: ServerReflectionRequest,
	) -> Result<ServerReflectionResponse, Status> {
		let kind = request
			.message_request
			.clone()
			.ok_or_else(|| Status::invalid_argument("missing message_request"))?;

		let mut responses = Vec::with_capacity(backends.len());
		for backend in backends {
			let resp = self.query_backend(backend, &request.host, &kind).await?;
			responses.push(resp);
		}

		let merged = merge_responses(&kind, responses);

		let original_request = ServerReflectionRequest {
			host: request.host.clone(),
			message_request: request.message_request.clone(),
		};

		Ok(ServerReflectionResponse {
			valid_host: request.host,
			original_request: Some(original_request),
			message_response: Some(merged),
		})
	}

	/// Dials `backend` fresh, sends one reflection request, reads exactly one
	/// response, and drops the connection (spec §4.6, step 2 — reflection
	/// dials are never pooled). Any failure along the way aborts the whole
	/// fan-out (spec §4.6, step 5): it is surfaced to the caller rather than
	/// silently dropping this backend from the merge.
	async fn query_backend(
		&self,
		backend: &str,
		host: &str,
		kind: &MessageRequest,
	) -> Result<MessageResponse, Status> {
		if let Some(metrics) = &self.metrics {
			metrics.increment(&ReflectionFanout(backend));
		}

		let channel = dial::dial(backend, &self.tls, dial::REFLECTION_DIAL_TIMEOUT)
			.await
			.map_err(|err| Status::unavailable(format!("dialing {backend} for reflection: {err}")))?;

		let mut client =
			tonic_reflection::pb::v1::server_reflection_client::ServerReflectionClient::new(channel);

		let outbound = ServerReflectionRequest {
			host: host.to_string(),
			message_request: Some(kind.clone()),
		};
		let (tx, rx) = tokio::sync::mpsc::channel(1);
		tx.send(outbound)
			.await
			.map_err(|err| Status::internal(format!("queueing request to {backend}: {err}")))?;

		let mut response_stream = client
			.server_reflection_info(tokio_stream::wrappers::ReceiverStream::new(rx))
			.await
			.map_err(|status| {
				Status::new(status.code(), format!("backend {backend} rejected reflection request: {status}"))
			})?
			.into_inner();

		let response = response_stream
			.message()
			.await
			.map_err(|status| {
				Status::new(status.code(), format!("backend {backend} reflection stream error: {status}"))
			})?
			.ok_or_else(|| Status::internal(format!("backend {backend} closed reflection stream with no response")))?;

		response
			.message_response
			.ok_or_else(|| Status::internal(format!("backend {backend} returned an empty reflection response")))
	}
}

/// Merges one response per backend into a single response, following spec
/// §4.6, step 3: descriptor/service lists concatenate in backend order;
/// extension-number `BaseTypeName` is taken from the last backend to answer
/// (the reference implementation's reused-loop-variable quirk, spec §9).
fn merge_responses(kind: &MessageRequest, responses: Vec<MessageResponse>) -> MessageResponse {
	let mut file_descriptor_proto: Vec<Vec<u8>> = Vec::new();
	let mut extension_numbers: Vec<i32> = Vec::new();
	let mut base_type_name = String::new();
	let mut service_list: Vec<ServiceResponse> = Vec::new();

	for response in responses {
		match response {
			MessageResponse::FileDescriptorResponse(fdr) => {
				file_descriptor_proto.extend(fdr.file_descriptor_proto);
			},
			MessageResponse::AllExtensionNumbersResponse(ext) => {
				extension_numbers.extend(ext.extension_number);
				base_type_name = ext.base_type_name;
			},
			MessageResponse::ListServicesResponse(list) => {
				service_list.extend(list.service);
			},
			_ => {},
		}
	}

	match kind {
		MessageRequest::FileByFilename(_)
		| MessageRequest::FileContainingSymbol(_)
		| MessageRequest::FileContainingExtension(_) => {
			MessageResponse::FileDescriptorResponse(FileDescriptorResponse {
				file_descriptor_proto,
			})
		},
		MessageRequest::AllExtensionNumbersOfType(_) => {
			MessageResponse::AllExtensionNumbersResponse(ExtensionNumberResponse {
				base_type_name,
				extension_number: extension_numbers,
			})
		},
		MessageRequest::ListServices(_) => MessageResponse::ListServicesResponse(ListServiceResponse {
			service: service_list,
		}),
	}
}

#[tonic::async_trait]
impl ServerReflection for ReflectionAggregator {
	type ServerReflectionInfoStream =
		Pin<Box<dyn Stream<Item = Result<ServerReflectionResponse, Status>> + Send + 'static>>;

	async fn server_reflection_info(
		&self,
		request: Request<Streaming<ServerReflectionRequest>>,
	) -> Result<Response<Self::ServerReflectionInfoStream>, Status> {
		let backends = self.session_backends().await;
		let aggregator = ReflectionAggregator {
			discovery: Arc::clone(&self.discovery),
			tls: self.tls.clone(),
			metrics: self.metrics.clone(),
		};
		let inbound = request.into_inner();

		// `state` becomes `None` the moment any backend errors, which ends the
		// stream after that error is emitted: a single bad backend terminates
		// the whole reflection session instead of being silently dropped.
		let output = stream::unfold(
			Some((inbound, aggregator, backends)),
			|state| async move {
				let (mut inbound, aggregator, backends) = state?;
				match inbound.message().await {
					Ok(Some(req)) => match aggregator.fan_out(&backends, req).await {
						Ok(resp) => Some((Ok(resp), Some((inbound, aggregator, backends)))),
						Err(status) => Some((Err(status), None)),
					},
					Ok(None) => None,
					Err(status) => Some((Err(status), None)),
				}
			},
		);

		Ok(Response::new(Box::pin(output)))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn list_services_response(names: &[&str]) -> MessageResponse {
		MessageResponse::ListServicesResponse(ListServiceResponse {
			service: names
				.iter()
				.map(|n| ServiceResponse { name: n.to_string() })
				.collect(),
		})
	}

	#[test]
	fn list_services_concatenate_in_backend_order() {
		let kind = MessageRequest::ListServices(String::new());
		let responses = vec![
			list_services_response(&["S1"]),
			list_services_response(&["S2", "S3"]),
		];
		let merged = merge_responses(&kind, responses);
		match merged {
			MessageResponse::ListServicesResponse(list) => {
				let names: Vec<_> = list.service.iter().map(|s| s.name.as_str()).collect();
				assert_eq!(names, vec!["S1", "S2", "S3"]);
			},
			_ => panic!("expected ListServicesResponse"),
		}
	}

	#[test]
	fn file_descriptor_bytes_concatenate_in_backend_order() {
		let kind = MessageRequest::FileByFilename("foo.proto".to_string());
		let responses = vec![
			MessageResponse::FileDescriptorResponse(FileDescriptorResponse {
				file_descriptor_proto: vec![vec![1, 2]],
			}),
			MessageResponse::FileDescriptorResponse(FileDescriptorResponse {
				file_descriptor_proto: vec![vec![3]],
			}),
		];
		let merged = merge_responses(&kind, responses);
		match merged {
			MessageResponse::FileDescriptorResponse(fdr) => {
				assert_eq!(fdr.file_descriptor_proto, vec![vec![1, 2], vec![3]]);
			},
			_ => panic!("expected FileDescriptorResponse"),
		}
	}

	#[test]
	fn extension_base_type_name_comes_from_last_backend() {
		let kind = MessageRequest::AllExtensionNumbersOfType("T".to_string());
		let responses = vec![
			MessageResponse::AllExtensionNumbersResponse(ExtensionNumberResponse {
				base_type_name: "first".to_string(),
				extension_number: vec![1],
			}),
			MessageResponse::AllExtensionNumbersResponse(ExtensionNumberResponse {
				base_type_name: "last".to_string(),
				extension_number: vec![2, 3],
			}),
		];
		let merged = merge_responses(&kind, responses);
		match merged {
			MessageResponse::AllExtensionNumbersResponse(ext) => {
				assert_eq!(ext.base_type_name, "last");
				assert_eq!(ext.extension_number, vec![1, 2, 3]);
			},
			_ => panic!("expected AllExtensionNumbersResponse"),
		}
	}

	#[test]
	fn empty_backend_set_yields_empty_merge_not_error() {
		let kind = MessageRequest::ListServices(String::new());
		let merged = merge_responses(&kind, Vec::new());
		match merged {
			MessageResponse::ListServicesResponse(list) => assert!(list.service.is_empty()),
			_ => panic!("expected ListServicesResponse"),
		}
	}
}

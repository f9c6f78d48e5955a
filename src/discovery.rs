//! Consul-backed discovery adapter, grounded on
//! `original_source/discovery/consul.go`. No Consul client crate exists in
//! the retrieved corpus; the Go client itself is a thin HTTP wrapper, so this
//! talks to Consul's HTTP API directly via `reqwest`, same as the original.

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;

use futures::stream::{self, Stream};
use serde::Deserialize;
use tower::discover::Change;

use crate::config::ConsulConfig;
use crate::error::DiscoveryError;

const LONG_POLL_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct ServiceInstance {
	pub service_name: String,
	pub instance_id: String,
	/// Endpoint URIs advertised by the instance, e.g. `grpc://10.0.0.1:9000`.
	pub endpoints: Vec<String>,
	pub healthy: bool,
}

impl ServiceInstance {
	/// The first `grpc://`-prefixed endpoint, scheme stripped, if any.
	pub fn first_grpc_endpoint(&self) -> Option<String> {
		self.endpoints
			.iter()
			.find(|e| e.starts_with("grpc://"))
			.map(|e| e.trim_start_matches("grpc://").to_string())
	}
}

#[derive(Debug, Deserialize)]
struct ConsulHealthEntry {
	#[serde(rename = "Service")]
	service: ConsulServiceField,
	#[serde(rename = "Checks")]
	checks: Vec<ConsulCheck>,
}

#[derive(Debug, Deserialize)]
struct ConsulServiceField {
	#[serde(rename = "ID")]
	id: String,
	#[serde(rename = "Service")]
	service: String,
	#[serde(rename = "Tags", default)]
	tags: Vec<String>,
	#[serde(rename = "Address")]
	address: String,
	#[serde(rename = "Port")]
	port: u16,
}

#[derive(Debug, Deserialize)]
struct ConsulCheck {
	#[serde(rename = "Status")]
	status: String,
}

pub struct ConsulDiscovery {
	client: reqwest::Client,
	base_url: String,
	token: Option<String>,
	dc: Option<String>,
}

impl ConsulDiscovery {
	pub fn new(cfg: &ConsulConfig) -> Result<Self, DiscoveryError> {
		let mut builder = reqwest::Client::builder();
		if !cfg.tls_verify_cert {
			builder = builder.danger_accept_invalid_certs(true);
		}
		let client = builder
			.build()
			.map_err(DiscoveryError::Request)?;
		Ok(Self {
			client,
			base_url: format!("{}://{}", cfg.scheme, cfg.addr),
			token: cfg.token.clone(),
			dc: cfg.dc.clone(),
		})
	}

	/// Snapshot of every healthy instance, grouped by service name, as used by
	/// the reflection aggregator (spec §4.6).
	pub async fn list_services(
		&self,
	) -> Result<HashMap<String, Vec<ServiceInstance>>, DiscoveryError> {
		let service_names = self.catalog_services().await?;
		let mut out: HashMap<String, Vec<ServiceInstance>> = HashMap::new();
		for name in service_names {
			let instances = self.health_service(&name).await?;
			out.insert(name, instances);
		}
		Ok(out)
	}

	/// A change stream for one endpoint label, polling Consul's health
	/// endpoint on an interval (the idiomatic Rust stand-in for the Go
	/// resolver's blocking long-poll watch) and diffing against the
	/// previously observed address set to emit `Insert`/`Remove` events for
	/// `tonic`'s `Channel::balance_channel`.
	pub fn resolve(&self, label: String) -> impl Stream<Item = Change<String, ()>> + Send + 'static {
		let client = self.client.clone();
		let base_url = self.base_url.clone();
		let token = self.token.clone();
		let dc = self.dc.clone();

		stream::unfold(
			(HashSet::<String>::new(), VecDeque::<Change<String, ()>>::new()),
			move |(mut known, mut pending)| {
				let client = client.clone();
				let base_url = base_url.clone();
				let token = token.clone();
				let dc = dc.clone();
				let label = label.clone();
				async move {
					loop {
						if let Some(change) = pending.pop_front() {
							return Some((change, (known, pending)));
						}

						tokio::time::sleep(LONG_POLL_INTERVAL).await;

						let adapter = ConsulDiscovery {
							client: client.clone(),
							base_url: base_url.clone(),
							token: token.clone(),
							dc: dc.clone(),
						};
						let current = match adapter.health_service(&label).await {
							Ok(instances) => instances
								.into_iter()
								.filter_map(|i| i.first_grpc_endpoint())
								.collect::<HashSet<_>>(),
							Err(_) => continue,
						};

						for addr in current.difference(&known) {
							pending.push_back(Change::Insert(addr.clone(), ()));
						}
						for addr in known.difference(&current) {
							pending.push_back(Change::Remove(addr.clone()));
						}
						known = current;
					}
				}
			},
		)
	}

	async fn catalog_services(&self) -> Result<Vec<String>, DiscoveryError> {
		let url = format!("{}/v1/catalog/services", self.base_url);
		let resp = self.request(&url).send().await?;
		let body: HashMap<String, Vec<String>> = resp.json().await?;
		Ok(body.into_keys().collect())
	}

	async fn health_service(&self, name: &str) -> Result<Vec<ServiceInstance>, DiscoveryError> {
		let url = format!("{}/v1/health/service/{name}", self.base_url);
		let resp = self.request(&url).send().await?;
		let entries: Vec<ConsulHealthEntry> = resp.json().await?;
		Ok(entries
			.into_iter()
			.map(|entry| {
				let healthy = entry
					.checks
					.iter()
					.all(|c| c.status == "passing");
				let endpoints = entry
					.service
					.tags
					.iter()
					.filter(|t| t.contains("://"))
					.cloned()
					.collect::<Vec<_>>();
				let endpoints = if endpoints.is_empty() {
					vec![format!(
						"grpc://{}:{}",
						entry.service.address, entry.service.port
					)]
				} else {
					endpoints
				};
				ServiceInstance {
					service_name: entry.service.service,
					instance_id: entry.service.id,
					endpoints,
					healthy,
				}
			})
			.filter(|instance| instance.healthy)
			.collect())
	}

	fn request(&self, url: &str) -> reqwest::RequestBuilder {
		let mut builder = self.client.get(url);
		if let Some(dc) = &self.dc {
			builder = builder.query(&[("dc", dc)]);
		}
		if let Some(token) = &self.token {
			builder = builder.header("X-Consul-Token", token);
		}
		builder
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn first_grpc_endpoint_strips_scheme() {
		let instance = ServiceInstance {
			service_name: "svc".to_string(),
			instance_id: "svc-1".to_string(),
			endpoints: vec!["http://10.0.0.1:9001".to_string(), "grpc://10.0.0.1:9000".to_string()],
			healthy: true,
		};
		assert_eq!(instance.first_grpc_endpoint().as_deref(), Some("10.0.0.1:9000"));
	}

	#[test]
	fn first_grpc_endpoint_none_when_absent() {
		let instance = ServiceInstance {
			service_name: "svc".to_string(),
			instance_id: "svc-1".to_string(),
			endpoints: vec!["http://10.0.0.1:9001".to_string()],
			healthy: true,
		};
		assert_eq!(instance.first_grpc_endpoint(), None);
	}
}

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

fn default_bind_host() -> String {
	"0.0.0.0".to_string()
}
fn default_http_port() -> u16 {
	8080
}
fn default_grpc_port() -> u16 {
	8181
}
fn default_client_read_timeout_ms() -> u64 {
	10_000
}
fn default_client_write_timeout_ms() -> u64 {
	10_000
}
fn default_graceful_shutdown_timeout_ms() -> u64 {
	11_000
}
fn default_grpc_max_message_size() -> usize {
	4 * 1024 * 1024
}
fn default_backend_conn_pool_size() -> usize {
	3
}
fn default_allow_all_origins() -> bool {
	true
}
fn default_consul_scheme() -> String {
	"http".to_string()
}
fn default_log_level() -> String {
	"info".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConsulConfig {
	pub scheme: String,
	pub tls_verify_cert: bool,
	pub tls_ca_file: Option<String>,
	pub addr: String,
	pub token: Option<String>,
	pub dc: Option<String>,
}

impl Default for ConsulConfig {
	fn default() -> Self {
		Self {
			scheme: default_consul_scheme(),
			tls_verify_cert: true,
			tls_ca_file: None,
			addr: "127.0.0.1:8500".to_string(),
			token: None,
			dc: None,
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
	pub bind_host: String,
	pub http_port: u16,
	pub grpc_port: u16,

	pub enable_tls: bool,
	pub tls_cert_file: Option<String>,
	pub tls_key_file: Option<String>,
	pub tls_ca_file: Option<String>,
	pub tls_verify_cert: bool,

	pub client_read_timeout_ms: u64,
	pub client_write_timeout_ms: u64,
	pub graceful_shutdown_timeout_ms: u64,

	pub grpc_max_message_size: usize,
	pub backend_conn_pool_size: usize,

	pub consul: ConsulConfig,

	pub allow_all_origins: bool,
	pub allowed_origins: Vec<String>,
	pub allowed_headers: Vec<String>,

	pub backend_address: Option<String>,
	pub backend_enable_tls: bool,
	pub backend_tls_verify_cert: bool,
	pub backend_tls_ca_file: Option<String>,

	pub enable_metrics: bool,
	pub enable_request_tracing: bool,

	pub log_level: String,
}

impl Default for Config {
	fn default() -> Self {
		Self {
			bind_host: default_bind_host(),
			http_port: default_http_port(),
			grpc_port: default_grpc_port(),

			enable_tls: false,
			tls_cert_file: None,
			tls_key_file: None,
			tls_ca_file: None,
			tls_verify_cert: false,

			client_read_timeout_ms: default_client_read_timeout_ms(),
			client_write_timeout_ms: default_client_write_timeout_ms(),
			graceful_shutdown_timeout_ms: default_graceful_shutdown_timeout_ms(),

			grpc_max_message_size: default_grpc_max_message_size(),
			backend_conn_pool_size: default_backend_conn_pool_size(),

			consul: ConsulConfig::default(),

			allow_all_origins: default_allow_all_origins(),
			allowed_origins: Vec::new(),
			allowed_headers: Vec::new(),

			backend_address: None,
			backend_enable_tls: false,
			backend_tls_verify_cert: false,
			backend_tls_ca_file: None,

			enable_metrics: true,
			enable_request_tracing: false,

			log_level: default_log_level(),
		}
	}
}

impl Config {
	pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
		let path = path.as_ref();
		let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
			path: path.display().to_string(),
			source,
		})?;
		let cfg: Config = serde_yaml::from_str(&contents).map_err(|source| ConfigError::Parse {
			path: path.display().to_string(),
			source,
		})?;
		cfg.validate()?;
		Ok(cfg)
	}

	pub fn validate(&self) -> Result<(), ConfigError> {
		if self.allow_all_origins && !self.allowed_origins.is_empty() {
			return Err(ConfigError::AmbiguousOrigins);
		}
		Ok(())
	}

	pub fn is_origin_allowed(&self, origin: &str) -> bool {
		if self.allow_all_origins {
			return true;
		}
		self.allowed_origins.iter().any(|o| o == origin)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn defaults_match_spec() {
		let cfg = Config::default();
		assert_eq!(cfg.bind_host, "0.0.0.0");
		assert_eq!(cfg.http_port, 8080);
		assert_eq!(cfg.grpc_port, 8181);
		assert_eq!(cfg.graceful_shutdown_timeout_ms, 11_000);
		assert_eq!(cfg.grpc_max_message_size, 4 * 1024 * 1024);
		assert_eq!(cfg.backend_conn_pool_size, 3);
		assert!(cfg.allow_all_origins);
	}

	#[test]
	fn ambiguous_origins_rejected() {
		let mut cfg = Config {
			allow_all_origins: true,
			allowed_origins: vec!["https://a".to_string()],
			..Config::default()
		};
		assert!(matches!(cfg.validate(), Err(ConfigError::AmbiguousOrigins)));
		cfg.allow_all_origins = false;
		assert!(cfg.validate().is_ok());
	}

	#[test]
	fn origin_check_respects_allow_all() {
		let cfg = Config::default();
		assert!(cfg.is_origin_allowed("https://anything"));
	}

	#[test]
	fn origin_check_respects_allow_list() {
		let cfg = Config {
			allow_all_origins: false,
			allowed_origins: vec!["https://a".to_string()],
			..Config::default()
		};
		assert!(cfg.is_origin_allowed("https://a"));
		assert!(!cfg.is_origin_allowed("https://b"));
	}
}

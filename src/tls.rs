//! Server-side TLS material loading for the native listener and the edge
//! transcoder's HTTP/1.1 listener, grounded on `original_source/server_tls.go`.

use std::sync::Arc;

use rustls::server::WebPkiClientVerifier;
use rustls::{RootCertStore, ServerConfig};

use crate::config::Config;
use crate::error::DialError;

/// Builds the shared `rustls::ServerConfig` used by both listeners (spec §9
/// open question: one TLS material set covers both, see DESIGN.md).
pub fn build_server_config(cfg: &Config) -> Result<Arc<ServerConfig>, DialError> {
	let cert_path = cfg
		.tls_cert_file
		.as_ref()
		.ok_or_else(|| DialError::Tls("tlsCertFile is required when tls is enabled".to_string()))?;
	let key_path = cfg
		.tls_key_file
		.as_ref()
		.ok_or_else(|| DialError::Tls("tlsKeyFile is required when tls is enabled".to_string()))?;

	let certs = load_certs(cert_path)?;
	let key = load_private_key(key_path)?;

	let builder = ServerConfig::builder();

	let mut config = if cfg.tls_verify_cert {
		let client_ca_store = load_client_ca_store(cfg.tls_ca_file.as_deref())?;
		let verifier = WebPkiClientVerifier::builder(Arc::new(client_ca_store))
			.build()
			.map_err(|e| DialError::Tls(format!("failed to build client verifier: {e}")))?;
		builder
			.with_client_cert_verifier(verifier)
			.with_single_cert(certs, key)
			.map_err(|e| DialError::Tls(format!("failed to install server certificate: {e}")))?
	} else {
		builder
			.with_no_client_auth()
			.with_single_cert(certs, key)
			.map_err(|e| DialError::Tls(format!("failed to install server certificate: {e}")))?
	};

	config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];
	Ok(Arc::new(config))
}

fn load_client_ca_store(ca_file: Option<&str>) -> Result<RootCertStore, DialError> {
	let mut store = RootCertStore::empty();
	if let Some(path) = ca_file {
		let certs = load_certs(path)?;
		for cert in certs {
			store
				.add(cert)
				.map_err(|e| DialError::Tls(format!("failed to add client CA: {e}")))?;
		}
	} else {
		let native = rustls_native_certs::load_native_certs();
		for cert in native.certs {
			let _ = store.add(cert);
		}
	}
	Ok(store)
}

fn load_certs(path: &str) -> Result<Vec<rustls::pki_types::CertificateDer<'static>>, DialError> {
	let pem = std::fs::read(path)
		.map_err(|e| DialError::Tls(format!("failed to read certificate {path}: {e}")))?;
	rustls_pemfile::certs(&mut &*pem)
		.collect::<Result<Vec<_>, _>>()
		.map_err(|e| DialError::Tls(format!("failed to parse certificate {path}: {e}")))
}

fn load_private_key(path: &str) -> Result<rustls::pki_types::PrivateKeyDer<'static>, DialError> {
	let pem = std::fs::read(path)
		.map_err(|e| DialError::Tls(format!("failed to read private key {path}: {e}")))?;
	rustls_pemfile::private_key(&mut &*pem)
		.map_err(|e| DialError::Tls(format!("failed to parse private key {path}: {e}")))?
		.ok_or_else(|| DialError::Tls(format!("no private key found in {path}")))
}

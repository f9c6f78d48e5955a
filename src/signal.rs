//! SIGINT/SIGTERM graceful shutdown, grounded on the teacher's
//! `JoinSet`-based multi-server `main.rs` shape.

use std::time::Duration;

use tokio::signal::unix::{signal, SignalKind};
use tracing::info;

/// Resolves once either SIGINT or SIGTERM is received.
pub async fn wait_for_termination() {
	let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
	let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");

	tokio::select! {
		_ = sigterm.recv() => info!("received SIGTERM, shutting down"),
		_ = sigint.recv() => info!("received SIGINT, shutting down"),
	}
}

/// Wraps a shutdown future with the configured graceful-shutdown deadline;
/// if the future does not resolve in time, returns anyway (spec §5).
pub async fn with_deadline<F>(future: F, timeout: Duration)
where
	F: std::future::Future<Output = ()>,
{
	if tokio::time::timeout(timeout, future).await.is_err() {
		tracing::warn!("graceful shutdown timed out after {timeout:?}, forcing exit");
	}
}

use std::convert::Infallible;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use bytes::Bytes;
use clap::Parser;
use http::{Request, Response};
use http_body_util::{BodyExt, Full};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as AutoBuilder;
use hyper_util::server::graceful::GracefulShutdown;
use hyper_util::service::TowerToHyperService;
use prometheus_client::registry::Registry;
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tonic::body::BoxBody;
use tonic_reflection::pb::v1::server_reflection_server::ServerReflectionServer;
use tower::Service;
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};

use grpc_fanout_gateway::admin::RequestLog;
use grpc_fanout_gateway::config::Config;
use grpc_fanout_gateway::dial::TlsOptions;
use grpc_fanout_gateway::director::Director;
use grpc_fanout_gateway::discovery::ConsulDiscovery;
use grpc_fanout_gateway::edge;
use grpc_fanout_gateway::endpoint::DefaultEndpointParser;
use grpc_fanout_gateway::logging;
use grpc_fanout_gateway::metrics;
use grpc_fanout_gateway::metrics::GatewayMetrics;
use grpc_fanout_gateway::pool::{ConnectionPool, PoolConfig};
use grpc_fanout_gateway::proxy::TransparentHandler;
use grpc_fanout_gateway::reflection::ReflectionAggregator;
use grpc_fanout_gateway::signal;
use grpc_fanout_gateway::tls;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
	/// Path to the YAML configuration file.
	#[arg(short, long, value_name = "path", default_value = "config.yaml")]
	config: PathBuf,
}

/// Tuning knobs applied to every accepted connection, taken from
/// `Config::grpc_max_message_size`/`client_read_timeout_ms`/
/// `client_write_timeout_ms`.
#[derive(Clone, Copy)]
struct ConnTuning {
	read_timeout: Duration,
	write_timeout: Duration,
	max_frame_size: u32,
}

impl ConnTuning {
	fn from_config(cfg: &Config) -> Self {
		Self {
			read_timeout: Duration::from_millis(cfg.client_read_timeout_ms),
			write_timeout: Duration::from_millis(cfg.client_write_timeout_ms),
			max_frame_size: cfg.grpc_max_message_size.min(u32::MAX as usize) as u32,
		}
	}
}

/// The admin surfaces (`/metrics`, `/debug/requests`, `/debug/events`), only
/// mounted on the HTTP listener alongside the edge transcoder, never on the
/// native grpc listener.
#[derive(Clone)]
struct AdminSurfaces {
	registry: Arc<Registry>,
	request_log: RequestLog,
	enable_metrics: bool,
	enable_request_tracing: bool,
}

#[derive(Clone)]
struct GatewayService {
	transparent: TransparentHandler,
	reflection: ServerReflectionServer<ReflectionAggregator>,
	admin: Option<AdminSurfaces>,
}

/// Generic over the inbound body type so the same service can sit directly
/// under `hyper`'s `Incoming` body on the native grpc listener, and nested
/// behind the grpc-web layer's already-`BoxBody` reframing on the edge
/// listener.
impl<B> Service<Request<B>> for GatewayService
where
	B: http_body::Body<Data = bytes::Bytes> + Send + 'static,
	B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
	type Response = Response<BoxBody>;
	type Error = Infallible;
	type Future = std::pin::Pin<
		Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
	>;

	fn poll_ready(
		&mut self,
		_cx: &mut std::task::Context<'_>,
	) -> std::task::Poll<Result<(), Self::Error>> {
		std::task::Poll::Ready(Ok(()))
	}

	fn call(&mut self, req: Request<B>) -> Self::Future {
		let req = req.map(|body| {
			body.map_err(|e| tonic::Status::internal(e.into().to_string())).boxed_unsync()
		});
		let path = req.uri().path().to_string();

		if let Some(admin) = &self.admin {
			if admin.enable_metrics && path == "/metrics" {
				let registry = Arc::clone(&admin.registry);
				return Box::pin(async move { Ok(text_response(metrics::render(&registry))) });
			}
			if admin.enable_request_tracing && path == "/debug/requests" {
				let log = admin.request_log.clone();
				return Box::pin(async move { Ok(json_response(&log.requests_snapshot())) });
			}
			if admin.enable_request_tracing && path == "/debug/events" {
				let log = admin.request_log.clone();
				return Box::pin(async move { Ok(json_response(&log.events_snapshot())) });
			}
		}

		if path.starts_with("/grpc.reflection.v1.ServerReflection/") {
			let mut reflection = self.reflection.clone();
			Box::pin(async move {
				match reflection.call(req).await {
					Ok(resp) => Ok(resp),
					Err(status) => Ok(status_response(status)),
				}
			})
		} else {
			let transparent = self.transparent.clone();
			Box::pin(async move {
				match transparent.forward(req).await {
					Ok(resp) => Ok(resp),
					Err(status) => Ok(status_response(status)),
				}
			})
		}
	}
}

fn status_response(status: tonic::Status) -> Response<BoxBody> {
	status.to_http()
}

fn text_response(body: String) -> Response<BoxBody> {
	Response::builder()
		.status(http::StatusCode::OK)
		.header(http::header::CONTENT_TYPE, "text/plain; version=0.0.4")
		.body(boxed_body(body))
		.expect("static response is always well-formed")
}

fn json_response<T: Serialize>(value: &T) -> Response<BoxBody> {
	match serde_json::to_string(value) {
		Ok(body) => Response::builder()
			.status(http::StatusCode::OK)
			.header(http::header::CONTENT_TYPE, "application/json")
			.body(boxed_body(body))
			.expect("static response is always well-formed"),
		Err(err) => Response::builder()
			.status(http::StatusCode::INTERNAL_SERVER_ERROR)
			.body(boxed_body(err.to_string()))
			.expect("static response is always well-formed"),
	}
}

fn boxed_body(body: String) -> BoxBody {
	Full::new(Bytes::from(body))
		.map_err(|err: Infallible| match err {})
		.boxed_unsync()
}

#[tokio::main]
async fn main() -> Result<()> {
	let args = Args::parse();

	let cfg = Config::load(&args.config)
		.with_context(|| format!("failed to load config from {}", args.config.display()))?;

	logging::init(&cfg.log_level);
	info!(path = %args.config.display(), "loaded configuration");

	let mut registry = Registry::default();
	let gateway_metrics = Arc::new(GatewayMetrics::register(metrics::sub_registry(&mut registry)));
	let registry = Arc::new(registry);
	let request_log = RequestLog::default();

	let discovery = Arc::new(
		ConsulDiscovery::new(&cfg.consul).context("failed to construct Consul discovery adapter")?,
	);

	let backend_tls = TlsOptions {
		enabled: cfg.backend_enable_tls,
		ca_file: cfg.backend_tls_ca_file.clone(),
		verify_cert: cfg.backend_tls_verify_cert,
	};

	let pool = Arc::new(
		ConnectionPool::new(PoolConfig {
			capacity: cfg.backend_conn_pool_size,
			tls: backend_tls.clone(),
			dial_timeout: grpc_fanout_gateway::dial::DEFAULT_DIAL_TIMEOUT,
		})
		.with_metrics(Arc::clone(&gateway_metrics)),
	);

	let director = Arc::new(
		Director::new(Box::new(DefaultEndpointParser), Arc::clone(&pool), cfg.backend_address.clone())
			.with_metrics(Arc::clone(&gateway_metrics)),
	);

	let transparent =
		TransparentHandler::new(Arc::clone(&director)).with_request_log(request_log.clone());
	let reflection_aggregator = ReflectionAggregator::new(Arc::clone(&discovery), backend_tls)
		.with_metrics(Arc::clone(&gateway_metrics));
	let reflection = ServerReflectionServer::new(reflection_aggregator)
		.max_decoding_message_size(cfg.grpc_max_message_size)
		.max_encoding_message_size(cfg.grpc_max_message_size);

	let grpc_service = GatewayService {
		transparent: transparent.clone(),
		reflection: reflection.clone(),
		admin: None,
	};
	let edge_service = GatewayService {
		transparent,
		reflection,
		admin: Some(AdminSurfaces {
			registry,
			request_log: request_log.clone(),
			enable_metrics: cfg.enable_metrics,
			enable_request_tracing: cfg.enable_request_tracing,
		}),
	};

	let server_tls = if cfg.enable_tls {
		Some(tls::build_server_config(&cfg).context("failed to build server TLS config")?)
	} else {
		None
	};

	let conn_tuning = ConnTuning::from_config(&cfg);
	let (shutdown_tx, shutdown_rx) = watch::channel(false);
	let graceful = GracefulShutdown::new();

	let mut run_set = JoinSet::new();

	if cfg.grpc_port != 0 {
		let addr = format!("{}:{}", cfg.bind_host, cfg.grpc_port);
		let listener = TcpListener::bind(&addr)
			.await
			.with_context(|| format!("failed to bind grpc listener on {addr}"))?;
		info!(%addr, "grpc listener bound");
		let server_tls = server_tls.clone();
		let shutdown_rx = shutdown_rx.clone();
		let graceful = graceful.clone();
		run_set.spawn(async move {
			serve_grpc(listener, grpc_service, server_tls, conn_tuning, shutdown_rx, graceful).await;
		});
	}

	if cfg.http_port != 0 {
		let addr = format!("{}:{}", cfg.bind_host, cfg.http_port);
		let listener = TcpListener::bind(&addr)
			.await
			.with_context(|| format!("failed to bind http listener on {addr}"))?;
		info!(%addr, "http (edge transcoder) listener bound");
		let cors = edge::cors_layer(&cfg);
		let server_tls = server_tls.clone();
		let shutdown_rx = shutdown_rx.clone();
		let graceful = graceful.clone();
		run_set.spawn(async move {
			serve_edge(listener, edge_service, cors, server_tls, conn_tuning, shutdown_rx, graceful).await;
		});
	}

	signal::wait_for_termination().await;
	request_log.record_event("shutdown signal received");
	info!("shutdown signal received, draining");
	let _ = shutdown_tx.send(true);

	let shutdown_timeout = Duration::from_millis(cfg.graceful_shutdown_timeout_ms);
	signal::with_deadline(
		async {
			graceful.shutdown().await;
		},
		shutdown_timeout,
	)
	.await;

	run_set.abort_all();
	while run_set.join_next().await.is_some() {}

	Ok(())
}

async fn serve_grpc(
	listener: TcpListener,
	service: GatewayService,
	tls_config: Option<Arc<rustls::ServerConfig>>,
	conn: ConnTuning,
	mut shutdown_rx: watch::Receiver<bool>,
	graceful: GracefulShutdown,
) {
	loop {
		if *shutdown_rx.borrow() {
			break;
		}
		let (stream, peer) = tokio::select! {
			_ = shutdown_rx.changed() => break,
			accepted = listener.accept() => match accepted {
				Ok(pair) => pair,
				Err(err) => {
					warn!(%err, "failed to accept grpc connection");
					continue;
				},
			},
		};
		let service = service.clone();
		let tls_config = tls_config.clone();
		let graceful = graceful.clone();
		tokio::spawn(async move {
			run_connection(stream, peer, service, tls_config, conn, graceful, "grpc").await;
		});
	}
}

async fn serve_edge(
	listener: TcpListener,
	service: GatewayService,
	cors: CorsLayer,
	tls_config: Option<Arc<rustls::ServerConfig>>,
	conn: ConnTuning,
	mut shutdown_rx: watch::Receiver<bool>,
	graceful: GracefulShutdown,
) {
	use tower::ServiceBuilder;

	loop {
		if *shutdown_rx.borrow() {
			break;
		}
		let (stream, peer) = tokio::select! {
			_ = shutdown_rx.changed() => break,
			accepted = listener.accept() => match accepted {
				Ok(pair) => pair,
				Err(err) => {
					warn!(%err, "failed to accept edge connection");
					continue;
				},
			},
		};
		let wrapped = ServiceBuilder::new()
			.layer(cors.clone())
			.layer(edge::grpc_web_layer())
			.service(service.clone());
		let tls_config = tls_config.clone();
		let graceful = graceful.clone();
		tokio::spawn(async move {
			run_connection(stream, peer, wrapped, tls_config, conn, graceful, "edge").await;
		});
	}
}

/// Serves one accepted connection to completion, applying the configured
/// read-timeout/message-size tuning and registering it with `graceful` so
/// shutdown can wait for it to drain (spec §5).
async fn run_connection<S>(
	stream: tokio::net::TcpStream,
	peer: std::net::SocketAddr,
	service: S,
	tls_config: Option<Arc<rustls::ServerConfig>>,
	conn: ConnTuning,
	graceful: GracefulShutdown,
	label: &'static str,
) where
	S: Service<Request<hyper::body::Incoming>, Response = Response<BoxBody>, Error = Infallible>
		+ Clone
		+ Send
		+ 'static,
	S::Future: Send,
{
	let io = TokioIo::new(stream);
	let mut builder = AutoBuilder::new(TokioExecutor::new());
	builder.http1().header_read_timeout(conn.read_timeout);
	builder.http2().max_frame_size(conn.max_frame_size);

	// `client_write_timeout_ms` has no single hyper knob for a schema-agnostic
	// proxy that never frames individual writes itself, so it is applied as a
	// cap on the connection's total lifetime, mirroring the original's
	// `http.Server.WriteTimeout`.
	let result = if let Some(tls_config) = tls_config {
		let acceptor = tokio_rustls::TlsAcceptor::from(tls_config);
		match acceptor.accept(io.into_inner()).await {
			Ok(tls_stream) => {
				let served = builder.serve_connection(TokioIo::new(tls_stream), TowerToHyperService::new(service));
				tokio::time::timeout(conn.write_timeout, graceful.watch(served)).await
			},
			Err(err) => {
				warn!(%err, %peer, "tls handshake failed");
				return;
			},
		}
	} else {
		let served = builder.serve_connection(io, TowerToHyperService::new(service));
		tokio::time::timeout(conn.write_timeout, graceful.watch(served)).await
	};

	match result {
		Ok(Ok(())) => {},
		Ok(Err(err)) => error!(%err, %peer, %label, "connection ended with error"),
		Err(_elapsed) => warn!(%peer, %label, "connection exceeded client write timeout"),
	}
}

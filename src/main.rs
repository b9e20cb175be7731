//! layercache server
//!
//! Serves cached renditions over HTTP.
//!
//! # Endpoints
//!
//! ```text
//! listen-addr    GET /<format>/<name>?width=&height=&quality=
//!                GET /healthz | /livez | /readyz
//! metrics-addr   GET /metrics
//! ```

use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use clap::Parser;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use layercache::cache::Cache;
use layercache::config::{Assembled, Settings};
use layercache::error::{Error, Result};
use layercache::exporter::PrometheusExporter;
use layercache::http::{plain, respond};

// =============================================================================
// CLI Arguments
// =============================================================================

/// layercache - multi-tier cache for transformed images
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Settings file (YAML); built-in defaults when omitted
    #[arg(long, env = "LAYERCACHE_CONFIG")]
    config: Option<PathBuf>,

    /// Request server bind address
    #[arg(long, env = "LISTEN_ADDR", default_value = "0.0.0.0:8080")]
    listen_addr: String,

    /// Metrics server bind address
    #[arg(long, env = "METRICS_ADDR", default_value = "0.0.0.0:9090")]
    metrics_addr: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args);

    info!("Starting layercache");
    info!("  Listen address: {}", args.listen_addr);
    info!("  Metrics address: {}", args.metrics_addr);

    let settings = match &args.config {
        Some(path) => {
            info!("  Settings: {}", path.display());
            Settings::load(path).await?
        }
        None => {
            info!("  Settings: built-in defaults");
            Settings::default()
        }
    };

    let Assembled { cache, sweeps } = settings.build().await?;
    let shutdown = CancellationToken::new();

    // Background eviction per configured layer
    let sweepers: Vec<_> = sweeps
        .into_iter()
        .map(|(layer, period)| layer.spawn_eviction(period, shutdown.child_token()))
        .collect();

    // Start metrics server
    let exporter = Arc::new(PrometheusExporter::new()?);
    let metrics_cache = Arc::clone(&cache);
    let metrics_addr = args.metrics_addr.clone();
    let metrics_shutdown = shutdown.child_token();
    tokio::spawn(async move {
        if let Err(e) =
            run_metrics_server(&metrics_addr, metrics_cache, exporter, metrics_shutdown).await
        {
            error!("Metrics server error: {}", e);
        }
    });

    // Run the request server until Ctrl-C
    tokio::select! {
        result = run_server(&args.listen_addr, Arc::clone(&cache), shutdown.child_token()) => {
            if let Err(e) = result {
                error!("Request server error: {}", e);
                shutdown.cancel();
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
        }
    }

    shutdown.cancel();
    for sweeper in sweepers {
        if let Err(e) = sweeper.await {
            error!("Eviction task failed: {}", e);
        }
    }
    cache.quiesce().await;

    info!("layercache shutdown complete");
    Ok(())
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let mut filter = EnvFilter::from_default_env().add_directive(level.into());
    for directive in ["hyper=warn", "hyper_util=warn"] {
        if let Ok(directive) = directive.parse() {
            filter = filter.add_directive(directive);
        }
    }

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}

// =============================================================================
// Servers
// =============================================================================

async fn bind(addr: &str, what: &str) -> Result<TcpListener> {
    let addr: SocketAddr = addr
        .parse()
        .map_err(|e| Error::Config(format!("Invalid {} address: {}", what, e)))?;

    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| Error::Internal(format!("Failed to bind {}: {}", what, e)))?;

    info!("{} listening on {}", what, addr);
    Ok(listener)
}

/// Accept connections until `shutdown` fires, serving each with `handler`
async fn serve<F, Fut>(listener: TcpListener, shutdown: CancellationToken, handler: F) -> Result<()>
where
    F: Fn(Request<Incoming>) -> Fut + Clone + Send + 'static,
    Fut: std::future::Future<Output = Response<Full<Bytes>>> + Send + 'static,
{
    loop {
        let (stream, _) = tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            accepted = listener.accept() => accepted
                .map_err(|e| Error::Internal(format!("Accept error: {}", e)))?,
        };

        let io = TokioIo::new(stream);
        let handler = handler.clone();

        tokio::spawn(async move {
            let service = service_fn(move |req| {
                let response = handler(req);
                async move { Ok::<_, Infallible>(response.await) }
            });
            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                error!("Connection error: {}", e);
            }
        });
    }
}

async fn run_server(addr: &str, cache: Arc<Cache>, shutdown: CancellationToken) -> Result<()> {
    let listener = bind(addr, "Request server").await?;

    serve(listener, shutdown, move |req: Request<Incoming>| {
        let cache = Arc::clone(&cache);
        async move {
            match req.uri().path() {
                "/healthz" | "/livez" | "/readyz" => plain(StatusCode::OK, "ok"),
                path => respond(&cache, req.method(), path, req.uri().query()).await,
            }
        }
    })
    .await
}

async fn run_metrics_server(
    addr: &str,
    cache: Arc<Cache>,
    exporter: Arc<PrometheusExporter>,
    shutdown: CancellationToken,
) -> Result<()> {
    let listener = bind(addr, "Metrics server").await?;

    serve(listener, shutdown, move |req: Request<Incoming>| {
        let cache = Arc::clone(&cache);
        let exporter = Arc::clone(&exporter);
        async move {
            if req.uri().path() != "/metrics" {
                return plain(StatusCode::NOT_FOUND, "not found");
            }
            match exporter.render(&cache) {
                Ok((content_type, body)) => {
                    let mut response = Response::new(Full::new(Bytes::from(body)));
                    if let Ok(value) = content_type.parse() {
                        response
                            .headers_mut()
                            .insert(hyper::header::CONTENT_TYPE, value);
                    }
                    response
                }
                Err(e) => {
                    error!("Failed to render metrics: {}", e);
                    plain(StatusCode::INTERNAL_SERVER_ERROR, "Internal error")
                }
            }
        }
    })
    .await
}

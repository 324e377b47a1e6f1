//! Hybrid web server and game-protocol proxy binary.
//!
//! Serves HTTP on the listening port and relays everything else (e.g. a
//! BZFlag-style client handshake) to the configured backend over TCP,
//! bridging the matching UDP channel alongside.

use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use clap::Parser;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::{header, Request, Response};
use tokio::net::TcpListener;

use fallback_proxy::config::{self, ProxyConfig};
use fallback_proxy::lifecycle::{signals, Shutdown};
use fallback_proxy::observability::{logging, metrics};
use fallback_proxy::proxy::Proxy;
use fallback_proxy::sniff::RequestHandler;

#[derive(Parser)]
#[command(name = "fallback-proxy")]
#[command(about = "Share one port between HTTP and a legacy game protocol", long_about = None)]
struct Cli {
    /// Path to a TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listening address for TCP and UDP, overrides the config file.
    #[arg(long)]
    listen: Option<String>,

    /// Backend address, overrides the config file.
    #[arg(long)]
    backend: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    logging::init("fallback_proxy=debug");

    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => config::load_config(path)?,
        None => ProxyConfig::default(),
    };
    if let Some(listen) = cli.listen {
        config.listener.bind_address = listen;
    }
    if let Some(backend) = cli.backend {
        config.backend.address = backend;
    }

    tracing::info!(
        bind_address = %config.listener.bind_address,
        backend = %config.backend.address,
        max_sniff_bytes = config.listener.max_sniff_bytes,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        if let Ok(addr) = config.observability.metrics_address.parse() {
            metrics::init_metrics(addr);
        } else {
            tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            );
        }
    }

    // Bind failure is fatal here; nothing recovers from it downstream.
    let listener = TcpListener::bind(&config.listener.bind_address).await?;

    let shutdown = Shutdown::new();
    let shutdown_rx = shutdown.subscribe();
    tokio::spawn(async move {
        signals::shutdown_signal().await;
        shutdown.trigger();
    });

    let proxy = Proxy::new(config, default_page());
    proxy.run(listener, shutdown_rx).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}

/// Placeholder HTTP handler: logs the request and serves a small page.
fn default_page() -> RequestHandler {
    Arc::new(|req: Request<Incoming>| {
        Box::pin(async move {
            tracing::info!(method = %req.method(), uri = %req.uri(), "HTTP request");
            Response::builder()
                .header(header::CONTENT_TYPE, "text/html")
                .body(Full::new(Bytes::from_static(
                    b"<h1>Hello, World Wide Web</h1>",
                )))
                .expect("static response head")
        })
    })
}

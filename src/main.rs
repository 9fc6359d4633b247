use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use astromo_metrics::config::DEFAULT_GATEWAY_URL;
use astromo_metrics::server::{self, AppState};
use astromo_metrics::{create_metrics_middleware, logging, MetricsConfig};

/// Demo host that reports every request to a metrics gateway.
#[derive(Debug, Parser)]
#[command(name = "astromo-demo", version)]
struct Args {
    /// Port to listen on.
    #[arg(short, long, default_value = "3000")]
    port: u16,

    /// WebSocket endpoint of the metrics gateway.
    #[arg(long, default_value = DEFAULT_GATEWAY_URL)]
    gateway_url: String,

    /// Debug logging, including a summary of every reported record.
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    logging::init(args.debug);

    // ── 1. Metrics middleware (connects in the background) ───────
    let config = MetricsConfig::default()
        .with_gateway_url(args.gateway_url)
        .with_debug(args.debug);
    info!(gateway = %config.gateway_url, "reporting request metrics");
    let metrics = create_metrics_middleware(config);

    // ── 2. Router ───────────────────────────────────────────────
    let app = server::create_router(Arc::new(AppState { metrics }));

    // ── 3. Bind & serve ──────────────────────────────────────────
    let addr = format!("0.0.0.0:{}", args.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    info!("listening on http://localhost:{}", args.port);
    info!("delivery stats → http://localhost:{}/api/metrics", args.port);

    axum::serve(listener, app)
        .await
        .context("server exited with error")?;

    Ok(())
}

mod config;
mod feed;
mod format;
mod http;
mod metrics;
mod snapshot;
mod telemetry;

use axum::serve;
use clap::Parser;
use config::{Config, ConfigError};
use feed::Feed;
use metrics::Metrics;
use snapshot::SnapshotBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use telemetry::{Deadline, HostProvider};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "sysfeed")]
#[command(version)]
struct Cli {
    #[arg(long, default_value = "./config.yaml")]
    config: String,
    #[arg(long)]
    print_default_config: bool,
    /// Overrides `listen` from the config file.
    #[arg(long)]
    listen: Option<String>,
    /// Overrides `feed.interval_secs` from the config file.
    #[arg(long)]
    interval_secs: Option<u64>,
}

#[tokio::main]
async fn main() {
    init_tracing();

    let cli = Cli::parse();
    if cli.print_default_config {
        println!("{}", Config::example_yaml());
        return;
    }

    let cfg = match load_config(&cli) {
        Ok(cfg) => cfg,
        Err(err) => {
            error!(error = %err, "failed to load configuration");
            std::process::exit(1);
        }
    };

    info!(
        listen = %cfg.listen,
        interval_secs = cfg.feed.interval_secs,
        mode = ?cfg.feed.mode,
        "starting sysfeed"
    );

    let metrics = match Metrics::new() {
        Ok(m) => m,
        Err(err) => {
            error!(error = %err, "failed to initialize metrics");
            std::process::exit(1);
        }
    };

    let provider = Deadline::new(HostProvider::new(), cfg.provider.timeout());
    let builder = SnapshotBuilder::new(Arc::new(provider));
    let feed = Feed::new(builder.clone(), metrics.clone(), &cfg.feed);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let ticker_task = feed.spawn_shared_ticker(shutdown_rx.clone());

    let http_task = {
        let cfg = cfg.clone();
        let state = http::HttpAppState {
            metrics: metrics.clone(),
            builder,
            feed,
            shutdown: shutdown_rx.clone(),
        };
        let mut shutdown_rx = shutdown_rx.clone();
        tokio::spawn(async move {
            let app = http::build_router(state, &cfg.cors);
            let addr: SocketAddr = match cfg.listen.parse() {
                Ok(addr) => addr,
                Err(err) => {
                    error!(error = %err, listen = %cfg.listen, "invalid listen address");
                    return;
                }
            };

            let listener = match TcpListener::bind(addr).await {
                Ok(l) => l,
                Err(err) => {
                    error!(error = %err, %addr, "failed to bind HTTP listener");
                    return;
                }
            };
            info!(%addr, "HTTP server listening");

            let server = serve(listener, app).with_graceful_shutdown(async move {
                let _ = shutdown_rx.changed().await;
            });

            if let Err(err) = server.await {
                error!(error = %err, "HTTP server error");
            }
        })
    };

    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "failed to listen for Ctrl+C");
    }
    info!("received Ctrl+C, shutting down");

    let _ = shutdown_tx.send(true);

    if let Some(task) = ticker_task {
        let _ = task.await;
    }
    let _ = http_task.await;
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Reads the config file, falling back to defaults when it does not exist,
/// then applies command-line overrides and validates the result.
fn load_config(cli: &Cli) -> Result<Config, ConfigError> {
    let mut cfg = match Config::load_from_file(&cli.config) {
        Ok(cfg) => cfg,
        Err(err) if err.is_not_found() => {
            warn!(path = %cli.config, "config file not found, using built-in defaults");
            Config::default()
        }
        Err(err) => return Err(err),
    };

    if let Some(listen) = &cli.listen {
        cfg.listen = listen.clone();
    }
    if let Some(interval_secs) = cli.interval_secs {
        cfg.feed.interval_secs = interval_secs;
    }

    cfg.validate()?;
    Ok(cfg)
}

//! voxgate server - HTTP gateway for speech-to-text and text-to-speech

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod api;
mod error;
mod state;

use state::AppState;
use voxgate_core::{EngineConfig, RuntimeService};

const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 9000;
const HOST_ENV: &str = "VOXGATE_HOST";
const PORT_ENV: &str = "VOXGATE_PORT";

#[derive(Debug, Parser)]
#[command(
    name = "voxgate-server",
    about = "HTTP gateway for local speech-to-text and text-to-speech engines",
    version = env!("CARGO_PKG_VERSION")
)]
struct ServerArgs {
    /// Address to bind [env: VOXGATE_HOST] [default: 0.0.0.0]
    #[arg(short = 'H', long)]
    host: Option<String>,

    /// Port to listen on [env: VOXGATE_PORT] [default: 9000]
    #[arg(short, long)]
    port: Option<u16>,

    /// Engine configuration file (TOML) [env: VOXGATE_CONFIG]
    #[arg(short, long)]
    config: Option<PathBuf>,
}

/// Listen address. Each field comes from the CLI, then the environment, then the default.
#[derive(Debug, Clone, PartialEq, Eq)]
struct BindConfig {
    host: String,
    port: u16,
}

impl BindConfig {
    fn resolve(args: &ServerArgs, env: impl Fn(&str) -> Option<String>) -> Self {
        let host = args.host.clone().unwrap_or_else(|| {
            match env(HOST_ENV).map(|raw| raw.trim().to_string()) {
                Some(host) if !host.is_empty() => host,
                Some(_) => {
                    warn!("Empty {}, binding {}", HOST_ENV, DEFAULT_HOST);
                    DEFAULT_HOST.to_string()
                }
                None => DEFAULT_HOST.to_string(),
            }
        });

        let port = args.port.unwrap_or_else(|| match env(PORT_ENV) {
            Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
                warn!("Invalid {}='{}', using port {}", PORT_ENV, raw, DEFAULT_PORT);
                DEFAULT_PORT
            }),
            None => DEFAULT_PORT,
        });

        Self { host, port }
    }

    fn address(&self) -> String {
        // Bare IPv6 literals need brackets to carry a port.
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = ServerArgs::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "voxgate_server=info,voxgate_core=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let bind = BindConfig::resolve(&args, |key| std::env::var(key).ok());
    let config = EngineConfig::load(args.config.as_deref())?;

    // The listener only opens once both engines answered their readiness check.
    let runtime = load_runtime(config).await?;
    let state = AppState::new(runtime);
    let runtime = state.runtime.clone();

    let listener = tokio::net::TcpListener::bind(bind.address())
        .await
        .with_context(|| format!("binding {}", bind.address()))?;
    let local: SocketAddr = listener.local_addr()?;
    info!("voxgate listening on http://{}", local);

    axum::serve(listener, api::create_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    release_runtime(runtime);
    Ok(())
}

/// Start the engines off the async scheduler: worker spawn and model load block.
async fn load_runtime(config: EngineConfig) -> anyhow::Result<RuntimeService> {
    info!(
        "Loading engines (staging in {}, {} worker slots)",
        config.staging_dir.display(),
        config.worker_threads
    );
    let runtime = tokio::task::spawn_blocking(move || RuntimeService::new(config))
        .await
        .context("engine loader panicked")?
        .context("loading engines")?;
    Ok(runtime)
}

/// Drop the last runtime handle so engine workers exit before the process does.
fn release_runtime(runtime: Arc<RuntimeService>) {
    let outstanding = runtime.staging().outstanding();
    if outstanding > 0 {
        warn!("{} staging files still held at shutdown", outstanding);
    }
    match Arc::try_unwrap(runtime) {
        Ok(runtime) => {
            drop(runtime);
            info!("Engine workers stopped");
        }
        Err(_) => warn!("Runtime still referenced at shutdown; engines stop on exit"),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", err);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                warn!("Failed to install SIGTERM handler: {}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, draining requests"),
        _ = terminate => info!("Received SIGTERM, draining requests"),
    }
}

//! texforged - compilation service
//!
//! Exposes `POST /compile`, `GET /status`, `GET /metrics` and `GET /healthz`.

mod error;
mod routes;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn, Level};

use texforge_core::{Compiler, SandboxConfig, METRICS};

use crate::routes::{create_router, AppState};

#[derive(Parser, Debug)]
#[command(name = "texforged")]
#[command(version = texforge_core::VERSION)]
#[command(about = "Sandboxed LaTeX compilation service", long_about = None)]
struct Args {
    /// Address to listen on
    #[arg(long, env = "TEXFORGE_BIND", default_value = "127.0.0.1:8088")]
    bind: SocketAddr,

    /// Maximum request body size in bytes
    #[arg(long, env = "TEXFORGE_MAX_BODY_BYTES", default_value_t = 32 * 1024 * 1024)]
    max_body_bytes: usize,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, env = "TEXFORGE_LOG_JSON")]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    texforge_core::init_tracing(args.json, level);

    let config = SandboxConfig::from_env();
    info!(
        runtime = %config.runtime_binary,
        image = %config.image,
        workspace_root = %config.workspace_root.display(),
        "sandbox configured"
    );
    let state = Arc::new(AppState::new(Compiler::docker(config)));
    let app = create_router(state, args.max_body_bytes);

    let listener = tokio::net::TcpListener::bind(args.bind)
        .await
        .with_context(|| format!("Failed to bind {}", args.bind))?;
    info!("texforged listening on http://{}", args.bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Received shutdown signal");
            }
        })
        .await
        .context("server error")?;

    METRICS.flush();
    let live = METRICS.live_workspaces();
    if live > 0 {
        warn!(live_workspaces = live, "workspaces still allocated at shutdown");
    }
    info!("Server shutdown complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_bind() {
        let args = Args::try_parse_from(["texforged"]).unwrap();
        if std::env::var("TEXFORGE_BIND").is_err() {
            assert_eq!(args.bind.to_string(), "127.0.0.1:8088");
        }
        assert!(args.max_body_bytes > 0);
    }
}

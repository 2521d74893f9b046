//! Web front end for the codeloop engine.
//!
//! Serves a small task API (submit, poll, cancel, download) plus optional
//! static UI files. Submitted tasks run on worker threads; handlers only ever
//! poll the completion handles, so the async runtime never blocks on the
//! engine.

mod routes;
mod state;

use std::net::SocketAddr;
use std::path::PathBuf;

use axum::Router;
use clap::Parser;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tracing::info;

use codeloop::io::config::{apply_env_overrides, load_config};

use crate::state::AppState;

#[derive(Parser)]
#[command(name = "codeloop-ui")]
#[command(about = "Web UI for submitting and monitoring codeloop tasks")]
struct Args {
    /// Address to bind the server to
    #[arg(long, default_value = "127.0.0.1")]
    bind: String,

    /// Port to listen on
    #[arg(long, default_value = "3001")]
    port: u16,

    /// Path to the engine configuration file
    #[arg(long, default_value = "codeloop.toml")]
    config: PathBuf,

    /// Directory containing UI static files (defaults to ./ui/dist)
    #[arg(long)]
    ui_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("codeloop_ui=info".parse()?),
        )
        .init();

    let args = Args::parse();

    let mut config = load_config(&args.config)?;
    apply_env_overrides(&mut config)?;
    config.validate()?;
    info!(model = %config.primary_model_name, backend = ?config.sandbox.backend, "starting codeloop-ui");

    let state = AppState::new(config);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let mut app = Router::new()
        .nest("/api", routes::api_router())
        .layer(cors)
        .with_state(state);

    // Serve static UI files if available
    let ui_dir = args
        .ui_dir
        .unwrap_or_else(|| PathBuf::from("ui").join("dist"));

    if ui_dir.exists() {
        info!(ui_dir = %ui_dir.display(), "serving static UI files");
        app = app.fallback_service(ServeDir::new(ui_dir).append_index_html_on_directories(true));
    } else {
        info!(ui_dir = %ui_dir.display(), "UI directory not found, API-only mode");
    }

    let addr: SocketAddr = format!("{}:{}", args.bind, args.port).parse()?;
    info!(addr = %addr, "listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

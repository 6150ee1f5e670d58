// Copyright 2026 The Framegate Project
// SPDX-License-Identifier: Apache-2.0

use clap::Parser;
use framegate::artifacts::{ArtifactsSink, FsArtifacts};
use framegate::config::Config;
use framegate::provider::OpenAiProviderClient;
use framegate::schema::builtin_registry;
use framegate::server;
use framegate::session::SessionDeps;
use framegate::tools::{IdempotencyCache, ToolRegistry};

use std::net::SocketAddr;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "framegate", about = "Frame-aware LLM streaming gateway")]
struct Cli {
    /// Port to listen on
    #[arg(long, default_value_t = 8484, env = "FRAMEGATE_PORT")]
    port: u16,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .json()
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let addr = SocketAddr::from(([127, 0, 0, 1], cli.port));
    tracing::info!(%addr, "framegate starting");

    let config = match Config::from_env() {
        Ok(c) => Arc::new(c),
        Err(e) => {
            tracing::error!("failed to load config: {e}");
            std::process::exit(1);
        }
    };

    tracing::info!(
        model = %config.model_id,
        provider = %config.provider_base_url,
        frame_timeout_ms = config.frame_timeout_ms,
        tool_timeout_ms = config.tool_timeout_ms,
        "config loaded"
    );

    let artifacts: Arc<dyn ArtifactsSink> = match FsArtifacts::new(&config.artifacts_dir) {
        Ok(fs) => Arc::new(fs),
        Err(e) => {
            tracing::error!("failed to open artifacts directory: {e}");
            std::process::exit(1);
        }
    };

    let provider = Arc::new(OpenAiProviderClient::new(
        config.provider_base_url.clone(),
        config.provider_api_key.clone(),
    ));

    // Tool executors are registered by embedders; the stock binary starts
    // with an empty registry.
    let tools = Arc::new(ToolRegistry::new());

    let deps = SessionDeps {
        config,
        provider,
        schemas: Arc::new(builtin_registry()),
        tools,
        idempotency: Arc::new(IdempotencyCache::new()),
        artifacts,
    };

    let app = server::build_router(deps);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("failed to bind to address");

    tracing::info!(%addr, "framegate listening");

    axum::serve(listener, app)
        .await
        .expect("server error");
}

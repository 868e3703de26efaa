//! GlitchCube conversation server.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use glitchcube::config::CubeConfig;
use glitchcube::conversation::SqliteStore;
use glitchcube::dispatch::{IntentWorker, channel};
use glitchcube::hass::{HassClient, register_hass_tools};
use glitchcube::llm::{OpenAiAdapter, OpenAiConfig, StructuredLlm};
use glitchcube::persona::{PersonaLibrary, SharedPersonaState};
use glitchcube::tools::{MemorySearchTool, ToolRegistry};
use glitchcube::{CubeServer, PipelineDeps, TurnPipeline};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// GlitchCube: conversation backend for the art installation.
#[derive(Parser)]
#[command(name = "glitchcube-server", version, about)]
struct Cli {
    /// Path to TOML configuration file.
    #[arg(short, long, env = "GLITCHCUBE_CONFIG")]
    config: Option<PathBuf>,

    /// Override the listen port.
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => CubeConfig::from_file(path)?,
        None => CubeConfig::load_or_default()?,
    };
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    config.validate()?;

    let _log_guard = glitchcube::logging::init(&config.logging)?;
    info!("GlitchCube v{}", env!("CARGO_PKG_VERSION"));

    let store = Arc::new(SqliteStore::open(&config.store.db_path)?);
    info!(path = %config.store.db_path.display(), "conversation store open");

    let mut registry = ToolRegistry::new(Duration::from_secs(config.tools.timeout_secs));
    registry.register(Arc::new(MemorySearchTool::new(store.clone())));
    if config.home_assistant.is_enabled() {
        match HassClient::from_config(&config.home_assistant) {
            Ok(client) => {
                let count = register_hass_tools(
                    &mut registry,
                    Arc::new(client),
                    &config.home_assistant.services,
                );
                info!(count, "home assistant tools registered");
            }
            Err(e) => warn!(error = %e, "home assistant tools disabled"),
        }
    }
    let registry = Arc::new(registry);

    let llm: Arc<dyn StructuredLlm> = Arc::new(OpenAiAdapter::new(
        OpenAiConfig::from_llm_config(&config.llm)?,
    )?);

    let cancel = CancellationToken::new();
    let (dispatcher, rx) = channel(config.dispatch.queue_capacity);
    let worker = IntentWorker::new(
        Arc::clone(&llm),
        Arc::clone(&registry),
        config.llm.model.clone(),
        rx,
        cancel.clone(),
    )
    .spawn();

    let deps = PipelineDeps {
        store,
        llm,
        registry,
        dispatcher: Arc::new(dispatcher),
        persona_state: Arc::new(SharedPersonaState::new(
            config.conversation.default_persona.clone(),
        )),
        personas: PersonaLibrary::new(config.conversation.personas_dir.clone()),
    };
    let pipeline = Arc::new(TurnPipeline::new(deps, &config));

    let server = CubeServer::start(pipeline, &config.server).await?;
    info!(port = server.port(), "ready");

    tokio::signal::ctrl_c().await?;
    info!("shutting down");

    server.shutdown().await;
    cancel.cancel();
    if let Err(e) = worker.await {
        warn!(error = %e, "intention worker ended abnormally");
    }
    Ok(())
}

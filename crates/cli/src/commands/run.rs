//! `burrow run` — Start the agent.

use burrow_channels::DiscordGateway;
use burrow_config::AppConfig;
use burrow_core::runtime::ModelRuntime;
use burrow_engine::Engine;
use burrow_inference::LocalRuntime;
use burrow_storage::SqliteStore;
use std::sync::Arc;
use tracing::info;

pub async fn run(model_override: Option<String>) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    if let Some(model) = model_override {
        config.model.model = model;
    }
    config.validate()?;

    if !config.discord.enabled {
        return Err("Discord gateway is disabled in config.toml".into());
    }

    println!("🐰 Burrow — Starting agent");
    println!("   Persona: {}", config.persona.name);
    println!("   Model:   {}", config.model.model);
    println!(
        "   Workers: {} (queue depth {})",
        config.scheduler.workers, config.scheduler.queue_depth
    );

    let db_path = config.db_path();
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let store = Arc::new(SqliteStore::new(&db_path.to_string_lossy()).await?);
    info!(path = %db_path.display(), "Storage ready");

    let runtime = Arc::new(LocalRuntime::new(&config.model.model));
    // Load (and on first run download) the model before going online; a
    // model that cannot load is fatal here rather than on the first reply.
    {
        let runtime = runtime.clone();
        tokio::task::spawn_blocking(move || runtime.warm_up())
            .await?
            .map_err(|e| format!("Model failed to load: {e}"))?;
    }
    info!(model = %config.model.model, "Model loaded");

    let gateway = Arc::new(DiscordGateway::new(config.discord.clone()));

    let engine = Engine::new(&config, store, runtime, gateway);
    engine.start().await?;
    println!("   Online. Press Ctrl+C to stop.\n");

    tokio::signal::ctrl_c().await?;
    println!("\n   Shutting down…");
    engine.shutdown().await;

    Ok(())
}

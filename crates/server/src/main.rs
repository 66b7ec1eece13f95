mod api;
mod router;
mod state;

use std::sync::Arc;

use tracing::info;

use foerderband_core::{config, Config};
use foerderband_manager::sources::register_builtin_plugins;
use foerderband_manager::{
    EventBus, HttpWebhookProvider, LifecycleManager, MemoryStore, PluginRegistry,
};

use state::AppState;

/// Wire up the control plane and start the HTTP server.
async fn serve(config: Config) -> anyhow::Result<()> {
    config.log_summary();

    let registry = Arc::new(PluginRegistry::new());
    register_builtin_plugins(&registry);
    info!("source plugins: {}", registry.source_types().join(", "));

    let provider = Arc::new(HttpWebhookProvider::new(config.provider.timeout_secs));
    let bus = Arc::new(EventBus::new());
    let manager = Arc::new(LifecycleManager::new(
        config.clone(),
        Arc::new(MemoryStore::new()),
        registry,
        provider,
        bus,
    ));

    let addr = config.server.bind_addr();
    let state = Arc::new(AppState::new(manager));
    let app = router::build_router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("server listening on http://{}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    config::load_dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    serve(Config::from_env()).await
}

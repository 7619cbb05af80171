use std::sync::Arc;

use tokio::net::TcpListener;

use duel_manager::config::Config;
use duel_manager::engine::Engine;
use duel_manager::registry::Registry;
use duel_manager::server;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Tracing goes to stderr, filter overridable via RUST_LOG
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "duel_manager=info".parse().unwrap()),
        )
        .init();

    let config = Config::from_env();
    let registry = Arc::new(Registry::new(config.connection_ttl));
    let engine = Engine::new(config.clone(), Arc::clone(&registry));

    let listener = TcpListener::bind(("0.0.0.0", config.port)).await?;
    tracing::info!("Duel manager listening on port {}", config.port);

    // Maintenance: reap stale connections and terminal tombstones.
    let sweeper = engine.clone();
    let sweep_interval = config.sweep_interval;
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(sweep_interval);
        loop {
            tick.tick().await;
            sweeper.sweep(chrono::Utc::now());
        }
    });

    server::run(listener, engine, registry).await
}

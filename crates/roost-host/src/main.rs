use std::net::SocketAddr;
use std::sync::Arc;

use sea_orm_migration::MigratorTrait;

mod archive;
mod bot_service;
mod broadcast;
mod error;
mod files_service;
mod health_service;
mod installer;
mod launcher;
mod logs_service;
mod orchestrator;
mod paths;
mod sandbox;
mod supervisor;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let database_url =
        std::env::var("DATABASE_URL").map_err(|_| anyhow::anyhow!("DATABASE_URL is required"))?;
    let db = roost_db::connect(&database_url).await?;

    // Apply migrations on boot (idempotent).
    roost_migration::Migrator::up(&db, None).await?;
    let db = Arc::new(db);

    let broadcaster = broadcast::LogBroadcaster::default();
    let (exits_tx, exits_rx) = tokio::sync::mpsc::unbounded_channel();
    let supervisor = supervisor::BotSupervisor::new(
        Arc::new(launcher::TokioLauncher),
        broadcaster.clone(),
        exits_tx,
    );
    let orchestrator = orchestrator::Orchestrator::new(db, supervisor, broadcaster);
    orchestrator.spawn_exit_listener(exits_rx);

    let addr: SocketAddr = std::env::var("ROOST_LISTEN_ADDR")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or_else(|| ([0, 0, 0, 0], 50051).into());
    tracing::info!(%addr, "roost-host gRPC listening");

    tonic::transport::Server::builder()
        .add_service(health_service::server())
        .add_service(bot_service::server(orchestrator.clone()))
        .add_service(files_service::server(orchestrator.clone()))
        .add_service(logs_service::server(orchestrator))
        .serve(addr)
        .await?;

    Ok(())
}

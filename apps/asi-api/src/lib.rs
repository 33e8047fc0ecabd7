pub mod routes;
pub mod state;

use std::net::SocketAddr;

use asi_service::InsightService;
use asi_storage::db::Db;

/// Build the service against a live database and run the HTTP listener
/// until shutdown. The composition root for the online path.
pub async fn serve(cfg: asi_config::Config) -> color_eyre::Result<()> {
	let db = Db::connect(&cfg.storage.postgres).await?;

	db.ensure_schema(&cfg.storage.vector).await?;
	db.warmup(cfg.storage.postgres.pool_min_conns).await?;

	let http_addr: SocketAddr = cfg.service.http_bind.parse()?;
	let service = InsightService::new(cfg, db);
	let state = state::AppState::new(service);
	let app = routes::router(state);
	let listener = tokio::net::TcpListener::bind(http_addr).await?;

	tracing::info!(%http_addr, "HTTP server listening.");

	axum::serve(listener, app).await?;

	Ok(())
}

pub fn init_tracing(log_level: &str) {
	let filter = tracing_subscriber::EnvFilter::try_new(log_level)
		.unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

	tracing_subscriber::fmt().with_env_filter(filter).init();
}

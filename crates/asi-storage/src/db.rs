use std::time::Duration;

use sqlx::{PgPool, postgres::PgPoolOptions};

use crate::{Result, schema};

pub struct Db {
	pub pool: PgPool,
}
impl Db {
	pub async fn connect(cfg: &asi_config::Postgres) -> Result<Self> {
		let pool = PgPoolOptions::new()
			.max_connections(cfg.pool_max_conns)
			.min_connections(cfg.pool_min_conns)
			.acquire_timeout(Duration::from_millis(cfg.query_timeout_ms))
			.connect(&cfg.dsn)
			.await?;

		Ok(Self { pool })
	}

	pub async fn ensure_schema(&self, cfg: &asi_config::VectorIndex) -> Result<()> {
		let sql = schema::render_schema(cfg.dim, cfg.hnsw_m, cfg.hnsw_ef_construction);
		let lock_id: i64 = 6_880_137;
		// Advisory locks are held per connection. Use a single transaction so
		// the lock is scoped to one connection and released on commit.
		let mut tx = self.pool.begin().await?;

		sqlx::query("SELECT pg_advisory_xact_lock($1)").bind(lock_id).execute(&mut *tx).await?;

		for statement in sql.split(';') {
			let trimmed = statement.trim();

			if trimmed.is_empty() {
				continue;
			}

			sqlx::query(trimmed).execute(&mut *tx).await?;
		}

		tx.commit().await?;

		Ok(())
	}

	/// Establish the minimum pool connections up front so the first queries
	/// do not pay the connect latency.
	pub async fn warmup(&self, min_conns: u32) -> Result<()> {
		let mut conns = Vec::with_capacity(min_conns as usize);

		for _ in 0..min_conns {
			let mut conn = self.pool.acquire().await?;

			sqlx::query("SELECT 1").execute(&mut *conn).await?;
			conns.push(conn);
		}

		Ok(())
	}
}

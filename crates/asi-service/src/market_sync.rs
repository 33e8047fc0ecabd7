use serde::{Deserialize, Serialize};
use time::macros::offset;
use tracing::{info, warn};

use asi_storage::market::{self, NewMarketSnapshot};

use crate::{Error, InsightService, Result};

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct MarketSyncStats {
	pub fetched: usize,
	pub written: usize,
	pub pruned: u64,
	pub skipped: bool,
}

impl InsightService {
	/// Pull the provider's daily A-share spot snapshot and upsert it for
	/// today's (China) trading date. The sync is idempotent per
	/// `(company_code, trading_date)`; an already-synced day is skipped
	/// unless `force` replays it. An empty provider payload marks a
	/// non-trading day.
	pub async fn sync_market_data(&self, force: bool) -> Result<MarketSyncStats> {
		let trading_date = china_today();

		if !force {
			let already_synced: bool = sqlx::query_scalar(
				"SELECT EXISTS (SELECT 1 FROM market_data_daily WHERE trading_date = $1)",
			)
			.bind(trading_date)
			.fetch_one(&self.db.pool)
			.await?;

			if already_synced {
				info!(%trading_date, "Market data already synced for today; skipping.");

				return Ok(MarketSyncStats { skipped: true, ..MarketSyncStats::default() });
			}
		}

		let snapshots = self
			.breakers
			.market
			.call(|| self.providers.market.fetch_daily_spot(&self.cfg.providers.market))
			.await
			.map_err(|err| Error::from_breaker(err, "market"))?;

		if snapshots.is_empty() {
			warn!(%trading_date, "Market provider returned no rows; treating as a non-trading day.");

			return Ok(MarketSyncStats { skipped: true, ..MarketSyncStats::default() });
		}

		let rows: Vec<NewMarketSnapshot> = snapshots
			.iter()
			.map(|snapshot| NewMarketSnapshot {
				company_code: snapshot.company_code.clone(),
				total_market_cap: snapshot.total_market_cap,
				circulating_market_cap: snapshot.circulating_market_cap,
				turnover_amount: snapshot.turnover_amount,
			})
			.collect();
		let mut tx = self.db.pool.begin().await?;
		let written = market::save_daily_snapshot(&mut *tx, trading_date, &rows).await?;

		tx.commit().await?;

		let pruned = market::prune(&self.db.pool, self.cfg.market_filter.retention_days).await?;

		info!(%trading_date, fetched = snapshots.len(), written, pruned, "Market data sync completed.");

		// A fresh snapshot invalidates cached market lookups.
		self.market_cache.clear().await;

		Ok(MarketSyncStats { fetched: snapshots.len(), written, pruned, skipped: false })
	}
}

/// Trading dates follow the exchange's calendar, fixed at UTC+8.
fn china_today() -> time::Date {
	time::OffsetDateTime::now_utc().to_offset(offset!(+8)).date()
}

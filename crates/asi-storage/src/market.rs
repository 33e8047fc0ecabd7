use sqlx::{PgConnection, PgExecutor};
use time::Date;

use crate::{Result, models::MarketCurrentRow};

#[derive(Debug, Clone)]
pub struct NewMarketSnapshot {
	pub company_code: String,
	pub total_market_cap: f64,
	pub circulating_market_cap: f64,
	pub turnover_amount: f64,
}

/// Upsert the day's snapshots keyed by `(company_code, trading_date)`, the
/// latest write winning per date. Rows for unknown companies are dropped.
/// Returns the number of rows written.
pub async fn save_daily_snapshot(
	conn: &mut PgConnection,
	trading_date: Date,
	snapshots: &[NewMarketSnapshot],
) -> Result<usize> {
	let mut written = 0;

	for snapshot in snapshots {
		let result = sqlx::query(
			"\
INSERT INTO market_data_daily (
	company_code,
	trading_date,
	total_market_cap,
	circulating_market_cap,
	turnover_amount
)
SELECT $1, $2, $3::float8::numeric(20, 2), $4::float8::numeric(20, 2), $5::float8::numeric(20, 2)
WHERE EXISTS (SELECT 1 FROM companies WHERE company_code = $1)
ON CONFLICT (company_code, trading_date) DO UPDATE
SET
	total_market_cap = EXCLUDED.total_market_cap,
	circulating_market_cap = EXCLUDED.circulating_market_cap,
	turnover_amount = EXCLUDED.turnover_amount,
	created_at = now()",
		)
		.bind(snapshot.company_code.as_str())
		.bind(trading_date)
		.bind(snapshot.total_market_cap)
		.bind(snapshot.circulating_market_cap)
		.bind(snapshot.turnover_amount)
		.execute(&mut *conn)
		.await?;

		written += result.rows_affected() as usize;
	}

	Ok(written)
}

/// Latest snapshot plus rolling 5-day average per requested code, served
/// from the `market_data_current` view. Codes without any snapshot are
/// simply absent from the result.
pub async fn get_current<'e, E>(executor: E, codes: &[String]) -> Result<Vec<MarketCurrentRow>>
where
	E: PgExecutor<'e>,
{
	if codes.is_empty() {
		return Ok(Vec::new());
	}

	let rows = sqlx::query_as::<_, MarketCurrentRow>(
		"\
SELECT
	company_code,
	current_market_cap::float8 AS current_market_cap,
	current_circulating_cap::float8 AS current_circulating_cap,
	today_volume::float8 AS today_volume,
	avg_5day_volume::float8 AS avg_5day_volume,
	last_updated
FROM market_data_current
WHERE company_code = ANY($1)",
	)
	.bind(codes)
	.fetch_all(executor)
	.await?;

	Ok(rows)
}

/// Trim snapshots older than the retention window. Returns the number of
/// deleted rows.
pub async fn prune<'e, E>(executor: E, retention_days: i64) -> Result<u64>
where
	E: PgExecutor<'e>,
{
	let result =
		sqlx::query("DELETE FROM market_data_daily WHERE trading_date < CURRENT_DATE - $1::int")
			.bind(retention_days as i32)
			.execute(executor)
			.await?;

	Ok(result.rows_affected())
}

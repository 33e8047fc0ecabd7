use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;

use crate::{Error, Result};

/// One company's row in the provider's daily A-share spot table.
#[derive(Clone, Debug, PartialEq)]
pub struct MarketSnapshot {
	pub company_code: String,
	pub company_name: String,
	pub total_market_cap: f64,
	pub circulating_market_cap: f64,
	pub turnover_amount: f64,
}

#[derive(Debug, Deserialize)]
struct SpotRecord {
	#[serde(alias = "代码", alias = "code")]
	code: String,
	#[serde(alias = "名称", alias = "name")]
	name: String,
	#[serde(alias = "总市值", alias = "total_market_cap")]
	total_market_cap: Option<f64>,
	#[serde(alias = "流通市值", alias = "circulating_market_cap")]
	circulating_market_cap: Option<f64>,
	#[serde(alias = "成交额", alias = "turnover_amount")]
	turnover_amount: Option<f64>,
}

/// Fetch the full daily spot snapshot. An empty payload means a non-trading
/// day; rows with missing numbers are skipped.
pub async fn fetch_daily_spot(
	cfg: &asi_config::MarketProviderConfig,
) -> Result<Vec<MarketSnapshot>> {
	let client = Client::builder().timeout(Duration::from_millis(cfg.timeout_ms)).build()?;
	let url = format!("{}{}", cfg.api_base, cfg.spot_path);
	let res = client.get(url).send().await?;
	let records: Vec<SpotRecord> = res.error_for_status()?.json().await?;

	Ok(convert_records(records))
}

fn convert_records(records: Vec<SpotRecord>) -> Vec<MarketSnapshot> {
	records
		.into_iter()
		.filter_map(|record| {
			let total_market_cap = record.total_market_cap?;
			let circulating_market_cap = record.circulating_market_cap?;
			let turnover_amount = record.turnover_amount?;

			Some(MarketSnapshot {
				company_code: record.code,
				company_name: record.name,
				total_market_cap,
				circulating_market_cap,
				turnover_amount,
			})
		})
		.collect()
}

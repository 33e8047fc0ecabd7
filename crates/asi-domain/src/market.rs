use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::aggregate::AggregatedCompany;

/// One scoring band: `min <= value < max` maps to `score`.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct TierBand {
	pub min: f64,
	pub max: f64,
	pub score: f64,
}

/// Tunable thresholds and tier tables for market-informed scoring.
#[derive(Clone, Debug)]
pub struct MarketFilterPolicy {
	pub max_market_cap: f64,
	pub max_avg_volume_5d: f64,
	pub market_cap_tiers: Vec<TierBand>,
	pub volume_tiers: Vec<TierBand>,
	pub relevance_mapping_enabled: bool,
	pub relevance_tiers: Vec<TierBand>,
}
impl Default for MarketFilterPolicy {
	fn default() -> Self {
		Self {
			max_market_cap: 85e8,
			max_avg_volume_5d: 2e8,
			market_cap_tiers: vec![
				TierBand { min: 60e8, max: 85e8, score: 1.0 },
				TierBand { min: 40e8, max: 60e8, score: 2.0 },
				TierBand { min: 0.0, max: 40e8, score: 3.0 },
			],
			volume_tiers: vec![
				TierBand { min: 1e8, max: 2e8, score: 1.0 },
				TierBand { min: 0.5e8, max: 1e8, score: 2.0 },
				TierBand { min: 0.0, max: 0.5e8, score: 3.0 },
			],
			relevance_mapping_enabled: false,
			relevance_tiers: vec![
				TierBand { min: 0.8, max: 1.0, score: 1.0 },
				TierBand { min: 0.5, max: 0.8, score: 0.5 },
				TierBand { min: 0.0, max: 0.5, score: 0.1 },
			],
		}
	}
}
impl MarketFilterPolicy {
	fn tier_score(value: f64, tiers: &[TierBand]) -> f64 {
		for tier in tiers {
			if tier.min <= value && value < tier.max {
				return tier.score;
			}
		}

		// Out-of-band values fall into the last configured tier.
		tiers.last().map(|tier| tier.score).unwrap_or(0.0)
	}

	pub fn market_cap_score(&self, market_cap: f64) -> f64 {
		Self::tier_score(market_cap, &self.market_cap_tiers)
	}

	pub fn volume_score(&self, volume: f64) -> f64 {
		Self::tier_score(volume, &self.volume_tiers)
	}

	pub fn relevance_coefficient(&self, relevance_score: f32) -> f64 {
		if self.relevance_mapping_enabled {
			Self::tier_score(relevance_score as f64, &self.relevance_tiers)
		} else {
			relevance_score as f64
		}
	}
}

/// Caller-requested thresholds. `None` leaves that axis unfiltered.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct MarketFilters {
	pub max_market_cap_cny: Option<f64>,
	pub max_avg_volume_5day: Option<f64>,
}
impl MarketFilters {
	pub fn is_empty(&self) -> bool {
		self.max_market_cap_cny.is_none() && self.max_avg_volume_5day.is_none()
	}
}

/// Current market observations for one company, as served by the
/// market-data store.
#[derive(Clone, Debug)]
pub struct MarketData {
	pub company_code: String,
	pub market_cap_cny: Option<f64>,
	pub avg_volume_5day: Option<f64>,
}

#[derive(Clone, Debug)]
pub struct ScoredCompany {
	pub company: AggregatedCompany,
	pub market_cap_score: f64,
	pub volume_score: f64,
	pub relevance_coefficient: f64,
	pub l_score: f64,
}

#[derive(Clone, Debug, Default)]
pub struct FilterOutcome {
	pub scored: Vec<ScoredCompany>,
	pub applied: bool,
	pub market_cap_filter: bool,
	pub volume_filter: bool,
	pub total_before_filter: usize,
	pub excluded_over_market_cap: usize,
	pub excluded_over_volume: usize,
	pub excluded_missing_data: usize,
}
impl FilterOutcome {
	fn not_applied(companies: Vec<AggregatedCompany>) -> Self {
		let total = companies.len();
		let scored = companies
			.into_iter()
			.map(|company| ScoredCompany {
				relevance_coefficient: company.relevance_score as f64,
				company,
				market_cap_score: 0.0,
				volume_score: 0.0,
				l_score: 0.0,
			})
			.collect();

		Self { scored, total_before_filter: total, ..Self::default() }
	}

	pub fn into_companies(self) -> Vec<AggregatedCompany> {
		self.scored.into_iter().map(|scored| scored.company).collect()
	}
}

/// Apply threshold filtering and `L = X * (S + V)` scoring.
///
/// When the market-data map is empty the filter degrades: companies pass
/// through in their pre-filter order and `applied` stays false so the caller
/// can surface "requested but not applied". Once data is available,
/// companies without a row are excluded conservatively while a threshold is
/// active. Survivors are ordered by descending L with ascending
/// `company_code` as the tie-break.
pub fn apply_filters(
	companies: Vec<AggregatedCompany>,
	filters: MarketFilters,
	market_data: &HashMap<String, MarketData>,
	policy: &MarketFilterPolicy,
) -> FilterOutcome {
	if filters.is_empty() || market_data.is_empty() {
		return FilterOutcome::not_applied(companies);
	}

	let mut outcome = FilterOutcome {
		applied: true,
		total_before_filter: companies.len(),
		..FilterOutcome::default()
	};

	for company in companies {
		let Some(data) = market_data.get(&company.company_code) else {
			outcome.excluded_missing_data += 1;

			continue;
		};

		if let Some(max_cap) = filters.max_market_cap_cny {
			outcome.market_cap_filter = true;

			if data.market_cap_cny.map(|cap| cap > max_cap).unwrap_or(true) {
				outcome.excluded_over_market_cap += 1;

				continue;
			}
		}
		if let Some(max_volume) = filters.max_avg_volume_5day {
			outcome.volume_filter = true;

			if data.avg_volume_5day.map(|volume| volume > max_volume).unwrap_or(true) {
				outcome.excluded_over_volume += 1;

				continue;
			}
		}

		let market_cap_score = policy.market_cap_score(data.market_cap_cny.unwrap_or(0.0));
		let volume_score = policy.volume_score(data.avg_volume_5day.unwrap_or(0.0));
		let relevance_coefficient = policy.relevance_coefficient(company.relevance_score);
		let l_score = relevance_coefficient * (market_cap_score + volume_score);

		outcome.scored.push(ScoredCompany {
			company,
			market_cap_score,
			volume_score,
			relevance_coefficient,
			l_score,
		});
	}

	outcome.scored.sort_by(|a, b| {
		b.l_score
			.total_cmp(&a.l_score)
			.then_with(|| a.company.company_code.cmp(&b.company.company_code))
	});

	outcome
}

#[cfg(test)]
mod tests {
	use super::*;

	fn company(code: &str, relevance: f32) -> AggregatedCompany {
		AggregatedCompany {
			company_code: code.to_string(),
			company_name: format!("公司{code}"),
			relevance_score: relevance,
			matched_concepts: Vec::new(),
		}
	}

	fn data(code: &str, cap: f64, volume: f64) -> (String, MarketData) {
		(
			code.to_string(),
			MarketData {
				company_code: code.to_string(),
				market_cap_cny: Some(cap),
				avg_volume_5day: Some(volume),
			},
		)
	}

	#[test]
	fn degrades_when_no_market_data_exists() {
		let companies = vec![company("688448", 0.9), company("002598", 0.8)];
		let outcome = apply_filters(
			companies,
			MarketFilters { max_market_cap_cny: Some(85e8), max_avg_volume_5day: None },
			&HashMap::new(),
			&MarketFilterPolicy::default(),
		);

		assert!(!outcome.applied);
		assert_eq!(outcome.total_before_filter, 2);

		// Pre-filter ordering survives untouched.
		let codes: Vec<&str> =
			outcome.scored.iter().map(|s| s.company.company_code.as_str()).collect();

		assert_eq!(codes, vec!["688448", "002598"]);
	}

	#[test]
	fn excludes_companies_over_the_cap_threshold() {
		let companies =
			vec![company("688448", 0.9), company("002598", 0.95), company("300157", 0.8)];
		let market_data: HashMap<_, _> = [
			data("688448", 5e9, 1.2e8),
			data("002598", 12e9, 1.0e8),
			data("300157", 3.5e9, 4e7),
		]
		.into_iter()
		.collect();
		let outcome = apply_filters(
			companies,
			MarketFilters { max_market_cap_cny: Some(8.5e9), max_avg_volume_5day: None },
			&market_data,
			&MarketFilterPolicy::default(),
		);

		assert!(outcome.applied);
		assert!(outcome.market_cap_filter);
		assert!(!outcome.volume_filter);
		assert_eq!(outcome.excluded_over_market_cap, 1);
		assert!(outcome.scored.iter().all(|s| s.company.company_code != "002598"));

		// 688448: S=2 (40e8..60e8), V=1 (1e8..2e8) -> L = 0.9 * 3 = 2.7
		// 300157: S=3, V=3 -> L = 0.8 * 6 = 4.8
		let first = &outcome.scored[0];
		let second = &outcome.scored[1];

		assert_eq!(first.company.company_code, "300157");
		assert!((first.l_score - 4.8).abs() < 1e-6);
		assert_eq!(second.company.company_code, "688448");
		assert!((second.l_score - 2.7).abs() < 1e-6);
	}

	#[test]
	fn missing_data_rows_are_excluded_while_filter_is_active() {
		let companies = vec![company("688448", 0.9), company("603100", 0.7)];
		let market_data: HashMap<_, _> = [data("688448", 5e9, 1.2e8)].into_iter().collect();
		let outcome = apply_filters(
			companies,
			MarketFilters { max_market_cap_cny: Some(85e8), max_avg_volume_5day: None },
			&market_data,
			&MarketFilterPolicy::default(),
		);

		assert_eq!(outcome.excluded_missing_data, 1);
		assert_eq!(outcome.scored.len(), 1);
	}

	#[test]
	fn l_score_stays_within_tier_bounds() {
		let policy = MarketFilterPolicy::default();
		let max_s = policy.market_cap_tiers.iter().map(|t| t.score).fold(0.0, f64::max);
		let max_v = policy.volume_tiers.iter().map(|t| t.score).fold(0.0, f64::max);
		let companies = vec![company("300157", 1.0)];
		let market_data: HashMap<_, _> = [data("300157", 1e8, 1e6)].into_iter().collect();
		let outcome = apply_filters(
			companies,
			MarketFilters { max_market_cap_cny: Some(85e8), max_avg_volume_5day: Some(2e8) },
			&market_data,
			&policy,
		);

		assert!(outcome.scored[0].l_score <= max_s + max_v);
		assert!(outcome.scored[0].l_score >= 0.0);
	}

	#[test]
	fn relevance_mapping_discretizes_x() {
		let policy =
			MarketFilterPolicy { relevance_mapping_enabled: true, ..MarketFilterPolicy::default() };
		let companies = vec![company("300157", 0.9)];
		let market_data: HashMap<_, _> = [data("300157", 3.5e9, 4e7)].into_iter().collect();
		let outcome = apply_filters(
			companies,
			MarketFilters { max_market_cap_cny: Some(85e8), max_avg_volume_5day: None },
			&market_data,
			&policy,
		);

		// X maps into the 0.8..1.0 tier (score 1.0): L = 1.0 * (3 + 3).
		assert!((outcome.scored[0].l_score - 6.0).abs() < 1e-6);
	}

	#[test]
	fn l_ties_break_by_ascending_company_code() {
		let companies = vec![company("300157", 0.8), company("002598", 0.8)];
		let market_data: HashMap<_, _> =
			[data("300157", 3.5e9, 4e7), data("002598", 3.5e9, 4e7)].into_iter().collect();
		let outcome = apply_filters(
			companies,
			MarketFilters { max_market_cap_cny: Some(85e8), max_avg_volume_5day: None },
			&market_data,
			&MarketFilterPolicy::default(),
		);
		let codes: Vec<&str> =
			outcome.scored.iter().map(|s| s.company.company_code.as_str()).collect();

		assert_eq!(codes, vec!["002598", "300157"]);
	}
}

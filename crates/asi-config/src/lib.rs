mod types;

use std::{env, fs, path::Path};

use color_eyre::eyre;

pub use types::{
	Config, EmbeddingProviderConfig, Fusion, MarketFilter, MarketProviderConfig, Postgres,
	Providers, RerankProviderConfig, Resilience, Search, SearchCache, Service, Storage, Tier,
	VectorIndex, Vectorization,
};

pub const ENV_PREFIX: &str = "ASI_";

pub fn load(path: &Path) -> color_eyre::Result<Config> {
	let raw = fs::read_to_string(path)?;

	let mut cfg: Config = toml::from_str(&raw)?;

	apply_env_overrides(&mut cfg);

	validate(&cfg)?;

	Ok(cfg)
}

/// Environment variables with the `ASI_` prefix override their file
/// counterparts. Secrets (DSN, API keys) are expected to arrive this way.
fn apply_env_overrides(cfg: &mut Config) {
	if let Some(dsn) = env_var("POSTGRES_DSN") {
		cfg.storage.postgres.dsn = dsn;
	}
	if let Some(key) = env_var("EMBEDDING_API_KEY") {
		cfg.providers.embedding.api_key = key;
	}
	if let Some(base) = env_var("EMBEDDING_API_BASE") {
		cfg.providers.embedding.api_base = base;
	}
	if let Some(key) = env_var("RERANK_API_KEY") {
		cfg.providers.rerank.api_key = key;
	}
	if let Some(base) = env_var("RERANK_API_BASE") {
		cfg.providers.rerank.api_base = base;
	}
	if let Some(base) = env_var("MARKET_API_BASE") {
		cfg.providers.market.api_base = base;
	}
	if let Some(bind) = env_var("HTTP_BIND") {
		cfg.service.http_bind = bind;
	}
	if let Some(level) = env_var("LOG_LEVEL") {
		cfg.service.log_level = level;
	}
	if let Some(value) = env_var("SIMILARITY_THRESHOLD").and_then(|raw| raw.parse().ok()) {
		cfg.search.similarity_threshold = value;
	}
	if let Some(value) = env_var("DEFAULT_TOP_K").and_then(|raw| raw.parse().ok()) {
		cfg.search.default_top_k = value;
	}
	if let Some(value) = env_var("MAX_MARKET_CAP").and_then(|raw| raw.parse().ok()) {
		cfg.market_filter.max_market_cap = value;
	}
	if let Some(value) = env_var("MAX_AVG_VOLUME_5D").and_then(|raw| raw.parse().ok()) {
		cfg.market_filter.max_avg_volume_5d = value;
	}
}

fn env_var(suffix: &str) -> Option<String> {
	env::var(format!("{ENV_PREFIX}{suffix}")).ok().filter(|value| !value.trim().is_empty())
}

pub fn validate(cfg: &Config) -> color_eyre::Result<()> {
	if cfg.service.http_bind.trim().is_empty() {
		return Err(eyre::eyre!("service.http_bind must be non-empty."));
	}
	if cfg.storage.postgres.dsn.trim().is_empty() {
		return Err(eyre::eyre!("storage.postgres.dsn must be non-empty."));
	}
	if cfg.storage.postgres.pool_max_conns == 0 {
		return Err(eyre::eyre!("storage.postgres.pool_max_conns must be greater than zero."));
	}
	if cfg.storage.vector.dim == 0 {
		return Err(eyre::eyre!("storage.vector.dim must be greater than zero."));
	}
	if cfg.providers.embedding.dimensions != cfg.storage.vector.dim {
		return Err(eyre::eyre!("providers.embedding.dimensions must match storage.vector.dim."));
	}
	if cfg.providers.embedding.max_batch_size == 0 {
		return Err(eyre::eyre!("providers.embedding.max_batch_size must be greater than zero."));
	}
	if cfg.providers.embedding.max_concurrency == 0 {
		return Err(eyre::eyre!("providers.embedding.max_concurrency must be greater than zero."));
	}
	if cfg.providers.rerank.max_documents == 0 {
		return Err(eyre::eyre!("providers.rerank.max_documents must be greater than zero."));
	}
	if !(1..=100).contains(&cfg.search.default_top_k) {
		return Err(eyre::eyre!("search.default_top_k must be in the range 1-100."));
	}
	if !(0.0..=1.0).contains(&cfg.search.similarity_threshold) {
		return Err(eyre::eyre!("search.similarity_threshold must be in the range 0.0-1.0."));
	}
	if cfg.search.recall_limit == 0 {
		return Err(eyre::eyre!("search.recall_limit must be greater than zero."));
	}
	if cfg.search.recall_concurrency == 0 {
		return Err(eyre::eyre!("search.recall_concurrency must be greater than zero."));
	}

	for (label, weight) in [
		("search.rerank_weight", cfg.search.rerank_weight),
		("search.importance_weight", cfg.search.importance_weight),
	] {
		if !weight.is_finite() || !(0.0..=1.0).contains(&weight) {
			return Err(eyre::eyre!("{label} must be in the range 0.0-1.0."));
		}
	}

	let weight_sum = cfg.search.rerank_weight + cfg.search.importance_weight;

	if (weight_sum - 1.0).abs() > 0.02 {
		return Err(eyre::eyre!(
			"search.rerank_weight and search.importance_weight must sum to 1.0 (got {weight_sum:.3})."
		));
	}
	if !matches!(cfg.search.aggregation.as_str(), "max" | "mean") {
		return Err(eyre::eyre!("search.aggregation must be one of max or mean."));
	}
	if cfg.search.max_concepts_per_company == 0 {
		return Err(eyre::eyre!("search.max_concepts_per_company must be greater than zero."));
	}
	if cfg.search.cache.max_entries == 0 {
		return Err(eyre::eyre!("search.cache.max_entries must be greater than zero."));
	}
	if cfg.fusion.batch_size == 0 {
		return Err(eyre::eyre!("fusion.batch_size must be greater than zero."));
	}
	if cfg.fusion.max_retries == 0 {
		return Err(eyre::eyre!("fusion.max_retries must be greater than zero."));
	}
	if cfg.fusion.max_source_sentences == 0 {
		return Err(eyre::eyre!("fusion.max_source_sentences must be greater than zero."));
	}
	if cfg.vectorization.max_text_chars == 0 {
		return Err(eyre::eyre!("vectorization.max_text_chars must be greater than zero."));
	}

	validate_tiers("market_filter.market_cap_tiers", &cfg.market_filter.market_cap_tiers)?;
	validate_tiers("market_filter.volume_tiers", &cfg.market_filter.volume_tiers)?;

	if cfg.market_filter.relevance_mapping_enabled {
		validate_tiers("market_filter.relevance_tiers", &cfg.market_filter.relevance_tiers)?;
	}
	if cfg.market_filter.retention_days <= 0 {
		return Err(eyre::eyre!("market_filter.retention_days must be greater than zero."));
	}
	if cfg.resilience.failure_threshold == 0 {
		return Err(eyre::eyre!("resilience.failure_threshold must be greater than zero."));
	}

	Ok(())
}

fn validate_tiers(label: &str, tiers: &[Tier]) -> color_eyre::Result<()> {
	if tiers.is_empty() {
		return Err(eyre::eyre!("{label} must be non-empty."));
	}

	for tier in tiers {
		if !tier.min.is_finite() || !tier.max.is_finite() || !tier.score.is_finite() {
			return Err(eyre::eyre!("{label} entries must be finite numbers."));
		}
		if tier.min >= tier.max {
			return Err(eyre::eyre!("{label} entries must satisfy min < max."));
		}
	}

	Ok(())
}

pub mod archive;
pub mod fusion;
pub mod market_sync;
pub mod search;
pub mod vectorize;

mod error;

pub use self::{
	archive::{ArchiveOutcome, ArchiveRequest, DocType, ExtractionResult},
	error::{Error, Result},
	fusion::FusionStats,
	market_sync::MarketSyncStats,
	search::{
		CompanyResult, Justification, MarketFiltersRequest, MatchedConcept, QueryCompany,
		SearchMetadata, SearchRequest, SearchResponse,
	},
	vectorize::{VectorizeRequest, VectorizeStats},
};

use std::{pin::Pin, sync::Arc, time::Duration};

use asi_config::{Config, EmbeddingProviderConfig, MarketProviderConfig, RerankProviderConfig};
use asi_domain::{ConceptCategory, ConceptDetails, MarketFilterPolicy, MasterConcept, TierBand};
use asi_providers::{market::MarketSnapshot, rerank::RerankResult};
use asi_resilience::{CircuitBreaker, TtlLruCache};
use asi_storage::{db::Db, models::ConceptRow};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub trait EmbeddingProvider
where
	Self: Send + Sync,
{
	fn embed<'a>(
		&'a self,
		cfg: &'a EmbeddingProviderConfig,
		texts: &'a [String],
	) -> BoxFuture<'a, Result<Vec<Vec<f32>>>>;
}

pub trait RerankProvider
where
	Self: Send + Sync,
{
	fn rerank<'a>(
		&'a self,
		cfg: &'a RerankProviderConfig,
		query: &'a str,
		docs: &'a [String],
		top_k: usize,
	) -> BoxFuture<'a, Result<Vec<RerankResult>>>;
}

pub trait MarketDataProvider
where
	Self: Send + Sync,
{
	fn fetch_daily_spot<'a>(
		&'a self,
		cfg: &'a MarketProviderConfig,
	) -> BoxFuture<'a, Result<Vec<MarketSnapshot>>>;
}

#[derive(Clone)]
pub struct Providers {
	pub embedding: Arc<dyn EmbeddingProvider>,
	pub rerank: Arc<dyn RerankProvider>,
	pub market: Arc<dyn MarketDataProvider>,
}
impl Default for Providers {
	fn default() -> Self {
		let provider = Arc::new(DefaultProviders);

		Self { embedding: provider.clone(), rerank: provider.clone(), market: provider }
	}
}

/// One breaker per external dependency, shared across requests.
pub struct Breakers {
	pub db: CircuitBreaker,
	pub embedding: CircuitBreaker,
	pub rerank: CircuitBreaker,
	pub market: CircuitBreaker,
}
impl Breakers {
	fn from_config(cfg: &asi_config::Resilience) -> Self {
		let build = || {
			CircuitBreaker::new(
				cfg.failure_threshold,
				Duration::from_secs(cfg.recovery_timeout_secs),
			)
		};

		Self { db: build(), embedding: build(), rerank: build(), market: build() }
	}
}

pub struct InsightService {
	pub cfg: Config,
	pub db: Db,
	pub providers: Providers,
	pub breakers: Breakers,
	pub(crate) search_cache: TtlLruCache<String, SearchResponse>,
	pub(crate) market_cache: TtlLruCache<String, Vec<asi_storage::models::MarketCurrentRow>>,
}
impl InsightService {
	pub fn new(cfg: Config, db: Db) -> Self {
		Self::with_providers(cfg, db, Providers::default())
	}

	pub fn with_providers(cfg: Config, db: Db, providers: Providers) -> Self {
		let cache_ttl = Duration::from_secs(cfg.search.cache.ttl_seconds);
		let search_cache = TtlLruCache::new(cfg.search.cache.max_entries, cache_ttl);
		let market_cache = TtlLruCache::new(cfg.search.cache.max_entries, cache_ttl);
		let breakers = Breakers::from_config(&cfg.resilience);

		Self { cfg, db, providers, breakers, search_cache, market_cache }
	}

	pub async fn cache_stats(&self) -> (asi_resilience::CacheStats, asi_resilience::CacheStats) {
		(self.search_cache.stats().await, self.market_cache.stats().await)
	}

	pub async fn clear_caches(&self) {
		self.search_cache.clear().await;
		self.market_cache.clear().await;
	}
}

struct DefaultProviders;
impl EmbeddingProvider for DefaultProviders {
	fn embed<'a>(
		&'a self,
		cfg: &'a EmbeddingProviderConfig,
		texts: &'a [String],
	) -> BoxFuture<'a, Result<Vec<Vec<f32>>>> {
		Box::pin(async move { asi_providers::embedding::embed(cfg, texts).await.map_err(Into::into) })
	}
}
impl RerankProvider for DefaultProviders {
	fn rerank<'a>(
		&'a self,
		cfg: &'a RerankProviderConfig,
		query: &'a str,
		docs: &'a [String],
		top_k: usize,
	) -> BoxFuture<'a, Result<Vec<RerankResult>>> {
		Box::pin(async move {
			asi_providers::rerank::rerank(cfg, query, docs, top_k).await.map_err(Into::into)
		})
	}
}
impl MarketDataProvider for DefaultProviders {
	fn fetch_daily_spot<'a>(
		&'a self,
		cfg: &'a MarketProviderConfig,
	) -> BoxFuture<'a, Result<Vec<MarketSnapshot>>> {
		Box::pin(async move {
			asi_providers::market::fetch_daily_spot(cfg).await.map_err(Into::into)
		})
	}
}

pub(crate) fn master_from_row(row: ConceptRow) -> Result<MasterConcept> {
	let concept_category =
		ConceptCategory::parse(&row.concept_category).ok_or_else(|| Error::Validation {
			message: format!("Unknown concept category {:?}.", row.concept_category),
		})?;
	let details: ConceptDetails =
		serde_json::from_value(row.concept_details).map_err(|err| Error::Validation {
			message: format!("Malformed concept_details for {}: {err}.", row.concept_id),
		})?;

	Ok(MasterConcept {
		concept_id: row.concept_id,
		company_code: row.company_code,
		concept_name: row.concept_name,
		concept_category,
		importance_score: row.importance_score,
		development_stage: row.development_stage,
		details,
		last_updated_from_doc_id: row.last_updated_from_doc_id,
		version: row.version,
		is_active: row.is_active,
		created_at: row.created_at,
		updated_at: row.updated_at,
	})
}

pub(crate) fn details_to_json(details: &ConceptDetails) -> Result<serde_json::Value> {
	serde_json::to_value(details)
		.map_err(|err| Error::Validation { message: format!("Unserializable details: {err}.") })
}

pub(crate) fn filter_policy(cfg: &asi_config::MarketFilter) -> MarketFilterPolicy {
	let bands = |tiers: &[asi_config::Tier]| {
		tiers
			.iter()
			.map(|tier| TierBand { min: tier.min, max: tier.max, score: tier.score })
			.collect()
	};

	MarketFilterPolicy {
		max_market_cap: cfg.max_market_cap,
		max_avg_volume_5d: cfg.max_avg_volume_5d,
		market_cap_tiers: bands(&cfg.market_cap_tiers),
		volume_tiers: bands(&cfg.volume_tiers),
		relevance_mapping_enabled: cfg.relevance_mapping_enabled,
		relevance_tiers: bands(&cfg.relevance_tiers),
	}
}

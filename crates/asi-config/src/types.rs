use serde::Deserialize;
use serde_json::{Map, Value};

#[derive(Debug, Deserialize)]
pub struct Config {
	pub service: Service,
	pub storage: Storage,
	pub providers: Providers,
	#[serde(default)]
	pub search: Search,
	#[serde(default)]
	pub fusion: Fusion,
	#[serde(default)]
	pub vectorization: Vectorization,
	#[serde(default)]
	pub market_filter: MarketFilter,
	#[serde(default)]
	pub resilience: Resilience,
}

#[derive(Debug, Deserialize)]
pub struct Service {
	pub http_bind: String,
	pub log_level: String,
}

#[derive(Debug, Deserialize)]
pub struct Storage {
	pub postgres: Postgres,
	pub vector: VectorIndex,
}

#[derive(Debug, Deserialize)]
pub struct Postgres {
	pub dsn: String,
	pub pool_max_conns: u32,
	#[serde(default = "default_pool_min_conns")]
	pub pool_min_conns: u32,
	#[serde(default = "default_query_timeout_ms")]
	pub query_timeout_ms: u64,
}

/// HNSW parameters for the halfvec cosine index over concept embeddings.
#[derive(Debug, Deserialize)]
pub struct VectorIndex {
	pub dim: u32,
	#[serde(default = "default_hnsw_m")]
	pub hnsw_m: u32,
	#[serde(default = "default_hnsw_ef_construction")]
	pub hnsw_ef_construction: u32,
}

#[derive(Debug, Deserialize)]
pub struct Providers {
	pub embedding: EmbeddingProviderConfig,
	pub rerank: RerankProviderConfig,
	#[serde(default)]
	pub market: MarketProviderConfig,
}

#[derive(Debug, Deserialize)]
pub struct EmbeddingProviderConfig {
	pub api_base: String,
	pub api_key: String,
	#[serde(default = "default_embed_path")]
	pub path: String,
	pub model: String,
	pub dimensions: u32,
	#[serde(default = "default_true")]
	pub normalize: bool,
	#[serde(default = "default_embed_batch_size")]
	pub max_batch_size: usize,
	#[serde(default = "default_embed_concurrency")]
	pub max_concurrency: usize,
	#[serde(default = "default_embed_timeout_ms")]
	pub timeout_ms: u64,
	#[serde(default = "default_embed_retries")]
	pub max_retries: u32,
	#[serde(default = "default_embed_retry_delay_ms")]
	pub retry_base_delay_ms: u64,
	#[serde(default)]
	pub default_headers: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
pub struct RerankProviderConfig {
	#[serde(default = "default_true")]
	pub enabled: bool,
	pub api_base: String,
	pub api_key: String,
	#[serde(default = "default_rerank_path")]
	pub path: String,
	pub model: String,
	#[serde(default = "default_rerank_timeout_ms")]
	pub timeout_ms: u64,
	#[serde(default = "default_rerank_max_documents")]
	pub max_documents: usize,
	#[serde(default = "default_rerank_max_document_chars")]
	pub max_document_chars: usize,
	#[serde(default = "default_rerank_retries")]
	pub max_retries: u32,
	#[serde(default = "default_rerank_retry_delay_ms")]
	pub retry_base_delay_ms: u64,
	#[serde(default)]
	pub default_headers: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct MarketProviderConfig {
	pub api_base: String,
	pub spot_path: String,
	pub timeout_ms: u64,
}
impl Default for MarketProviderConfig {
	fn default() -> Self {
		Self {
			api_base: "http://127.0.0.1:8080".to_string(),
			spot_path: "/api/public/stock_zh_a_spot_em".to_string(),
			timeout_ms: 60_000,
		}
	}
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Search {
	pub default_top_k: u32,
	pub similarity_threshold: f32,
	pub recall_limit: u32,
	pub recall_concurrency: usize,
	pub rerank_weight: f32,
	pub importance_weight: f32,
	pub aggregation: String,
	pub max_concepts_per_company: usize,
	pub cache: SearchCache,
}
impl Default for Search {
	fn default() -> Self {
		Self {
			default_top_k: 20,
			similarity_threshold: 0.7,
			recall_limit: 50,
			recall_concurrency: 20,
			rerank_weight: 0.7,
			importance_weight: 0.3,
			aggregation: "max".to_string(),
			max_concepts_per_company: 5,
			cache: SearchCache::default(),
		}
	}
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SearchCache {
	pub enabled: bool,
	pub ttl_seconds: u64,
	pub max_entries: usize,
}
impl Default for SearchCache {
	fn default() -> Self {
		Self { enabled: true, ttl_seconds: 300, max_entries: 1_000 }
	}
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Fusion {
	pub batch_size: usize,
	pub max_retries: u32,
	pub retry_base_delay_ms: u64,
	pub max_source_sentences: usize,
}
impl Default for Fusion {
	fn default() -> Self {
		Self { batch_size: 50, max_retries: 3, retry_base_delay_ms: 100, max_source_sentences: 20 }
	}
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Vectorization {
	pub max_text_chars: usize,
	pub checkpoint_path: String,
}
impl Default for Vectorization {
	fn default() -> Self {
		Self { max_text_chars: 8_192, checkpoint_path: "data/vectorize.checkpoint".to_string() }
	}
}

#[derive(Debug, Clone, Deserialize)]
pub struct Tier {
	pub min: f64,
	pub max: f64,
	pub score: f64,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct MarketFilter {
	pub max_market_cap: f64,
	pub max_avg_volume_5d: f64,
	pub market_cap_tiers: Vec<Tier>,
	pub volume_tiers: Vec<Tier>,
	pub relevance_mapping_enabled: bool,
	pub relevance_tiers: Vec<Tier>,
	pub retention_days: i64,
}
impl Default for MarketFilter {
	fn default() -> Self {
		Self {
			max_market_cap: 85e8,
			max_avg_volume_5d: 2e8,
			market_cap_tiers: vec![
				Tier { min: 60e8, max: 85e8, score: 1.0 },
				Tier { min: 40e8, max: 60e8, score: 2.0 },
				Tier { min: 0.0, max: 40e8, score: 3.0 },
			],
			volume_tiers: vec![
				Tier { min: 1e8, max: 2e8, score: 1.0 },
				Tier { min: 0.5e8, max: 1e8, score: 2.0 },
				Tier { min: 0.0, max: 0.5e8, score: 3.0 },
			],
			relevance_mapping_enabled: false,
			relevance_tiers: vec![
				Tier { min: 0.8, max: 1.0, score: 1.0 },
				Tier { min: 0.5, max: 0.8, score: 0.5 },
				Tier { min: 0.0, max: 0.5, score: 0.1 },
			],
			retention_days: 30,
		}
	}
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Resilience {
	pub failure_threshold: u32,
	pub recovery_timeout_secs: u64,
}
impl Default for Resilience {
	fn default() -> Self {
		Self { failure_threshold: 5, recovery_timeout_secs: 60 }
	}
}

fn default_true() -> bool {
	true
}

fn default_pool_min_conns() -> u32 {
	5
}

fn default_query_timeout_ms() -> u64 {
	30_000
}

fn default_hnsw_m() -> u32 {
	16
}

fn default_hnsw_ef_construction() -> u32 {
	64
}

fn default_embed_path() -> String {
	"/embed".to_string()
}

fn default_embed_batch_size() -> usize {
	64
}

fn default_embed_concurrency() -> usize {
	4
}

fn default_embed_timeout_ms() -> u64 {
	30_000
}

fn default_embed_retries() -> u32 {
	3
}

fn default_embed_retry_delay_ms() -> u64 {
	1_000
}

fn default_rerank_path() -> String {
	"/rerank".to_string()
}

fn default_rerank_timeout_ms() -> u64 {
	5_000
}

fn default_rerank_max_documents() -> usize {
	500
}

fn default_rerank_max_document_chars() -> usize {
	8_192
}

fn default_rerank_retries() -> u32 {
	2
}

fn default_rerank_retry_delay_ms() -> u64 {
	500
}

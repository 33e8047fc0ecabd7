use serde_json::Value;
use time::{Date, OffsetDateTime};
use uuid::Uuid;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CompanyRow {
	pub company_code: String,
	pub company_name_full: String,
	pub company_name_short: Option<String>,
	pub exchange: Option<String>,
	pub created_at: OffsetDateTime,
	pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SourceDocumentRow {
	pub doc_id: Uuid,
	pub company_code: String,
	pub doc_type: String,
	pub doc_date: Date,
	pub report_title: Option<String>,
	pub file_path: Option<String>,
	pub file_hash: String,
	pub raw_llm_output: Value,
	pub extraction_metadata: Value,
	pub processing_status: String,
	pub error_message: Option<String>,
	pub created_at: OffsetDateTime,
	pub updated_at: OffsetDateTime,
}

/// A master concept row without its embedding; `importance_score` is cast to
/// float4 in every SELECT.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ConceptRow {
	pub concept_id: Uuid,
	pub company_code: String,
	pub concept_name: String,
	pub concept_category: String,
	pub importance_score: f32,
	pub development_stage: Option<String>,
	pub concept_details: Value,
	pub last_updated_from_doc_id: Option<Uuid>,
	pub version: i32,
	pub is_active: bool,
	pub created_at: OffsetDateTime,
	pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SimilarConceptRow {
	pub concept_id: Uuid,
	pub company_code: String,
	pub company_name: String,
	pub concept_name: String,
	pub concept_category: String,
	pub importance_score: f32,
	pub similarity_score: f32,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct MarketCurrentRow {
	pub company_code: String,
	pub current_market_cap: f64,
	pub current_circulating_cap: f64,
	pub today_volume: f64,
	pub avg_5day_volume: f64,
	pub last_updated: OffsetDateTime,
}

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::concept::ConceptCategory;

/// One matched business concept flowing through the online retrieval
/// pipeline. Ephemeral per request.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Document {
	pub concept_id: Uuid,
	pub company_code: String,
	pub company_name: String,
	pub concept_name: String,
	pub concept_category: ConceptCategory,
	pub importance_score: f32,
	pub similarity_score: f32,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub rerank_score: Option<f32>,
	#[serde(default)]
	pub final_score: f32,
	/// The query-company concept whose embedding recalled this hit.
	pub source_concept_id: Uuid,
}

use serde::{Deserialize, Serialize};
use time::{Date, OffsetDateTime};
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConceptCategory {
	Core,
	Emerging,
	Strategic,
}
impl ConceptCategory {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::Core => "core",
			Self::Emerging => "emerging",
			Self::Strategic => "strategic",
		}
	}

	pub fn parse(raw: &str) -> Option<Self> {
		match raw {
			"core" => Some(Self::Core),
			"emerging" => Some(Self::Emerging),
			"strategic" => Some(Self::Strategic),
			_ => None,
		}
	}
}

/// The structured payload persisted as `concept_details` JSON. Fusion works
/// over this typed value; the raw JSON is never inspected field-by-field.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ConceptDetails {
	#[serde(default)]
	pub description: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub timeline: Option<Timeline>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub metrics: Option<Metrics>,
	#[serde(default)]
	pub relations: Relations,
	#[serde(default)]
	pub source_sentences: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Timeline {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub established: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub recent_event: Option<String>,
	#[serde(default)]
	pub events: Vec<TimelineEvent>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TimelineEvent {
	pub date: Date,
	pub event: String,
}

/// Point-in-time financial snapshot; fusion overwrites it as a whole.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub revenue: Option<f64>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub revenue_growth_rate: Option<f64>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub market_share: Option<f64>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub gross_margin: Option<f64>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub capacity: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub sales_volume: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Relations {
	#[serde(default)]
	pub customers: Vec<String>,
	#[serde(default)]
	pub partners: Vec<String>,
	#[serde(default)]
	pub subsidiaries: Vec<String>,
}
impl Relations {
	pub fn is_empty(&self) -> bool {
		self.customers.is_empty() && self.partners.is_empty() && self.subsidiaries.is_empty()
	}
}

/// One business concept as extracted by the LLM from a single document.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExtractedConcept {
	pub concept_name: String,
	pub concept_category: ConceptCategory,
	pub importance_score: f32,
	#[serde(default)]
	pub development_stage: Option<String>,
	#[serde(default)]
	pub description: String,
	#[serde(default)]
	pub timeline: Option<Timeline>,
	#[serde(default)]
	pub metrics: Option<Metrics>,
	#[serde(default)]
	pub relations: Relations,
	#[serde(default)]
	pub source_sentences: Vec<String>,
}

/// The authoritative master record for one `(company, concept_name)` pair.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MasterConcept {
	pub concept_id: Uuid,
	pub company_code: String,
	pub concept_name: String,
	pub concept_category: ConceptCategory,
	pub importance_score: f32,
	pub development_stage: Option<String>,
	pub details: ConceptDetails,
	pub last_updated_from_doc_id: Option<Uuid>,
	pub version: i32,
	pub is_active: bool,
	pub created_at: OffsetDateTime,
	pub updated_at: OffsetDateTime,
}

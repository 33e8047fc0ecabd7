use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::document::Document;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregationStrategy {
	Max,
	Mean,
}

/// Per-company rollup of matched concepts.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AggregatedCompany {
	pub company_code: String,
	pub company_name: String,
	pub relevance_score: f32,
	/// Top concepts by `final_score`, bounded by the caller's limit.
	pub matched_concepts: Vec<Document>,
}

/// Group scored documents by company and derive a company-level relevance
/// score. Companies come back sorted by descending relevance with ascending
/// `company_code` as the stable tie-break; each keeps at most
/// `max_concepts_per_company` of its best concepts.
pub fn aggregate_by_company(
	documents: Vec<Document>,
	strategy: AggregationStrategy,
	max_concepts_per_company: usize,
) -> Vec<AggregatedCompany> {
	let mut groups: HashMap<String, Vec<Document>> = HashMap::new();

	for doc in documents {
		groups.entry(doc.company_code.clone()).or_default().push(doc);
	}

	let mut companies: Vec<AggregatedCompany> = groups
		.into_values()
		.map(|mut concepts| {
			concepts.sort_by(|a, b| {
				b.final_score
					.total_cmp(&a.final_score)
					.then_with(|| a.concept_id.cmp(&b.concept_id))
			});

			let relevance_score = match strategy {
				AggregationStrategy::Max =>
					concepts.first().map(|doc| doc.final_score).unwrap_or(0.0),
				AggregationStrategy::Mean => {
					let sum: f32 = concepts.iter().map(|doc| doc.final_score).sum();

					sum / concepts.len() as f32
				},
			};
			let company_code = concepts[0].company_code.clone();
			let company_name = concepts[0].company_name.clone();

			concepts.truncate(max_concepts_per_company);

			AggregatedCompany { company_code, company_name, relevance_score, matched_concepts: concepts }
		})
		.collect();

	companies.sort_by(|a, b| {
		b.relevance_score
			.total_cmp(&a.relevance_score)
			.then_with(|| a.company_code.cmp(&b.company_code))
	});

	companies
}

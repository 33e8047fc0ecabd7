use std::time::Duration;

use serde::{Deserialize, Serialize};
use sqlx::{Postgres, Transaction};
use time::OffsetDateTime;
use tracing::{error, info, warn};
use uuid::Uuid;

use asi_domain::{ExtractedConcept, fusion};
use asi_storage::{
	concepts,
	concepts::{ConceptUpdate, NewConcept},
	documents,
};

use crate::{Error, InsightService, Result, details_to_json, master_from_row};

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct FusionStats {
	pub total_concepts: usize,
	pub created: usize,
	pub updated: usize,
	pub skipped: usize,
	pub needing_vectorization: usize,
}

enum ConceptFate {
	Created,
	Updated { needs_vectorization: bool },
}

impl InsightService {
	/// Merge an archived document's concepts into the company's master set.
	///
	/// Concepts are processed in batches, one transaction per batch with a
	/// savepoint per concept, so a single bad concept never poisons its
	/// batch. Concurrent fusions for the same company are serialized per
	/// concept by optimistic locking with a bounded retry.
	pub async fn fuse_document(&self, doc_id: Uuid) -> Result<FusionStats> {
		let doc = documents::get_document(&self.db.pool, doc_id)
			.await?
			.ok_or_else(|| Error::NotFound { message: format!("Source document {doc_id}.") })?;
		let concepts = parse_concepts(&doc.raw_llm_output);
		let mut stats = FusionStats { total_concepts: concepts.len(), ..FusionStats::default() };

		if concepts.is_empty() {
			warn!(%doc_id, "Document carries no business concepts.");

			return Ok(stats);
		}

		info!(
			%doc_id,
			company_code = %doc.company_code,
			total = concepts.len(),
			"Starting master data fusion."
		);

		for batch in concepts.chunks(self.cfg.fusion.batch_size) {
			let mut tx = self.db.pool.begin().await?;

			for concept in batch {
				match self.fuse_single_concept(&mut tx, &doc.company_code, concept, doc_id).await {
					Ok(ConceptFate::Created) => {
						stats.created += 1;
						stats.needing_vectorization += 1;
					},
					Ok(ConceptFate::Updated { needs_vectorization }) => {
						stats.updated += 1;

						if needs_vectorization {
							stats.needing_vectorization += 1;
						}
					},
					Err(err) => {
						// The document is archived and replayable; keep going
						// with the remaining concepts.
						error!(
							%doc_id,
							concept_name = %concept.concept_name,
							error = %err,
							"Skipping concept after fusion failure."
						);
						stats.skipped += 1;
					},
				}
			}

			tx.commit().await?;
		}

		// A document whose every concept failed is marked failed so a later
		// `fuse` replay can find it; partial success stays completed.
		if stats.skipped == stats.total_concepts {
			documents::set_document_status(
				&self.db.pool,
				doc_id,
				"failed",
				Some("Every business concept failed to merge."),
			)
			.await?;
		} else if doc.processing_status != "completed" {
			documents::set_document_status(&self.db.pool, doc_id, "completed", None).await?;
		}

		info!(
			%doc_id,
			created = stats.created,
			updated = stats.updated,
			skipped = stats.skipped,
			"Master data fusion completed."
		);

		Ok(stats)
	}

	async fn fuse_single_concept(
		&self,
		tx: &mut Transaction<'_, Postgres>,
		company_code: &str,
		concept: &ExtractedConcept,
		doc_id: Uuid,
	) -> Result<ConceptFate> {
		validate_concept(concept)?;

		let max_retries = self.cfg.fusion.max_retries;
		let mut last_err = None;

		for attempt in 1..=max_retries {
			let mut sp = sqlx::Acquire::begin(&mut **tx).await?;
			let existing =
				concepts::find_active_concept(&mut *sp, company_code, &concept.concept_name)
					.await?;

			match existing {
				Some(row) => {
					let expected_version = row.version;
					let mut master = master_from_row(row)?;
					let now = OffsetDateTime::now_utc();
					let effect = fusion::merge_concepts(
						&mut master,
						concept,
						doc_id,
						now,
						self.cfg.fusion.max_source_sentences,
					);
					let details = details_to_json(&master.details)?;
					let update = ConceptUpdate {
						concept_category: master.concept_category.as_str(),
						importance_score: master.importance_score,
						development_stage: master.development_stage.as_deref(),
						concept_details: &details,
						last_updated_from_doc_id: Some(doc_id),
						clear_embedding: effect.description_replaced,
					};

					match concepts::update_concept(
						&mut *sp,
						master.concept_id,
						expected_version,
						&update,
					)
					.await
					{
						Ok(()) => {
							sp.commit().await?;

							return Ok(ConceptFate::Updated {
								needs_vectorization: effect.description_replaced,
							});
						},
						Err(asi_storage::Error::OptimisticLock(message)) => {
							sp.rollback().await?;
							last_err = Some(Error::OptimisticLock { message });
							tokio::time::sleep(Duration::from_millis(
								self.cfg.fusion.retry_base_delay_ms * attempt as u64,
							))
							.await;
						},
						Err(err) => {
							sp.rollback().await?;

							return Err(err.into());
						},
					}
				},
				None => {
					let now = OffsetDateTime::now_utc();
					let master = fusion::create_from_new(
						concept,
						company_code,
						doc_id,
						now,
						self.cfg.fusion.max_source_sentences,
					);
					let details = details_to_json(&master.details)?;
					let new_concept = NewConcept {
						concept_id: master.concept_id,
						company_code,
						concept_name: &master.concept_name,
						concept_category: master.concept_category.as_str(),
						importance_score: master.importance_score,
						development_stage: master.development_stage.as_deref(),
						concept_details: &details,
						last_updated_from_doc_id: Some(doc_id),
					};

					match concepts::insert_concept(&mut *sp, &new_concept).await {
						Ok(concept_id) => {
							let relations = relation_rows(concept);

							concepts::insert_concept_relations(&mut *sp, concept_id, &relations)
								.await?;
							sp.commit().await?;

							return Ok(ConceptFate::Created);
						},
						Err(asi_storage::Error::Conflict(message)) => {
							// A concurrent fuser created it first; the next
							// attempt takes the update path.
							sp.rollback().await?;
							last_err = Some(Error::Conflict { message });
						},
						Err(err) => {
							sp.rollback().await?;

							return Err(err.into());
						},
					}
				},
			}
		}

		Err(last_err.unwrap_or_else(|| Error::OptimisticLock {
			message: format!(
				"Concept {} for company {company_code} kept conflicting after {max_retries} attempts.",
				concept.concept_name
			),
		}))
	}
}

fn validate_concept(concept: &ExtractedConcept) -> Result<()> {
	if concept.concept_name.trim().is_empty() {
		return Err(Error::Validation { message: "concept_name must be non-empty.".to_string() });
	}
	if !(0.0..=1.0).contains(&concept.importance_score) {
		return Err(Error::Validation {
			message: format!(
				"importance_score {} for {} is outside [0, 1].",
				concept.importance_score, concept.concept_name
			),
		});
	}

	Ok(())
}

fn relation_rows(concept: &ExtractedConcept) -> Vec<(&str, &str)> {
	let mut rows = Vec::new();

	for customer in &concept.relations.customers {
		rows.push(("customer", customer.as_str()));
	}
	for partner in &concept.relations.partners {
		rows.push(("partner", partner.as_str()));
	}
	for subsidiary in &concept.relations.subsidiaries {
		rows.push(("subsidiary", subsidiary.as_str()));
	}

	rows
}

/// Pull the extracted concepts back out of the archived raw LLM output.
/// Malformed entries are logged and dropped; the document stays replayable.
pub(crate) fn parse_concepts(raw_llm_output: &serde_json::Value) -> Vec<ExtractedConcept> {
	let entries = raw_llm_output
		.get("extraction_data")
		.and_then(|data| data.get("business_concepts"))
		.or_else(|| raw_llm_output.get("business_concepts"))
		.and_then(|v| v.as_array())
		.cloned()
		.unwrap_or_default();
	let mut concepts = Vec::with_capacity(entries.len());

	for entry in entries {
		match serde_json::from_value::<ExtractedConcept>(entry) {
			Ok(concept) => concepts.push(concept),
			Err(err) => {
				error!(error = %err, "Failed to parse an extracted business concept.");
			},
		}
	}

	concepts
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;

	#[test]
	fn parses_concepts_from_nested_extraction_data() {
		let raw = json!({
			"extraction_data": {
				"business_concepts": [
					{
						"concept_name": "螺杆空气压缩机",
						"concept_category": "core",
						"importance_score": 0.95,
						"description": "压缩机产品线",
						"source_sentences": ["s1", "s2"]
					},
					{ "concept_name": "缺少字段的坏概念" }
				]
			}
		});
		let concepts = parse_concepts(&raw);

		// The malformed second entry is dropped, not fatal.
		assert_eq!(concepts.len(), 1);
		assert_eq!(concepts[0].concept_name, "螺杆空气压缩机");
	}

	#[test]
	fn parses_concepts_from_flat_payloads() {
		let raw = json!({
			"business_concepts": [{
				"concept_name": "真空泵",
				"concept_category": "emerging",
				"importance_score": 0.6
			}]
		});

		assert_eq!(parse_concepts(&raw).len(), 1);
	}

	#[test]
	fn out_of_range_importance_is_rejected() {
		let concept: ExtractedConcept = serde_json::from_value(json!({
			"concept_name": "概念",
			"concept_category": "core",
			"importance_score": 1.5
		}))
		.expect("parse");

		assert!(matches!(
			validate_concept(&concept),
			Err(Error::Validation { .. })
		));
	}

	#[test]
	fn relation_rows_cover_all_kinds() {
		let concept: ExtractedConcept = serde_json::from_value(json!({
			"concept_name": "概念",
			"concept_category": "core",
			"importance_score": 0.5,
			"relations": {
				"customers": ["山东电厂"],
				"partners": ["合作方"],
				"subsidiaries": ["子公司"]
			}
		}))
		.expect("parse");
		let rows = relation_rows(&concept);

		assert_eq!(
			rows,
			vec![
				("customer", "山东电厂"),
				("partner", "合作方"),
				("subsidiary", "子公司")
			]
		);
	}
}

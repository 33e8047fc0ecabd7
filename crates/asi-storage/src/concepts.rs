use std::collections::HashMap;

use futures::future::try_join_all;
use serde_json::Value;
use sqlx::{PgConnection, PgExecutor, PgPool};
use uuid::Uuid;

use crate::{
	Error, Result,
	models::{ConceptRow, SimilarConceptRow},
};

const CONCEPT_COLUMNS: &str = "\
concept_id, company_code, concept_name, concept_category, importance_score::float4 AS \
importance_score, development_stage, concept_details, last_updated_from_doc_id, version, \
is_active, created_at, updated_at";

#[derive(Debug, Clone)]
pub struct NewConcept<'a> {
	pub concept_id: Uuid,
	pub company_code: &'a str,
	pub concept_name: &'a str,
	pub concept_category: &'a str,
	pub importance_score: f32,
	pub development_stage: Option<&'a str>,
	pub concept_details: &'a Value,
	pub last_updated_from_doc_id: Option<Uuid>,
}

#[derive(Debug, Clone)]
pub struct ConceptUpdate<'a> {
	pub concept_category: &'a str,
	pub importance_score: f32,
	pub development_stage: Option<&'a str>,
	pub concept_details: &'a Value,
	pub last_updated_from_doc_id: Option<Uuid>,
	/// Set when the description text changed and the concept must be
	/// re-vectorized.
	pub clear_embedding: bool,
}

pub async fn find_active_concept<'e, E>(
	executor: E,
	company_code: &str,
	concept_name: &str,
) -> Result<Option<ConceptRow>>
where
	E: PgExecutor<'e>,
{
	let row = sqlx::query_as::<_, ConceptRow>(&format!(
		"\
SELECT {CONCEPT_COLUMNS}
FROM business_concepts_master
WHERE company_code = $1 AND concept_name = $2 AND is_active"
	))
	.bind(company_code)
	.bind(concept_name)
	.fetch_optional(executor)
	.await?;

	Ok(row)
}

pub async fn list_active_concepts<'e, E>(executor: E, company_code: &str) -> Result<Vec<ConceptRow>>
where
	E: PgExecutor<'e>,
{
	let rows = sqlx::query_as::<_, ConceptRow>(&format!(
		"\
SELECT {CONCEPT_COLUMNS}
FROM business_concepts_master
WHERE company_code = $1 AND is_active
ORDER BY importance_score DESC, created_at ASC"
	))
	.bind(company_code)
	.fetch_all(executor)
	.await?;

	Ok(rows)
}

/// Insert a new master concept with no embedding (scheduling it for
/// vectorization). An active duplicate of `(company_code, concept_name)`
/// surfaces as `Conflict` for the caller's read-then-update fallback.
pub async fn insert_concept<'e, E>(executor: E, concept: &NewConcept<'_>) -> Result<Uuid>
where
	E: PgExecutor<'e>,
{
	let result = sqlx::query_scalar::<_, Uuid>(
		"\
INSERT INTO business_concepts_master (
	concept_id,
	company_code,
	concept_name,
	concept_category,
	importance_score,
	development_stage,
	concept_details,
	last_updated_from_doc_id
)
VALUES ($1, $2, $3, $4, $5::float4::numeric(3, 2), $6, $7, $8)
RETURNING concept_id",
	)
	.bind(concept.concept_id)
	.bind(concept.company_code)
	.bind(concept.concept_name)
	.bind(concept.concept_category)
	.bind(concept.importance_score)
	.bind(concept.development_stage)
	.bind(concept.concept_details)
	.bind(concept.last_updated_from_doc_id)
	.fetch_one(executor)
	.await;

	match result {
		Ok(concept_id) => Ok(concept_id),
		Err(err) if Error::is_unique_violation(&err) => Err(Error::Conflict(format!(
			"Active concept {} already exists for company {}.",
			concept.concept_name, concept.company_code
		))),
		Err(err) => Err(err.into()),
	}
}

/// Conditional update guarded by `expected_version`. A zero row count means
/// a concurrent fusion won the race; the caller re-reads and retries.
pub async fn update_concept<'e, E>(
	executor: E,
	concept_id: Uuid,
	expected_version: i32,
	update: &ConceptUpdate<'_>,
) -> Result<()>
where
	E: PgExecutor<'e>,
{
	let result = sqlx::query(
		"\
UPDATE business_concepts_master
SET
	concept_category = $1,
	importance_score = $2::float4::numeric(3, 2),
	development_stage = $3,
	concept_details = $4,
	last_updated_from_doc_id = $5,
	embedding = CASE WHEN $6 THEN NULL ELSE embedding END,
	version = version + 1,
	updated_at = now()
WHERE concept_id = $7 AND version = $8",
	)
	.bind(update.concept_category)
	.bind(update.importance_score)
	.bind(update.development_stage)
	.bind(update.concept_details)
	.bind(update.last_updated_from_doc_id)
	.bind(update.clear_embedding)
	.bind(concept_id)
	.bind(expected_version)
	.execute(executor)
	.await?;

	if result.rows_affected() == 0 {
		return Err(Error::OptimisticLock(format!(
			"Concept {concept_id} moved past version {expected_version}."
		)));
	}

	Ok(())
}

/// Write an embedding without touching `version`: index maintenance is
/// decoupled from optimistic locking on business fields.
pub async fn update_embedding<'e, E>(executor: E, concept_id: Uuid, vec_text: &str) -> Result<()>
where
	E: PgExecutor<'e>,
{
	let result = sqlx::query(
		"UPDATE business_concepts_master SET embedding = $1::text::halfvec WHERE concept_id = $2",
	)
	.bind(vec_text)
	.bind(concept_id)
	.execute(executor)
	.await?;

	if result.rows_affected() == 0 {
		return Err(Error::NotFound(format!("Concept {concept_id} does not exist.")));
	}

	Ok(())
}

pub async fn batch_update_embeddings(
	conn: &mut PgConnection,
	embeddings: &[(Uuid, String)],
) -> Result<usize> {
	let mut updated = 0;

	for (concept_id, vec_text) in embeddings {
		let result = sqlx::query(
			"UPDATE business_concepts_master SET embedding = $1::text::halfvec WHERE concept_id = $2",
		)
		.bind(vec_text.as_str())
		.bind(concept_id)
		.execute(&mut *conn)
		.await?;

		updated += result.rows_affected() as usize;
	}

	Ok(updated)
}

/// Active concepts scheduled for vectorization (`embedding IS NULL`), most
/// important first.
pub async fn find_concepts_needing_embeddings<'e, E>(
	executor: E,
	company_code: Option<&str>,
	limit: Option<i64>,
) -> Result<Vec<ConceptRow>>
where
	E: PgExecutor<'e>,
{
	let rows = sqlx::query_as::<_, ConceptRow>(&format!(
		"\
SELECT {CONCEPT_COLUMNS}
FROM business_concepts_master
WHERE embedding IS NULL
	AND is_active
	AND ($1::text IS NULL OR company_code = $1)
ORDER BY importance_score DESC, created_at ASC
LIMIT $2"
	))
	.bind(company_code)
	.bind(limit.unwrap_or(i64::MAX))
	.fetch_all(executor)
	.await?;

	Ok(rows)
}

/// Every active concept, used by full re-vectorization.
pub async fn list_active_concepts_for_rebuild<'e, E>(
	executor: E,
	company_code: Option<&str>,
) -> Result<Vec<ConceptRow>>
where
	E: PgExecutor<'e>,
{
	let rows = sqlx::query_as::<_, ConceptRow>(&format!(
		"\
SELECT {CONCEPT_COLUMNS}
FROM business_concepts_master
WHERE is_active
	AND ($1::text IS NULL OR company_code = $1)
ORDER BY concept_id ASC"
	))
	.bind(company_code)
	.fetch_all(executor)
	.await?;

	Ok(rows)
}

/// The stored embedding in pgvector text form, ready to be passed back as a
/// `::halfvec` query parameter. `None` when absent or not yet vectorized.
pub async fn concept_embedding_text<'e, E>(
	executor: E,
	concept_id: Uuid,
) -> Result<Option<String>>
where
	E: PgExecutor<'e>,
{
	let text: Option<Option<String>> = sqlx::query_scalar(
		"SELECT embedding::text FROM business_concepts_master WHERE concept_id = $1",
	)
	.bind(concept_id)
	.fetch_optional(executor)
	.await?;

	Ok(text.flatten())
}

/// Approximate nearest neighbours by cosine distance over active, embedded
/// concepts. `similarity = 1 - distance`, filtered by `threshold` and
/// ordered by ascending distance. The HNSW index makes the result
/// approximately, not exactly, top-`limit`.
pub async fn search_similar<'e, E>(
	executor: E,
	query_vec_text: &str,
	threshold: f32,
	limit: i64,
) -> Result<Vec<SimilarConceptRow>>
where
	E: PgExecutor<'e>,
{
	let rows = sqlx::query_as::<_, SimilarConceptRow>(
		"\
SELECT
	c.concept_id,
	c.company_code,
	comp.company_name_full AS company_name,
	c.concept_name,
	c.concept_category,
	c.importance_score::float4 AS importance_score,
	(1 - (c.embedding <=> $1::text::halfvec))::float4 AS similarity_score
FROM business_concepts_master c
JOIN companies comp ON comp.company_code = c.company_code
WHERE c.is_active
	AND c.embedding IS NOT NULL
	AND (1 - (c.embedding <=> $1::text::halfvec)) >= $2
ORDER BY c.embedding <=> $1::text::halfvec ASC
LIMIT $3",
	)
	.bind(query_vec_text)
	.bind(threshold)
	.bind(limit)
	.fetch_all(executor)
	.await?;

	Ok(rows)
}

/// Pipelined variant over the shared pool; result order matches the input
/// order of `query_vec_texts`.
pub async fn batch_search_similar(
	pool: &PgPool,
	query_vec_texts: &[String],
	threshold: f32,
	limit: i64,
) -> Result<Vec<Vec<SimilarConceptRow>>> {
	try_join_all(
		query_vec_texts.iter().map(|vec_text| search_similar(pool, vec_text, threshold, limit)),
	)
	.await
}

/// The `concept_details` payloads for a set of concepts, keyed by id.
pub async fn fetch_concept_details<'e, E>(
	executor: E,
	concept_ids: &[Uuid],
) -> Result<HashMap<Uuid, Value>>
where
	E: PgExecutor<'e>,
{
	if concept_ids.is_empty() {
		return Ok(HashMap::new());
	}

	let rows: Vec<(Uuid, Value)> = sqlx::query_as(
		"SELECT concept_id, concept_details FROM business_concepts_master WHERE concept_id = ANY($1)",
	)
	.bind(concept_ids)
	.fetch_all(executor)
	.await?;

	Ok(rows.into_iter().collect())
}

/// Mirror a concept's typed relations into the append-only knowledge-graph
/// table.
pub async fn insert_concept_relations(
	conn: &mut PgConnection,
	source_concept_id: Uuid,
	relations: &[(&str, &str)],
) -> Result<()> {
	for (entity_type, entity_name) in relations {
		sqlx::query(
			"\
INSERT INTO concept_relations (source_concept_id, target_entity_type, target_entity_name)
VALUES ($1, $2, $3)",
		)
		.bind(source_concept_id)
		.bind(entity_type)
		.bind(entity_name)
		.execute(&mut *conn)
		.await?;
	}

	Ok(())
}

use serde_json::Value;
use sqlx::{PgConnection, PgExecutor};
use time::Date;
use uuid::Uuid;

use crate::{Result, models::SourceDocumentRow};

#[derive(Debug, Clone)]
pub struct NewSourceDocument {
	pub company_code: String,
	pub doc_type: String,
	pub doc_date: Date,
	pub report_title: Option<String>,
	pub file_path: Option<String>,
	pub file_hash: String,
	pub raw_llm_output: Value,
	pub extraction_metadata: Value,
}

const DOCUMENT_COLUMNS: &str = "\
doc_id, company_code, doc_type, doc_date, report_title, file_path, file_hash, raw_llm_output, \
extraction_metadata, processing_status, error_message, created_at, updated_at";

/// Insert the document unless the same `(company_code, file_hash)` was
/// archived before. Concurrent archivals of the same file race on the unique
/// constraint; at most one inserts and the others observe `already_existed`.
pub async fn archive_document(
	conn: &mut PgConnection,
	doc: &NewSourceDocument,
) -> Result<(Uuid, bool)> {
	let inserted: Option<Uuid> = sqlx::query_scalar(
		"\
INSERT INTO source_documents (
	company_code,
	doc_type,
	doc_date,
	report_title,
	file_path,
	file_hash,
	raw_llm_output,
	extraction_metadata,
	processing_status
)
VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 'completed')
ON CONFLICT (company_code, file_hash) DO NOTHING
RETURNING doc_id",
	)
	.bind(doc.company_code.as_str())
	.bind(doc.doc_type.as_str())
	.bind(doc.doc_date)
	.bind(doc.report_title.as_deref())
	.bind(doc.file_path.as_deref())
	.bind(doc.file_hash.as_str())
	.bind(&doc.raw_llm_output)
	.bind(&doc.extraction_metadata)
	.fetch_optional(&mut *conn)
	.await?;

	if let Some(doc_id) = inserted {
		return Ok((doc_id, false));
	}

	let existing: Uuid = sqlx::query_scalar(
		"SELECT doc_id FROM source_documents WHERE company_code = $1 AND file_hash = $2",
	)
	.bind(doc.company_code.as_str())
	.bind(doc.file_hash.as_str())
	.fetch_one(&mut *conn)
	.await?;

	Ok((existing, true))
}

pub async fn get_document<'e, E>(executor: E, doc_id: Uuid) -> Result<Option<SourceDocumentRow>>
where
	E: PgExecutor<'e>,
{
	let row = sqlx::query_as::<_, SourceDocumentRow>(&format!(
		"SELECT {DOCUMENT_COLUMNS} FROM source_documents WHERE doc_id = $1"
	))
	.bind(doc_id)
	.fetch_optional(executor)
	.await?;

	Ok(row)
}

pub async fn set_document_status<'e, E>(
	executor: E,
	doc_id: Uuid,
	status: &str,
	error_message: Option<&str>,
) -> Result<()>
where
	E: PgExecutor<'e>,
{
	sqlx::query(
		"\
UPDATE source_documents
SET processing_status = $1, error_message = $2, updated_at = now()
WHERE doc_id = $3",
	)
	.bind(status)
	.bind(error_message)
	.bind(doc_id)
	.execute(executor)
	.await?;

	Ok(())
}

/// Completed documents whose concepts never landed in the master table,
/// oldest first. Used by `fuse all-unfused` replays.
pub async fn list_unfused_documents<'e, E>(executor: E) -> Result<Vec<Uuid>>
where
	E: PgExecutor<'e>,
{
	let rows: Vec<Uuid> = sqlx::query_scalar(
		"\
SELECT doc_id
FROM source_documents d
WHERE processing_status = 'completed'
	AND NOT EXISTS (
		SELECT 1
		FROM business_concepts_master c
		WHERE c.last_updated_from_doc_id = d.doc_id
	)
ORDER BY created_at ASC",
	)
	.fetch_all(executor)
	.await?;

	Ok(rows)
}

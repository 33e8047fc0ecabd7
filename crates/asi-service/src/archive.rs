use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::Date;
use tracing::{error, info, warn};
use uuid::Uuid;

use asi_domain::ExtractedConcept;
use asi_storage::{companies, companies::NewCompany, documents, documents::NewSourceDocument};

use crate::{FusionStats, InsightService, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocType {
	AnnualReport,
	ResearchReport,
}
impl DocType {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::AnnualReport => "annual_report",
			Self::ResearchReport => "research_report",
		}
	}
}

/// The company half of a completed LLM extraction.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExtractionResult {
	pub company_code: String,
	pub company_name_full: String,
	#[serde(default)]
	pub company_name_short: Option<String>,
	#[serde(default)]
	pub exchange: Option<String>,
	#[serde(default)]
	pub business_concepts: Vec<ExtractedConcept>,
}

#[derive(Clone, Debug)]
pub struct ArchiveRequest {
	pub extraction: ExtractionResult,
	pub doc_type: DocType,
	pub doc_date: Date,
	pub report_title: Option<String>,
	pub file_path: Option<String>,
	/// Content address of the source file, computed by the caller. Archival
	/// never derives it from the LLM output.
	pub file_hash: String,
	pub raw_llm_output: Value,
	pub extraction_metadata: Value,
}

#[derive(Clone, Debug)]
pub enum ArchiveOutcome {
	Archived { doc_id: Uuid, fusion: Option<FusionStats> },
	AlreadyExisted { doc_id: Uuid },
	/// Research reports for companies with no prior annual report are
	/// skipped rather than creating a company shell.
	SkippedUnknownCompany,
}

impl InsightService {
	/// Archive one completed extraction: company upsert + document insert in
	/// a single transaction, then fusion in its own transactions. Fusion
	/// failures never roll back the archive; the raw output stays
	/// replayable.
	pub async fn archive_extraction(&self, req: ArchiveRequest) -> Result<ArchiveOutcome> {
		if req.file_hash.trim().is_empty() {
			return Err(crate::Error::Validation {
				message: "file_hash must be provided with the extraction metadata.".to_string(),
			});
		}

		let company_code = req.extraction.company_code.clone();

		if req.doc_type == DocType::ResearchReport
			&& !companies::company_exists(&self.db.pool, &company_code).await?
		{
			warn!(%company_code, "Company is unknown; skipping research report archival.");

			return Ok(ArchiveOutcome::SkippedUnknownCompany);
		}

		let mut tx = self.db.pool.begin().await?;

		companies::upsert_company(
			&mut *tx,
			&NewCompany {
				company_code: company_code.clone(),
				company_name_full: req.extraction.company_name_full.clone(),
				company_name_short: req.extraction.company_name_short.clone(),
				exchange: req.extraction.exchange.clone(),
			},
		)
		.await?;

		let (doc_id, already_existed) = documents::archive_document(
			&mut *tx,
			&NewSourceDocument {
				company_code: company_code.clone(),
				doc_type: req.doc_type.as_str().to_string(),
				doc_date: req.doc_date,
				report_title: req.report_title.clone(),
				file_path: req.file_path.clone(),
				file_hash: req.file_hash.clone(),
				raw_llm_output: req.raw_llm_output.clone(),
				extraction_metadata: req.extraction_metadata.clone(),
			},
		)
		.await?;

		tx.commit().await?;

		if already_existed {
			info!(%doc_id, %company_code, "Document was archived before; nothing to do.");

			return Ok(ArchiveOutcome::AlreadyExisted { doc_id });
		}

		info!(%doc_id, %company_code, doc_type = req.doc_type.as_str(), "Archived extraction result.");

		// Error-isolation boundary: the document is permanent even when
		// fusion fails, and fusion can be replayed from the raw output.
		let fusion = match self.fuse_document(doc_id).await {
			Ok(stats) => Some(stats),
			Err(err) => {
				error!(%doc_id, error = %err, "Master data fusion failed after archival.");

				None
			},
		};

		Ok(ArchiveOutcome::Archived { doc_id, fusion })
	}
}

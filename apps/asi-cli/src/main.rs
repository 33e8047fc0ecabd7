use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use color_eyre::eyre;
use time::macros::format_description;
use tracing::{error, info, warn};
use uuid::Uuid;

use asi_service::{
	ArchiveOutcome, ArchiveRequest, DocType, ExtractionResult, InsightService, VectorizeRequest,
};
use asi_storage::{db::Db, documents};

#[derive(Debug, Parser)]
#[command(name = "asi", about = "AShareInsight offline pipeline and server")]
struct Cli {
	#[arg(long, short = 'c', value_name = "FILE")]
	config: PathBuf,
	#[command(subcommand)]
	command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
	/// Archive completed extraction JSON files (a file or a directory).
	Archive {
		path: PathBuf,
	},
	/// Replay master-data fusion for one document or all unfused ones.
	Fuse {
		#[arg(value_name = "DOC_ID|all-unfused")]
		target: String,
	},
	/// Assign embeddings to concepts scheduled for vectorization.
	Vectorize {
		#[arg(long)]
		rebuild_all: bool,
		#[arg(long)]
		company_code: Option<String>,
		#[arg(long)]
		resume: bool,
	},
	/// Pull today's market snapshot; --init forces a resync of the day.
	SyncMarketData {
		#[arg(long)]
		init: bool,
	},
	/// Start the HTTP search service.
	Serve,
}

#[tokio::main]
async fn main() {
	let _ = color_eyre::install();

	let cli = Cli::parse();
	let cfg = match asi_config::load(&cli.config) {
		Ok(cfg) => cfg,
		Err(err) => {
			eprintln!("Configuration error: {err:#}");
			std::process::exit(2);
		},
	};

	asi_api::init_tracing(&cfg.service.log_level);

	let exit_code = match run(cli.command, cfg).await {
		Ok(code) => code,
		Err(err) => {
			error!(error = ?err, "Fatal error.");

			3
		},
	};

	std::process::exit(exit_code);
}

async fn run(command: Command, cfg: asi_config::Config) -> color_eyre::Result<i32> {
	if matches!(command, Command::Serve) {
		asi_api::serve(cfg).await?;

		return Ok(0);
	}

	let db = Db::connect(&cfg.storage.postgres).await?;

	db.ensure_schema(&cfg.storage.vector).await?;
	db.warmup(cfg.storage.postgres.pool_min_conns).await?;

	let service = InsightService::new(cfg, db);

	match command {
		Command::Archive { path } => archive_path(&service, &path).await,
		Command::Fuse { target } => fuse(&service, &target).await,
		Command::Vectorize { rebuild_all, company_code, resume } => {
			let stats = service
				.vectorize(VectorizeRequest { rebuild_all, company_code, limit: None, resume })
				.await?;

			info!(
				total = stats.total_concepts,
				succeeded = stats.succeeded,
				failed = stats.failed,
				"Vectorization finished."
			);

			Ok(if stats.failed > 0 { 1 } else { 0 })
		},
		Command::SyncMarketData { init } => {
			let stats = service.sync_market_data(init).await?;

			info!(
				fetched = stats.fetched,
				written = stats.written,
				pruned = stats.pruned,
				skipped = stats.skipped,
				"Market data sync finished."
			);

			Ok(0)
		},
		Command::Serve => unreachable!("handled above"),
	}
}

async fn archive_path(service: &InsightService, path: &Path) -> color_eyre::Result<i32> {
	let files = collect_extraction_files(path)?;

	if files.is_empty() {
		warn!(path = %path.display(), "No extraction files found.");

		return Ok(0);
	}

	let mut failures = 0_usize;

	for file in &files {
		match archive_one(service, file).await {
			Ok(outcome) => match outcome {
				ArchiveOutcome::Archived { doc_id, .. } => {
					info!(file = %file.display(), %doc_id, "Archived.");
				},
				ArchiveOutcome::AlreadyExisted { doc_id } => {
					info!(file = %file.display(), %doc_id, "Already archived.");
				},
				ArchiveOutcome::SkippedUnknownCompany => {
					warn!(file = %file.display(), "Skipped: company unknown.");
				},
			},
			Err(err) => {
				error!(file = %file.display(), error = %err, "Archival failed.");
				failures += 1;
			},
		}
	}

	info!(total = files.len(), failures, "Archive run finished.");

	Ok(if failures > 0 { 1 } else { 0 })
}

async fn archive_one(service: &InsightService, file: &Path) -> color_eyre::Result<ArchiveOutcome> {
	let bytes = std::fs::read(file)?;
	let file_hash = blake3::hash(&bytes).to_hex().to_string();
	let raw: serde_json::Value = serde_json::from_slice(&bytes)?;
	let doc_type = match raw.get("document_type").and_then(|v| v.as_str()) {
		Some("research_report") => DocType::ResearchReport,
		_ => DocType::AnnualReport,
	};
	let doc_date = raw
		.get("document_date")
		.and_then(|v| v.as_str())
		.map(|s| time::Date::parse(s, format_description!("[year]-[month]-[day]")))
		.transpose()?
		.unwrap_or_else(|| time::OffsetDateTime::now_utc().date());
	let extraction: ExtractionResult = serde_json::from_value(
		raw.get("extraction_data")
			.cloned()
			.ok_or_else(|| eyre::eyre!("Extraction file is missing extraction_data."))?,
	)?;
	let request = ArchiveRequest {
		extraction,
		doc_type,
		doc_date,
		report_title: raw.get("report_title").and_then(|v| v.as_str()).map(String::from),
		file_path: Some(file.display().to_string()),
		file_hash,
		extraction_metadata: raw
			.get("extraction_metadata")
			.cloned()
			.unwrap_or_else(|| serde_json::json!({})),
		raw_llm_output: raw,
	};

	Ok(service.archive_extraction(request).await?)
}

fn collect_extraction_files(path: &Path) -> color_eyre::Result<Vec<PathBuf>> {
	if path.is_file() {
		return Ok(vec![path.to_path_buf()]);
	}
	if !path.is_dir() {
		return Err(eyre::eyre!("Path {} is neither a file nor a directory.", path.display()));
	}

	let mut files: Vec<PathBuf> = std::fs::read_dir(path)?
		.filter_map(|entry| entry.ok())
		.map(|entry| entry.path())
		.filter(|p| p.extension().and_then(|ext| ext.to_str()) == Some("json"))
		.collect();

	files.sort();

	Ok(files)
}

async fn fuse(service: &InsightService, target: &str) -> color_eyre::Result<i32> {
	let doc_ids = if target == "all-unfused" {
		documents::list_unfused_documents(&service.db.pool).await?
	} else {
		vec![target.parse::<Uuid>().map_err(|_| {
			eyre::eyre!("Fusion target must be a document id or \"all-unfused\".")
		})?]
	};

	if doc_ids.is_empty() {
		info!("No documents need fusion.");

		return Ok(0);
	}

	let mut failures = 0_usize;

	for doc_id in &doc_ids {
		match service.fuse_document(*doc_id).await {
			Ok(stats) => {
				info!(
					%doc_id,
					created = stats.created,
					updated = stats.updated,
					skipped = stats.skipped,
					"Fusion finished."
				);

				if stats.skipped > 0 {
					failures += 1;
				}
			},
			Err(err) => {
				error!(%doc_id, error = %err, "Fusion failed.");
				failures += 1;
			},
		}
	}

	Ok(if failures > 0 { 1 } else { 0 })
}

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

use asi_domain::text::prepare_text_for_embedding;
use asi_storage::{concepts, models::ConceptRow, vector_to_pg};

use crate::{Error, InsightService, Result};

#[derive(Clone, Debug, Default)]
pub struct VectorizeRequest {
	/// Re-embed every active concept instead of only those scheduled
	/// (`embedding IS NULL`).
	pub rebuild_all: bool,
	pub company_code: Option<String>,
	pub limit: Option<i64>,
	/// Continue a full rebuild from the checkpointed concept id.
	pub resume: bool,
}

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct VectorizeStats {
	pub total_concepts: usize,
	pub succeeded: usize,
	pub failed: usize,
	pub skipped: usize,
}

impl InsightService {
	/// Assign embeddings to concepts. Batches are sized to the embedding
	/// client's limit; a failed batch leaves its concepts scheduled and the
	/// run continues. Embedding writes never bump concept versions.
	pub async fn vectorize(&self, req: VectorizeRequest) -> Result<VectorizeStats> {
		let mut concepts_to_embed = if req.rebuild_all {
			concepts::list_active_concepts_for_rebuild(&self.db.pool, req.company_code.as_deref())
				.await?
		} else {
			concepts::find_concepts_needing_embeddings(
				&self.db.pool,
				req.company_code.as_deref(),
				req.limit,
			)
			.await?
		};

		if req.rebuild_all && req.resume {
			if let Some(checkpoint) = self.read_checkpoint().await? {
				concepts_to_embed.retain(|concept| concept.concept_id > checkpoint);
				info!(%checkpoint, remaining = concepts_to_embed.len(), "Resuming rebuild from checkpoint.");
			}
		}

		let mut stats =
			VectorizeStats { total_concepts: concepts_to_embed.len(), ..VectorizeStats::default() };

		if concepts_to_embed.is_empty() {
			info!("No concepts need vectorization.");

			return Ok(stats);
		}

		info!(
			total = concepts_to_embed.len(),
			rebuild_all = req.rebuild_all,
			"Starting vectorization."
		);

		let batch_size = self.cfg.providers.embedding.max_batch_size;

		for batch in concepts_to_embed.chunks(batch_size) {
			self.vectorize_batch(batch, &mut stats).await?;

			if req.rebuild_all
				&& let Some(last) = batch.last()
			{
				self.write_checkpoint(last.concept_id).await?;
			}
		}

		if req.rebuild_all {
			self.clear_checkpoint().await;
		}

		info!(
			succeeded = stats.succeeded,
			failed = stats.failed,
			skipped = stats.skipped,
			"Vectorization completed."
		);

		Ok(stats)
	}

	async fn vectorize_batch(
		&self,
		batch: &[ConceptRow],
		stats: &mut VectorizeStats,
	) -> Result<()> {
		let mut texts = Vec::with_capacity(batch.len());
		let mut ids = Vec::with_capacity(batch.len());

		for concept in batch {
			let description = concept
				.concept_details
				.get("description")
				.and_then(|v| v.as_str())
				.unwrap_or_default();
			let text = prepare_text_for_embedding(
				&concept.concept_name,
				description,
				self.cfg.vectorization.max_text_chars,
			);

			if text.is_empty() {
				warn!(concept_id = %concept.concept_id, "Concept yields empty embedding text.");
				stats.skipped += 1;

				continue;
			}

			texts.push(text);
			ids.push(concept.concept_id);
		}

		if texts.is_empty() {
			return Ok(());
		}

		let vectors = match self
			.breakers
			.embedding
			.call(|| self.providers.embedding.embed(&self.cfg.providers.embedding, &texts))
			.await
			.map_err(|err| Error::from_breaker(err, "embedding"))
		{
			Ok(vectors) => vectors,
			Err(err) => {
				// The batch stays scheduled (embeddings remain NULL).
				error!(error = %err, batch = texts.len(), "Embedding batch failed.");
				stats.failed += texts.len();

				return Ok(());
			},
		};

		if vectors.len() != ids.len() {
			error!(
				expected = ids.len(),
				received = vectors.len(),
				"Embedding batch returned a mismatched vector count."
			);
			stats.failed += ids.len();

			return Ok(());
		}

		let expected_dim = self.cfg.storage.vector.dim as usize;
		let mut pairs = Vec::with_capacity(ids.len());

		for (concept_id, vector) in ids.iter().zip(vectors) {
			if vector.len() != expected_dim {
				error!(
					%concept_id,
					dimension = vector.len(),
					expected = expected_dim,
					"Discarding embedding with wrong dimension; concept stays scheduled."
				);
				stats.failed += 1;

				continue;
			}

			pairs.push((*concept_id, vector_to_pg(&vector)));
		}

		if pairs.is_empty() {
			return Ok(());
		}

		let mut tx = self.db.pool.begin().await?;
		let written = concepts::batch_update_embeddings(&mut *tx, &pairs).await?;

		tx.commit().await?;

		stats.succeeded += written;

		Ok(())
	}

	async fn read_checkpoint(&self) -> Result<Option<Uuid>> {
		let path = &self.cfg.vectorization.checkpoint_path;

		match tokio::fs::read_to_string(path).await {
			Ok(raw) => {
				let id = raw.trim().parse::<Uuid>().map_err(|err| Error::Io {
					message: format!("Corrupt checkpoint file {path}: {err}."),
				})?;

				Ok(Some(id))
			},
			Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
			Err(err) => Err(Error::Io { message: format!("Failed to read {path}: {err}.") }),
		}
	}

	async fn write_checkpoint(&self, concept_id: Uuid) -> Result<()> {
		let path = &self.cfg.vectorization.checkpoint_path;

		if let Some(parent) = std::path::Path::new(path).parent()
			&& !parent.as_os_str().is_empty()
		{
			tokio::fs::create_dir_all(parent).await.map_err(|err| Error::Io {
				message: format!("Failed to create checkpoint directory: {err}."),
			})?;
		}

		tokio::fs::write(path, concept_id.to_string())
			.await
			.map_err(|err| Error::Io { message: format!("Failed to write {path}: {err}.") })
	}

	async fn clear_checkpoint(&self) {
		let path = &self.cfg.vectorization.checkpoint_path;

		if let Err(err) = tokio::fs::remove_file(path).await
			&& err.kind() != std::io::ErrorKind::NotFound
		{
			warn!(path = %path, error = %err, "Failed to remove vectorization checkpoint.");
		}
	}
}

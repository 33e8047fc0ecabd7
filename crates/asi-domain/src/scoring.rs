use crate::document::Document;

/// Weights for blending rerank and importance signals. The pair must sum to
/// 1.0 within a 0.02 tolerance; `asi-config` validates that at startup.
#[derive(Clone, Copy, Debug)]
pub struct RankingWeights {
	pub rerank: f32,
	pub importance: f32,
}
impl Default for RankingWeights {
	fn default() -> Self {
		Self { rerank: 0.7, importance: 0.3 }
	}
}

/// Compute `final_score` for every document and sort the list.
///
/// With a rerank score present: `w1 * rerank + w2 * importance`, clamped to
/// [0, 1]. Without one the formula degrades to the importance score alone.
/// Ordering is descending `final_score` with ascending `concept_id` as the
/// deterministic tie-break.
pub fn assign_final_scores(documents: &mut [Document], weights: RankingWeights) {
	for doc in documents.iter_mut() {
		doc.final_score = match doc.rerank_score {
			Some(rerank) => {
				(weights.rerank * rerank + weights.importance * doc.importance_score)
					.clamp(0.0, 1.0)
			},
			None => doc.importance_score,
		};
	}

	documents.sort_by(|a, b| {
		b.final_score
			.total_cmp(&a.final_score)
			.then_with(|| a.concept_id.cmp(&b.concept_id))
	});
}

use std::collections::{HashMap, HashSet};

use futures::{StreamExt, stream};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{info, warn};
use uuid::Uuid;

use asi_domain::{
	AggregationStrategy, ConceptCategory, Document, MarketData, MarketFilters, RankingWeights,
	aggregate_by_company, apply_filters, assign_final_scores, prepare_text_for_embedding,
};
use asi_providers::rerank::RerankResult;
use asi_storage::{companies, concepts, market, models::ConceptRow};

use crate::{Error, InsightService, Result, filter_policy};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SearchRequest {
	pub query_identifier: String,
	#[serde(default)]
	pub top_k: Option<u32>,
	#[serde(default)]
	pub similarity_threshold: Option<f32>,
	#[serde(default)]
	pub market_filters: Option<MarketFiltersRequest>,
}

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct MarketFiltersRequest {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub max_market_cap_cny: Option<i64>,
	/// Legacy field name kept for request compatibility; treated as the
	/// maximum 5-day average turnover.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub min_5day_avg_volume: Option<i64>,
}
impl MarketFiltersRequest {
	fn to_domain(self) -> MarketFilters {
		MarketFilters {
			max_market_cap_cny: self.max_market_cap_cny.map(|v| v as f64),
			max_avg_volume_5day: self.min_5day_avg_volume.map(|v| v as f64),
		}
	}
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QueryCompany {
	pub name: String,
	pub code: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SearchMetadata {
	pub total_results_before_limit: usize,
	pub filters_applied: Value,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub note: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MatchedConcept {
	pub name: String,
	pub similarity_score: f32,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Justification {
	pub summary: String,
	pub supporting_evidence: Vec<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CompanyResult {
	pub company_name: String,
	pub company_code: String,
	pub relevance_score: f32,
	pub matched_concepts: Vec<MatchedConcept>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub justification: Option<Justification>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SearchResponse {
	pub query_company: QueryCompany,
	pub metadata: SearchMetadata,
	pub results: Vec<CompanyResult>,
}

impl InsightService {
	/// The online pipeline: resolve -> recall -> dedup -> rerank -> score ->
	/// aggregate -> market filter -> truncate. Rerank and market data are
	/// optional collaborators; their absence degrades the response, never
	/// fails it.
	pub async fn search_similar_companies(
		&self,
		req: SearchRequest,
		include_justification: bool,
	) -> Result<SearchResponse> {
		let top_k = req.top_k.unwrap_or(self.cfg.search.default_top_k);

		if !(1..=100).contains(&top_k) {
			return Err(Error::Validation {
				message: format!("top_k must be in the range 1-100, got {top_k}."),
			});
		}

		let threshold =
			req.similarity_threshold.unwrap_or(self.cfg.search.similarity_threshold);

		if !(0.0..=1.0).contains(&threshold) {
			return Err(Error::Validation {
				message: format!("similarity_threshold must be in [0, 1], got {threshold}."),
			});
		}
		if req.query_identifier.trim().is_empty() {
			return Err(Error::Validation {
				message: "query_identifier must be non-empty.".to_string(),
			});
		}

		let company = self
			.db_call(|| companies::get_company(&self.db.pool, &req.query_identifier))
			.await?
			.ok_or_else(|| Error::CompanyNotFound {
				identifier: req.query_identifier.clone(),
			})?;
		let query_company = QueryCompany {
			name: company.company_name_short.clone().unwrap_or(company.company_name_full.clone()),
			code: company.company_code.clone(),
		};
		let cache_key = cache_key(
			&company.company_code,
			top_k,
			threshold,
			req.market_filters.as_ref(),
			include_justification,
		);

		if self.cfg.search.cache.enabled
			&& let Some(cached) = self.search_cache.get(&cache_key).await
		{
			info!(identifier = %req.query_identifier, "Search cache hit.");

			return Ok(cached);
		}

		let source_concepts = self
			.db_call(|| concepts::list_active_concepts(&self.db.pool, &company.company_code))
			.await?;

		if source_concepts.is_empty() {
			warn!(company_code = %company.company_code, "Query company has no active concepts.");

			return Ok(SearchResponse {
				query_company,
				metadata: SearchMetadata {
					total_results_before_limit: 0,
					filters_applied: json!({}),
					note: Some("Query company has no active business concepts.".to_string()),
				},
				results: Vec::new(),
			});
		}

		let documents = self.recall_stage(&company.company_code, &source_concepts, threshold).await?;
		let (mut documents, reranked) =
			self.rerank_stage(documents, &source_concepts).await;

		assign_final_scores(
			&mut documents,
			RankingWeights {
				rerank: self.cfg.search.rerank_weight,
				importance: self.cfg.search.importance_weight,
			},
		);

		let strategy = match self.cfg.search.aggregation.as_str() {
			"mean" => AggregationStrategy::Mean,
			_ => AggregationStrategy::Max,
		};
		let aggregated = aggregate_by_company(
			documents,
			strategy,
			self.cfg.search.max_concepts_per_company,
		);
		let (companies, filters_applied) =
			self.market_filter_stage(aggregated, req.market_filters, threshold, reranked).await?;
		let total_results_before_limit = companies.len();
		let mut companies = companies;

		companies.truncate(top_k as usize);

		let results = self.build_results(companies, include_justification).await?;
		let response = SearchResponse {
			query_company,
			metadata: SearchMetadata {
				total_results_before_limit,
				filters_applied,
				note: None,
			},
			results,
		};

		if self.cfg.search.cache.enabled {
			self.search_cache.insert(cache_key, response.clone()).await;
		}

		Ok(response)
	}

	/// Parallel vector recall over every embedded source concept, deduped by
	/// target concept keeping the best similarity, with self-matches
	/// dropped.
	async fn recall_stage(
		&self,
		query_company_code: &str,
		source_concepts: &[ConceptRow],
		threshold: f32,
	) -> Result<Vec<Document>> {
		let mut queries = Vec::with_capacity(source_concepts.len());

		for concept in source_concepts {
			let Some(vec_text) = self
				.db_call(|| concepts::concept_embedding_text(&self.db.pool, concept.concept_id))
				.await?
			else {
				continue;
			};

			queries.push((concept.concept_id, vec_text));
		}

		let recall_limit = self.cfg.search.recall_limit as i64;
		let recalls: Vec<Result<Vec<Document>>> = stream::iter(queries)
			.map(|(source_concept_id, vec_text)| async move {
				let rows = self
					.db_call(|| {
						concepts::search_similar(&self.db.pool, &vec_text, threshold, recall_limit)
					})
					.await?;

				Ok(rows
					.into_iter()
					.filter_map(|row| similar_row_to_document(row, source_concept_id))
					.collect::<Vec<_>>())
			})
			.buffer_unordered(self.cfg.search.recall_concurrency)
			.collect()
			.await;
		let mut best: HashMap<Uuid, Document> = HashMap::new();

		for recall in recalls {
			for doc in recall? {
				match best.get(&doc.concept_id) {
					Some(existing) if existing.similarity_score >= doc.similarity_score => {},
					_ => {
						best.insert(doc.concept_id, doc);
					},
				}
			}
		}

		let mut documents: Vec<Document> = best
			.into_values()
			.filter(|doc| doc.company_code != query_company_code)
			.collect();

		documents.sort_by(|a, b| {
			b.similarity_score
				.total_cmp(&a.similarity_score)
				.then_with(|| a.concept_id.cmp(&b.concept_id))
		});

		Ok(documents)
	}

	/// Optional rerank pass. Returns the (possibly reordered) documents and
	/// whether rerank scores were attached; every failure path degrades to
	/// the recall order.
	async fn rerank_stage(
		&self,
		documents: Vec<Document>,
		source_concepts: &[ConceptRow],
	) -> (Vec<Document>, bool) {
		if !self.cfg.providers.rerank.enabled || documents.is_empty() {
			return (documents, false);
		}

		// Source concepts arrive ordered by importance; the most important
		// one defines the query text.
		let Some(top_concept) = source_concepts.first() else {
			return (documents, false);
		};
		let description = top_concept
			.concept_details
			.get("description")
			.and_then(|v| v.as_str())
			.unwrap_or_default();
		let query_text = prepare_text_for_embedding(
			&top_concept.concept_name,
			description,
			self.cfg.providers.rerank.max_document_chars,
		);
		let doc_texts: Vec<String> = documents
			.iter()
			.map(|doc| format!("{}: {}", doc.company_name, doc.concept_name))
			.collect();
		let outcome = self
			.breakers
			.rerank
			.call(|| {
				self.providers.rerank.rerank(
					&self.cfg.providers.rerank,
					&query_text,
					&doc_texts,
					doc_texts.len(),
				)
			})
			.await
			.map_err(|err| Error::from_breaker(err, "rerank"));

		match outcome {
			Ok(results) => match attach_rerank_scores(documents, results) {
				Ok(reranked) => (reranked, true),
				Err((documents, message)) => {
					warn!(message, "Rerank output unusable; keeping recall order.");

					(documents, false)
				},
			},
			Err(err) => {
				warn!(error = %err, "Rerank unavailable; keeping recall order.");

				(documents, false)
			},
		}
	}

	async fn market_filter_stage(
		&self,
		aggregated: Vec<asi_domain::AggregatedCompany>,
		filters: Option<MarketFiltersRequest>,
		threshold: f32,
		reranked: bool,
	) -> Result<(Vec<asi_domain::AggregatedCompany>, Value)> {
		let mut entries = serde_json::Map::new();

		entries.insert("similarity_threshold".to_string(), json!(threshold));
		entries.insert("rerank_applied".to_string(), json!(reranked));

		let request_filters = filters.filter(|f| !f.to_domain().is_empty());
		let Some(request_filters) = request_filters else {
			return Ok((aggregated, Value::Object(entries)));
		};
		let codes: Vec<String> =
			aggregated.iter().map(|company| company.company_code.clone()).collect();
		let market_data = self.market_data_for(&codes).await?;
		let outcome = apply_filters(
			aggregated,
			request_filters.to_domain(),
			&market_data,
			&filter_policy(&self.cfg.market_filter),
		);

		if !outcome.applied {
			warn!("Market filters requested but no market data is available.");
			entries.insert("market_filters".to_string(), json!("requested_but_not_applied"));

			return Ok((outcome.into_companies(), Value::Object(entries)));
		}

		if outcome.market_cap_filter
			&& let Some(max_cap) = request_filters.max_market_cap_cny
		{
			entries.insert("max_market_cap_cny".to_string(), json!(max_cap));
		}
		if outcome.volume_filter
			&& let Some(max_volume) = request_filters.min_5day_avg_volume
		{
			entries.insert("min_5day_avg_volume".to_string(), json!(max_volume));
		}

		entries.insert("market_cap_filter".to_string(), json!(outcome.market_cap_filter));
		entries.insert("volume_filter".to_string(), json!(outcome.volume_filter));
		entries.insert(
			"excluded".to_string(),
			json!({
				"over_market_cap": outcome.excluded_over_market_cap,
				"over_volume": outcome.excluded_over_volume,
				"missing_market_data": outcome.excluded_missing_data,
			}),
		);

		Ok((outcome.into_companies(), Value::Object(entries)))
	}

	async fn market_data_for(&self, codes: &[String]) -> Result<HashMap<String, MarketData>> {
		if codes.is_empty() {
			return Ok(HashMap::new());
		}

		let cache_key = market_cache_key(codes);
		let rows = if let Some(cached) = self.market_cache.get(&cache_key).await {
			cached
		} else {
			let rows = self.db_call(|| market::get_current(&self.db.pool, codes)).await?;

			self.market_cache.insert(cache_key, rows.clone()).await;

			rows
		};

		Ok(rows
			.into_iter()
			.map(|row| {
				(
					row.company_code.clone(),
					MarketData {
						company_code: row.company_code,
						market_cap_cny: Some(row.current_market_cap),
						avg_volume_5day: Some(row.avg_5day_volume),
					},
				)
			})
			.collect())
	}

	async fn build_results(
		&self,
		companies: Vec<asi_domain::AggregatedCompany>,
		include_justification: bool,
	) -> Result<Vec<CompanyResult>> {
		let details_by_concept = if include_justification {
			let ids: Vec<Uuid> = companies
				.iter()
				.flat_map(|company| company.matched_concepts.iter().map(|doc| doc.concept_id))
				.collect();

			self.db_call(|| concepts::fetch_concept_details(&self.db.pool, &ids)).await?
		} else {
			HashMap::new()
		};
		let mut results = Vec::with_capacity(companies.len());

		for company in companies {
			let matched_concepts: Vec<MatchedConcept> = company
				.matched_concepts
				.iter()
				.map(|doc| MatchedConcept {
					name: doc.concept_name.clone(),
					similarity_score: doc.similarity_score,
				})
				.collect();
			let justification = include_justification.then(|| {
				build_justification(&company, &matched_concepts, &details_by_concept)
			});

			results.push(CompanyResult {
				company_name: company.company_name,
				company_code: company.company_code,
				relevance_score: company.relevance_score,
				matched_concepts,
				justification,
			});
		}

		Ok(results)
	}

	/// Route a storage call through the shared database breaker.
	pub(crate) async fn db_call<T, F, Fut>(&self, op: F) -> Result<T>
	where
		F: FnOnce() -> Fut,
		Fut: Future<Output = asi_storage::Result<T>>,
	{
		self.breakers
			.db
			.call(|| async { op().await.map_err(Error::from) })
			.await
			.map_err(|err| Error::from_breaker(err, "database"))
	}
}

fn similar_row_to_document(
	row: asi_storage::models::SimilarConceptRow,
	source_concept_id: Uuid,
) -> Option<Document> {
	let concept_category = ConceptCategory::parse(&row.concept_category)?;

	Some(Document {
		concept_id: row.concept_id,
		company_code: row.company_code,
		company_name: row.company_name,
		concept_name: row.concept_name,
		concept_category,
		importance_score: row.importance_score,
		similarity_score: row.similarity_score,
		rerank_score: None,
		final_score: 0.0,
		source_concept_id,
	})
}

/// Re-attach rerank scores by index and adopt the rerank order. A response
/// that does not cover every document is unusable and hands the original
/// list back for the degraded path.
fn attach_rerank_scores(
	documents: Vec<Document>,
	results: Vec<RerankResult>,
) -> std::result::Result<Vec<Document>, (Vec<Document>, &'static str)> {
	if results.len() != documents.len() {
		return Err((documents, "rerank returned a wrong-length result list"));
	}
	if results.iter().any(|result| result.index >= documents.len()) {
		return Err((documents, "rerank result indices are out of range"));
	}

	let covered: HashSet<usize> = results.iter().map(|result| result.index).collect();

	if covered.len() != documents.len() {
		return Err((documents, "rerank results repeat or skip document indices"));
	}

	let mut documents: Vec<Option<Document>> = documents.into_iter().map(Some).collect();
	let mut reranked = Vec::with_capacity(results.len());

	for result in results {
		let mut doc = documents[result.index].take().expect("indices are unique");

		doc.rerank_score = Some(result.score.clamp(0.0, 1.0));
		reranked.push(doc);
	}

	Ok(reranked)
}

fn cache_key(
	company_code: &str,
	top_k: u32,
	threshold: f32,
	filters: Option<&MarketFiltersRequest>,
	include_justification: bool,
) -> String {
	let filters_signature = filters
		.map(|f| {
			format!(
				"cap:{}|vol:{}",
				f.max_market_cap_cny.map(|v| v.to_string()).unwrap_or_default(),
				f.min_5day_avg_volume.map(|v| v.to_string()).unwrap_or_default()
			)
		})
		.unwrap_or_default();
	let raw = format!(
		"search|{company_code}|{top_k}|{threshold}|{filters_signature}|{include_justification}"
	);

	blake3::hash(raw.as_bytes()).to_hex().to_string()
}

fn market_cache_key(codes: &[String]) -> String {
	let mut sorted: Vec<&str> = codes.iter().map(String::as_str).collect();

	sorted.sort_unstable();

	blake3::hash(sorted.join(",").as_bytes()).to_hex().to_string()
}

fn build_justification(
	company: &asi_domain::AggregatedCompany,
	matched_concepts: &[MatchedConcept],
	details_by_concept: &HashMap<Uuid, Value>,
) -> Justification {
	let mut evidence = Vec::new();
	let mut seen = HashSet::new();

	'outer: for doc in &company.matched_concepts {
		let Some(details) = details_by_concept.get(&doc.concept_id) else {
			continue;
		};
		let Some(sentences) = details.get("source_sentences").and_then(|v| v.as_array()) else {
			continue;
		};

		for sentence in sentences.iter().filter_map(|v| v.as_str()) {
			if seen.insert(sentence.to_string()) {
				evidence.push(sentence.to_string());
			}
			if evidence.len() >= 3 {
				break 'outer;
			}
		}
	}

	if evidence.is_empty() {
		evidence = matched_concepts
			.iter()
			.take(3)
			.map(|concept| format!("{} (score: {:.2})", concept.name, concept.similarity_score))
			.collect();
	}

	Justification {
		summary: format!("Matched {} business concepts.", matched_concepts.len()),
		supporting_evidence: evidence,
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn doc(id: u128, code: &str, similarity: f32) -> Document {
		Document {
			concept_id: Uuid::from_u128(id),
			company_code: code.to_string(),
			company_name: format!("公司{code}"),
			concept_name: format!("概念{id}"),
			concept_category: ConceptCategory::Core,
			importance_score: 0.5,
			similarity_score: similarity,
			rerank_score: None,
			final_score: 0.0,
			source_concept_id: Uuid::from_u128(id + 1_000),
		}
	}

	#[test]
	fn cache_key_is_deterministic_and_filter_sensitive() {
		let filters =
			MarketFiltersRequest { max_market_cap_cny: Some(85_0000_0000), min_5day_avg_volume: None };
		let a = cache_key("300257", 20, 0.7, Some(&filters), false);
		let b = cache_key("300257", 20, 0.7, Some(&filters), false);
		let without_filters = cache_key("300257", 20, 0.7, None, false);
		let with_justification = cache_key("300257", 20, 0.7, Some(&filters), true);

		assert_eq!(a, b);
		assert_ne!(a, without_filters);
		assert_ne!(a, with_justification);
	}

	#[test]
	fn market_cache_key_ignores_code_order() {
		let a = market_cache_key(&["300257".to_string(), "688448".to_string()]);
		let b = market_cache_key(&["688448".to_string(), "300257".to_string()]);

		assert_eq!(a, b);
	}

	#[test]
	fn rerank_scores_attach_by_index_and_reorder() {
		let documents = vec![doc(1, "688448", 0.9), doc(2, "002598", 0.8)];
		let results = vec![
			RerankResult { index: 1, score: 0.95, document: "d1".to_string() },
			RerankResult { index: 0, score: 0.2, document: "d0".to_string() },
		];
		let reranked = attach_rerank_scores(documents, results).expect("attach succeeds");

		assert_eq!(reranked[0].concept_id, Uuid::from_u128(2));
		assert_eq!(reranked[0].rerank_score, Some(0.95));
		assert_eq!(reranked[1].concept_id, Uuid::from_u128(1));
		assert_eq!(reranked[1].rerank_score, Some(0.2));
	}

	#[test]
	fn wrong_length_rerank_output_degrades() {
		let documents = vec![doc(1, "688448", 0.9), doc(2, "002598", 0.8)];
		let results = vec![RerankResult { index: 0, score: 0.9, document: "d0".to_string() }];
		let (returned, reason) =
			attach_rerank_scores(documents, results).expect_err("must degrade");

		assert_eq!(returned.len(), 2);
		assert!(reason.contains("wrong-length"));
		assert!(returned.iter().all(|doc| doc.rerank_score.is_none()));
	}

	#[test]
	fn duplicate_rerank_indices_degrade() {
		let documents = vec![doc(1, "688448", 0.9), doc(2, "002598", 0.8)];
		let results = vec![
			RerankResult { index: 0, score: 0.9, document: "d0".to_string() },
			RerankResult { index: 0, score: 0.8, document: "d0".to_string() },
		];

		assert!(attach_rerank_scores(documents, results).is_err());
	}

	#[test]
	fn justification_falls_back_to_concept_lines() {
		let company = asi_domain::AggregatedCompany {
			company_code: "688448".to_string(),
			company_name: "磁谷科技".to_string(),
			relevance_score: 0.9,
			matched_concepts: vec![doc(1, "688448", 0.91)],
		};
		let matched = vec![MatchedConcept { name: "磁悬浮鼓风机".to_string(), similarity_score: 0.91 }];
		let justification = build_justification(&company, &matched, &HashMap::new());

		assert_eq!(justification.summary, "Matched 1 business concepts.");
		assert_eq!(justification.supporting_evidence.len(), 1);
		assert!(justification.supporting_evidence[0].contains("磁悬浮鼓风机"));
	}

	#[test]
	fn justification_prefers_source_sentences() {
		let concept_id = Uuid::from_u128(1);
		let company = asi_domain::AggregatedCompany {
			company_code: "688448".to_string(),
			company_name: "磁谷科技".to_string(),
			relevance_score: 0.9,
			matched_concepts: vec![doc(1, "688448", 0.91)],
		};
		let matched = vec![MatchedConcept { name: "磁悬浮鼓风机".to_string(), similarity_score: 0.91 }];
		let details: HashMap<Uuid, Value> = [(
			concept_id,
			json!({ "source_sentences": ["句子一", "句子二", "句子三", "句子四"] }),
		)]
		.into_iter()
		.collect();
		let justification = build_justification(&company, &matched, &details);

		assert_eq!(
			justification.supporting_evidence,
			vec!["句子一".to_string(), "句子二".to_string(), "句子三".to_string()]
		);
	}
}

use std::time::Duration;

use reqwest::Client;
use serde_json::Value;

use asi_resilience::{RetryPolicy, retry};

use crate::{Error, Result};

/// One rescored document; `index` points back into the request's
/// `documents` array so the caller can re-attach metadata.
#[derive(Clone, Debug, PartialEq)]
pub struct RerankResult {
	pub index: usize,
	pub score: f32,
	pub document: String,
}

/// Re-score `(query, document)` pairs, returning at most `top_k` results
/// sorted by descending score. Failing or degraded behavior is the caller's
/// concern; this client only validates and transports.
pub async fn rerank(
	cfg: &asi_config::RerankProviderConfig,
	query: &str,
	documents: &[String],
	top_k: usize,
) -> Result<Vec<RerankResult>> {
	if query.trim().is_empty() {
		return Err(Error::Validation { message: "Rerank query must be non-empty.".to_string() });
	}
	if documents.is_empty() {
		return Ok(Vec::new());
	}
	if documents.len() > cfg.max_documents {
		return Err(Error::Validation {
			message: format!(
				"Rerank accepts at most {} documents, got {}.",
				cfg.max_documents,
				documents.len()
			),
		});
	}
	if let Some(oversized) =
		documents.iter().position(|doc| doc.chars().count() > cfg.max_document_chars)
	{
		return Err(Error::Validation {
			message: format!(
				"Rerank document {oversized} exceeds {} characters.",
				cfg.max_document_chars
			),
		});
	}

	let client = Client::builder().timeout(Duration::from_millis(cfg.timeout_ms)).build()?;
	let policy =
		RetryPolicy::new(cfg.max_retries, Duration::from_millis(cfg.retry_base_delay_ms));
	let json = retry(policy, Error::is_retryable, |_| async {
		let url = format!("{}{}", cfg.api_base, cfg.path);
		let body = serde_json::json!({
			"query": query,
			"documents": documents,
			"top_k": top_k,
		});
		let res = client
			.post(url)
			.headers(crate::auth_headers(&cfg.api_key, &cfg.default_headers)?)
			.json(&body)
			.send()
			.await?;
		let json: Value = res.error_for_status()?.json().await?;

		Ok::<_, Error>(json)
	})
	.await?;

	parse_rerank_response(json, documents, top_k)
}

fn parse_rerank_response(
	json: Value,
	documents: &[String],
	top_k: usize,
) -> Result<Vec<RerankResult>> {
	let results = json
		.get("data")
		.and_then(|data| data.get("results"))
		.or_else(|| json.get("results"))
		.and_then(|v| v.as_array())
		.ok_or_else(|| Error::InvalidResponse {
			message: "Rerank response is missing data.results.".to_string(),
		})?;
	let mut out = Vec::with_capacity(results.len());

	for item in results {
		let index = item.get("index").and_then(|v| v.as_u64()).ok_or_else(|| {
			Error::InvalidResponse { message: "Rerank result missing index.".to_string() }
		})? as usize;

		if index >= documents.len() {
			return Err(Error::InvalidResponse {
				message: format!("Rerank result index {index} is out of range."),
			});
		}

		let score = item
			.get("score")
			.or_else(|| item.get("relevance_score"))
			.and_then(|v| v.as_f64())
			.ok_or_else(|| Error::InvalidResponse {
				message: "Rerank result missing score.".to_string(),
			})? as f32;
		let document = item
			.get("document")
			.and_then(|v| v.as_str())
			.map(|s| s.to_string())
			.unwrap_or_else(|| documents[index].clone());

		out.push(RerankResult { index, score, document });
	}

	out.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.index.cmp(&b.index)));
	out.truncate(top_k);

	Ok(out)
}

#[cfg(test)]
mod tests {
	use super::*;

	fn docs(n: usize) -> Vec<String> {
		(0..n).map(|i| format!("doc-{i}")).collect()
	}

	#[test]
	fn sorts_by_descending_score_and_truncates() {
		let json = serde_json::json!({
			"data": {
				"results": [
					{ "index": 0, "score": 0.2, "document": "doc-0" },
					{ "index": 1, "score": 0.9, "document": "doc-1" },
					{ "index": 2, "score": 0.5, "document": "doc-2" }
				]
			}
		});
		let parsed = parse_rerank_response(json, &docs(3), 2).expect("parse failed");

		assert_eq!(parsed.len(), 2);
		assert_eq!(parsed[0].index, 1);
		assert_eq!(parsed[1].index, 2);
	}

	#[test]
	fn out_of_range_index_is_rejected() {
		let json = serde_json::json!({
			"data": { "results": [{ "index": 5, "score": 0.9 }] }
		});

		assert!(matches!(
			parse_rerank_response(json, &docs(2), 2),
			Err(Error::InvalidResponse { .. })
		));
	}

	#[test]
	fn tolerates_top_level_results_and_relevance_score_alias() {
		let json = serde_json::json!({
			"results": [{ "index": 0, "relevance_score": 0.7 }]
		});
		let parsed = parse_rerank_response(json, &docs(1), 5).expect("parse failed");

		assert_eq!(parsed[0].score, 0.7);
		assert_eq!(parsed[0].document, "doc-0");
	}

	#[tokio::test]
	async fn document_count_limit_is_enforced() {
		let cfg = asi_config::RerankProviderConfig {
			enabled: true,
			api_base: "http://127.0.0.1:1".to_string(),
			api_key: "key".to_string(),
			path: "/rerank".to_string(),
			model: "m".to_string(),
			timeout_ms: 100,
			max_documents: 2,
			max_document_chars: 64,
			max_retries: 1,
			retry_base_delay_ms: 1,
			default_headers: serde_json::Map::new(),
		};
		let result = rerank(&cfg, "查询", &docs(3), 3).await;

		assert!(matches!(result, Err(Error::Validation { .. })));
	}
}

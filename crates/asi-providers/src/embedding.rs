use std::time::Duration;

use futures::{FutureExt, StreamExt, TryStreamExt, stream};
use reqwest::Client;
use serde_json::Value;

use asi_resilience::{RetryPolicy, retry};

use crate::{Error, Result};

/// Embed `texts` into fixed-dimension vectors, preserving input order.
///
/// Inputs are chunked to the provider's batch limit and the chunks are
/// issued concurrently up to the configured ceiling. Empty texts are
/// rejected up front; a count or dimension mismatch in any response is
/// fatal for the whole call.
pub async fn embed(
	cfg: &asi_config::EmbeddingProviderConfig,
	texts: &[String],
) -> Result<Vec<Vec<f32>>> {
	if texts.is_empty() {
		return Ok(Vec::new());
	}
	if texts.iter().any(|text| text.trim().is_empty()) {
		return Err(Error::Validation {
			message: "Embedding input texts must be non-empty.".to_string(),
		});
	}

	let client = Client::builder().timeout(Duration::from_millis(cfg.timeout_ms)).build()?;
	let futures: Vec<_> = texts
		.chunks(cfg.max_batch_size)
		.map(|batch| embed_batch_with_retry(&client, cfg, batch).boxed())
		.collect();
	let vectors: Vec<Vec<f32>> =
		stream::iter(futures).buffered(cfg.max_concurrency).try_concat().await?;

	Ok(vectors)
}

async fn embed_batch_with_retry(
	client: &Client,
	cfg: &asi_config::EmbeddingProviderConfig,
	batch: &[String],
) -> Result<Vec<Vec<f32>>> {
	let policy =
		RetryPolicy::new(cfg.max_retries, Duration::from_millis(cfg.retry_base_delay_ms));

	retry(policy, Error::is_retryable, |_| embed_batch(client, cfg, batch)).await
}

async fn embed_batch(
	client: &Client,
	cfg: &asi_config::EmbeddingProviderConfig,
	batch: &[String],
) -> Result<Vec<Vec<f32>>> {
	let url = format!("{}{}", cfg.api_base, cfg.path);
	let body = serde_json::json!({
		"texts": batch,
		"normalize": cfg.normalize,
		"batch_size": cfg.max_batch_size,
	});
	let res = client
		.post(url)
		.headers(crate::auth_headers(&cfg.api_key, &cfg.default_headers)?)
		.json(&body)
		.send()
		.await?;
	let json: Value = res.error_for_status()?.json().await?;

	parse_embedding_response(json, batch.len(), cfg.dimensions as usize)
}

fn parse_embedding_response(
	json: Value,
	expected_count: usize,
	expected_dim: usize,
) -> Result<Vec<Vec<f32>>> {
	let embeddings = json
		.get("data")
		.and_then(|data| data.get("embeddings"))
		.and_then(|v| v.as_array())
		.ok_or_else(|| Error::InvalidResponse {
			message: "Embedding response is missing data.embeddings.".to_string(),
		})?;

	if embeddings.len() != expected_count {
		return Err(Error::InvalidResponse {
			message: format!(
				"Embedding response returned {} vectors for {} inputs.",
				embeddings.len(),
				expected_count
			),
		});
	}

	let mut out = Vec::with_capacity(embeddings.len());

	for item in embeddings {
		let values = item.as_array().ok_or_else(|| Error::InvalidResponse {
			message: "Embedding entries must be arrays.".to_string(),
		})?;

		if values.len() != expected_dim {
			return Err(Error::InvalidResponse {
				message: format!(
					"Embedding dimension {} does not match the configured {}.",
					values.len(),
					expected_dim
				),
			});
		}

		let mut vec = Vec::with_capacity(values.len());

		for value in values {
			let number = value.as_f64().ok_or_else(|| Error::InvalidResponse {
				message: "Embedding values must be numeric.".to_string(),
			})?;

			vec.push(number as f32);
		}

		out.push(vec);
	}

	Ok(out)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parses_vectors_in_order() {
		let json = serde_json::json!({
			"data": {
				"embeddings": [[0.5, 1.5], [2.0, 3.0]],
				"dimensions": 2,
				"count": 2
			}
		});
		let parsed = parse_embedding_response(json, 2, 2).expect("parse failed");

		assert_eq!(parsed, vec![vec![0.5, 1.5], vec![2.0, 3.0]]);
	}

	#[test]
	fn count_mismatch_is_fatal() {
		let json = serde_json::json!({
			"data": { "embeddings": [[0.5, 1.5]], "dimensions": 2, "count": 1 }
		});

		assert!(matches!(
			parse_embedding_response(json, 2, 2),
			Err(Error::InvalidResponse { .. })
		));
	}

	#[test]
	fn dimension_mismatch_is_fatal() {
		let json = serde_json::json!({
			"data": { "embeddings": [[0.5, 1.5, 2.5]], "dimensions": 3, "count": 1 }
		});

		assert!(matches!(
			parse_embedding_response(json, 1, 2),
			Err(Error::InvalidResponse { .. })
		));
	}

	#[tokio::test]
	async fn empty_texts_are_rejected_before_any_request() {
		let cfg = asi_config::EmbeddingProviderConfig {
			api_base: "http://127.0.0.1:1".to_string(),
			api_key: "key".to_string(),
			path: "/embed".to_string(),
			model: "m".to_string(),
			dimensions: 4,
			normalize: true,
			max_batch_size: 8,
			max_concurrency: 2,
			timeout_ms: 100,
			max_retries: 1,
			retry_base_delay_ms: 1,
			default_headers: serde_json::Map::new(),
		};
		let result = embed(&cfg, &["  ".to_string()]).await;

		assert!(matches!(result, Err(Error::Validation { .. })));
	}
}

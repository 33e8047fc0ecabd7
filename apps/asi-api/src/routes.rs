use axum::{
	Json, Router,
	extract::{Query, State, rejection::JsonRejection},
	http::StatusCode,
	response::{IntoResponse, Response},
	routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tracing::error;
use uuid::Uuid;

use asi_service::{SearchRequest, SearchResponse};

use crate::state::AppState;

pub fn router(state: AppState) -> Router {
	Router::new()
		.route("/health", get(health))
		.route("/api/v1/search/similar-companies", post(search_similar_companies))
		.with_state(state)
}

#[derive(Debug, Serialize)]
struct HealthResponse {
	status: &'static str,
	search_cache: CacheStatsBody,
	market_cache: CacheStatsBody,
}

#[derive(Debug, Serialize)]
struct CacheStatsBody {
	size: usize,
	capacity: usize,
	hits: u64,
	misses: u64,
}
impl From<asi_resilience::CacheStats> for CacheStatsBody {
	fn from(stats: asi_resilience::CacheStats) -> Self {
		Self { size: stats.size, capacity: stats.capacity, hits: stats.hits, misses: stats.misses }
	}
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
	let (search_cache, market_cache) = state.service.cache_stats().await;

	Json(HealthResponse {
		status: "ok",
		search_cache: search_cache.into(),
		market_cache: market_cache.into(),
	})
}

#[derive(Debug, Deserialize)]
struct SearchQuery {
	#[serde(default)]
	include_justification: bool,
}

async fn search_similar_companies(
	State(state): State<AppState>,
	Query(query): Query<SearchQuery>,
	payload: Result<Json<SearchRequest>, JsonRejection>,
) -> Result<Json<SearchResponse>, ApiError> {
	let request_id = Uuid::new_v4();
	let Json(req) = payload.map_err(|rejection| {
		ApiError::new(
			StatusCode::UNPROCESSABLE_ENTITY,
			"invalid_request",
			rejection.body_text(),
			request_id,
		)
	})?;
	let response = state
		.service
		.search_similar_companies(req, query.include_justification)
		.await
		.map_err(|err| ApiError::from_service(err, request_id))?;

	Ok(Json(response))
}

#[derive(Debug, Serialize)]
struct ErrorEnvelope {
	error: ErrorBody,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
	code: String,
	message: String,
	request_id: String,
}

#[derive(Debug)]
pub struct ApiError {
	status: StatusCode,
	code: &'static str,
	message: String,
	request_id: Uuid,
}
impl ApiError {
	fn new(
		status: StatusCode,
		code: &'static str,
		message: impl Into<String>,
		request_id: Uuid,
	) -> Self {
		Self { status, code, message: message.into(), request_id }
	}

	/// Map service errors onto the HTTP surface. Degraded collaborators
	/// never reach this point; they are folded into response metadata.
	fn from_service(err: asi_service::Error, request_id: Uuid) -> Self {
		use asi_service::Error;

		match err {
			Error::Validation { message } =>
				Self::new(StatusCode::UNPROCESSABLE_ENTITY, "invalid_request", message, request_id),
			Error::CompanyNotFound { identifier } => Self::new(
				StatusCode::NOT_FOUND,
				"company_not_found",
				format!("Company {identifier:?} could not be resolved."),
				request_id,
			),
			Error::NotFound { message } =>
				Self::new(StatusCode::NOT_FOUND, "not_found", message, request_id),
			other => {
				// Full context stays in the logs; the client gets the
				// correlation id.
				error!(%request_id, error = %other, "Search request failed.");

				Self::new(
					StatusCode::INTERNAL_SERVER_ERROR,
					"internal_error",
					"An internal error occurred.",
					request_id,
				)
			},
		}
	}
}
impl IntoResponse for ApiError {
	fn into_response(self) -> Response {
		let body = ErrorEnvelope {
			error: ErrorBody {
				code: self.code.to_string(),
				message: self.message,
				request_id: self.request_id.to_string(),
			},
		};

		(self.status, Json(body)).into_response()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn service_error_status(err: asi_service::Error) -> StatusCode {
		ApiError::from_service(err, Uuid::new_v4()).status
	}

	#[test]
	fn validation_maps_to_422() {
		let status = service_error_status(asi_service::Error::Validation {
			message: "top_k out of range".to_string(),
		});

		assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
	}

	#[test]
	fn unresolvable_company_maps_to_404() {
		let status = service_error_status(asi_service::Error::CompanyNotFound {
			identifier: "300257".to_string(),
		});

		assert_eq!(status, StatusCode::NOT_FOUND);
	}

	#[test]
	fn repository_failures_map_to_500_without_detail_leakage() {
		let err = asi_service::Error::Repository { message: "dsn=postgres://secret".to_string() };
		let api_err = ApiError::from_service(err, Uuid::new_v4());

		assert_eq!(api_err.status, StatusCode::INTERNAL_SERVER_ERROR);
		assert!(!api_err.message.contains("secret"));
	}

	#[test]
	fn error_envelope_shape_is_stable() {
		let request_id = Uuid::new_v4();
		let api_err = ApiError::new(
			StatusCode::NOT_FOUND,
			"company_not_found",
			"Company \"300257\" could not be resolved.",
			request_id,
		);
		let body = ErrorEnvelope {
			error: ErrorBody {
				code: api_err.code.to_string(),
				message: api_err.message.clone(),
				request_id: api_err.request_id.to_string(),
			},
		};
		let json = serde_json::to_value(&body).expect("serialize envelope");

		assert_eq!(json["error"]["code"], "company_not_found");
		assert_eq!(json["error"]["request_id"], request_id.to_string());
	}
}

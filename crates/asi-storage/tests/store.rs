use serde_json::json;
use uuid::Uuid;

use asi_config::{Postgres, VectorIndex};
use asi_storage::{
	Error, companies,
	companies::NewCompany,
	concepts,
	concepts::{ConceptUpdate, NewConcept},
	db::Db,
	documents,
	documents::NewSourceDocument,
	market,
	market::NewMarketSnapshot,
};
use asi_testkit::TestDatabase;

fn vector_cfg() -> VectorIndex {
	VectorIndex { dim: 4, hnsw_m: 16, hnsw_ef_construction: 64 }
}

async fn connect(test_db: &TestDatabase) -> Db {
	let cfg = Postgres {
		dsn: test_db.dsn().to_string(),
		pool_max_conns: 2,
		pool_min_conns: 1,
		query_timeout_ms: 30_000,
	};
	let db = Db::connect(&cfg).await.expect("Failed to connect to Postgres.");

	db.ensure_schema(&vector_cfg()).await.expect("Failed to ensure schema.");

	db
}

fn sample_company(code: &str) -> NewCompany {
	NewCompany {
		company_code: code.to_string(),
		company_name_full: format!("开山股份有限公司{code}"),
		company_name_short: Some("开山股份".to_string()),
		exchange: Some("SZSE".to_string()),
	}
}

fn sample_document(code: &str, hash: &str) -> NewSourceDocument {
	NewSourceDocument {
		company_code: code.to_string(),
		doc_type: "annual_report".to_string(),
		doc_date: time::macros::date!(2024 - 04 - 30),
		report_title: Some("2023年年度报告".to_string()),
		file_path: Some("reports/300257_2023.md".to_string()),
		file_hash: hash.to_string(),
		raw_llm_output: json!({ "extraction_data": { "business_concepts": [] } }),
		extraction_metadata: json!({ "model_version": "test" }),
	}
}

fn sample_concept<'a>(concept_id: Uuid, code: &'a str, name: &'a str, details: &'a serde_json::Value) -> NewConcept<'a> {
	NewConcept {
		concept_id,
		company_code: code,
		concept_name: name,
		concept_category: "core",
		importance_score: 0.95,
		development_stage: Some("成熟期"),
		concept_details: details,
		last_updated_from_doc_id: None,
	}
}

#[tokio::test]
#[ignore = "Requires external Postgres with pgvector. Set ASI_PG_DSN to run."]
async fn schema_bootstraps_and_company_resolution_prefers_code() {
	let Some(base_dsn) = asi_testkit::env_dsn() else {
		eprintln!("Skipping; set ASI_PG_DSN to run this test.");

		return;
	};
	let test_db = TestDatabase::new(&base_dsn).await.expect("Failed to create test database.");
	let db = connect(&test_db).await;

	companies::upsert_company(&db.pool, &sample_company("300257"))
		.await
		.expect("Failed to upsert company.");

	let by_code = companies::get_company(&db.pool, "300257")
		.await
		.expect("Lookup by code failed.")
		.expect("Company must resolve by code.");

	assert_eq!(by_code.company_code, "300257");

	let by_short = companies::get_company(&db.pool, "  开山股份 ")
		.await
		.expect("Lookup by short name failed.")
		.expect("Company must resolve by trimmed short name.");

	assert_eq!(by_short.company_code, "300257");
	assert!(
		companies::get_company(&db.pool, "不存在的公司")
			.await
			.expect("Lookup must not error.")
			.is_none()
	);

	test_db.cleanup().await.expect("Failed to cleanup test database.");
}

#[tokio::test]
#[ignore = "Requires external Postgres with pgvector. Set ASI_PG_DSN to run."]
async fn archiving_the_same_file_hash_is_idempotent() {
	let Some(base_dsn) = asi_testkit::env_dsn() else {
		eprintln!("Skipping; set ASI_PG_DSN to run this test.");

		return;
	};
	let test_db = TestDatabase::new(&base_dsn).await.expect("Failed to create test database.");
	let db = connect(&test_db).await;

	companies::upsert_company(&db.pool, &sample_company("300257"))
		.await
		.expect("Failed to upsert company.");

	let doc = sample_document("300257", "hash-1");
	let mut conn = db.pool.acquire().await.expect("Failed to acquire connection.");
	let (first_id, first_existed) =
		documents::archive_document(&mut *conn, &doc).await.expect("First archive failed.");

	assert!(!first_existed);

	let (second_id, second_existed) =
		documents::archive_document(&mut *conn, &doc).await.expect("Second archive failed.");

	assert!(second_existed);
	assert_eq!(first_id, second_id);

	let stored = documents::get_document(&db.pool, first_id)
		.await
		.expect("Fetch failed.")
		.expect("Document must exist.");

	assert_eq!(stored.file_hash, "hash-1");
	assert_eq!(stored.raw_llm_output, doc.raw_llm_output);

	test_db.cleanup().await.expect("Failed to cleanup test database.");
}

#[tokio::test]
#[ignore = "Requires external Postgres with pgvector. Set ASI_PG_DSN to run."]
async fn active_concept_uniqueness_and_optimistic_locking() {
	let Some(base_dsn) = asi_testkit::env_dsn() else {
		eprintln!("Skipping; set ASI_PG_DSN to run this test.");

		return;
	};
	let test_db = TestDatabase::new(&base_dsn).await.expect("Failed to create test database.");
	let db = connect(&test_db).await;

	companies::upsert_company(&db.pool, &sample_company("300257"))
		.await
		.expect("Failed to upsert company.");

	let details = json!({ "description": "螺杆空气压缩机产品线" });
	let concept_id = Uuid::new_v4();

	concepts::insert_concept(&db.pool, &sample_concept(concept_id, "300257", "螺杆空气压缩机", &details))
		.await
		.expect("First insert failed.");

	let duplicate = concepts::insert_concept(
		&db.pool,
		&sample_concept(Uuid::new_v4(), "300257", "螺杆空气压缩机", &details),
	)
	.await;

	assert!(matches!(duplicate, Err(Error::Conflict(_))), "Expected Conflict: {duplicate:?}");

	let stored = concepts::find_active_concept(&db.pool, "300257", "螺杆空气压缩机")
		.await
		.expect("Lookup failed.")
		.expect("Concept must exist.");

	assert_eq!(stored.version, 1);

	let update = ConceptUpdate {
		concept_category: "core",
		importance_score: 0.92,
		development_stage: Some("成熟期"),
		concept_details: &details,
		last_updated_from_doc_id: None,
		clear_embedding: false,
	};

	concepts::update_concept(&db.pool, concept_id, 1, &update)
		.await
		.expect("Conditional update failed.");

	let stale = concepts::update_concept(&db.pool, concept_id, 1, &update).await;

	assert!(
		matches!(stale, Err(Error::OptimisticLock(_))),
		"Expected OptimisticLock: {stale:?}"
	);

	test_db.cleanup().await.expect("Failed to cleanup test database.");
}

#[tokio::test]
#[ignore = "Requires external Postgres with pgvector. Set ASI_PG_DSN to run."]
async fn embedding_writes_preserve_version_and_feed_similarity_search() {
	let Some(base_dsn) = asi_testkit::env_dsn() else {
		eprintln!("Skipping; set ASI_PG_DSN to run this test.");

		return;
	};
	let test_db = TestDatabase::new(&base_dsn).await.expect("Failed to create test database.");
	let db = connect(&test_db).await;

	companies::upsert_company(&db.pool, &sample_company("300257"))
		.await
		.expect("Failed to upsert company.");
	companies::upsert_company(
		&db.pool,
		&NewCompany {
			company_code: "688448".to_string(),
			company_name_full: "磁谷科技股份有限公司".to_string(),
			company_name_short: Some("磁谷科技".to_string()),
			exchange: Some("SSE".to_string()),
		},
	)
	.await
	.expect("Failed to upsert company.");

	let details = json!({ "description": "压缩机" });
	let source_id = Uuid::new_v4();
	let similar_id = Uuid::new_v4();

	concepts::insert_concept(&db.pool, &sample_concept(source_id, "300257", "螺杆空气压缩机", &details))
		.await
		.expect("Insert failed.");
	concepts::insert_concept(&db.pool, &sample_concept(similar_id, "688448", "磁悬浮鼓风机", &details))
		.await
		.expect("Insert failed.");

	let scheduled = concepts::find_concepts_needing_embeddings(&db.pool, None, None)
		.await
		.expect("Scheduled lookup failed.");

	assert_eq!(scheduled.len(), 2);

	let mut conn = db.pool.acquire().await.expect("Failed to acquire connection.");
	let updated = concepts::batch_update_embeddings(
		&mut *conn,
		&[
			(source_id, asi_storage::vector_to_pg(&[1.0, 0.0, 0.0, 0.0])),
			(similar_id, asi_storage::vector_to_pg(&[0.9, 0.1, 0.0, 0.0])),
		],
	)
	.await
	.expect("Batch embedding update failed.");

	assert_eq!(updated, 2);

	let after = concepts::find_active_concept(&db.pool, "300257", "螺杆空气压缩机")
		.await
		.expect("Lookup failed.")
		.expect("Concept must exist.");

	// Index maintenance never bumps the optimistic-lock version.
	assert_eq!(after.version, 1);

	let query_vec = concepts::concept_embedding_text(&db.pool, source_id)
		.await
		.expect("Embedding text lookup failed.")
		.expect("Embedding must be stored.");
	let hits = concepts::search_similar(&db.pool, &query_vec, 0.5, 10)
		.await
		.expect("Similarity search failed.");

	assert!(hits.iter().any(|hit| hit.concept_id == similar_id));

	for hit in &hits {
		assert!(hit.similarity_score >= 0.5);
	}

	// The pipelined variant returns one result set per query, in order.
	let batched =
		concepts::batch_search_similar(&db.pool, &[query_vec.clone(), query_vec], 0.5, 10)
			.await
			.expect("Batch similarity search failed.");

	assert_eq!(batched.len(), 2);
	assert_eq!(batched[0].len(), batched[1].len());

	test_db.cleanup().await.expect("Failed to cleanup test database.");
}

#[tokio::test]
#[ignore = "Requires external Postgres with pgvector. Set ASI_PG_DSN to run."]
async fn market_snapshots_upsert_and_average_over_prior_days() {
	let Some(base_dsn) = asi_testkit::env_dsn() else {
		eprintln!("Skipping; set ASI_PG_DSN to run this test.");

		return;
	};
	let test_db = TestDatabase::new(&base_dsn).await.expect("Failed to create test database.");
	let db = connect(&test_db).await;

	companies::upsert_company(&db.pool, &sample_company("300257"))
		.await
		.expect("Failed to upsert company.");

	let mut conn = db.pool.acquire().await.expect("Failed to acquire connection.");
	let snapshot = |turnover: f64| NewMarketSnapshot {
		company_code: "300257".to_string(),
		total_market_cap: 5e9,
		circulating_market_cap: 4e9,
		turnover_amount: turnover,
	};

	for (day, turnover) in [(24, 1e8), (25, 2e8), (26, 3e8)] {
		let date = time::Date::from_calendar_date(2024, time::Month::June, day).expect("date");

		market::save_daily_snapshot(&mut *conn, date, &[snapshot(turnover as f64)])
			.await
			.expect("Snapshot save failed.");
	}

	// Re-syncing the latest day overwrites in place.
	let latest = time::Date::from_calendar_date(2024, time::Month::June, 26).expect("date");

	market::save_daily_snapshot(&mut *conn, latest, &[snapshot(3e8)])
		.await
		.expect("Second snapshot save failed.");

	let rows = market::get_current(&db.pool, &["300257".to_string()])
		.await
		.expect("Current lookup failed.");

	assert_eq!(rows.len(), 1);
	assert_eq!(rows[0].today_volume, 3e8);
	// Average over the two strictly prior snapshots.
	assert!((rows[0].avg_5day_volume - 1.5e8).abs() < 1.0);

	// Unknown companies are dropped, absent codes omitted.
	let dropped = market::save_daily_snapshot(
		&mut *conn,
		latest,
		&[NewMarketSnapshot {
			company_code: "999999".to_string(),
			total_market_cap: 1e9,
			circulating_market_cap: 1e9,
			turnover_amount: 1e7,
		}],
	)
	.await
	.expect("Snapshot save failed.");

	assert_eq!(dropped, 0);

	let missing = market::get_current(&db.pool, &["999999".to_string()])
		.await
		.expect("Current lookup failed.");

	assert!(missing.is_empty());

	test_db.cleanup().await.expect("Failed to cleanup test database.");
}

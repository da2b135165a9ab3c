use std::sync::Arc;

use serde_json::Map;
use time::OffsetDateTime;
use uuid::Uuid;

use recall_config::Postgres;
use recall_service::{
	BoxFuture, Collaborators, FeedbackDispatch, Result, RetrieveRequest, TrustNudge, TrustStore,
	VectorBackend, VectorHit,
};
use recall_storage::{db::Db, trust::PgTrustStore};
use recall_testkit::TestDatabase;

struct FixedHits(Vec<VectorHit>);

impl VectorBackend for FixedHits {
	fn search<'a>(&'a self, _: &'a [f32], limit: u32) -> BoxFuture<'a, Result<Vec<VectorHit>>> {
		Box::pin(async move { Ok(self.0.iter().take(limit as usize).cloned().collect()) })
	}

	fn health<'a>(&'a self) -> BoxFuture<'a, bool> {
		Box::pin(async { true })
	}
}

fn fixed_hits() -> FixedHits {
	FixedHits(vec![
		VectorHit {
			id: "m-used".to_string(),
			embedding: vec![1.0, 0.0],
			payload: Map::new(),
			similarity: 0.8,
		},
		VectorHit {
			id: "m-other".to_string(),
			embedding: vec![0.0, 1.0],
			payload: Map::new(),
			similarity: 0.7,
		},
	])
}

async fn bootstrap(dsn: &str) -> (TestDatabase, Db) {
	let test_db = TestDatabase::new(dsn).await.expect("Failed to create test database.");
	let cfg = Postgres { dsn: test_db.dsn().to_string(), pool_max_conns: 4 };
	let db = Db::connect(&cfg).await.expect("Failed to connect to Postgres.");

	db.ensure_schema().await.expect("Failed to ensure schema.");

	(test_db, db)
}

#[tokio::test]
#[ignore = "Requires external Postgres. Set RECALL_PG_DSN to run."]
async fn usage_feedback_nudges_persisted_trust() {
	let Some(dsn) = recall_testkit::env_dsn() else {
		eprintln!("Skipping usage_feedback_nudges_persisted_trust; set RECALL_PG_DSN to run this test.");

		return;
	};
	let (test_db, db) = bootstrap(&dsn).await;
	let trust = Arc::new(PgTrustStore::new(db.pool.clone()));
	let service = super::build_service(
		Collaborators::new(Arc::new(fixed_hits())).with_trust(trust.clone()),
	);
	let first = service.retrieve(RetrieveRequest::new(vec![1.0, 0.0])).await;

	assert!(first.snapshot.backend.trust_available);
	assert_eq!(
		service.report_usage(first.request_id, &["m-used".to_string()]),
		FeedbackDispatch::Sent
	);

	service.shutdown().await;

	let stored = trust.get_trust("m-used").await.expect("Failed to read trust.");
	let untouched = trust.get_trust("m-other").await.expect("Failed to read trust.");

	assert!((stored - 0.02).abs() < 1e-6, "Unexpected trust {stored}.");
	assert_eq!(untouched, 0.0);

	let service = super::build_service(
		Collaborators::new(Arc::new(fixed_hits())).with_trust(trust.clone()),
	);
	let second = service.retrieve(RetrieveRequest::new(vec![1.0, 0.0])).await;
	let used = second
		.items
		.iter()
		.find(|item| item.record.id == "m-used")
		.expect("Used memory must be selected.");

	assert!((used.terms.trust - 0.2 * 0.02).abs() < 1e-6);
	assert!(used.composite > used.similarity);

	service.shutdown().await;
	db.pool.close().await;
	test_db.cleanup().await.expect("Failed to clean up test database.");
}

#[tokio::test]
#[ignore = "Requires external Postgres. Set RECALL_PG_DSN to run."]
async fn replayed_nudge_is_applied_once() {
	let Some(dsn) = recall_testkit::env_dsn() else {
		eprintln!("Skipping replayed_nudge_is_applied_once; set RECALL_PG_DSN to run this test.");

		return;
	};
	let (test_db, db) = bootstrap(&dsn).await;
	let trust = PgTrustStore::new(db.pool.clone());
	let nudge = TrustNudge {
		event_id: Uuid::new_v4(),
		memory_id: "m-1".to_string(),
		request_id: Uuid::new_v4(),
		used: true,
		delta: 0.25,
		at: OffsetDateTime::now_utc(),
	};

	trust.apply_nudge(&nudge).await.expect("Failed to apply nudge.");
	trust.apply_nudge(&nudge).await.expect("Replay must succeed.");

	let values = trust
		.get_trust_many(&["m-1".to_string(), "m-2".to_string()])
		.await
		.expect("Failed to read trust.");

	assert_eq!(values.get("m-1").copied(), Some(0.25));
	assert_eq!(values.get("m-2").copied(), Some(0.0));

	db.pool.close().await;
	test_db.cleanup().await.expect("Failed to clean up test database.");
}

use std::sync::Arc;

use qdrant_client::{
	Payload,
	qdrant::{CreateCollectionBuilder, Distance, PointStruct, UpsertPointsBuilder, VectorParamsBuilder},
};
use serde_json::json;

use recall_config::Qdrant;
use recall_service::{Collaborators, ProfileOverride, RetrieveRequest, StaticBeliefSource};
use recall_storage::qdrant::QdrantStore;
use recall_testkit::TestCollection;

fn point(id: u64, vector: Vec<f32>, payload: serde_json::Value) -> PointStruct {
	PointStruct::new(id, vector, Payload::try_from(payload).expect("Payload must be an object."))
}

#[tokio::test]
#[ignore = "Requires external Qdrant. Set RECALL_QDRANT_URL to run."]
async fn retrieve_ranks_qdrant_hits() {
	let Some(url) = recall_testkit::env_qdrant_url() else {
		eprintln!("Skipping retrieve_ranks_qdrant_hits; set RECALL_QDRANT_URL to run this test.");

		return;
	};
	let collection = TestCollection::new("recall_service_retrieve");
	let cfg = Qdrant {
		url,
		collection: collection.name().to_string(),
		vector_dim: 3,
		vector_name: None,
	};
	let store = QdrantStore::new(&cfg).expect("Failed to build Qdrant client.");

	store
		.client
		.create_collection(
			CreateCollectionBuilder::new(collection.name())
				.vectors_config(VectorParamsBuilder::new(3, Distance::Cosine)),
		)
		.await
		.expect("Failed to create collection.");
	store
		.client
		.upsert_points(
			UpsertPointsBuilder::new(
				collection.name(),
				vec![
					point(1, vec![1.0, 0.0, 0.0], json!({ "memory_id": "tea", "kind": "belief" })),
					point(
						2,
						vec![0.95, 0.05, 0.0],
						json!({ "memory_id": "coffee", "kind": "belief", "conflict_tag": "drinks" }),
					),
					point(3, vec![0.0, 1.0, 0.0], json!({ "memory_id": "walk", "kind": "episodic" })),
				],
			)
			.wait(true),
		)
		.await
		.expect("Failed to upsert points.");

	let service = super::build_service(
		Collaborators::new(Arc::new(store)).with_beliefs(Arc::new(StaticBeliefSource {
			tags: ["drinks".to_string()].into_iter().collect(),
		})),
	);
	let request = RetrieveRequest::new(vec![1.0, 0.0, 0.0]).with_profile(ProfileOverride::inline(
		recall_config::ProfileConfig { mmr_lambda: Some(1.0), top_n: Some(2), ..Default::default() },
	));
	let response = service.retrieve(request).await;
	let snapshot = &response.snapshot;

	assert!(snapshot.backend.vector_available);
	assert_eq!(snapshot.counts.raw, 3);
	assert_eq!(snapshot.selected_ids, vec!["tea", "coffee"]);

	let coffee = &response.items[1];

	assert!(coffee.terms.conflict_penalty > 0.0);
	assert!(coffee.composite < coffee.similarity);

	let mismatched = service.retrieve(RetrieveRequest::new(vec![1.0, 0.0])).await;

	assert!(mismatched.items.is_empty());
	assert!(mismatched.snapshot.backend.degraded_reason.is_some());
	assert!(mismatched.snapshot.backend.vector_available);

	service.shutdown().await;
	collection.cleanup().await.expect("Failed to delete test collection.");
}

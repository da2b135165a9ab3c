//! Collaborator implementations over the storage and provider crates.

use std::collections::HashMap;

use time::OffsetDateTime;

use recall_providers::feedback::FeedbackClient;
use recall_storage::{
	models::VectorPoint,
	qdrant::QdrantStore,
	trust::{PgTrustStore, TrustAdjustment},
};

use crate::{
	BoxFuture, DeliveryError, FeedbackBatch, FeedbackSink, Result, TrustNudge, TrustStore,
	VectorBackend, VectorHit, trust::NEUTRAL_TRUST,
};

impl VectorBackend for QdrantStore {
	fn search<'a>(&'a self, query: &'a [f32], limit: u32) -> BoxFuture<'a, Result<Vec<VectorHit>>> {
		Box::pin(async move {
			let points = QdrantStore::search(self, query, limit).await?;

			Ok(points.into_iter().map(to_hit).collect())
		})
	}

	fn health<'a>(&'a self) -> BoxFuture<'a, bool> {
		Box::pin(async move {
			match QdrantStore::health(self).await {
				Ok(()) => true,
				Err(err) => {
					tracing::warn!(error = %err, "Qdrant health check failed.");

					false
				},
			}
		})
	}
}

impl TrustStore for PgTrustStore {
	fn get_trust<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<f32>> {
		Box::pin(async move {
			let row = self.get(id).await?;

			Ok(row.map(|row| row.trust).unwrap_or(NEUTRAL_TRUST))
		})
	}

	fn adjust_trust<'a>(&'a self, id: &'a str, delta: f32) -> BoxFuture<'a, Result<()>> {
		Box::pin(async move {
			self.adjust(id, delta, OffsetDateTime::now_utc()).await?;

			Ok(())
		})
	}

	fn get_trust_many<'a>(&'a self, ids: &'a [String]) -> BoxFuture<'a, Result<HashMap<String, f32>>> {
		Box::pin(async move {
			let mut values = self.get_many(ids).await?;

			for id in ids {
				values.entry(id.clone()).or_insert(NEUTRAL_TRUST);
			}

			Ok(values)
		})
	}

	fn apply_nudge<'a>(&'a self, nudge: &'a TrustNudge) -> BoxFuture<'a, Result<()>> {
		Box::pin(async move {
			let adjustment = TrustAdjustment {
				event_id: nudge.event_id,
				memory_id: nudge.memory_id.clone(),
				request_id: nudge.request_id,
				used: nudge.used,
				delta: nudge.delta,
				at: nudge.at,
			};

			self.apply_adjustment(&adjustment).await?;

			Ok(())
		})
	}
}

impl FeedbackSink for FeedbackClient {
	fn deliver<'a>(
		&'a self,
		batch: &'a FeedbackBatch,
	) -> BoxFuture<'a, Result<(), DeliveryError>> {
		Box::pin(async move {
			let body = serde_json::to_value(batch)
				.map_err(|err| DeliveryError::permanent(format!("Failed to encode batch: {err}")))?;

			FeedbackClient::deliver(self, &body).await.map_err(|err| DeliveryError {
				message: err.to_string(),
				retryable: err.is_retryable(),
			})
		})
	}
}

fn to_hit(point: VectorPoint) -> VectorHit {
	VectorHit { id: point.id, embedding: point.vector, payload: point.payload, similarity: point.score }
}

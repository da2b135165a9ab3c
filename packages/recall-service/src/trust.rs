use std::collections::HashMap;

use dashmap::DashMap;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{BoxFuture, Result, TrustStore};

pub const NEUTRAL_TRUST: f32 = 0.0;

/// The trust change derived from one feedback event.
#[derive(Clone, Debug, PartialEq)]
pub struct TrustNudge {
	pub event_id: Uuid,
	pub memory_id: String,
	pub request_id: Uuid,
	pub used: bool,
	pub delta: f32,
	pub at: OffsetDateTime,
}

/// Process-local trust store. Each adjustment holds only the shard lock of its own key.
#[derive(Debug, Default)]
pub struct InMemoryTrustStore {
	values: DashMap<String, f32>,
}
impl InMemoryTrustStore {
	pub fn with_values(values: impl IntoIterator<Item = (String, f32)>) -> Self {
		let store = Self::default();

		for (id, value) in values {
			store.values.insert(id, recall_storage::trust::clamp_trust(value));
		}

		store
	}

	pub fn get(&self, id: &str) -> f32 {
		self.values.get(id).map(|value| *value).unwrap_or(NEUTRAL_TRUST)
	}

	/// Adds `delta` and returns the clamped result.
	pub fn adjust(&self, id: &str, delta: f32) -> f32 {
		let mut entry = self.values.entry(id.to_string()).or_insert(NEUTRAL_TRUST);
		let next = recall_storage::trust::clamp_trust(*entry + delta);

		*entry = next;

		next
	}
}

impl TrustStore for InMemoryTrustStore {
	fn get_trust<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<f32>> {
		Box::pin(async move { Ok(self.get(id)) })
	}

	fn adjust_trust<'a>(&'a self, id: &'a str, delta: f32) -> BoxFuture<'a, Result<()>> {
		Box::pin(async move {
			self.adjust(id, delta);

			Ok(())
		})
	}

	fn get_trust_many<'a>(&'a self, ids: &'a [String]) -> BoxFuture<'a, Result<HashMap<String, f32>>> {
		Box::pin(async move { Ok(ids.iter().map(|id| (id.clone(), self.get(id))).collect()) })
	}
}

use serde_json::{Map, Value};
use time::OffsetDateTime;

/// One nearest-neighbour hit as returned by the vector store.
#[derive(Clone, Debug)]
pub struct VectorPoint {
	pub id: String,
	pub vector: Vec<f32>,
	pub payload: Map<String, Value>,
	pub score: f32,
}

#[derive(Clone, Debug, sqlx::FromRow)]
pub struct TrustRow {
	pub memory_id: String,
	pub trust: f32,
	pub adjustments: i64,
	pub updated_at: OffsetDateTime,
}

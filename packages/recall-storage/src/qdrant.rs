use std::collections::HashMap;

use qdrant_client::qdrant::{
	PointId, Query, QueryPointsBuilder, ScoredPoint, Value, VectorOutput, point_id::PointIdOptions,
	value::Kind, vectors_output::VectorsOptions,
};
use serde_json::{Map, Number};

use crate::{Result, models::VectorPoint};

/// Payload key that overrides the point id as the memory identifier.
pub const MEMORY_ID_KEY: &str = "memory_id";

pub struct QdrantStore {
	pub client: qdrant_client::Qdrant,
	pub collection: String,
	pub vector_dim: u32,
	pub vector_name: Option<String>,
}
impl QdrantStore {
	pub fn new(cfg: &recall_config::Qdrant) -> Result<Self> {
		let client = qdrant_client::Qdrant::from_url(&cfg.url).build()?;

		Ok(Self {
			client,
			collection: cfg.collection.clone(),
			vector_dim: cfg.vector_dim,
			vector_name: cfg.vector_name.clone(),
		})
	}

	/// Nearest-neighbour search with payloads and vectors attached, best match first.
	pub async fn search(&self, vector: &[f32], limit: u32) -> Result<Vec<VectorPoint>> {
		if vector.len() != self.vector_dim as usize {
			return Err(crate::Error::InvalidArgument(format!(
				"Query vector has {} dimensions; collection {:?} expects {}.",
				vector.len(),
				self.collection,
				self.vector_dim
			)));
		}
		if limit == 0 {
			return Ok(Vec::new());
		}

		let mut search = QueryPointsBuilder::new(self.collection.clone())
			.query(Query::new_nearest(vector.to_vec()))
			.limit(limit as u64)
			.with_payload(true)
			.with_vectors(true);

		if let Some(name) = self.vector_name.as_deref() {
			search = search.using(name);
		}

		let response = self.client.query(search).await?;
		let points = response
			.result
			.into_iter()
			.filter_map(|point| to_vector_point(point, self.vector_name.as_deref()))
			.collect();

		Ok(points)
	}

	pub async fn health(&self) -> Result<()> {
		self.client.health_check().await?;

		Ok(())
	}
}

fn to_vector_point(point: ScoredPoint, vector_name: Option<&str>) -> Option<VectorPoint> {
	let vector = point.vectors.and_then(|vectors| vectors.vectors_options).and_then(|options| {
		match options {
			VectorsOptions::Vector(output) => Some(dense_values(&output)),
			VectorsOptions::Vectors(named) => {
				let output = match vector_name {
					Some(name) => named.vectors.get(name),
					None => named.vectors.values().next(),
				}?;

				Some(dense_values(output))
			},
		}
	});
	let payload = payload_to_json(point.payload);
	let id = payload
		.get(MEMORY_ID_KEY)
		.and_then(serde_json::Value::as_str)
		.map(str::to_string)
		.or_else(|| point_id_to_string(point.id.as_ref()))?;

	Some(VectorPoint { id, vector: vector.unwrap_or_default(), payload, score: point.score })
}

#[allow(deprecated)]
fn dense_values(output: &VectorOutput) -> Vec<f32> {
	output.data.clone()
}

pub fn point_id_to_string(point_id: Option<&PointId>) -> Option<String> {
	match point_id?.point_id_options.as_ref()? {
		PointIdOptions::Uuid(id) => Some(id.clone()),
		PointIdOptions::Num(id) => Some(id.to_string()),
	}
}

pub fn payload_to_json(payload: HashMap<String, Value>) -> Map<String, serde_json::Value> {
	payload.into_iter().map(|(key, value)| (key, value_to_json(value))).collect()
}

fn value_to_json(value: Value) -> serde_json::Value {
	match value.kind {
		None | Some(Kind::NullValue(_)) => serde_json::Value::Null,
		Some(Kind::BoolValue(value)) => serde_json::Value::Bool(value),
		Some(Kind::IntegerValue(value)) => serde_json::Value::Number(value.into()),
		Some(Kind::DoubleValue(value)) =>
			Number::from_f64(value).map(serde_json::Value::Number).unwrap_or(serde_json::Value::Null),
		Some(Kind::StringValue(value)) => serde_json::Value::String(value),
		Some(Kind::ListValue(list)) =>
			serde_json::Value::Array(list.values.into_iter().map(value_to_json).collect()),
		Some(Kind::StructValue(object)) =>
			serde_json::Value::Object(payload_to_json(object.fields)),
	}
}

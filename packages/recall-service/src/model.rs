use serde::Serialize;
use serde_json::{Map, Value};
use time::{OffsetDateTime, format_description::well_known::Rfc3339};

/// One nearest-neighbour hit handed over by a [`crate::VectorBackend`].
#[derive(Clone, Debug)]
pub struct VectorHit {
	pub id: String,
	pub embedding: Vec<f32>,
	pub payload: Map<String, Value>,
	pub similarity: f32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
	Episodic,
	Belief,
	Other,
}
impl RecordKind {
	pub fn parse(raw: &str) -> Self {
		match raw.trim().to_ascii_lowercase().as_str() {
			"episodic" | "episode" | "memory" => Self::Episodic,
			"belief" => Self::Belief,
			_ => Self::Other,
		}
	}
}

#[derive(Clone, Debug, Serialize)]
pub struct MemoryRecord {
	pub id: String,
	#[serde(skip)]
	pub embedding: Vec<f32>,
	pub text: String,
	pub kind: RecordKind,
	#[serde(serialize_with = "crate::rfc3339::serialize_option")]
	pub timestamp: Option<OffsetDateTime>,
	/// Stored trust, filled in from the trust store before scoring. `None` means unknown.
	pub trust: Option<f32>,
	pub conflict_tag: Option<String>,
	/// Quality in 0.0-1.0.
	pub quality: Option<f32>,
	pub causal_links: u32,
}
impl MemoryRecord {
	/// Builds a record from a hit payload. Malformed optional fields read as absent.
	pub fn from_hit(hit: VectorHit) -> Self {
		let payload = &hit.payload;
		let text = payload.get("text").and_then(Value::as_str).unwrap_or_default().to_string();
		let kind = payload.get("kind").and_then(Value::as_str).map(RecordKind::parse);
		let timestamp = payload
			.get("timestamp")
			.and_then(Value::as_str)
			.and_then(|raw| OffsetDateTime::parse(raw, &Rfc3339).ok());
		let conflict_tag = payload
			.get("conflict_tag")
			.and_then(Value::as_str)
			.map(str::trim)
			.filter(|tag| !tag.is_empty())
			.map(str::to_string);
		let quality = payload
			.get("quality")
			.and_then(Value::as_f64)
			.map(|value| value as f32)
			.filter(|value| value.is_finite())
			.map(|value| value.clamp(0.0, 1.0));
		let causal_links = match payload.get("causal_links") {
			Some(Value::Array(links)) => u32::try_from(links.len()).unwrap_or(u32::MAX),
			Some(value) =>
				value.as_u64().map(|count| u32::try_from(count).unwrap_or(u32::MAX)).unwrap_or(0),
			None => 0,
		};

		Self {
			id: hit.id,
			embedding: hit.embedding,
			text,
			kind: kind.unwrap_or(RecordKind::Other),
			timestamp,
			trust: None,
			conflict_tag,
			quality,
			causal_links,
		}
	}
}

/// Individual multiplier terms. Every term except `similarity` is centered on zero.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct ScoreTerms {
	pub similarity: f32,
	pub recency: f32,
	pub trust: f32,
	pub quality: f32,
	pub conflict_penalty: f32,
}
impl ScoreTerms {
	pub const NAMES: [&'static str; 5] =
		["similarity", "recency", "trust", "quality", "conflict_penalty"];

	pub fn entries(&self) -> [(&'static str, f32); 5] {
		[
			(Self::NAMES[0], self.similarity),
			(Self::NAMES[1], self.recency),
			(Self::NAMES[2], self.trust),
			(Self::NAMES[3], self.quality),
			(Self::NAMES[4], self.conflict_penalty),
		]
	}

	pub fn composite(&self) -> f32 {
		self.similarity
			* (1.0 + self.recency)
			* (1.0 + self.trust)
			* (1.0 + self.quality)
			* (1.0 - self.conflict_penalty)
	}
}

#[derive(Clone, Debug, Serialize)]
pub struct ScoredCandidate {
	pub record: MemoryRecord,
	/// 1-based position in the fetch result.
	pub fetch_rank: u32,
	pub similarity: f32,
	pub terms: ScoreTerms,
	pub composite: f32,
}

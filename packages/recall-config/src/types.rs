use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Deserialize)]
pub struct Config {
	pub service: Service,
	pub storage: Storage,
	#[serde(default)]
	pub retrieval: Retrieval,
	#[serde(default)]
	pub features: Features,
	#[serde(default)]
	pub beliefs: Beliefs,
	#[serde(default)]
	pub scoring: Scoring,
	/// Named scoring profiles. Every field is optional and layers over the built-in defaults.
	#[serde(default)]
	pub profiles: BTreeMap<String, ProfileConfig>,
	#[serde(default)]
	pub feedback: Feedback,
	#[serde(default)]
	pub debug: DebugRetention,
}

#[derive(Debug, Deserialize)]
pub struct Service {
	pub log_level: String,
}

#[derive(Debug, Deserialize)]
pub struct Storage {
	pub qdrant: Qdrant,
	pub postgres: Option<Postgres>,
}

#[derive(Debug, Deserialize)]
pub struct Qdrant {
	pub url: String,
	pub collection: String,
	pub vector_dim: u32,
	/// Optional. Name of the dense vector when the collection uses named vectors.
	pub vector_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Postgres {
	pub dsn: String,
	pub pool_max_conns: u32,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Retrieval {
	pub fetch_timeout_ms: u64,
	pub health_timeout_ms: u64,
}
impl Default for Retrieval {
	fn default() -> Self {
		Self { fetch_timeout_ms: 1_500, health_timeout_ms: 500 }
	}
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct Features {
	pub belief_engine: bool,
	pub decisive_filter: bool,
	pub feedback: bool,
	pub trust_nudge: bool,
}
impl Default for Features {
	fn default() -> Self {
		Self { belief_engine: true, decisive_filter: false, feedback: true, trust_nudge: true }
	}
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Beliefs {
	/// Optional. JSON file listing the active beliefs. Absent means no active beliefs.
	pub path: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Scoring {
	pub default_profile: Option<String>,
	pub env_var: String,
}
impl Default for Scoring {
	fn default() -> Self {
		Self { default_profile: None, env_var: "RECALL_SCORING_PROFILE".to_string() }
	}
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ProfileConfig {
	#[serde(skip_serializing_if = "Option::is_none")]
	pub version: Option<u32>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub similarity_weight: Option<f32>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub recency_weight: Option<f32>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub recency_half_life_days: Option<f32>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub trust_weight: Option<f32>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub quality_weight: Option<f32>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub causal_weight: Option<f32>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub causal_half_saturation: Option<f32>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub conflict_penalty: Option<f32>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub mmr_lambda: Option<f32>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub top_n: Option<u32>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub candidate_k: Option<u32>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub decisive: Option<DecisiveConfig>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct DecisiveConfig {
	/// One of "relative" or "top_k".
	#[serde(skip_serializing_if = "Option::is_none")]
	pub mode: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub min_relative_score: Option<f32>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub top_k: Option<u32>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub min_keep: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Feedback {
	pub queue_capacity: u32,
	pub workers: u32,
	pub max_attempts: u32,
	pub base_delay_ms: u64,
	pub max_delay_ms: u64,
	pub jitter_ms: u64,
	/// Upper bound for one dispatch, retries included.
	pub deadline_ms: u64,
	pub used_delta: f32,
	pub surfaced_delta: f32,
	pub http: Option<FeedbackHttp>,
}
impl Default for Feedback {
	fn default() -> Self {
		Self {
			queue_capacity: 1_024,
			workers: 4,
			max_attempts: 4,
			base_delay_ms: 200,
			max_delay_ms: 5_000,
			jitter_ms: 100,
			deadline_ms: 30_000,
			used_delta: 0.02,
			surfaced_delta: 0.0,
			http: None,
		}
	}
}

#[derive(Debug, Deserialize)]
pub struct FeedbackHttp {
	pub url: String,
	pub api_key: Option<String>,
	pub timeout_ms: u64,
	#[serde(default)]
	pub default_headers: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DebugRetention {
	pub retain_snapshots: u32,
}
impl Default for DebugRetention {
	fn default() -> Self {
		Self { retain_snapshots: 64 }
	}
}

//! Scoring profiles and the process-wide profile registry.
//!
//! The registry is a copy-on-refresh cache: readers load the current [`ProfileSet`] without
//! locking, and [`ProfileRegistry::reload`] swaps in a rebuilt set with a higher version.

use std::{
	collections::BTreeMap,
	sync::{
		Arc,
		atomic::{AtomicU64, Ordering},
	},
};

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};
use recall_config::{Config, DecisiveConfig, ProfileConfig, Scoring};

pub const BUILTIN_PROFILE: &str = "default";

/// Where the profile used for a request came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfileSource {
	Request,
	Env,
	Default,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisiveMode {
	Relative,
	TopK,
}
impl DecisiveMode {
	pub fn parse(raw: &str) -> Option<Self> {
		match raw {
			"relative" => Some(Self::Relative),
			"top_k" => Some(Self::TopK),
			_ => None,
		}
	}
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct DecisivePolicy {
	pub mode: DecisiveMode,
	/// Fraction of the top composite a candidate must reach in relative mode.
	pub min_relative_score: f32,
	pub top_k: u32,
	/// Below this many survivors the filter is bypassed.
	pub min_keep: u32,
}
impl Default for DecisivePolicy {
	fn default() -> Self {
		Self { mode: DecisiveMode::Relative, min_relative_score: 0.85, top_k: 5, min_keep: 3 }
	}
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ScoringProfile {
	pub name: String,
	pub version: u32,
	pub similarity_weight: f32,
	pub recency_weight: f32,
	pub recency_half_life_days: f32,
	pub trust_weight: f32,
	pub quality_weight: f32,
	pub causal_weight: f32,
	pub causal_half_saturation: f32,
	pub conflict_penalty: f32,
	pub mmr_lambda: f32,
	pub top_n: u32,
	pub candidate_k: u32,
	pub decisive: DecisivePolicy,
}
impl Default for ScoringProfile {
	fn default() -> Self {
		Self {
			name: BUILTIN_PROFILE.to_string(),
			version: 1,
			similarity_weight: 1.0,
			recency_weight: 0.1,
			recency_half_life_days: 30.0,
			trust_weight: 0.2,
			quality_weight: 0.1,
			causal_weight: 0.05,
			causal_half_saturation: 4.0,
			conflict_penalty: 0.05,
			mmr_lambda: 0.4,
			top_n: 8,
			candidate_k: 32,
			decisive: DecisivePolicy::default(),
		}
	}
}
impl ScoringProfile {
	/// Returns a copy with every field the layer sets replaced. Range checks are the caller's
	/// job; see [`recall_config::validate_profile_fields`].
	pub fn layered(&self, name: &str, layer: &ProfileConfig) -> Self {
		let mut out = self.clone();

		out.name = name.to_string();

		if let Some(value) = layer.version {
			out.version = value;
		}
		if let Some(value) = layer.similarity_weight {
			out.similarity_weight = value;
		}
		if let Some(value) = layer.recency_weight {
			out.recency_weight = value;
		}
		if let Some(value) = layer.recency_half_life_days {
			out.recency_half_life_days = value;
		}
		if let Some(value) = layer.trust_weight {
			out.trust_weight = value;
		}
		if let Some(value) = layer.quality_weight {
			out.quality_weight = value;
		}
		if let Some(value) = layer.causal_weight {
			out.causal_weight = value;
		}
		if let Some(value) = layer.causal_half_saturation {
			out.causal_half_saturation = value;
		}
		if let Some(value) = layer.conflict_penalty {
			out.conflict_penalty = value;
		}
		if let Some(value) = layer.mmr_lambda {
			out.mmr_lambda = value;
		}
		if let Some(value) = layer.top_n {
			out.top_n = value;
		}
		if let Some(value) = layer.candidate_k {
			out.candidate_k = value;
		}
		if let Some(decisive) = layer.decisive.as_ref() {
			out.decisive = layer_decisive(out.decisive, decisive);
		}

		out
	}

	/// Cross-field rules that only hold once all layers are applied.
	pub fn validate(&self) -> Result<()> {
		if self.candidate_k < self.top_n {
			return Err(Error::MalformedConfig {
				message: format!(
					"Profile {:?} candidate_k ({}) must be greater than or equal to top_n ({}).",
					self.name, self.candidate_k, self.top_n
				),
			});
		}

		Ok(())
	}

	/// blake3 hash of the canonical JSON form.
	pub fn fingerprint(&self) -> Result<String> {
		let raw = serde_json::to_vec(self).map_err(|err| Error::MalformedConfig {
			message: format!("Failed to encode scoring profile: {err}"),
		})?;

		Ok(blake3::hash(&raw).to_hex().to_string())
	}
}

/// Per-request profile selection. `name` picks a configured profile, `values` layers inline
/// fields on top of it (or on the process default when `name` is absent).
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ProfileOverride {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub name: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub values: Option<ProfileConfig>,
}
impl ProfileOverride {
	pub fn named(name: impl Into<String>) -> Self {
		Self { name: Some(name.into()), values: None }
	}

	pub fn inline(values: ProfileConfig) -> Self {
		Self { name: None, values: Some(values) }
	}

	fn is_empty(&self) -> bool {
		self.name.is_none() && self.values.is_none()
	}
}

#[derive(Clone, Debug)]
pub struct ResolvedProfile {
	pub profile: Arc<ScoringProfile>,
	pub source: ProfileSource,
	pub fingerprint: String,
	/// Why a request override was rejected, when it was.
	pub override_error: Option<String>,
	pub registry_version: u64,
}

struct ProfileEntry {
	profile: Arc<ScoringProfile>,
	fingerprint: String,
}
impl ProfileEntry {
	fn new(profile: ScoringProfile) -> Result<Self> {
		profile.validate()?;

		let fingerprint = profile.fingerprint()?;

		Ok(Self { profile: Arc::new(profile), fingerprint })
	}
}

struct ProfileSet {
	version: u64,
	default: Arc<ProfileEntry>,
	default_source: ProfileSource,
	named: BTreeMap<String, Arc<ProfileEntry>>,
}

pub struct ProfileRegistry {
	configured: BTreeMap<String, ProfileConfig>,
	config_default: Option<String>,
	env_var: String,
	versions: AtomicU64,
	current: ArcSwap<ProfileSet>,
}
impl ProfileRegistry {
	pub fn new(
		configured: BTreeMap<String, ProfileConfig>,
		scoring: &Scoring,
		env_value: Option<String>,
	) -> Self {
		let set = build_set(&configured, scoring.default_profile.as_deref(), env_value, 1);

		Self {
			configured,
			config_default: scoring.default_profile.clone(),
			env_var: scoring.env_var.clone(),
			versions: AtomicU64::new(1),
			current: ArcSwap::from_pointee(set),
		}
	}

	pub fn from_config(cfg: &Config) -> Self {
		Self::new(cfg.profiles.clone(), &cfg.scoring, read_env(&cfg.scoring.env_var))
	}

	pub fn version(&self) -> u64 {
		self.current.load().version
	}

	pub fn default_profile(&self) -> (Arc<ScoringProfile>, ProfileSource) {
		let set = self.current.load();

		(set.default.profile.clone(), set.default_source)
	}

	/// Rebuilds the registry from the configured profiles and the given environment value.
	pub fn reload(&self, env_value: Option<String>) -> u64 {
		let version = self.versions.fetch_add(1, Ordering::SeqCst) + 1;
		let set = build_set(&self.configured, self.config_default.as_deref(), env_value, version);

		tracing::info!(
			version,
			default_profile = set.default.profile.name.as_str(),
			profiles = set.named.len(),
			"Scoring profiles reloaded."
		);

		self.current.store(Arc::new(set));

		version
	}

	/// Reloads using the current value of the configured environment variable.
	pub fn reload_from_env(&self) -> u64 {
		self.reload(read_env(&self.env_var))
	}

	pub fn resolve(&self, request: Option<&ProfileOverride>) -> ResolvedProfile {
		let set = self.current.load();
		let fallback = |override_error: Option<String>| ResolvedProfile {
			profile: set.default.profile.clone(),
			source: set.default_source,
			fingerprint: set.default.fingerprint.clone(),
			override_error,
			registry_version: set.version,
		};
		let Some(request) = request.filter(|request| !request.is_empty()) else {
			return fallback(None);
		};

		match resolve_override(&set, request) {
			Ok(entry) => ResolvedProfile {
				profile: entry.profile.clone(),
				source: ProfileSource::Request,
				fingerprint: entry.fingerprint.clone(),
				override_error: None,
				registry_version: set.version,
			},
			Err(err) => fallback(Some(err.to_string())),
		}
	}
}

fn resolve_override(set: &ProfileSet, request: &ProfileOverride) -> Result<Arc<ProfileEntry>> {
	let base = match request.name.as_deref().map(str::trim) {
		Some(name) => set.named.get(name).cloned().ok_or_else(|| Error::MalformedConfig {
			message: format!("Unknown scoring profile {name:?}."),
		})?,
		None => set.default.clone(),
	};
	let Some(values) = request.values.as_ref() else { return Ok(base) };

	recall_config::validate_profile_fields("profile.values", values)
		.map_err(|message| Error::MalformedConfig { message })?;

	let layered = base.profile.layered(&base.profile.name, values);

	Ok(Arc::new(ProfileEntry::new(layered)?))
}

fn build_set(
	configured: &BTreeMap<String, ProfileConfig>,
	config_default: Option<&str>,
	env_value: Option<String>,
	version: u64,
) -> ProfileSet {
	let builtin = ScoringProfile::default();
	let mut named = BTreeMap::new();

	for (name, layer) in configured {
		if let Err(message) = recall_config::validate_profile_fields(&format!("profiles.{name}"), layer)
		{
			tracing::warn!(profile = name.as_str(), error = %message, "Skipping invalid scoring profile.");

			continue;
		}

		match ProfileEntry::new(builtin.layered(name, layer)) {
			Ok(entry) => {
				named.insert(name.clone(), Arc::new(entry));
			},
			Err(err) => {
				tracing::warn!(profile = name.as_str(), error = %err, "Skipping invalid scoring profile.");
			},
		}
	}

	let env_name = env_value.map(|value| value.trim().to_string()).filter(|value| !value.is_empty());
	let env_default = match env_name.as_deref() {
		Some(name) => {
			let entry = named.get(name).cloned();

			if entry.is_none() {
				tracing::warn!(
					profile = name,
					"Environment names an unknown scoring profile; ignoring it."
				);
			}

			entry
		},
		None => None,
	};

	let selected =
		env_default.or_else(|| config_default.and_then(|name| named.get(name).cloned()));

	if let Some(entry) = selected {
		return ProfileSet { version, default: entry, default_source: ProfileSource::Env, named };
	}

	let default = match ProfileEntry::new(builtin.clone()) {
		Ok(entry) => entry,
		Err(err) => {
			tracing::warn!(error = %err, "Built-in profile fingerprint failed.");

			ProfileEntry { profile: Arc::new(builtin), fingerprint: String::new() }
		},
	};

	ProfileSet { version, default: Arc::new(default), default_source: ProfileSource::Default, named }
}

fn layer_decisive(mut policy: DecisivePolicy, layer: &DecisiveConfig) -> DecisivePolicy {
	if let Some(mode) = layer.mode.as_deref().and_then(DecisiveMode::parse) {
		policy.mode = mode;
	}
	if let Some(value) = layer.min_relative_score {
		policy.min_relative_score = value;
	}
	if let Some(value) = layer.top_k {
		policy.top_k = value;
	}
	if let Some(value) = layer.min_keep {
		policy.min_keep = value;
	}

	policy
}

fn read_env(name: &str) -> Option<String> {
	std::env::var(name).ok()
}

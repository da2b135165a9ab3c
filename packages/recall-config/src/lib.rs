mod error;
mod types;

pub use error::{Error, Result};
pub use types::{
	Beliefs, Config, DebugRetention, DecisiveConfig, Features, Feedback, FeedbackHttp, Postgres,
	ProfileConfig, Qdrant, Retrieval, Scoring, Service, Storage,
};

use std::{fs, path::Path};

pub const DECISIVE_MODES: [&str; 2] = ["relative", "top_k"];

pub fn load(path: &Path) -> Result<Config> {
	let raw = fs::read_to_string(path)
		.map_err(|err| Error::ReadConfig { path: path.to_path_buf(), source: err })?;
	let mut cfg: Config = toml::from_str(&raw)
		.map_err(|err| Error::ParseConfig { path: path.to_path_buf(), source: err })?;

	normalize(&mut cfg);
	validate(&cfg)?;

	Ok(cfg)
}

pub fn validate(cfg: &Config) -> Result<()> {
	if cfg.storage.qdrant.collection.trim().is_empty() {
		return Err(Error::Validation {
			message: "storage.qdrant.collection must be non-empty.".to_string(),
		});
	}
	if cfg.storage.qdrant.vector_dim == 0 {
		return Err(Error::Validation {
			message: "storage.qdrant.vector_dim must be greater than zero.".to_string(),
		});
	}
	if let Some(postgres) = cfg.storage.postgres.as_ref()
		&& postgres.pool_max_conns == 0
	{
		return Err(Error::Validation {
			message: "storage.postgres.pool_max_conns must be greater than zero.".to_string(),
		});
	}
	if cfg.retrieval.fetch_timeout_ms == 0 {
		return Err(Error::Validation {
			message: "retrieval.fetch_timeout_ms must be greater than zero.".to_string(),
		});
	}
	if cfg.retrieval.health_timeout_ms == 0 {
		return Err(Error::Validation {
			message: "retrieval.health_timeout_ms must be greater than zero.".to_string(),
		});
	}
	if cfg.scoring.env_var.trim().is_empty() {
		return Err(Error::Validation {
			message: "scoring.env_var must be non-empty.".to_string(),
		});
	}
	if let Some(name) = cfg.scoring.default_profile.as_deref()
		&& !cfg.profiles.contains_key(name)
	{
		return Err(Error::Validation {
			message: format!("scoring.default_profile names unknown profile {name:?}."),
		});
	}

	for (name, profile) in &cfg.profiles {
		if name.trim().is_empty() {
			return Err(Error::Validation {
				message: "profiles keys must be non-empty.".to_string(),
			});
		}

		validate_profile_fields(&format!("profiles.{name}"), profile)
			.map_err(|message| Error::Validation { message })?;
	}

	validate_feedback(&cfg.feedback)?;

	if cfg.debug.retain_snapshots == 0 {
		return Err(Error::Validation {
			message: "debug.retain_snapshots must be greater than zero.".to_string(),
		});
	}

	Ok(())
}

/// Range checks for the fields a profile layer sets. Cross-field rules are checked on the
/// resolved profile by the service.
pub fn validate_profile_fields(label: &str, profile: &ProfileConfig) -> Result<(), String> {
	for (field, value) in [
		("similarity_weight", profile.similarity_weight),
		("recency_weight", profile.recency_weight),
		("trust_weight", profile.trust_weight),
		("quality_weight", profile.quality_weight),
		("causal_weight", profile.causal_weight),
	] {
		let Some(value) = value else { continue };

		if !value.is_finite() {
			return Err(format!("{label}.{field} must be a finite number."));
		}
		if value < 0.0 {
			return Err(format!("{label}.{field} must be zero or greater."));
		}
	}
	for (field, value) in [
		("recency_half_life_days", profile.recency_half_life_days),
		("causal_half_saturation", profile.causal_half_saturation),
	] {
		let Some(value) = value else { continue };

		if !value.is_finite() || value <= 0.0 {
			return Err(format!("{label}.{field} must be a finite number greater than zero."));
		}
	}
	for (field, value) in
		[("conflict_penalty", profile.conflict_penalty), ("mmr_lambda", profile.mmr_lambda)]
	{
		let Some(value) = value else { continue };

		if !value.is_finite() {
			return Err(format!("{label}.{field} must be a finite number."));
		}
		if !(0.0..=1.0).contains(&value) {
			return Err(format!("{label}.{field} must be in the range 0.0-1.0."));
		}
	}

	if profile.top_n == Some(0) {
		return Err(format!("{label}.top_n must be greater than zero."));
	}
	if profile.candidate_k == Some(0) {
		return Err(format!("{label}.candidate_k must be greater than zero."));
	}
	if let (Some(top_n), Some(candidate_k)) = (profile.top_n, profile.candidate_k)
		&& candidate_k < top_n
	{
		return Err(format!("{label}.candidate_k must be greater than or equal to top_n."));
	}

	let Some(decisive) = profile.decisive.as_ref() else { return Ok(()) };

	if let Some(mode) = decisive.mode.as_deref()
		&& !DECISIVE_MODES.contains(&mode)
	{
		return Err(format!("{label}.decisive.mode must be one of relative or top_k."));
	}
	if let Some(score) = decisive.min_relative_score {
		if !score.is_finite() {
			return Err(format!("{label}.decisive.min_relative_score must be a finite number."));
		}
		if !(0.0..=1.0).contains(&score) {
			return Err(format!("{label}.decisive.min_relative_score must be in the range 0.0-1.0."));
		}
	}
	if decisive.top_k == Some(0) {
		return Err(format!("{label}.decisive.top_k must be greater than zero."));
	}

	Ok(())
}

fn validate_feedback(feedback: &Feedback) -> Result<()> {
	if feedback.queue_capacity == 0 {
		return Err(Error::Validation {
			message: "feedback.queue_capacity must be greater than zero.".to_string(),
		});
	}
	if feedback.workers == 0 {
		return Err(Error::Validation {
			message: "feedback.workers must be greater than zero.".to_string(),
		});
	}
	if feedback.max_attempts == 0 {
		return Err(Error::Validation {
			message: "feedback.max_attempts must be greater than zero.".to_string(),
		});
	}
	if feedback.base_delay_ms > feedback.max_delay_ms {
		return Err(Error::Validation {
			message: "feedback.base_delay_ms must be less than or equal to feedback.max_delay_ms."
				.to_string(),
		});
	}
	if feedback.deadline_ms == 0 {
		return Err(Error::Validation {
			message: "feedback.deadline_ms must be greater than zero.".to_string(),
		});
	}

	for (label, value) in
		[("feedback.used_delta", feedback.used_delta), ("feedback.surfaced_delta", feedback.surfaced_delta)]
	{
		if !value.is_finite() {
			return Err(Error::Validation { message: format!("{label} must be a finite number.") });
		}
		if !(-1.0..=1.0).contains(&value) {
			return Err(Error::Validation {
				message: format!("{label} must be in the range -1.0-1.0."),
			});
		}
	}

	if let Some(http) = feedback.http.as_ref() {
		if http.url.trim().is_empty() {
			return Err(Error::Validation {
				message: "feedback.http.url must be non-empty.".to_string(),
			});
		}
		if http.timeout_ms == 0 {
			return Err(Error::Validation {
				message: "feedback.http.timeout_ms must be greater than zero.".to_string(),
			});
		}
	}

	Ok(())
}

fn normalize(cfg: &mut Config) {
	if cfg.beliefs.path.as_deref().map(|path| path.trim().is_empty()).unwrap_or(false) {
		cfg.beliefs.path = None;
	}
	if cfg.scoring.default_profile.as_deref().map(|name| name.trim().is_empty()).unwrap_or(false) {
		cfg.scoring.default_profile = None;
	}
	if cfg
		.storage
		.qdrant
		.vector_name
		.as_deref()
		.map(|name| name.trim().is_empty())
		.unwrap_or(false)
	{
		cfg.storage.qdrant.vector_name = None;
	}
	if let Some(http) = cfg.feedback.http.as_mut()
		&& http.api_key.as_deref().map(|key| key.trim().is_empty()).unwrap_or(false)
	{
		http.api_key = None;
	}
}

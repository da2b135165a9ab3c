//! Multiplicative composite scoring.
//!
//! `composite = base × (1 + recency) × (1 + trust) × (1 + quality) × (1 − conflict_penalty)`.
//! Every term except `base` is zero when its input is missing, so an unknown signal leaves the
//! score unchanged.

use time::OffsetDateTime;

use crate::{
	BeliefSet, ScoreTerms, ScoredCandidate, ScoringProfile, fetch::FetchedCandidate,
};

const SECONDS_PER_DAY: f32 = 86_400.0;

pub struct ScoringContext<'a> {
	pub profile: &'a ScoringProfile,
	/// `None` when the belief engine is off for the request.
	pub beliefs: Option<&'a BeliefSet>,
	pub now: OffsetDateTime,
}

pub fn base_similarity(profile: &ScoringProfile, similarity: f32) -> f32 {
	profile.similarity_weight * similarity
}

/// Exponential decay with the profile's half-life. Future timestamps count as age zero.
pub fn recency_term(
	profile: &ScoringProfile,
	timestamp: Option<OffsetDateTime>,
	now: OffsetDateTime,
) -> f32 {
	let Some(timestamp) = timestamp else { return 0.0 };
	let age_days = ((now - timestamp).as_seconds_f32() / SECONDS_PER_DAY).max(0.0);

	profile.recency_weight * 0.5_f32.powf(age_days / profile.recency_half_life_days)
}

pub fn trust_term(profile: &ScoringProfile, trust: Option<f32>) -> f32 {
	let Some(trust) = trust.filter(|value| value.is_finite()) else { return 0.0 };

	profile.trust_weight * trust.clamp(-1.0, 1.0)
}

/// Quality boost plus a saturating boost for causal links.
pub fn quality_term(profile: &ScoringProfile, quality: Option<f32>, causal_links: u32) -> f32 {
	let quality = quality.map(|value| profile.quality_weight * value).unwrap_or(0.0);
	let causal = if causal_links == 0 {
		0.0
	} else {
		let links = causal_links as f32;

		profile.causal_weight * links / (links + profile.causal_half_saturation)
	};

	quality + causal
}

pub fn conflict_penalty(
	profile: &ScoringProfile,
	conflict_tag: Option<&str>,
	beliefs: Option<&BeliefSet>,
) -> f32 {
	match (conflict_tag, beliefs) {
		(Some(tag), Some(beliefs)) if beliefs.contains(tag) => profile.conflict_penalty,
		_ => 0.0,
	}
}

pub fn score_terms(candidate: &FetchedCandidate, ctx: &ScoringContext<'_>) -> ScoreTerms {
	let record = &candidate.record;

	ScoreTerms {
		similarity: base_similarity(ctx.profile, candidate.similarity),
		recency: recency_term(ctx.profile, record.timestamp, ctx.now),
		trust: trust_term(ctx.profile, record.trust),
		quality: quality_term(ctx.profile, record.quality, record.causal_links),
		conflict_penalty: conflict_penalty(ctx.profile, record.conflict_tag.as_deref(), ctx.beliefs),
	}
}

pub fn score_candidate(candidate: FetchedCandidate, ctx: &ScoringContext<'_>) -> ScoredCandidate {
	let terms = score_terms(&candidate, ctx);
	let mut composite = terms.composite();

	if !composite.is_finite() {
		tracing::warn!(id = candidate.record.id.as_str(), "Non-finite composite score; using zero.");

		composite = 0.0;
	}

	ScoredCandidate {
		record: candidate.record,
		fetch_rank: candidate.fetch_rank,
		similarity: candidate.similarity,
		terms,
		composite,
	}
}

/// Scores every candidate and orders by descending composite. Ties keep fetch order.
pub fn score_candidates(
	candidates: Vec<FetchedCandidate>,
	ctx: &ScoringContext<'_>,
) -> Vec<ScoredCandidate> {
	let mut scored =
		candidates.into_iter().map(|candidate| score_candidate(candidate, ctx)).collect::<Vec<_>>();

	scored.sort_by(|a, b| {
		crate::fetch::cmp_f32_desc(a.composite, b.composite).then(a.fetch_rank.cmp(&b.fetch_rank))
	});

	scored
}

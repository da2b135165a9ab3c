//! Maximal Marginal Relevance selection.

use std::collections::HashMap;

use serde::Serialize;

use crate::ScoredCandidate;

pub const REASON_TOP_RELEVANCE: &str = "top_relevance";
pub const REASON_MMR: &str = "mmr";
pub const REASON_LOWER_MMR: &str = "lower_mmr";

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DiversityDecision {
	pub selected: bool,
	pub selected_rank: Option<u32>,
	pub reason: String,
	pub nearest_selected_id: Option<String>,
	pub max_similarity: Option<f32>,
	pub mmr_score: Option<f32>,
	pub missing_embedding: bool,
}

#[derive(Clone, Copy)]
struct DiversityPick {
	remaining_pos: usize,
	mmr_score: f32,
	composite: f32,
	fetch_rank: u32,
	nearest_idx: Option<usize>,
	similarity: Option<f32>,
	missing_embedding: bool,
}
impl DiversityPick {
	fn better_than(self, other: &Self) -> bool {
		if self.mmr_score != other.mmr_score {
			return self.mmr_score > other.mmr_score;
		}
		if self.composite != other.composite {
			return self.composite > other.composite;
		}

		self.fetch_rank < other.fetch_rank
	}
}

pub fn mmr_score(lambda: f32, relevance: f32, redundancy: f32) -> f32 {
	lambda * relevance - (1.0 - lambda) * redundancy
}

pub fn cosine_similarity(lhs: &[f32], rhs: &[f32]) -> Option<f32> {
	if lhs.is_empty() || lhs.len() != rhs.len() {
		return None;
	}

	let mut dot = 0.0_f32;
	let mut lhs_norm = 0.0_f32;
	let mut rhs_norm = 0.0_f32;

	for (l, r) in lhs.iter().zip(rhs.iter()) {
		dot += l * r;
		lhs_norm += l * l;
		rhs_norm += r * r;
	}

	if lhs_norm <= f32::EPSILON || rhs_norm <= f32::EPSILON {
		return None;
	}

	Some((dot / (lhs_norm.sqrt() * rhs_norm.sqrt())).clamp(-1.0, 1.0))
}

/// Highest similarity to any selected candidate, the index it came from, and whether the
/// candidate itself lacks an embedding.
pub fn nearest_selected_similarity(
	candidate_idx: usize,
	candidates: &[ScoredCandidate],
	selected_indices: &[usize],
) -> (Option<f32>, Option<usize>, bool) {
	let embedding = &candidates[candidate_idx].record.embedding;

	if embedding.is_empty() {
		return (None, None, true);
	}

	let mut best_similarity: Option<f32> = None;
	let mut nearest_idx: Option<usize> = None;

	for selected_idx in selected_indices {
		let Some(similarity) =
			cosine_similarity(embedding, &candidates[*selected_idx].record.embedding)
		else {
			continue;
		};

		if best_similarity.map(|value| similarity > value).unwrap_or(true) {
			best_similarity = Some(similarity);
			nearest_idx = Some(*selected_idx);
		}
	}

	(best_similarity, nearest_idx, false)
}

/// Picks up to `top_n` candidates, each maximising
/// `lambda × composite − (1 − lambda) × max_similarity_to_selected`. Equal scores prefer the
/// higher composite, then the earlier fetch rank. A missing embedding counts as no redundancy.
pub fn select_diverse(
	candidates: Vec<ScoredCandidate>,
	top_n: u32,
	lambda: f32,
) -> (Vec<ScoredCandidate>, HashMap<String, DiversityDecision>) {
	let limit = (top_n as usize).min(candidates.len());
	let mut remaining_indices = (0..candidates.len()).collect::<Vec<_>>();
	let mut selected_indices = Vec::with_capacity(limit);
	let mut decisions = HashMap::with_capacity(candidates.len());

	for _ in 0..limit {
		let Some(pick) = pick_next_candidate(&remaining_indices, &candidates, &selected_indices, lambda)
		else {
			break;
		};
		let picked_idx = remaining_indices.remove(pick.remaining_pos);
		let reason = if selected_indices.is_empty() { REASON_TOP_RELEVANCE } else { REASON_MMR };

		selected_indices.push(picked_idx);
		decisions.insert(
			candidates[picked_idx].record.id.clone(),
			DiversityDecision {
				selected: true,
				selected_rank: Some(selected_indices.len() as u32),
				reason: reason.to_string(),
				nearest_selected_id: pick
					.nearest_idx
					.map(|idx| candidates[idx].record.id.clone()),
				max_similarity: pick.similarity,
				mmr_score: Some(pick.mmr_score),
				missing_embedding: pick.missing_embedding,
			},
		);
	}

	for candidate_idx in remaining_indices {
		let (similarity, nearest_idx, missing_embedding) =
			nearest_selected_similarity(candidate_idx, &candidates, &selected_indices);
		let score = mmr_score(lambda, candidates[candidate_idx].composite, similarity.unwrap_or(0.0));

		decisions.insert(
			candidates[candidate_idx].record.id.clone(),
			DiversityDecision {
				selected: false,
				selected_rank: None,
				reason: REASON_LOWER_MMR.to_string(),
				nearest_selected_id: nearest_idx.map(|idx| candidates[idx].record.id.clone()),
				max_similarity: similarity,
				mmr_score: Some(score),
				missing_embedding,
			},
		);
	}

	if selected_indices.len() > top_n as usize {
		crate::error::invariant_violation("Diversity selection exceeded top_n.");

		let mut fallback = candidates;

		fallback.truncate(top_n as usize);

		return (fallback, decisions);
	}

	let mut slots = candidates.into_iter().map(Some).collect::<Vec<_>>();
	let selected = selected_indices.into_iter().filter_map(|idx| slots[idx].take()).collect();

	(selected, decisions)
}

fn pick_next_candidate(
	remaining_indices: &[usize],
	candidates: &[ScoredCandidate],
	selected_indices: &[usize],
	lambda: f32,
) -> Option<DiversityPick> {
	let mut best: Option<DiversityPick> = None;

	for (remaining_pos, candidate_idx) in remaining_indices.iter().copied().enumerate() {
		let candidate = &candidates[candidate_idx];
		let (similarity, nearest_idx, missing_embedding) =
			nearest_selected_similarity(candidate_idx, candidates, selected_indices);
		let pick = DiversityPick {
			remaining_pos,
			mmr_score: mmr_score(lambda, candidate.composite, similarity.unwrap_or(0.0)),
			composite: candidate.composite,
			fetch_rank: candidate.fetch_rank,
			nearest_idx,
			similarity,
			missing_embedding,
		};

		if best.as_ref().map(|current| pick.better_than(current)).unwrap_or(true) {
			best = Some(pick);
		}
	}

	best
}

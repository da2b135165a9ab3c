//! Order-preserving narrowing of the scored list.

use serde::Serialize;

use crate::{DecisiveMode, DecisivePolicy, ScoredCandidate, fetch::cmp_f32_desc};

pub const BYPASS_BELOW_MIN_KEEP: &str = "below_min_keep";
pub const BYPASS_NON_POSITIVE_TOP: &str = "non_positive_top_score";
pub const BYPASS_ORDER_VIOLATION: &str = "order_violation";

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DecisiveReport {
	pub enabled: bool,
	/// True when the filter's selection was used.
	pub applied: bool,
	pub mode: DecisiveMode,
	/// The composite threshold in relative mode.
	pub cutoff: Option<f32>,
	pub retained: u32,
	pub bypass_reason: Option<String>,
}

/// Returns the retained candidates in their input order plus a report. Bypassed runs return the
/// input unchanged.
pub fn apply(
	candidates: Vec<ScoredCandidate>,
	policy: &DecisivePolicy,
	enabled: bool,
) -> (Vec<ScoredCandidate>, DecisiveReport) {
	let mut report = DecisiveReport {
		enabled,
		applied: false,
		mode: policy.mode,
		cutoff: None,
		retained: candidates.len() as u32,
		bypass_reason: None,
	};

	if !enabled || candidates.is_empty() {
		return (candidates, report);
	}

	let keep = match policy.mode {
		DecisiveMode::Relative => {
			let top = candidates
				.iter()
				.map(|candidate| candidate.composite)
				.fold(f32::NEG_INFINITY, f32::max);

			if top <= 0.0 {
				report.bypass_reason = Some(BYPASS_NON_POSITIVE_TOP.to_string());

				return (candidates, report);
			}

			let cutoff = top * policy.min_relative_score;

			report.cutoff = Some(cutoff);

			candidates.iter().map(|candidate| candidate.composite >= cutoff).collect::<Vec<_>>()
		},
		DecisiveMode::TopK => top_k_mask(&candidates, policy.top_k as usize),
	};
	let retained = keep.iter().filter(|keep| **keep).count();

	if retained < policy.min_keep as usize {
		report.bypass_reason = Some(BYPASS_BELOW_MIN_KEEP.to_string());

		return (candidates, report);
	}

	let input_ranks = candidates.iter().map(|candidate| candidate.fetch_rank).collect::<Vec<_>>();
	let filtered = candidates
		.iter()
		.zip(keep.iter())
		.filter(|(_, keep)| **keep)
		.map(|(candidate, _)| candidate.clone())
		.collect::<Vec<_>>();
	let output_ranks = filtered.iter().map(|candidate| candidate.fetch_rank).collect::<Vec<_>>();

	if !is_subsequence(&input_ranks, &output_ranks) {
		crate::error::invariant_violation("Decisive filter reordered its input.");

		report.bypass_reason = Some(BYPASS_ORDER_VIOLATION.to_string());

		return (candidates, report);
	}

	report.applied = true;
	report.retained = retained as u32;

	(filtered, report)
}

/// Marks the `k` highest composites, earlier positions winning ties.
fn top_k_mask(candidates: &[ScoredCandidate], k: usize) -> Vec<bool> {
	let mut order = (0..candidates.len()).collect::<Vec<_>>();

	order.sort_by(|&a, &b| {
		cmp_f32_desc(candidates[a].composite, candidates[b].composite).then(a.cmp(&b))
	});

	let mut keep = vec![false; candidates.len()];

	for idx in order.into_iter().take(k) {
		keep[idx] = true;
	}

	keep
}

/// Whether `sub` appears in `full` in the same relative order.
pub fn is_subsequence<T: PartialEq>(full: &[T], sub: &[T]) -> bool {
	let mut remaining = full.iter();

	sub.iter().all(|item| remaining.any(|candidate| candidate == item))
}

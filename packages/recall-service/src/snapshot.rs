//! Per-request introspection record.
//!
//! Field order is part of the output contract: snapshots serialize in declaration order so that
//! downstream tooling can diff them across requests.

use std::{
	collections::{HashMap, HashSet, VecDeque},
	sync::{Arc, Mutex},
};

use serde::Serialize;
use time::OffsetDateTime;
use uuid::Uuid;

use recall_config::Features;

use crate::{
	BeliefSet, FeedbackDispatch, ProfileSource, RecordKind, ResolvedProfile, ScoredCandidate,
	ScoringProfile, decisive::DecisiveReport, diversity::DiversityDecision,
};

pub const MEMORY_DEBUG_SCHEMA_V1: &str = "memory_debug/v1";

#[derive(Clone, Debug, Serialize)]
pub struct DebugSnapshot {
	pub schema: String,
	pub request_id: Uuid,
	#[serde(serialize_with = "crate::rfc3339::serialize")]
	pub created_at: OffsetDateTime,
	pub profile: ProfileSection,
	pub flags: Features,
	pub backend: BackendSection,
	pub metrics: MetricsSection,
	pub counts: Counts,
	pub decisive: DecisiveReport,
	pub candidates: Vec<CandidateTrace>,
	pub selected_ids: Vec<String>,
	pub feedback: FeedbackSection,
}

#[derive(Clone, Debug, Serialize)]
pub struct ProfileSection {
	pub name: String,
	pub version: u32,
	/// Profile registry generation the profile was resolved from.
	pub registry_version: u64,
	pub source: ProfileSource,
	pub fingerprint: String,
	pub override_error: Option<String>,
	pub values: ScoringProfile,
}

#[derive(Clone, Debug, Serialize)]
pub struct BackendSection {
	pub vector_available: bool,
	pub degraded_reason: Option<String>,
	pub trust_available: bool,
	pub beliefs_loaded: bool,
	/// Zero when the belief engine was off for the request.
	pub beliefs_version: u64,
	pub active_belief_count: u32,
}

#[derive(Clone, Copy, Debug, Serialize)]
pub struct MetricsSection {
	/// False when the pipeline fell back to local counters.
	pub external: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Counts {
	pub raw: u32,
	pub filtered: u32,
	#[serde(rename = "final")]
	pub final_: u32,
}

#[derive(Clone, Debug, Serialize)]
pub struct CandidateTrace {
	pub id: String,
	pub fetch_rank: u32,
	pub kind: RecordKind,
	pub similarity: f32,
	pub terms: Vec<TermValue>,
	pub composite: f32,
	/// Survived the decisive filter.
	pub retained: bool,
	pub diversity: Option<DiversityDecision>,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct TermValue {
	pub name: &'static str,
	pub value: f32,
}

#[derive(Clone, Copy, Debug, Serialize)]
pub struct FeedbackSection {
	pub status: FeedbackDispatch,
	pub events: u32,
}

/// Collects stage outputs in pipeline order.
pub struct SnapshotBuilder {
	snapshot: DebugSnapshot,
}
impl SnapshotBuilder {
	pub fn new(request_id: Uuid, resolved: &ResolvedProfile, flags: Features) -> Self {
		let profile = &resolved.profile;

		Self {
			snapshot: DebugSnapshot {
				schema: MEMORY_DEBUG_SCHEMA_V1.to_string(),
				request_id,
				created_at: OffsetDateTime::now_utc(),
				profile: ProfileSection {
					name: profile.name.clone(),
					version: profile.version,
					registry_version: resolved.registry_version,
					source: resolved.source,
					fingerprint: resolved.fingerprint.clone(),
					override_error: resolved.override_error.clone(),
					values: profile.as_ref().clone(),
				},
				flags,
				backend: BackendSection {
					vector_available: true,
					degraded_reason: None,
					trust_available: true,
					beliefs_loaded: false,
					beliefs_version: 0,
					active_belief_count: 0,
				},
				metrics: MetricsSection { external: false },
				counts: Counts::default(),
				decisive: DecisiveReport {
					enabled: flags.decisive_filter,
					applied: false,
					mode: profile.decisive.mode,
					cutoff: None,
					retained: 0,
					bypass_reason: None,
				},
				candidates: Vec::new(),
				selected_ids: Vec::new(),
				feedback: FeedbackSection { status: FeedbackDispatch::Skipped, events: 0 },
			},
		}
	}

	pub fn vector_backend(mut self, vector_available: bool, degraded_reason: Option<String>) -> Self {
		self.snapshot.backend.vector_available = vector_available;
		self.snapshot.backend.degraded_reason = degraded_reason;

		self
	}

	pub fn trust_available(mut self, available: bool) -> Self {
		self.snapshot.backend.trust_available = available;

		self
	}

	pub fn beliefs(mut self, beliefs: Option<&BeliefSet>) -> Self {
		if let Some(beliefs) = beliefs {
			self.snapshot.backend.beliefs_loaded = beliefs.loaded;
			self.snapshot.backend.beliefs_version = beliefs.version;
			self.snapshot.backend.active_belief_count = beliefs.len() as u32;
		}

		self
	}

	pub fn metrics_external(mut self, external: bool) -> Self {
		self.snapshot.metrics.external = external;

		self
	}

	/// Records the full scored list. Every candidate starts as retained.
	pub fn scored(mut self, scored: &[ScoredCandidate]) -> Self {
		self.snapshot.counts.raw = scored.len() as u32;
		self.snapshot.counts.filtered = scored.len() as u32;
		self.snapshot.candidates = scored
			.iter()
			.map(|candidate| CandidateTrace {
				id: candidate.record.id.clone(),
				fetch_rank: candidate.fetch_rank,
				kind: candidate.record.kind,
				similarity: candidate.similarity,
				terms: candidate
					.terms
					.entries()
					.into_iter()
					.map(|(name, value)| TermValue { name, value })
					.collect(),
				composite: candidate.composite,
				retained: true,
				diversity: None,
			})
			.collect();

		self
	}

	pub fn decisive(mut self, report: DecisiveReport, retained: &[ScoredCandidate]) -> Self {
		let kept = retained.iter().map(|candidate| candidate.record.id.as_str()).collect::<HashSet<_>>();

		for trace in &mut self.snapshot.candidates {
			trace.retained = kept.contains(trace.id.as_str());
		}

		self.snapshot.counts.filtered = retained.len() as u32;
		self.snapshot.decisive = report;

		self
	}

	pub fn diversity(
		mut self,
		mut decisions: HashMap<String, DiversityDecision>,
		selected: &[ScoredCandidate],
	) -> Self {
		for trace in &mut self.snapshot.candidates {
			trace.diversity = decisions.remove(&trace.id);
		}

		self.snapshot.selected_ids = selected.iter().map(|candidate| candidate.record.id.clone()).collect();
		self.snapshot.counts.final_ = selected.len() as u32;

		self
	}

	pub fn feedback(mut self, status: FeedbackDispatch, events: u32) -> Self {
		self.snapshot.feedback = FeedbackSection { status, events };

		self
	}

	pub fn build(self) -> DebugSnapshot {
		self.snapshot
	}
}

/// Keeps the most recent snapshots for inspection.
pub struct SnapshotRing {
	capacity: usize,
	entries: Mutex<VecDeque<Arc<DebugSnapshot>>>,
}
impl SnapshotRing {
	pub fn new(capacity: usize) -> Self {
		let capacity = capacity.max(1);

		Self { capacity, entries: Mutex::new(VecDeque::with_capacity(capacity)) }
	}

	pub fn push(&self, snapshot: Arc<DebugSnapshot>) {
		let mut entries = self.entries.lock().unwrap_or_else(|err| err.into_inner());

		while entries.len() >= self.capacity {
			entries.pop_front();
		}

		entries.push_back(snapshot);
	}

	pub fn get(&self, request_id: Uuid) -> Option<Arc<DebugSnapshot>> {
		let entries = self.entries.lock().unwrap_or_else(|err| err.into_inner());

		entries.iter().rev().find(|snapshot| snapshot.request_id == request_id).cloned()
	}

	pub fn latest(&self) -> Option<Arc<DebugSnapshot>> {
		self.entries.lock().unwrap_or_else(|err| err.into_inner()).back().cloned()
	}

	pub fn len(&self) -> usize {
		self.entries.lock().unwrap_or_else(|err| err.into_inner()).len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}

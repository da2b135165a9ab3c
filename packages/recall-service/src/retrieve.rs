//! The synchronous request path: fetch, score, filter, diversify, then hand off feedback.

use std::{collections::HashSet, sync::Arc, time::Instant};

use serde::Deserialize;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
	FeedbackDispatch, ProfileOverride, RecallService, ScoredCandidate,
	decisive::{self, BYPASS_ORDER_VIOLATION},
	diversity,
	fetch::{self, FetchOptions},
	metrics::names,
	scoring::{self, ScoringContext},
	snapshot::{DebugSnapshot, SnapshotBuilder},
};

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct RetrieveRequest {
	/// Generated when absent.
	pub request_id: Option<Uuid>,
	pub embedding: Vec<f32>,
	pub profile: Option<ProfileOverride>,
	/// Fetch limit. Defaults to the profile's `candidate_k`.
	pub limit: Option<u32>,
	/// Per-request feature toggles. `None` keeps the process setting.
	pub belief_engine: Option<bool>,
	pub decisive_filter: Option<bool>,
}
impl RetrieveRequest {
	pub fn new(embedding: Vec<f32>) -> Self {
		Self { embedding, ..Default::default() }
	}

	pub fn with_profile(mut self, profile: ProfileOverride) -> Self {
		self.profile = Some(profile);

		self
	}
}

#[derive(Clone, Debug)]
pub struct RetrieveResponse {
	pub request_id: Uuid,
	/// Final selection in output order.
	pub items: Vec<ScoredCandidate>,
	pub snapshot: Arc<DebugSnapshot>,
}

impl RecallService {
	/// Runs the pipeline for one query. Backend failures degrade to an empty or partially scored
	/// result and are reported in the snapshot.
	pub async fn retrieve(&self, request: RetrieveRequest) -> RetrieveResponse {
		let started = Instant::now();
		let request_id = request.request_id.unwrap_or_else(Uuid::new_v4);
		let resolved = self.profiles.resolve(request.profile.as_ref());

		if let Some(reason) = resolved.override_error.as_deref() {
			tracing::debug!(%request_id, reason, "Profile override rejected; using the default profile.");

			self.metrics.increment(names::PROFILE_OVERRIDE_REJECTED);
		}

		let profile = resolved.profile.clone();
		let mut flags = self.settings.features;

		if let Some(enabled) = request.belief_engine {
			flags.belief_engine = enabled;
		}
		if let Some(enabled) = request.decisive_filter {
			flags.decisive_filter = enabled;
		}

		let opts = FetchOptions {
			limit: request.limit.unwrap_or(profile.candidate_k),
			timeout: self.settings.fetch_timeout,
			health_timeout: self.settings.health_timeout,
		};
		let fetch_started = Instant::now();
		let outcome = fetch::fetch_or_degrade(self.vectors.as_ref(), &request.embedding, &opts).await;

		self.metrics.observe(names::FETCH_SECONDS, fetch_started.elapsed().as_secs_f64());

		if outcome.degraded_reason.is_some() {
			self.metrics.increment(names::DEGRADED);
		}

		let beliefs = flags.belief_engine.then(|| self.beliefs.current());
		let mut candidates = outcome.candidates;
		let trust_available = self.load_trust(request_id, &mut candidates).await;
		let ctx = ScoringContext {
			profile: &profile,
			beliefs: beliefs.as_deref(),
			now: OffsetDateTime::now_utc(),
		};
		let scored = scoring::score_candidates(candidates, &ctx);
		let builder = SnapshotBuilder::new(request_id, &resolved, flags)
			.vector_backend(outcome.vector_available, outcome.degraded_reason)
			.trust_available(trust_available)
			.beliefs(beliefs.as_deref())
			.metrics_external(self.metrics.external())
			.scored(&scored);
		let raw = scored.len();
		let (filtered, report) = decisive::apply(scored, &profile.decisive, flags.decisive_filter);

		if let Some(reason) = report.bypass_reason.as_deref() {
			self.metrics.increment(names::DECISIVE_BYPASSED);

			if reason == BYPASS_ORDER_VIOLATION {
				self.metrics.increment(names::INVARIANT_VIOLATIONS);
			}
		}

		let builder = builder.decisive(report, &filtered);
		let filtered_len = filtered.len();
		let (selected, decisions) =
			diversity::select_diverse(filtered, profile.top_n, profile.mmr_lambda);
		let builder = builder.diversity(decisions, &selected);
		let surfaced = selected.iter().map(|candidate| candidate.record.id.clone()).collect::<Vec<_>>();
		let feedback = self.feedback.dispatch(request_id, &surfaced, false);
		let events = match feedback {
			FeedbackDispatch::Sent =>
				surfaced.iter().map(String::as_str).collect::<HashSet<_>>().len() as u32,
			FeedbackDispatch::Skipped | FeedbackDispatch::Failed => 0,
		};
		let snapshot = Arc::new(builder.feedback(feedback, events).build());

		self.snapshots.push(snapshot.clone());
		self.metrics.increment(names::REQUESTS);
		self.metrics.observe(names::CANDIDATES_RAW, raw as f64);
		self.metrics.observe(names::CANDIDATES_FINAL, selected.len() as f64);
		self.metrics.observe(names::RETRIEVE_SECONDS, started.elapsed().as_secs_f64());

		tracing::debug!(
			%request_id,
			profile = profile.name.as_str(),
			source = ?resolved.source,
			raw,
			filtered = filtered_len,
			selected = selected.len(),
			"Retrieval finished."
		);

		RetrieveResponse { request_id, items: selected, snapshot }
	}

	/// Fills in stored trust. Returns false when the store could not be read in time, in which
	/// case every candidate keeps a neutral trust term.
	async fn load_trust(&self, request_id: Uuid, candidates: &mut [fetch::FetchedCandidate]) -> bool {
		if candidates.is_empty() {
			return true;
		}

		let ids = candidates.iter().map(|candidate| candidate.record.id.clone()).collect::<Vec<_>>();

		match tokio::time::timeout(self.settings.fetch_timeout, self.trust.get_trust_many(&ids)).await {
			Ok(Ok(values)) => {
				for candidate in candidates {
					candidate.record.trust = values.get(&candidate.record.id).copied();
				}

				true
			},
			Ok(Err(err)) => {
				tracing::warn!(%request_id, error = %err, "Trust lookup failed; scoring with neutral trust.");

				false
			},
			Err(_) => {
				tracing::warn!(
					%request_id,
					timeout_ms = self.settings.fetch_timeout.as_millis() as u64,
					"Trust lookup timed out; scoring with neutral trust."
				);

				false
			},
		}
	}
}

//! Optional metrics. With no external collector the pipeline counts locally and reports
//! `external = false` in snapshots.

use std::{
	collections::BTreeMap,
	sync::{Arc, Mutex},
};

pub mod names {
	pub const REQUESTS: &str = "recall_requests_total";
	pub const DEGRADED: &str = "recall_degraded_total";
	pub const PROFILE_OVERRIDE_REJECTED: &str = "recall_profile_override_rejected_total";
	pub const DECISIVE_BYPASSED: &str = "recall_decisive_bypassed_total";
	pub const INVARIANT_VIOLATIONS: &str = "recall_invariant_violations_total";
	pub const USAGE_REPORTS: &str = "recall_usage_reports_total";
	pub const FEEDBACK_ENQUEUED: &str = "recall_feedback_enqueued_total";
	pub const FEEDBACK_DROPPED: &str = "recall_feedback_dropped_total";
	pub const FEEDBACK_DELIVERED: &str = "recall_feedback_delivered_total";
	pub const FEEDBACK_RETRIES: &str = "recall_feedback_retries_total";
	pub const FEEDBACK_EXHAUSTED: &str = "recall_feedback_exhausted_total";
	pub const TRUST_NUDGES: &str = "recall_trust_nudges_total";
	pub const TRUST_NUDGE_FAILURES: &str = "recall_trust_nudge_failures_total";
	pub const RETRIEVE_SECONDS: &str = "recall_retrieve_seconds";
	pub const FETCH_SECONDS: &str = "recall_fetch_seconds";
	pub const CANDIDATES_RAW: &str = "recall_candidates_raw";
	pub const CANDIDATES_FINAL: &str = "recall_candidates_final";
	pub const FEEDBACK_ATTEMPTS: &str = "recall_feedback_attempts";
}

pub trait MetricsCollector
where
	Self: Send + Sync,
{
	fn increment(&self, name: &'static str);

	fn observe(&self, name: &'static str, value: f64);
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Observation {
	pub count: u64,
	pub sum: f64,
}

/// In-process counters used when no external collector is installed.
#[derive(Debug, Default)]
pub struct LocalCounters {
	counters: Mutex<BTreeMap<&'static str, u64>>,
	observations: Mutex<BTreeMap<&'static str, Observation>>,
}
impl LocalCounters {
	pub fn counter(&self, name: &str) -> u64 {
		let counters = self.counters.lock().unwrap_or_else(|err| err.into_inner());

		counters.get(name).copied().unwrap_or(0)
	}

	pub fn observation(&self, name: &str) -> Observation {
		let observations = self.observations.lock().unwrap_or_else(|err| err.into_inner());

		observations.get(name).copied().unwrap_or_default()
	}
}

impl MetricsCollector for LocalCounters {
	fn increment(&self, name: &'static str) {
		let mut counters = self.counters.lock().unwrap_or_else(|err| err.into_inner());

		*counters.entry(name).or_insert(0) += 1;
	}

	fn observe(&self, name: &'static str, value: f64) {
		let mut observations = self.observations.lock().unwrap_or_else(|err| err.into_inner());
		let entry = observations.entry(name).or_default();

		entry.count += 1;
		entry.sum += value;
	}
}

/// Forwards to the `metrics` facade; the host installs the recorder.
#[derive(Clone, Copy, Debug, Default)]
pub struct FacadeMetrics;

impl MetricsCollector for FacadeMetrics {
	fn increment(&self, name: &'static str) {
		metrics::counter!(name).increment(1);
	}

	fn observe(&self, name: &'static str, value: f64) {
		metrics::histogram!(name).record(value);
	}
}

#[derive(Clone)]
pub struct Metrics {
	collector: Arc<dyn MetricsCollector>,
	local: Option<Arc<LocalCounters>>,
}
impl Metrics {
	/// Uses `external` when given, local counters otherwise.
	pub fn new(external: Option<Arc<dyn MetricsCollector>>) -> Self {
		match external {
			Some(collector) => Self { collector, local: None },
			None => {
				let local = Arc::new(LocalCounters::default());

				Self { collector: local.clone(), local: Some(local) }
			},
		}
	}

	pub fn external(&self) -> bool {
		self.local.is_none()
	}

	pub fn local(&self) -> Option<&LocalCounters> {
		self.local.as_deref()
	}

	pub fn increment(&self, name: &'static str) {
		self.collector.increment(name);
	}

	pub fn observe(&self, name: &'static str, value: f64) {
		self.collector.observe(name, value);
	}
}

#[cfg(test)]
mod tests {
	use std::sync::Arc;

	use super::{Metrics, MetricsCollector, names};

	struct Silent;

	impl MetricsCollector for Silent {
		fn increment(&self, _: &'static str) {}

		fn observe(&self, _: &'static str, _: f64) {}
	}

	#[test]
	fn absent_collector_falls_back_to_local_counters() {
		let metrics = Metrics::new(None);

		metrics.increment(names::REQUESTS);
		metrics.increment(names::REQUESTS);
		metrics.observe(names::RETRIEVE_SECONDS, 0.5);
		metrics.observe(names::RETRIEVE_SECONDS, 0.25);

		let local = metrics.local().expect("Local counters must be present.");

		assert!(!metrics.external());
		assert_eq!(local.counter(names::REQUESTS), 2);
		assert_eq!(local.counter(names::DEGRADED), 0);
		assert_eq!(local.observation(names::RETRIEVE_SECONDS).count, 2);
		assert_eq!(local.observation(names::RETRIEVE_SECONDS).sum, 0.75);
	}

	#[test]
	fn external_collector_is_reported() {
		let metrics = Metrics::new(Some(Arc::new(Silent)));

		metrics.increment(names::REQUESTS);

		assert!(metrics.external());
		assert!(metrics.local().is_none());
	}
}

pub mod backends;
pub mod beliefs;
pub mod decisive;
pub mod diversity;
pub mod feedback;
pub mod fetch;
pub mod metrics;
pub mod model;
pub mod profile;
pub mod retrieve;
pub mod scoring;
pub mod snapshot;
pub mod trust;

mod error;
mod rfc3339;

pub use beliefs::{BeliefCache, BeliefSet, JsonFileBeliefSource, StaticBeliefSource};
pub use error::{Error, Result};
pub use feedback::{
	DeliveryError, FeedbackBatch, FeedbackDispatch, FeedbackEvent, FeedbackReporter,
	NoopFeedbackSink, ReporterConfig,
};
pub use metrics::{FacadeMetrics, LocalCounters, Metrics, MetricsCollector};
pub use model::{MemoryRecord, RecordKind, ScoreTerms, ScoredCandidate, VectorHit};
pub use profile::{
	DecisiveMode, DecisivePolicy, ProfileOverride, ProfileRegistry, ProfileSource,
	ResolvedProfile, ScoringProfile,
};
pub use retrieve::{RetrieveRequest, RetrieveResponse};
pub use snapshot::{DebugSnapshot, MEMORY_DEBUG_SCHEMA_V1, SnapshotRing};
pub use trust::{InMemoryTrustStore, TrustNudge};

use std::{
	collections::{BTreeSet, HashMap},
	future::Future,
	pin::Pin,
	sync::Arc,
	time::Duration,
};

use uuid::Uuid;

use recall_config::{Config, Features};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Nearest-neighbour search over stored memories.
pub trait VectorBackend
where
	Self: Send + Sync,
{
	/// Up to `limit` hits, best first.
	fn search<'a>(&'a self, query: &'a [f32], limit: u32) -> BoxFuture<'a, Result<Vec<VectorHit>>>;

	fn health<'a>(&'a self) -> BoxFuture<'a, bool>;
}

/// Per-record trust weights. Implementations must apply concurrent adjustments to the same
/// record without losing updates.
pub trait TrustStore
where
	Self: Send + Sync,
{
	/// Stored trust in [-1, 1]; records never adjusted read as 0.
	fn get_trust<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<f32>>;

	fn adjust_trust<'a>(&'a self, id: &'a str, delta: f32) -> BoxFuture<'a, Result<()>>;

	fn get_trust_many<'a>(&'a self, ids: &'a [String]) -> BoxFuture<'a, Result<HashMap<String, f32>>> {
		Box::pin(async move {
			let mut out = HashMap::with_capacity(ids.len());

			for id in ids {
				out.insert(id.clone(), self.get_trust(id).await?);
			}

			Ok(out)
		})
	}

	/// Applies the trust change for one feedback event.
	fn apply_nudge<'a>(&'a self, nudge: &'a TrustNudge) -> BoxFuture<'a, Result<()>> {
		self.adjust_trust(&nudge.memory_id, nudge.delta)
	}
}

pub trait BeliefSource
where
	Self: Send + Sync,
{
	fn load_active_beliefs(&self) -> Result<BTreeSet<String>>;
}

/// Receives feedback batches for analytics or downstream trust processing.
pub trait FeedbackSink
where
	Self: Send + Sync,
{
	fn deliver<'a>(&'a self, batch: &'a FeedbackBatch)
	-> BoxFuture<'a, Result<(), DeliveryError>>;
}

/// Everything the pipeline talks to. Only the vector backend is required.
#[derive(Clone)]
pub struct Collaborators {
	pub vectors: Arc<dyn VectorBackend>,
	pub trust: Arc<dyn TrustStore>,
	pub beliefs: Arc<dyn BeliefSource>,
	pub feedback: Arc<dyn FeedbackSink>,
	pub metrics: Option<Arc<dyn MetricsCollector>>,
}
impl Collaborators {
	pub fn new(vectors: Arc<dyn VectorBackend>) -> Self {
		Self {
			vectors,
			trust: Arc::new(InMemoryTrustStore::default()),
			beliefs: Arc::new(StaticBeliefSource::default()),
			feedback: Arc::new(NoopFeedbackSink),
			metrics: None,
		}
	}

	pub fn with_trust(mut self, trust: Arc<dyn TrustStore>) -> Self {
		self.trust = trust;

		self
	}

	pub fn with_beliefs(mut self, beliefs: Arc<dyn BeliefSource>) -> Self {
		self.beliefs = beliefs;

		self
	}

	pub fn with_feedback(mut self, feedback: Arc<dyn FeedbackSink>) -> Self {
		self.feedback = feedback;

		self
	}

	pub fn with_metrics(mut self, metrics: Arc<dyn MetricsCollector>) -> Self {
		self.metrics = Some(metrics);

		self
	}
}

/// Startup-resolved settings. Never re-read during a request.
#[derive(Clone, Debug)]
pub struct Settings {
	pub features: Features,
	pub fetch_timeout: Duration,
	pub health_timeout: Duration,
	pub retain_snapshots: usize,
	pub reporter: ReporterConfig,
}
impl Settings {
	pub fn from_config(cfg: &Config) -> Self {
		Self {
			features: cfg.features,
			fetch_timeout: Duration::from_millis(cfg.retrieval.fetch_timeout_ms),
			health_timeout: Duration::from_millis(cfg.retrieval.health_timeout_ms),
			retain_snapshots: cfg.debug.retain_snapshots as usize,
			reporter: ReporterConfig::from_config(&cfg.feedback, cfg.features.trust_nudge),
		}
	}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReloadReport {
	pub profiles_version: u64,
	pub beliefs_version: u64,
	pub beliefs_loaded: bool,
}

pub struct RecallService {
	pub settings: Settings,
	vectors: Arc<dyn VectorBackend>,
	trust: Arc<dyn TrustStore>,
	beliefs: BeliefCache,
	profiles: ProfileRegistry,
	metrics: Metrics,
	feedback: FeedbackReporter,
	snapshots: SnapshotRing,
}
impl RecallService {
	/// Builds the service and starts the feedback dispatcher. Must be called inside a Tokio
	/// runtime.
	pub fn new(cfg: &Config, collaborators: Collaborators) -> Self {
		Self::with_parts(Settings::from_config(cfg), ProfileRegistry::from_config(cfg), collaborators)
	}

	pub fn with_parts(
		settings: Settings,
		profiles: ProfileRegistry,
		collaborators: Collaborators,
	) -> Self {
		let Collaborators { vectors, trust, beliefs, feedback, metrics } = collaborators;
		let metrics = Metrics::new(metrics);
		let feedback = if settings.features.feedback {
			FeedbackReporter::spawn(settings.reporter.clone(), feedback, trust.clone(), metrics.clone())
		} else {
			FeedbackReporter::disabled()
		};
		let snapshots = SnapshotRing::new(settings.retain_snapshots);
		let beliefs = BeliefCache::new(beliefs);

		// Requests may enable the belief engine individually, so load regardless of the flag.
		beliefs.reload();

		Self {
			settings,
			vectors,
			trust,
			beliefs,
			profiles,
			metrics,
			feedback,
			snapshots,
		}
	}

	pub fn profiles(&self) -> &ProfileRegistry {
		&self.profiles
	}

	pub fn beliefs(&self) -> &BeliefCache {
		&self.beliefs
	}

	pub fn metrics(&self) -> &Metrics {
		&self.metrics
	}

	/// Refreshes the scoring-profile default from the environment and re-reads active beliefs.
	pub fn reload(&self) -> ReloadReport {
		let profiles_version = self.profiles.reload_from_env();
		let beliefs = self.beliefs.reload();

		ReloadReport { profiles_version, beliefs_version: beliefs.version, beliefs_loaded: beliefs.loaded }
	}

	/// Queues a usage report and returns without waiting for delivery.
	pub fn report_usage(&self, request_id: Uuid, used_ids: &[String]) -> FeedbackDispatch {
		let status = self.feedback.dispatch(request_id, used_ids, true);

		self.metrics.increment(metrics::names::USAGE_REPORTS);

		status
	}

	/// A retained snapshot by request id.
	pub fn snapshot(&self, request_id: Uuid) -> Option<Arc<DebugSnapshot>> {
		self.snapshots.get(request_id)
	}

	pub fn latest_snapshot(&self) -> Option<Arc<DebugSnapshot>> {
		self.snapshots.latest()
	}

	/// Closes the feedback queue and waits for in-flight dispatches.
	pub async fn shutdown(&self) {
		self.feedback.shutdown().await;
	}
}

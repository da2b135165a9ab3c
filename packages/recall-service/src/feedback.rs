//! Non-blocking usage feedback.
//!
//! `dispatch` only enqueues. A dispatcher task drains the queue onto at most `workers`
//! concurrent deliveries; each delivery retries with capped exponential backoff plus jitter and
//! is bounded by an overall deadline. Delivered batches then feed the trust nudge, one event at a
//! time.

use std::{
	collections::HashSet,
	sync::{Arc, Mutex},
	time::Duration,
};

use arc_swap::ArcSwapOption;
use rand::Rng;
use serde::Serialize;
use time::OffsetDateTime;
use tokio::{
	sync::{Semaphore, mpsc},
	task::{JoinHandle, JoinSet},
};
use uuid::Uuid;

use crate::{
	BoxFuture, Error, FeedbackSink, Result, TrustNudge, TrustStore,
	metrics::{Metrics, names},
};

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FeedbackEvent {
	pub event_id: Uuid,
	pub memory_id: String,
	pub request_id: Uuid,
	#[serde(serialize_with = "crate::rfc3339::serialize")]
	pub at: OffsetDateTime,
	pub used: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FeedbackBatch {
	pub request_id: Uuid,
	pub events: Vec<FeedbackEvent>,
}
impl FeedbackBatch {
	/// One event per distinct id, in first-seen order.
	pub fn new(request_id: Uuid, ids: &[String], used: bool, at: OffsetDateTime) -> Self {
		let mut seen = HashSet::new();
		let events = ids
			.iter()
			.filter(|id| seen.insert(id.as_str()))
			.map(|id| FeedbackEvent {
				event_id: Uuid::new_v4(),
				memory_id: id.clone(),
				request_id,
				at,
				used,
			})
			.collect();

		Self { request_id, events }
	}
}

/// What happened to a feedback report at hand-off time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackDispatch {
	/// Queued for delivery.
	Sent,
	/// Feedback is disabled or there was nothing to report.
	Skipped,
	/// The queue was full or closed.
	Failed,
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct DeliveryError {
	pub message: String,
	pub retryable: bool,
}
impl DeliveryError {
	pub fn retryable(message: impl Into<String>) -> Self {
		Self { message: message.into(), retryable: true }
	}

	pub fn permanent(message: impl Into<String>) -> Self {
		Self { message: message.into(), retryable: false }
	}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
	pub max_attempts: u32,
	pub base_delay: Duration,
	pub max_delay: Duration,
	pub jitter: Duration,
}
impl RetryPolicy {
	/// `base × 2^(attempt − 1)`, capped at `max_delay`. `attempt` is 1-based.
	pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
		let exp = attempt.max(1).saturating_sub(1).min(20);

		self.base_delay.saturating_mul(1 << exp).min(self.max_delay)
	}

	/// Backoff plus a uniform jitter in `[0, jitter]`.
	pub fn delay_for_attempt<R>(&self, attempt: u32, rng: &mut R) -> Duration
	where
		R: Rng + ?Sized,
	{
		let jitter_ms = self.jitter.as_millis() as u64;
		let jitter =
			if jitter_ms == 0 { Duration::ZERO } else { Duration::from_millis(rng.gen_range(0..=jitter_ms)) };

		self.backoff_for_attempt(attempt) + jitter
	}
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct NudgePolicy {
	pub enabled: bool,
	pub used_delta: f32,
	pub surfaced_delta: f32,
}
impl NudgePolicy {
	pub fn delta_for(&self, event: &FeedbackEvent) -> f32 {
		if event.used { self.used_delta } else { self.surfaced_delta }
	}
}

#[derive(Clone, Debug)]
pub struct ReporterConfig {
	pub queue_capacity: usize,
	pub workers: usize,
	pub retry: RetryPolicy,
	/// Upper bound for delivering one batch, retries included. Each trust nudge gets the same
	/// bound once the batch is delivered.
	pub deadline: Duration,
	pub nudge: NudgePolicy,
}
impl ReporterConfig {
	pub fn from_config(cfg: &recall_config::Feedback, trust_nudge: bool) -> Self {
		Self {
			queue_capacity: cfg.queue_capacity.max(1) as usize,
			workers: cfg.workers.max(1) as usize,
			retry: RetryPolicy {
				max_attempts: cfg.max_attempts.max(1),
				base_delay: Duration::from_millis(cfg.base_delay_ms),
				max_delay: Duration::from_millis(cfg.max_delay_ms),
				jitter: Duration::from_millis(cfg.jitter_ms),
			},
			deadline: Duration::from_millis(cfg.deadline_ms),
			nudge: NudgePolicy {
				enabled: trust_nudge,
				used_delta: cfg.used_delta,
				surfaced_delta: cfg.surfaced_delta,
			},
		}
	}
}

/// Accepts every batch. Used when feedback only drives the trust nudge.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopFeedbackSink;

impl FeedbackSink for NoopFeedbackSink {
	fn deliver<'a>(
		&'a self,
		_: &'a FeedbackBatch,
	) -> BoxFuture<'a, Result<(), DeliveryError>> {
		Box::pin(async { Ok(()) })
	}
}

pub struct FeedbackReporter {
	enabled: bool,
	tx: ArcSwapOption<mpsc::Sender<FeedbackBatch>>,
	handle: Mutex<Option<JoinHandle<()>>>,
	metrics: Option<Metrics>,
}
impl FeedbackReporter {
	/// Starts the dispatcher on the current Tokio runtime.
	pub fn spawn(
		cfg: ReporterConfig,
		sink: Arc<dyn FeedbackSink>,
		trust: Arc<dyn TrustStore>,
		metrics: Metrics,
	) -> Self {
		let (tx, rx) = mpsc::channel(cfg.queue_capacity.max(1));
		let workers = cfg.workers.max(1);
		let worker = Arc::new(FeedbackWorker {
			sink,
			trust,
			retry: cfg.retry,
			nudge: cfg.nudge,
			deadline: cfg.deadline,
			metrics: metrics.clone(),
		});
		let handle = tokio::spawn(run_dispatcher(rx, worker, workers));

		Self {
			enabled: true,
			tx: ArcSwapOption::from_pointee(tx),
			handle: Mutex::new(Some(handle)),
			metrics: Some(metrics),
		}
	}

	pub fn disabled() -> Self {
		Self { enabled: false, tx: ArcSwapOption::empty(), handle: Mutex::new(None), metrics: None }
	}

	/// Queues one batch for `ids` without waiting.
	pub fn dispatch(&self, request_id: Uuid, ids: &[String], used: bool) -> FeedbackDispatch {
		if !self.enabled || ids.is_empty() {
			return FeedbackDispatch::Skipped;
		}

		let guard = self.tx.load();
		let Some(tx) = &*guard else {
			tracing::warn!(%request_id, "Feedback queue is closed; dropping report.");

			self.count(names::FEEDBACK_DROPPED);

			return FeedbackDispatch::Failed;
		};
		let batch = FeedbackBatch::new(request_id, ids, used, OffsetDateTime::now_utc());

		match tx.try_send(batch) {
			Ok(()) => {
				self.count(names::FEEDBACK_ENQUEUED);

				FeedbackDispatch::Sent
			},
			Err(mpsc::error::TrySendError::Full(batch)) => {
				tracing::warn!(
					%request_id,
					events = batch.events.len(),
					"Feedback queue is full; dropping report."
				);

				self.count(names::FEEDBACK_DROPPED);

				FeedbackDispatch::Failed
			},
			Err(mpsc::error::TrySendError::Closed(_)) => {
				tracing::warn!(%request_id, "Feedback queue is closed; dropping report.");

				self.count(names::FEEDBACK_DROPPED);

				FeedbackDispatch::Failed
			},
		}
	}

	/// Closes the queue and waits for queued and in-flight batches. Each batch is bounded by the
	/// deadline.
	pub async fn shutdown(&self) {
		self.tx.store(None);

		let handle = self.handle.lock().unwrap_or_else(|err| err.into_inner()).take();

		if let Some(handle) = handle
			&& let Err(err) = handle.await
		{
			tracing::warn!(error = %err, "Feedback dispatcher ended abnormally.");
		}
	}

	fn count(&self, name: &'static str) {
		if let Some(metrics) = self.metrics.as_ref() {
			metrics.increment(name);
		}
	}
}

async fn run_dispatcher(
	mut rx: mpsc::Receiver<FeedbackBatch>,
	worker: Arc<FeedbackWorker>,
	workers: usize,
) {
	let slots = Arc::new(Semaphore::new(workers));
	let mut in_flight = JoinSet::new();

	while let Some(batch) = rx.recv().await {
		let Ok(permit) = slots.clone().acquire_owned().await else { break };
		let worker = worker.clone();

		in_flight.spawn(async move {
			let _permit = permit;

			worker.process(batch).await;
		});

		while in_flight.try_join_next().is_some() {}
	}

	while in_flight.join_next().await.is_some() {}
}

struct FeedbackWorker {
	sink: Arc<dyn FeedbackSink>,
	trust: Arc<dyn TrustStore>,
	retry: RetryPolicy,
	nudge: NudgePolicy,
	deadline: Duration,
	metrics: Metrics,
}
impl FeedbackWorker {
	async fn process(&self, batch: FeedbackBatch) {
		let request_id = batch.request_id;
		let attempts =
			match tokio::time::timeout(self.deadline, self.deliver_with_retry(&batch)).await {
				Ok(Ok(attempts)) => attempts,
				Ok(Err(err)) => {
					self.metrics.increment(names::FEEDBACK_EXHAUSTED);

					tracing::warn!(%request_id, error = %err, "Feedback delivery exhausted; dropping batch.");

					return;
				},
				Err(_) => {
					self.metrics.increment(names::FEEDBACK_EXHAUSTED);

					tracing::warn!(
						%request_id,
						deadline_ms = self.deadline.as_millis() as u64,
						"Feedback dispatch deadline exceeded; dropping batch."
					);

					return;
				},
			};

		self.metrics.increment(names::FEEDBACK_DELIVERED);
		self.metrics.observe(names::FEEDBACK_ATTEMPTS, attempts as f64);

		tracing::debug!(%request_id, attempts, events = batch.events.len(), "Feedback delivered.");

		if self.nudge.enabled {
			self.apply_nudges(&batch).await;
		}
	}

	/// Returns the number of attempts used.
	async fn deliver_with_retry(&self, batch: &FeedbackBatch) -> Result<u32> {
		let max_attempts = self.retry.max_attempts.max(1);
		let mut attempt = 1;

		loop {
			let err = match self.sink.deliver(batch).await {
				Ok(()) => return Ok(attempt),
				Err(err) => err,
			};

			if !err.retryable || attempt >= max_attempts {
				return Err(Error::FeedbackDeliveryExhausted { attempts: attempt, message: err.message });
			}

			let delay = self.retry.delay_for_attempt(attempt, &mut rand::thread_rng());

			tracing::debug!(
				request_id = %batch.request_id,
				attempt,
				delay_ms = delay.as_millis() as u64,
				error = %err,
				"Feedback delivery failed; retrying."
			);

			self.metrics.increment(names::FEEDBACK_RETRIES);

			tokio::time::sleep(delay).await;

			attempt += 1;
		}
	}

	async fn apply_nudges(&self, batch: &FeedbackBatch) {
		for event in &batch.events {
			let delta = self.nudge.delta_for(event);

			if delta == 0.0 {
				continue;
			}

			let nudge = TrustNudge {
				event_id: event.event_id,
				memory_id: event.memory_id.clone(),
				request_id: event.request_id,
				used: event.used,
				delta,
				at: event.at,
			};

			match tokio::time::timeout(self.deadline, self.trust.apply_nudge(&nudge)).await {
				Ok(Ok(())) => self.metrics.increment(names::TRUST_NUDGES),
				Ok(Err(err)) => {
					self.metrics.increment(names::TRUST_NUDGE_FAILURES);

					tracing::warn!(
						memory_id = nudge.memory_id.as_str(),
						error = %err,
						"Trust nudge failed."
					);
				},
				Err(_) => {
					self.metrics.increment(names::TRUST_NUDGE_FAILURES);

					tracing::warn!(
						memory_id = nudge.memory_id.as_str(),
						deadline_ms = self.deadline.as_millis() as u64,
						"Trust nudge timed out."
					);
				},
			}
		}
	}
}

//! Postgres-backed trust scores. Trust is neutral at zero and clamped to [-1, 1].

use std::collections::HashMap;

use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{Result, models::TrustRow};

pub const TRUST_MIN: f32 = -1.0;
pub const TRUST_MAX: f32 = 1.0;

/// One trust change caused by a feedback event.
#[derive(Clone, Debug)]
pub struct TrustAdjustment {
	pub event_id: Uuid,
	pub memory_id: String,
	pub request_id: Uuid,
	pub used: bool,
	pub delta: f32,
	pub at: OffsetDateTime,
}

#[derive(Clone)]
pub struct PgTrustStore {
	pub pool: PgPool,
}
impl PgTrustStore {
	pub fn new(pool: PgPool) -> Self {
		Self { pool }
	}

	pub async fn get(&self, memory_id: &str) -> Result<Option<TrustRow>> {
		let row = sqlx::query_as::<_, TrustRow>(
			"\
SELECT memory_id, trust, adjustments, updated_at
FROM memory_trust
WHERE memory_id = $1",
		)
		.bind(memory_id)
		.fetch_optional(&self.pool)
		.await?;

		Ok(row)
	}

	pub async fn get_many(&self, memory_ids: &[String]) -> Result<HashMap<String, f32>> {
		if memory_ids.is_empty() {
			return Ok(HashMap::new());
		}

		let rows: Vec<(String, f32)> = sqlx::query_as(
			"\
SELECT memory_id, trust
FROM memory_trust
WHERE memory_id = ANY($1)",
		)
		.bind(memory_ids)
		.fetch_all(&self.pool)
		.await?;

		Ok(rows.into_iter().collect())
	}

	/// Adds `delta` to the stored trust and returns the clamped result.
	pub async fn adjust(&self, memory_id: &str, delta: f32, now: OffsetDateTime) -> Result<f32> {
		validate_delta(delta)?;

		let trust: f32 = sqlx::query_scalar(
			"\
INSERT INTO memory_trust (memory_id, trust, adjustments, updated_at)
VALUES ($1, LEAST(GREATEST($2, -1), 1), 1, $3)
ON CONFLICT (memory_id) DO UPDATE
SET
	trust = LEAST(GREATEST(memory_trust.trust + $2, -1), 1),
	adjustments = memory_trust.adjustments + 1,
	updated_at = $3
RETURNING trust",
		)
		.bind(memory_id)
		.bind(delta)
		.bind(now)
		.fetch_one(&self.pool)
		.await?;

		Ok(trust)
	}

	/// Applies an adjustment at most once per event id. Replays return the current trust
	/// without changing it.
	pub async fn apply_adjustment(&self, adjustment: &TrustAdjustment) -> Result<f32> {
		validate_delta(adjustment.delta)?;

		let mut tx = self.pool.begin().await?;
		let inserted = sqlx::query(
			"\
INSERT INTO memory_trust_events (event_id, memory_id, request_id, used, delta, created_at)
VALUES ($1, $2, $3, $4, $5, $6)
ON CONFLICT (event_id) DO NOTHING",
		)
		.bind(adjustment.event_id)
		.bind(adjustment.memory_id.as_str())
		.bind(adjustment.request_id)
		.bind(adjustment.used)
		.bind(adjustment.delta)
		.bind(adjustment.at)
		.execute(&mut *tx)
		.await?
		.rows_affected();

		if inserted == 0 {
			let current: Option<f32> =
				sqlx::query_scalar("SELECT trust FROM memory_trust WHERE memory_id = $1")
					.bind(adjustment.memory_id.as_str())
					.fetch_optional(&mut *tx)
					.await?;

			tx.commit().await?;

			return Ok(current.unwrap_or(0.0));
		}

		let trust: f32 = sqlx::query_scalar(
			"\
INSERT INTO memory_trust (memory_id, trust, adjustments, updated_at)
VALUES ($1, LEAST(GREATEST($2, -1), 1), 1, $3)
ON CONFLICT (memory_id) DO UPDATE
SET
	trust = LEAST(GREATEST(memory_trust.trust + $2, -1), 1),
	adjustments = memory_trust.adjustments + 1,
	updated_at = $3
RETURNING trust",
		)
		.bind(adjustment.memory_id.as_str())
		.bind(adjustment.delta)
		.bind(adjustment.at)
		.fetch_one(&mut *tx)
		.await?;

		tx.commit().await?;

		Ok(trust)
	}
}

pub fn clamp_trust(value: f32) -> f32 {
	if value.is_nan() { 0.0 } else { value.clamp(TRUST_MIN, TRUST_MAX) }
}

fn validate_delta(delta: f32) -> Result<()> {
	if !delta.is_finite() {
		return Err(crate::Error::InvalidArgument("Trust delta must be a finite number.".to_string()));
	}

	Ok(())
}

use std::{cmp::Ordering, collections::HashSet, time::Duration};

use tokio::time;

use crate::{Error, MemoryRecord, Result, VectorBackend};

#[derive(Clone, Copy, Debug)]
pub struct FetchOptions {
	pub limit: u32,
	pub timeout: Duration,
	pub health_timeout: Duration,
}

#[derive(Clone, Debug)]
pub struct FetchedCandidate {
	pub record: MemoryRecord,
	pub similarity: f32,
	/// 1-based.
	pub fetch_rank: u32,
}

#[derive(Clone, Debug)]
pub struct FetchOutcome {
	pub candidates: Vec<FetchedCandidate>,
	pub vector_available: bool,
	pub degraded_reason: Option<String>,
}

/// Fetches up to `limit` candidates ordered by descending similarity. An empty result is not
/// an error; an unreachable or slow backend is.
pub async fn fetch_candidates(
	backend: &dyn VectorBackend,
	query: &[f32],
	opts: &FetchOptions,
) -> Result<Vec<FetchedCandidate>> {
	if opts.limit == 0 || query.is_empty() {
		return Ok(Vec::new());
	}

	let hits = time::timeout(opts.timeout, backend.search(query, opts.limit))
		.await
		.map_err(|_| Error::Timeout { elapsed_ms: opts.timeout.as_millis() as u64 })??;
	let mut seen = HashSet::new();
	let mut hits = hits
		.into_iter()
		.filter(|hit| {
			if !hit.similarity.is_finite() {
				tracing::warn!(id = hit.id.as_str(), "Dropping hit with a non-finite similarity.");

				return false;
			}

			seen.insert(hit.id.clone())
		})
		.collect::<Vec<_>>();

	// Stable, so equal similarities keep backend order.
	hits.sort_by(|a, b| cmp_f32_desc(a.similarity, b.similarity));
	hits.truncate(opts.limit as usize);

	Ok(hits
		.into_iter()
		.enumerate()
		.map(|(idx, hit)| {
			let similarity = hit.similarity;

			FetchedCandidate {
				record: MemoryRecord::from_hit(hit),
				similarity,
				fetch_rank: idx as u32 + 1,
			}
		})
		.collect())
}

/// Like [`fetch_candidates`], but backend failures become an empty, degraded outcome.
pub async fn fetch_or_degrade(
	backend: &dyn VectorBackend,
	query: &[f32],
	opts: &FetchOptions,
) -> FetchOutcome {
	match fetch_candidates(backend, query, opts).await {
		Ok(candidates) =>
			FetchOutcome { candidates, vector_available: true, degraded_reason: None },
		Err(err) => {
			let vector_available =
				time::timeout(opts.health_timeout, backend.health()).await.unwrap_or(false);

			tracing::warn!(error = %err, vector_available, "Candidate fetch degraded to an empty result.");

			FetchOutcome {
				candidates: Vec::new(),
				vector_available,
				degraded_reason: Some(err.to_string()),
			}
		},
	}
}

/// Descending order with NaN last.
pub fn cmp_f32_desc(a: f32, b: f32) -> Ordering {
	match (a.is_nan(), b.is_nan()) {
		(true, true) => Ordering::Equal,
		(true, false) => Ordering::Greater,
		(false, true) => Ordering::Less,
		(false, false) => b.partial_cmp(&a).unwrap_or(Ordering::Equal),
	}
}

#[cfg(test)]
mod tests {
	use std::time::Duration;

	use serde_json::Map;

	use super::FetchOptions;
	use crate::{BoxFuture, Error, Result, VectorBackend, VectorHit};

	enum Behavior {
		Hits(Vec<(&'static str, f32)>),
		Fail,
		Hang,
	}

	struct StubBackend {
		behavior: Behavior,
		healthy: bool,
	}

	impl VectorBackend for StubBackend {
		fn search<'a>(&'a self, _: &'a [f32], _: u32) -> BoxFuture<'a, Result<Vec<VectorHit>>> {
			Box::pin(async move {
				match &self.behavior {
					Behavior::Hits(hits) => Ok(hits
						.iter()
						.map(|(id, similarity)| VectorHit {
							id: id.to_string(),
							embedding: Vec::new(),
							payload: Map::new(),
							similarity: *similarity,
						})
						.collect()),
					Behavior::Fail =>
						Err(Error::BackendUnavailable { message: "connection refused".to_string() }),
					Behavior::Hang => {
						tokio::time::sleep(Duration::from_secs(3_600)).await;

						Ok(Vec::new())
					},
				}
			})
		}

		fn health<'a>(&'a self) -> BoxFuture<'a, bool> {
			Box::pin(async move { self.healthy })
		}
	}

	fn opts(limit: u32) -> FetchOptions {
		FetchOptions {
			limit,
			timeout: Duration::from_millis(100),
			health_timeout: Duration::from_millis(50),
		}
	}

	fn ids(candidates: &[super::FetchedCandidate]) -> Vec<&str> {
		candidates.iter().map(|candidate| candidate.record.id.as_str()).collect()
	}

	#[tokio::test]
	async fn orders_by_similarity_and_keeps_ties_stable() {
		let backend = StubBackend {
			behavior: Behavior::Hits(vec![("c", 0.5), ("a", 0.9), ("b", 0.5), ("d", 0.7)]),
			healthy: true,
		};
		let candidates =
			super::fetch_candidates(&backend, &[1.0], &opts(10)).await.expect("Fetch must succeed.");

		assert_eq!(ids(&candidates), vec!["a", "d", "c", "b"]);
		assert_eq!(
			candidates.iter().map(|candidate| candidate.fetch_rank).collect::<Vec<_>>(),
			vec![1, 2, 3, 4]
		);
	}

	#[tokio::test]
	async fn drops_duplicates_and_non_finite_scores_and_truncates() {
		let backend = StubBackend {
			behavior: Behavior::Hits(vec![
				("a", 0.9),
				("a", 0.8),
				("nan", f32::NAN),
				("b", 0.7),
				("c", 0.6),
			]),
			healthy: true,
		};
		let candidates =
			super::fetch_candidates(&backend, &[1.0], &opts(2)).await.expect("Fetch must succeed.");

		assert_eq!(ids(&candidates), vec!["a", "b"]);
	}

	#[tokio::test]
	async fn empty_backend_result_is_not_an_error() {
		let backend = StubBackend { behavior: Behavior::Hits(Vec::new()), healthy: true };
		let outcome = super::fetch_or_degrade(&backend, &[1.0], &opts(5)).await;

		assert!(outcome.candidates.is_empty());
		assert!(outcome.vector_available);
		assert!(outcome.degraded_reason.is_none());
	}

	#[tokio::test]
	async fn unreachable_backend_is_distinguishable_and_degrades() {
		let backend = StubBackend { behavior: Behavior::Fail, healthy: false };
		let err = super::fetch_candidates(&backend, &[1.0], &opts(5))
			.await
			.expect_err("Expected a backend error.");

		assert!(matches!(err, Error::BackendUnavailable { .. }));

		let outcome = super::fetch_or_degrade(&backend, &[1.0], &opts(5)).await;

		assert!(outcome.candidates.is_empty());
		assert!(!outcome.vector_available);
		assert_eq!(
			outcome.degraded_reason.as_deref(),
			Some("Backend unavailable: connection refused")
		);
	}

	#[tokio::test(start_paused = true)]
	async fn slow_backend_times_out() {
		let backend = StubBackend { behavior: Behavior::Hang, healthy: true };
		let err = super::fetch_candidates(&backend, &[1.0], &opts(5))
			.await
			.expect_err("Expected a timeout.");

		assert!(matches!(err, Error::Timeout { elapsed_ms: 100 }));

		let outcome = super::fetch_or_degrade(&backend, &[1.0], &opts(5)).await;

		assert!(outcome.vector_available);
		assert!(outcome.degraded_reason.is_some());
	}

	#[test]
	fn nan_sorts_last() {
		let mut values = vec![0.1, f32::NAN, 0.9];

		values.sort_by(|a, b| super::cmp_f32_desc(*a, *b));

		assert_eq!(values[0], 0.9);
		assert_eq!(values[1], 0.1);
		assert!(values[2].is_nan());
	}
}

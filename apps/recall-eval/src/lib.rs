use std::{
	collections::{BTreeMap, HashSet},
	fs,
	path::{Path, PathBuf},
	sync::Arc,
	time::Instant,
};

use clap::{
	Parser,
	builder::{
		Styles,
		styling::{AnsiColor, Effects},
	},
};
use color_eyre::eyre;
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use recall_config::{Config, ProfileConfig};
use recall_providers::feedback::FeedbackClient;
use recall_service::{
	Collaborators, DebugSnapshot, JsonFileBeliefSource, ProfileOverride, RecallService,
	RetrieveRequest, metrics::names,
};
use recall_storage::{db::Db, qdrant::QdrantStore, trust::PgTrustStore};

pub const VERSION: &str = concat!(
	env!("CARGO_PKG_VERSION"),
	"-",
	env!("VERGEN_GIT_SHA"),
	"-",
	env!("VERGEN_CARGO_TARGET_TRIPLE"),
);

const REPORTED_COUNTERS: [&str; 5] = [
	names::REQUESTS,
	names::DEGRADED,
	names::PROFILE_OVERRIDE_REJECTED,
	names::FEEDBACK_ENQUEUED,
	names::FEEDBACK_DROPPED,
];

#[derive(Debug, Parser)]
#[command(
	version = VERSION,
	rename_all = "kebab",
	styles = styles(),
)]
pub struct Args {
	#[arg(long, short = 'c', value_name = "FILE")]
	pub config: PathBuf,
	#[arg(long, short = 'd', value_name = "FILE")]
	pub dataset: PathBuf,
	/// Overrides the selection size of every query's profile.
	#[arg(long, value_name = "N")]
	pub top_n: Option<u32>,
	/// Include each query's debug snapshot in the output.
	#[arg(long)]
	pub snapshots: bool,
}

#[derive(Debug, Deserialize)]
struct EvalDataset {
	name: Option<String>,
	queries: Vec<EvalQuery>,
}

#[derive(Debug, Deserialize)]
struct EvalQuery {
	id: Option<String>,
	embedding: Vec<f32>,
	expected_ids: Vec<String>,
	profile: Option<ProfileOverride>,
}

#[derive(Debug, Serialize)]
struct EvalOutput {
	dataset: EvalDatasetInfo,
	settings: EvalSettings,
	summary: EvalSummary,
	queries: Vec<QueryReport>,
}

#[derive(Debug, Serialize)]
struct EvalDatasetInfo {
	name: String,
	query_count: usize,
}

#[derive(Debug, Serialize)]
struct EvalSettings {
	config_path: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	top_n: Option<u32>,
	default_profile: String,
}

#[derive(Debug, Serialize)]
struct EvalSummary {
	mean_recall_at_k: f64,
	mrr: f64,
	degraded_count: usize,
	latency_ms_mean: f64,
	counters: BTreeMap<&'static str, u64>,
}

#[derive(Debug, Serialize)]
struct QueryReport {
	id: String,
	request_id: Uuid,
	profile: String,
	/// Why the query's profile override was rejected.
	#[serde(skip_serializing_if = "Option::is_none")]
	profile_error: Option<String>,
	expected_count: usize,
	retrieved_count: usize,
	relevant_count: usize,
	recall_at_k: f64,
	rr: f64,
	latency_ms: f64,
	degraded: bool,
	expected_ids: Vec<String>,
	retrieved_ids: Vec<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	snapshot: Option<DebugSnapshot>,
}

struct QueryMetrics {
	recall_at_k: f64,
	rr: f64,
	relevant_count: usize,
}

pub fn styles() -> Styles {
	Styles::styled()
		.header(AnsiColor::Red.on_default() | Effects::BOLD)
		.usage(AnsiColor::Red.on_default() | Effects::BOLD)
		.literal(AnsiColor::Blue.on_default() | Effects::BOLD)
		.placeholder(AnsiColor::Green.on_default())
}

pub async fn run(args: Args) -> color_eyre::Result<()> {
	let config = recall_config::load(&args.config)?;
	let (filter, invalid_level) = match EnvFilter::try_new(&config.service.log_level) {
		Ok(filter) => (filter, None),
		Err(err) => (EnvFilter::new("info"), Some(err)),
	};

	tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

	if let Some(err) = invalid_level {
		tracing::warn!(
			log_level = config.service.log_level.as_str(),
			error = %err,
			"Invalid log level; falling back to info."
		);
	}

	let dataset = load_dataset(&args.dataset)?;
	let collaborators = build_collaborators(&config).await?;
	let service = RecallService::new(&config, collaborators);
	let output = evaluate(&service, &dataset, &args).await;

	service.shutdown().await;

	let output = output?;
	let json = serde_json::to_string_pretty(&output)?;

	println!("{json}");

	Ok(())
}

async fn build_collaborators(config: &Config) -> color_eyre::Result<Collaborators> {
	let qdrant = QdrantStore::new(&config.storage.qdrant)?;
	let mut collaborators = Collaborators::new(Arc::new(qdrant))
		.with_beliefs(Arc::new(JsonFileBeliefSource::from_config(&config.beliefs)));

	if let Some(postgres) = config.storage.postgres.as_ref() {
		let db = Db::connect(postgres).await?;

		db.ensure_schema().await?;

		collaborators = collaborators.with_trust(Arc::new(PgTrustStore::new(db.pool)));
	} else {
		tracing::info!("No Postgres configured; trust is kept in memory.");
	}

	if let Some(http) = config.feedback.http.as_ref() {
		let client = FeedbackClient::new(http)?;

		tracing::info!(url = client.url(), "Feedback batches will be posted.");

		collaborators = collaborators.with_feedback(Arc::new(client));
	}

	Ok(collaborators)
}

fn load_dataset(path: &Path) -> color_eyre::Result<EvalDataset> {
	let raw = fs::read_to_string(path)?;
	let dataset: EvalDataset = serde_json::from_str(&raw)?;

	if dataset.queries.is_empty() {
		return Err(eyre::eyre!("Dataset must include at least one query."));
	}

	Ok(dataset)
}

async fn evaluate(
	service: &RecallService,
	dataset: &EvalDataset,
	args: &Args,
) -> color_eyre::Result<EvalOutput> {
	let mut reports = Vec::with_capacity(dataset.queries.len());

	for (index, query) in dataset.queries.iter().enumerate() {
		let id = query.id.clone().unwrap_or_else(|| format!("q{}", index + 1));
		let request = RetrieveRequest {
			profile: with_top_n(query.profile.clone(), args.top_n),
			..RetrieveRequest::new(query.embedding.clone())
		};
		let started = Instant::now();
		let response = service.retrieve(request).await;
		let latency_ms = started.elapsed().as_secs_f64() * 1_000.0;
		let expected = query.expected_ids.iter().cloned().collect::<HashSet<_>>();
		let retrieved =
			response.items.iter().map(|item| item.record.id.clone()).collect::<Vec<_>>();
		let metrics = compute_metrics(&retrieved, &expected);
		let snapshot = response.snapshot;

		reports.push(QueryReport {
			id,
			request_id: response.request_id,
			profile: snapshot.profile.name.clone(),
			profile_error: snapshot.profile.override_error.clone(),
			expected_count: expected.len(),
			retrieved_count: retrieved.len(),
			relevant_count: metrics.relevant_count,
			recall_at_k: metrics.recall_at_k,
			rr: metrics.rr,
			latency_ms,
			degraded: snapshot.backend.degraded_reason.is_some(),
			expected_ids: query.expected_ids.clone(),
			retrieved_ids: retrieved,
			snapshot: args.snapshots.then(|| Arc::unwrap_or_clone(snapshot)),
		});
	}

	let counters: BTreeMap<&'static str, u64> = service
		.metrics()
		.local()
		.map(|local| REPORTED_COUNTERS.iter().map(|name| (*name, local.counter(name))).collect())
		.unwrap_or_default();
	let (default_profile, _) = service.profiles().default_profile();

	Ok(EvalOutput {
		dataset: EvalDatasetInfo {
			name: dataset.name.clone().unwrap_or_else(|| "eval".to_string()),
			query_count: reports.len(),
		},
		settings: EvalSettings {
			config_path: args.config.display().to_string(),
			top_n: args.top_n,
			default_profile: default_profile.name.clone(),
		},
		summary: summarize(&reports, counters),
		queries: reports,
	})
}

/// Layers `--top-n` over the query's own profile override.
fn with_top_n(profile: Option<ProfileOverride>, top_n: Option<u32>) -> Option<ProfileOverride> {
	let Some(top_n) = top_n else { return profile };
	let mut profile = profile.unwrap_or_default();
	let mut values = profile.values.take().unwrap_or_else(ProfileConfig::default);

	values.top_n = Some(top_n);
	profile.values = Some(values);

	Some(profile)
}

fn compute_metrics(retrieved: &[String], expected: &HashSet<String>) -> QueryMetrics {
	let mut seen = HashSet::new();
	let mut relevant_count = 0_usize;
	let mut first_hit = None;

	for (idx, id) in retrieved.iter().enumerate() {
		if !seen.insert(id.as_str()) || !expected.contains(id) {
			continue;
		}

		relevant_count += 1;

		if first_hit.is_none() {
			first_hit = Some(idx + 1);
		}
	}

	let recall_at_k =
		if expected.is_empty() { 0.0 } else { relevant_count as f64 / expected.len() as f64 };
	let rr = first_hit.map(|rank| 1.0 / rank as f64).unwrap_or(0.0);

	QueryMetrics { recall_at_k, rr, relevant_count }
}

fn summarize(reports: &[QueryReport], counters: BTreeMap<&'static str, u64>) -> EvalSummary {
	let count = reports.len().max(1) as f64;

	EvalSummary {
		mean_recall_at_k: reports.iter().map(|r| r.recall_at_k).sum::<f64>() / count,
		mrr: reports.iter().map(|r| r.rr).sum::<f64>() / count,
		degraded_count: reports.iter().filter(|r| r.degraded).count(),
		latency_ms_mean: reports.iter().map(|r| r.latency_ms).sum::<f64>() / count,
		counters,
	}
}

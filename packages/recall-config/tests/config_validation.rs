use std::{
	env, fs,
	path::PathBuf,
	sync::atomic::{AtomicU64, Ordering},
	time::{SystemTime, UNIX_EPOCH},
};

use toml::{Table, Value};

use recall_config::{Config, Error, ProfileConfig};

const SAMPLE_CONFIG_TEMPLATE_TOML: &str = include_str!("fixtures/sample_config.template.toml");

fn sample_table() -> Table {
	toml::from_str(SAMPLE_CONFIG_TEMPLATE_TOML).expect("Failed to parse template config.")
}

fn section<'a>(root: &'a mut Table, key: &str) -> &'a mut Table {
	root.get_mut(key)
		.and_then(Value::as_table_mut)
		.unwrap_or_else(|| panic!("Template config must include [{key}]."))
}

fn render(table: &Table) -> String {
	toml::to_string(table).expect("Failed to render template config.")
}

fn write_temp_config(payload: String) -> PathBuf {
	static COUNTER: AtomicU64 = AtomicU64::new(0);

	let nanos = SystemTime::now()
		.duration_since(UNIX_EPOCH)
		.expect("System time must be valid.")
		.as_nanos();
	let ordinal = COUNTER.fetch_add(1, Ordering::SeqCst);
	let pid = std::process::id();
	let mut path = env::temp_dir();

	path.push(format!("recall_config_test_{nanos}_{pid}_{ordinal}.toml"));

	fs::write(&path, payload).expect("Failed to write test config.");

	path
}

fn load_table(table: &Table) -> recall_config::Result<Config> {
	let path = write_temp_config(render(table));
	let result = recall_config::load(&path);

	fs::remove_file(&path).expect("Failed to remove test config.");

	result
}

fn expect_validation_error(table: &Table, expected: &str) {
	let err = load_table(table).expect_err("Expected validation error.");
	let message = err.to_string();

	assert!(matches!(err, Error::Validation { .. }), "Unexpected error kind: {err:?}");
	assert!(message.contains(expected), "Unexpected error message: {message}");
}

#[test]
fn sample_config_loads() {
	let cfg = load_table(&sample_table()).expect("Sample config must load.");

	assert_eq!(cfg.storage.qdrant.collection, "recall_memories");
	assert!(cfg.storage.postgres.is_none());
	assert!(cfg.features.belief_engine);
	assert!(!cfg.features.decisive_filter);
	assert_eq!(cfg.feedback.max_attempts, 3);
	assert_eq!(cfg.debug.retain_snapshots, 16);

	let precise = cfg.profiles.get("precise").expect("Expected the precise profile.");

	assert_eq!(precise.mmr_lambda, Some(0.9));
	assert_eq!(precise.decisive.as_ref().and_then(|decisive| decisive.min_keep), Some(2));
	assert_eq!(precise.trust_weight, None);
}

#[test]
fn omitted_sections_fall_back_to_defaults() {
	let mut table = sample_table();

	for key in ["retrieval", "features", "beliefs", "scoring", "profiles", "feedback", "debug"] {
		table.remove(key);
	}

	let cfg = load_table(&table).expect("Minimal config must load.");

	assert_eq!(cfg.retrieval.fetch_timeout_ms, 1_500);
	assert!(cfg.features.feedback);
	assert!(cfg.features.trust_nudge);
	assert!(cfg.beliefs.path.is_none());
	assert_eq!(cfg.scoring.env_var, "RECALL_SCORING_PROFILE");
	assert!(cfg.profiles.is_empty());
	assert_eq!(cfg.feedback.workers, 4);
	assert_eq!(cfg.debug.retain_snapshots, 64);
}

#[test]
fn blank_belief_path_is_normalized_to_none() {
	let mut table = sample_table();

	section(&mut table, "beliefs").insert("path".to_string(), Value::String("  ".to_string()));

	let cfg = load_table(&table).expect("Config must load.");

	assert!(cfg.beliefs.path.is_none());
}

#[test]
fn vector_dim_must_be_positive() {
	let mut table = sample_table();
	let storage = section(&mut table, "storage");

	section(storage, "qdrant").insert("vector_dim".to_string(), Value::Integer(0));

	expect_validation_error(&table, "storage.qdrant.vector_dim must be greater than zero.");
}

#[test]
fn default_profile_must_name_a_known_profile() {
	let mut table = sample_table();

	section(&mut table, "scoring")
		.insert("default_profile".to_string(), Value::String("missing".to_string()));

	expect_validation_error(&table, "scoring.default_profile names unknown profile \"missing\".");
}

#[test]
fn profile_mmr_lambda_must_be_in_range() {
	let mut table = sample_table();
	let profiles = section(&mut table, "profiles");

	section(profiles, "precise").insert("mmr_lambda".to_string(), Value::Float(1.5));

	expect_validation_error(&table, "profiles.precise.mmr_lambda must be in the range 0.0-1.0.");
}

#[test]
fn profile_candidate_k_must_cover_top_n() {
	let mut table = sample_table();
	let profiles = section(&mut table, "profiles");

	section(profiles, "precise").insert("candidate_k".to_string(), Value::Integer(3));

	expect_validation_error(
		&table,
		"profiles.precise.candidate_k must be greater than or equal to top_n.",
	);
}

#[test]
fn profile_rejects_unknown_decisive_mode() {
	let mut table = sample_table();
	let profiles = section(&mut table, "profiles");
	let precise = section(profiles, "precise");

	section(precise, "decisive").insert("mode".to_string(), Value::String("median".to_string()));

	expect_validation_error(&table, "profiles.precise.decisive.mode must be one of relative or top_k.");
}

#[test]
fn profile_rejects_unknown_fields() {
	let mut table = sample_table();
	let profiles = section(&mut table, "profiles");

	section(profiles, "precise").insert("lambda".to_string(), Value::Float(0.5));

	let err = load_table(&table).expect_err("Expected parse error.");

	assert!(matches!(err, Error::ParseConfig { .. }), "Unexpected error kind: {err:?}");
}

#[test]
fn feedback_base_delay_must_not_exceed_max_delay() {
	let mut table = sample_table();
	let feedback = section(&mut table, "feedback");

	feedback.insert("base_delay_ms".to_string(), Value::Integer(5_000));
	feedback.insert("max_delay_ms".to_string(), Value::Integer(1_000));

	expect_validation_error(
		&table,
		"feedback.base_delay_ms must be less than or equal to feedback.max_delay_ms.",
	);
}

#[test]
fn feedback_requires_at_least_one_attempt() {
	let mut table = sample_table();

	section(&mut table, "feedback").insert("max_attempts".to_string(), Value::Integer(0));

	expect_validation_error(&table, "feedback.max_attempts must be greater than zero.");
}

#[test]
fn profile_field_validation_reports_label() {
	let profile = ProfileConfig { recency_half_life_days: Some(0.0), ..Default::default() };
	let message = recall_config::validate_profile_fields("override", &profile)
		.expect_err("Expected a validation message.");

	assert_eq!(
		message,
		"override.recency_half_life_days must be a finite number greater than zero."
	);
}

#[test]
fn missing_file_reports_read_error() {
	let mut path = env::temp_dir();

	path.push("recall_config_test_missing_file.toml");

	let err = recall_config::load(&path).expect_err("Expected read error.");

	assert!(matches!(err, Error::ReadConfig { .. }), "Unexpected error kind: {err:?}");
}

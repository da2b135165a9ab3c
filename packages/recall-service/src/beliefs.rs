//! Active-belief set used by the conflict penalty.

use std::{
	collections::BTreeSet,
	fs,
	path::PathBuf,
	sync::{
		Arc, Mutex,
		atomic::{AtomicU64, Ordering},
	},
};

use arc_swap::ArcSwapOption;
use serde::Deserialize;

use crate::{BeliefSource, Error, Result};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BeliefSet {
	pub version: u64,
	pub tags: BTreeSet<String>,
	/// False when the source failed and the set fell back to empty.
	pub loaded: bool,
}
impl BeliefSet {
	pub fn contains(&self, tag: &str) -> bool {
		self.tags.contains(tag)
	}

	pub fn len(&self) -> usize {
		self.tags.len()
	}

	pub fn is_empty(&self) -> bool {
		self.tags.is_empty()
	}
}

/// Versioned cache over a [`BeliefSource`]. Reads are lock-free; loads are serialized so the
/// source is read once per load.
pub struct BeliefCache {
	source: Arc<dyn BeliefSource>,
	versions: AtomicU64,
	current: ArcSwapOption<BeliefSet>,
	loading: Mutex<()>,
}
impl BeliefCache {
	pub fn new(source: Arc<dyn BeliefSource>) -> Self {
		Self {
			source,
			versions: AtomicU64::new(0),
			current: ArcSwapOption::empty(),
			loading: Mutex::new(()),
		}
	}

	/// The cached set, loading it on first use.
	pub fn current(&self) -> Arc<BeliefSet> {
		if let Some(set) = self.current.load_full() {
			return set;
		}

		let _loading = self.loading.lock().unwrap_or_else(|err| err.into_inner());

		// Another caller may have finished the first load while this one waited.
		match self.current.load_full() {
			Some(set) => set,
			None => self.load(),
		}
	}

	pub fn reload(&self) -> Arc<BeliefSet> {
		let _loading = self.loading.lock().unwrap_or_else(|err| err.into_inner());

		self.load()
	}

	fn load(&self) -> Arc<BeliefSet> {
		let version = self.versions.fetch_add(1, Ordering::SeqCst) + 1;
		let set = match self.source.load_active_beliefs() {
			Ok(tags) => {
				tracing::info!(version, active_beliefs = tags.len(), "Active beliefs loaded.");

				BeliefSet { version, tags, loaded: true }
			},
			Err(err) => {
				tracing::warn!(version, error = %err, "Active beliefs unavailable; using an empty set.");

				BeliefSet { version, tags: BTreeSet::new(), loaded: false }
			},
		};
		let set = Arc::new(set);

		self.current.store(Some(set.clone()));

		set
	}
}

/// Reads active beliefs from a JSON file. No path means no active beliefs.
pub struct JsonFileBeliefSource {
	path: Option<PathBuf>,
}
impl JsonFileBeliefSource {
	pub fn new(path: Option<PathBuf>) -> Self {
		Self { path }
	}

	pub fn from_config(cfg: &recall_config::Beliefs) -> Self {
		Self::new(cfg.path.as_ref().map(PathBuf::from))
	}
}

impl BeliefSource for JsonFileBeliefSource {
	fn load_active_beliefs(&self) -> Result<BTreeSet<String>> {
		let Some(path) = self.path.as_ref() else { return Ok(BTreeSet::new()) };
		let raw = fs::read_to_string(path).map_err(|err| Error::BackendUnavailable {
			message: format!("Failed to read active beliefs at {}: {err}", path.display()),
		})?;

		parse_active_beliefs(&raw)
	}
}

/// A fixed set, for callers that resolve beliefs elsewhere.
#[derive(Clone, Debug, Default)]
pub struct StaticBeliefSource {
	pub tags: BTreeSet<String>,
}

impl BeliefSource for StaticBeliefSource {
	fn load_active_beliefs(&self) -> Result<BTreeSet<String>> {
		Ok(self.tags.clone())
	}
}

#[derive(Deserialize)]
#[serde(untagged)]
enum BeliefDocument {
	Tags(Vec<String>),
	Object { active_beliefs: Vec<BeliefEntry> },
}

#[derive(Deserialize)]
#[serde(untagged)]
enum BeliefEntry {
	Tag(String),
	Detailed {
		tag: String,
		#[serde(default = "default_active")]
		active: bool,
	},
}

pub fn parse_active_beliefs(raw: &str) -> Result<BTreeSet<String>> {
	let document: BeliefDocument = serde_json::from_str(raw).map_err(|err| {
		Error::MalformedConfig { message: format!("Active beliefs JSON is malformed: {err}") }
	})?;
	let tags = match document {
		BeliefDocument::Tags(tags) => tags,
		BeliefDocument::Object { active_beliefs } => active_beliefs
			.into_iter()
			.filter_map(|entry| match entry {
				BeliefEntry::Tag(tag) => Some(tag),
				BeliefEntry::Detailed { tag, active } => active.then_some(tag),
			})
			.collect(),
	};

	Ok(tags
		.into_iter()
		.map(|tag| tag.trim().to_string())
		.filter(|tag| !tag.is_empty())
		.collect())
}

fn default_active() -> bool {
	true
}

#[cfg(test)]
mod tests {
	use std::{
		collections::BTreeSet,
		sync::{
			Arc,
			atomic::{AtomicUsize, Ordering},
		},
		thread,
	};

	use super::{BeliefCache, JsonFileBeliefSource};
	use crate::{BeliefSource, Error, Result};

	struct CountingSource {
		calls: AtomicUsize,
		fail: bool,
	}

	impl BeliefSource for CountingSource {
		fn load_active_beliefs(&self) -> Result<BTreeSet<String>> {
			self.calls.fetch_add(1, Ordering::SeqCst);

			if self.fail {
				return Err(Error::MalformedConfig { message: "bad json".to_string() });
			}

			Ok(["db".to_string()].into_iter().collect())
		}
	}

	#[test]
	fn parses_plain_tag_arrays() {
		let tags = super::parse_active_beliefs(r#"["db", " cache ", ""]"#).expect("Must parse.");

		assert_eq!(tags.into_iter().collect::<Vec<_>>(), vec!["cache", "db"]);
	}

	#[test]
	fn parses_object_form_and_skips_inactive() {
		let raw = r#"{
			"active_beliefs": [
				"db",
				{ "tag": "cache", "active": false },
				{ "tag": "queue" }
			]
		}"#;
		let tags = super::parse_active_beliefs(raw).expect("Must parse.");

		assert_eq!(tags.into_iter().collect::<Vec<_>>(), vec!["db", "queue"]);
	}

	#[test]
	fn malformed_json_is_a_config_error() {
		let err = super::parse_active_beliefs("{ not json").expect_err("Expected a parse error.");

		assert!(matches!(err, Error::MalformedConfig { .. }));
	}

	#[test]
	fn missing_path_means_no_beliefs() {
		let source = JsonFileBeliefSource::new(None);

		assert!(source.load_active_beliefs().expect("Must load.").is_empty());
	}

	#[test]
	fn missing_file_is_backend_unavailable() {
		let source = JsonFileBeliefSource::new(Some("/nonexistent/recall/beliefs.json".into()));
		let err = source.load_active_beliefs().expect_err("Expected a read error.");

		assert!(matches!(err, Error::BackendUnavailable { .. }));
	}

	#[test]
	fn cache_loads_once_until_reload() {
		let source = Arc::new(CountingSource { calls: AtomicUsize::new(0), fail: false });
		let cache = BeliefCache::new(source.clone());
		let first = cache.current();
		let second = cache.current();

		assert_eq!(source.calls.load(Ordering::SeqCst), 1);
		assert!(Arc::ptr_eq(&first, &second));
		assert_eq!(first.version, 1);
		assert!(first.contains("db"));

		let reloaded = cache.reload();

		assert_eq!(source.calls.load(Ordering::SeqCst), 2);
		assert_eq!(reloaded.version, 2);
		assert_eq!(cache.current().version, 2);
	}

	#[test]
	fn concurrent_first_use_loads_once() {
		let source = Arc::new(CountingSource { calls: AtomicUsize::new(0), fail: false });
		let cache = BeliefCache::new(source.clone());
		let versions = thread::scope(|scope| {
			let handles =
				(0..8).map(|_| scope.spawn(|| cache.current().version)).collect::<Vec<_>>();

			handles
				.into_iter()
				.map(|handle| handle.join().expect("Reader thread panicked."))
				.collect::<Vec<_>>()
		});

		assert_eq!(source.calls.load(Ordering::SeqCst), 1);
		assert!(versions.iter().all(|version| *version == 1));
	}

	#[test]
	fn failing_source_degrades_to_empty_set() {
		let source = Arc::new(CountingSource { calls: AtomicUsize::new(0), fail: true });
		let cache = BeliefCache::new(source.clone());
		let set = cache.current();

		assert!(!set.loaded);
		assert!(set.is_empty());

		cache.current();

		assert_eq!(source.calls.load(Ordering::SeqCst), 1);
	}
}

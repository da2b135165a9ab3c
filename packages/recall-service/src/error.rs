pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("Backend unavailable: {message}")]
	BackendUnavailable { message: String },
	#[error("Backend call timed out after {elapsed_ms} ms.")]
	Timeout { elapsed_ms: u64 },
	#[error("Malformed config: {message}")]
	MalformedConfig { message: String },
	#[error("Feedback delivery exhausted after {attempts} attempt(s): {message}")]
	FeedbackDeliveryExhausted { attempts: u32, message: String },
	#[error("Invariant violation: {message}")]
	InvariantViolation { message: String },
	#[error("Storage error: {message}")]
	Storage { message: String },
}
impl From<recall_storage::Error> for Error {
	fn from(err: recall_storage::Error) -> Self {
		match err {
			recall_storage::Error::Sqlx(inner) => Self::Storage { message: inner.to_string() },
			recall_storage::Error::InvalidArgument(message) => Self::BackendUnavailable { message },
			recall_storage::Error::Qdrant(inner) =>
				Self::BackendUnavailable { message: inner.to_string() },
		}
	}
}

impl From<recall_config::Error> for Error {
	fn from(err: recall_config::Error) -> Self {
		Self::MalformedConfig { message: err.to_string() }
	}
}

/// Panics in debug builds. In release builds only logs; the caller fails closed.
pub(crate) fn invariant_violation(message: &str) {
	let err = Error::InvariantViolation { message: message.to_string() };

	if cfg!(debug_assertions) {
		panic!("{err}");
	}

	tracing::error!(error = %err, "Failing closed.");
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error(transparent)]
	Reqwest(#[from] reqwest::Error),
	#[error(transparent)]
	InvalidHeaderName(#[from] reqwest::header::InvalidHeaderName),
	#[error(transparent)]
	InvalidHeaderValue(#[from] reqwest::header::InvalidHeaderValue),
	#[error("{message}")]
	InvalidConfig { message: String },
	#[error("Feedback endpoint rejected the batch with status {status}.")]
	Rejected { status: u16 },
}
impl Error {
	/// Whether sending the same request again can succeed.
	pub fn is_retryable(&self) -> bool {
		match self {
			Self::Reqwest(err) => !err.is_builder() && !err.is_decode(),
			Self::Rejected { status } => is_retryable_status(*status),
			Self::InvalidHeaderName(_) | Self::InvalidHeaderValue(_) | Self::InvalidConfig { .. } =>
				false,
		}
	}
}

/// Server errors, timeouts, and throttling are transient. Other client errors are not.
pub fn is_retryable_status(status: u16) -> bool {
	status >= 500 || status == 408 || status == 429
}

use std::time::Duration;

use reqwest::{Client, header::HeaderMap};
use serde_json::Value;

use crate::{Error, Result};

/// Posts feedback batches as JSON to a configured endpoint.
pub struct FeedbackClient {
	client: Client,
	url: String,
	headers: HeaderMap,
}
impl FeedbackClient {
	pub fn new(cfg: &recall_config::FeedbackHttp) -> Result<Self> {
		let client = Client::builder().timeout(Duration::from_millis(cfg.timeout_ms)).build()?;
		let headers = crate::auth_headers(cfg.api_key.as_deref(), &cfg.default_headers)?;

		Ok(Self { client, url: cfg.url.clone(), headers })
	}

	pub fn url(&self) -> &str {
		&self.url
	}

	pub async fn deliver(&self, body: &Value) -> Result<()> {
		let res =
			self.client.post(&self.url).headers(self.headers.clone()).json(body).send().await?;

		check_status(res.status().as_u16())
	}
}

fn check_status(status: u16) -> Result<()> {
	if (200..300).contains(&status) {
		return Ok(());
	}

	Err(Error::Rejected { status })
}

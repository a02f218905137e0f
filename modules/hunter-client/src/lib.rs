pub mod error;
pub mod types;

pub use error::{HunterError, Result};
pub use types::{DomainSearch, EmailEntry};

use std::time::Duration;

use types::ApiResponse;

const BASE_URL: &str = "https://api.hunter.io/v2";

pub struct HunterClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl HunterClient {
    pub fn new(api_key: String) -> Result<Self> {
        Self::with_base_url(api_key, BASE_URL)
    }

    /// Point the client at a different host (staging, local stub).
    pub fn with_base_url(api_key: String, base_url: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Look up addresses published for a domain. Returns at most `limit` entries.
    pub async fn domain_search(&self, domain: &str, limit: u32) -> Result<DomainSearch> {
        tracing::debug!(domain, limit, "Hunter domain search");

        let url = format!("{}/domain-search", self.base_url);
        let limit = limit.to_string();
        let resp = self
            .client
            .get(&url)
            .query(&[
                ("domain", domain),
                ("api_key", self.api_key.as_str()),
                ("limit", limit.as_str()),
            ])
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(HunterError::Api {
                status: status.as_u16(),
                message: body,
            });
        }

        let body = resp.text().await?;
        let api_resp: ApiResponse<DomainSearch> = serde_json::from_str(&body)?;
        tracing::debug!(
            domain,
            count = api_resp.data.emails.len(),
            "Hunter domain search complete"
        );
        Ok(api_resp.data)
    }
}

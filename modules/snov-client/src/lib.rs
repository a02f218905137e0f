pub mod error;

pub use error::{Result, SnovError};

use std::time::Duration;

use serde::Deserialize;

const BASE_URL: &str = "https://app.snov.io/restapi";

pub struct SnovClient {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DomainEmail {
    pub email: String,
    #[serde(rename = "firstName")]
    pub first_name: Option<String>,
    #[serde(rename = "lastName")]
    pub last_name: Option<String>,
    pub position: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DomainEmailsResponse {
    #[serde(default)]
    emails: Vec<DomainEmail>,
}

impl SnovClient {
    pub fn new(token: &str) -> Result<Self> {
        Self::with_base_url(BASE_URL, token)
    }

    pub fn with_base_url(base_url: &str, token: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }

    /// Fetch addresses Snov.io knows for a domain via /get-domain-emails-with-info.
    pub async fn domain_emails(&self, domain: &str, limit: u32) -> Result<Vec<DomainEmail>> {
        let endpoint = format!("{}/get-domain-emails-with-info", self.base_url);
        let limit = limit.to_string();

        let resp = self
            .client
            .get(&endpoint)
            .bearer_auth(&self.token)
            .query(&[("domain", domain), ("type", "all"), ("limit", limit.as_str())])
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(SnovError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let data: DomainEmailsResponse = resp.json().await?;
        tracing::debug!(domain, count = data.emails.len(), "Snov domain emails fetched");
        Ok(data.emails)
    }
}

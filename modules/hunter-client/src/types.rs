use serde::Deserialize;

/// Wrapper for Hunter API responses.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiResponse<T> {
    pub data: T,
}

/// Body of `GET /v2/domain-search`.
#[derive(Debug, Clone, Deserialize)]
pub struct DomainSearch {
    pub domain: Option<String>,
    pub organization: Option<String>,
    #[serde(default)]
    pub emails: Vec<EmailEntry>,
}

/// A single address Hunter associates with the domain.
#[derive(Debug, Clone, Deserialize)]
pub struct EmailEntry {
    pub value: String,
    /// "generic" (info@, contact@) or "personal".
    #[serde(rename = "type")]
    pub email_type: Option<String>,
    pub confidence: Option<u8>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub position: Option<String>,
}

impl DomainSearch {
    /// First address returned, which Hunter orders by confidence.
    pub fn first_email(&self) -> Option<&str> {
        self.emails
            .iter()
            .map(|e| e.value.trim())
            .find(|v| !v.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_domain_search_payload() {
        let body = r#"{
            "data": {
                "domain": "acme.io",
                "organization": "Acme",
                "emails": [
                    {"value": "jane@acme.io", "type": "personal", "confidence": 94,
                     "first_name": "Jane", "last_name": "Doe", "position": "CEO"}
                ]
            },
            "meta": {"results": 1}
        }"#;
        let resp: ApiResponse<DomainSearch> = serde_json::from_str(body).unwrap();
        assert_eq!(resp.data.first_email(), Some("jane@acme.io"));
        assert_eq!(resp.data.emails[0].confidence, Some(94));
    }

    #[test]
    fn empty_email_list_has_no_first_email() {
        let body = r#"{"data": {"domain": "acme.io", "organization": null, "emails": []}}"#;
        let resp: ApiResponse<DomainSearch> = serde_json::from_str(body).unwrap();
        assert!(resp.data.first_email().is_none());
    }

    #[test]
    fn missing_emails_field_defaults_to_empty() {
        let body = r#"{"data": {"domain": "acme.io"}}"#;
        let resp: ApiResponse<DomainSearch> = serde_json::from_str(body).unwrap();
        assert!(resp.data.emails.is_empty());
    }
}

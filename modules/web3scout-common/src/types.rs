use std::collections::BTreeMap;
use std::fmt;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use url::{Host, Url};

use crate::error::MalformedItem;

// =============================================================================
// Raw collector output
// =============================================================================

/// Loosely-typed item as emitted by a collector. Adapters disagree on field
/// naming, so the common spellings are accepted as aliases and anything else
/// lands in `extra`. Turning this into a [`ProjectRecord`] happens in one
/// place only: [`ProjectRecord::from_raw`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawItem {
    #[serde(default, alias = "project_name", alias = "title")]
    pub name: String,
    #[serde(default, alias = "url", alias = "homepage")]
    pub website: Option<String>,
    #[serde(default, alias = "x", alias = "twitter_handle")]
    pub twitter: Option<String>,
    #[serde(default)]
    pub linkedin: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl RawItem {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_website(mut self, website: impl Into<String>) -> Self {
        self.website = Some(website.into());
        self
    }

    pub fn with_twitter(mut self, twitter: impl Into<String>) -> Self {
        self.twitter = Some(twitter.into());
        self
    }
}

// =============================================================================
// Identity
// =============================================================================

/// Key used to detect duplicates. Domain and name keys never collide with
/// each other.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum IdentityKey {
    Domain(String),
    Name(String),
}

impl IdentityKey {
    /// Domain key when the website yields one, otherwise the normalized name.
    /// `None` only when both are empty.
    pub fn derive(website: Option<&str>, name: &str) -> Option<Self> {
        let domain = domain_key(website);
        if !domain.is_empty() {
            return Some(IdentityKey::Domain(domain));
        }
        let name = normalize_name(name);
        if name.is_empty() {
            None
        } else {
            Some(IdentityKey::Name(name))
        }
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdentityKey::Domain(d) => write!(f, "domain:{d}"),
            IdentityKey::Name(n) => write!(f, "name:{n}"),
        }
    }
}

// =============================================================================
// ProjectRecord
// =============================================================================

/// Canonical project record.
///
/// `website` and `domain_key` are only ever written together through
/// [`ProjectRecord::set_website`]; `source` and `discovered_at` are fixed at
/// construction.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProjectRecord {
    name: String,
    website: Option<String>,
    twitter: Option<String>,
    linkedin: Option<String>,
    email: Option<String>,
    source: String,
    discovered_at: DateTime<Utc>,
    domain_key: String,
}

impl ProjectRecord {
    pub fn new(
        name: &str,
        source: &str,
        discovered_at: DateTime<Utc>,
    ) -> Result<Self, MalformedItem> {
        let name = clean_name(name);
        if name.is_empty() {
            return Err(MalformedItem::MissingName);
        }
        Ok(Self {
            name,
            website: None,
            twitter: None,
            linkedin: None,
            email: None,
            source: source.to_string(),
            discovered_at,
            domain_key: String::new(),
        })
    }

    /// Normalize a collector item. Items without a name, or without any
    /// usable website or twitter handle, are malformed.
    pub fn from_raw(
        item: RawItem,
        source: &str,
        discovered_at: DateTime<Utc>,
    ) -> Result<Self, MalformedItem> {
        let mut record = Self::new(&item.name, source, discovered_at)?;
        record.set_website(item.website.as_deref());
        record.twitter = item.twitter.as_deref().and_then(normalize_twitter);

        if record.website.is_none() && record.twitter.is_none() {
            return Err(MalformedItem::NoContactHandle(record.name));
        }

        if let Some(linkedin) = item.linkedin.as_deref() {
            record.set_linkedin(linkedin);
        }
        if let Some(email) = item.email.as_deref() {
            record.set_email(email);
        }
        Ok(record)
    }

    pub fn with_website(mut self, website: &str) -> Self {
        self.set_website(Some(website));
        self
    }

    pub fn with_twitter(mut self, twitter: &str) -> Self {
        self.twitter = normalize_twitter(twitter);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn website(&self) -> Option<&str> {
        self.website.as_deref()
    }

    pub fn twitter(&self) -> Option<&str> {
        self.twitter.as_deref()
    }

    pub fn linkedin(&self) -> Option<&str> {
        self.linkedin.as_deref()
    }

    pub fn email(&self) -> Option<&str> {
        self.email.as_deref()
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn discovered_at(&self) -> DateTime<Utc> {
        self.discovered_at
    }

    /// Registrable domain of the website, empty when there is none.
    pub fn domain_key(&self) -> &str {
        &self.domain_key
    }

    /// Replace the website; the domain key is recomputed from it.
    pub fn set_website(&mut self, website: Option<&str>) {
        self.website = website.and_then(normalize_website);
        self.domain_key = domain_key(self.website.as_deref());
    }

    /// Set the email if it parses. Returns whether the field was set.
    pub fn set_email(&mut self, email: &str) -> bool {
        match normalize_email(email) {
            Some(email) => {
                self.email = Some(email);
                true
            }
            None => false,
        }
    }

    /// Set the LinkedIn company page if it is one. Returns whether the field was set.
    pub fn set_linkedin(&mut self, linkedin: &str) -> bool {
        match linkedin_company_url(linkedin) {
            Some(url) => {
                self.linkedin = Some(url);
                true
            }
            None => false,
        }
    }

    pub fn identity_key(&self) -> IdentityKey {
        if self.domain_key.is_empty() {
            IdentityKey::Name(normalize_name(&self.name))
        } else {
            IdentityKey::Domain(self.domain_key.clone())
        }
    }

    pub fn to_row(&self) -> ProjectRow {
        ProjectRow {
            project: self.name.clone(),
            website: self.website.clone().unwrap_or_default(),
            twitter: self.twitter.clone().unwrap_or_default(),
            linkedin: self.linkedin.clone().unwrap_or_default(),
            email: self.email.clone().unwrap_or_default(),
            source: self.source.clone(),
            date_added: self.discovered_at.format("%Y-%m-%d").to_string(),
        }
    }
}

impl fmt::Display for ProjectRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.website {
            Some(w) => write!(f, "{} ({w})", self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

// =============================================================================
// Persisted row layout
// =============================================================================

/// One row per stored project. Empty strings stand for absent fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectRow {
    #[serde(rename = "Project")]
    pub project: String,
    #[serde(rename = "Website", default)]
    pub website: String,
    #[serde(rename = "Twitter", default)]
    pub twitter: String,
    #[serde(rename = "LinkedIn", default)]
    pub linkedin: String,
    #[serde(rename = "Email", default)]
    pub email: String,
    #[serde(rename = "Source", default)]
    pub source: String,
    #[serde(rename = "Date Added", default)]
    pub date_added: String,
}

impl ProjectRow {
    pub const HEADERS: [&'static str; 7] = [
        "Project",
        "Website",
        "Twitter",
        "LinkedIn",
        "Email",
        "Source",
        "Date Added",
    ];

    pub fn values(&self) -> [&str; 7] {
        [
            &self.project,
            &self.website,
            &self.twitter,
            &self.linkedin,
            &self.email,
            &self.source,
            &self.date_added,
        ]
    }

    /// Identity key re-derived from the stored columns.
    pub fn identity_key(&self) -> Option<IdentityKey> {
        let website = (!self.website.is_empty()).then_some(self.website.as_str());
        IdentityKey::derive(website, &self.project)
    }
}

// =============================================================================
// Normalization
// =============================================================================

/// Query parameters that carry tracking state and break domain-level dedup.
const TRACKING_PARAMS: &[&str] = &[
    "fbclid",
    "gclid",
    "utm_source",
    "utm_medium",
    "utm_campaign",
    "utm_term",
    "utm_content",
    "ref",
    "mc_cid",
    "mc_eid",
];

const TWITTER_SKIP: &[&str] = &["intent", "share", "hashtag", "search", "i", "home"];

static RE_TWITTER_HANDLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_]{1,15}$").unwrap());
static RE_LINKEDIN_COMPANY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)linkedin\.com/company/([^/?&#\s"'<>]+)"#).unwrap()
});
static RE_EMAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9._%+-]+@[a-z0-9-]+(\.[a-z0-9-]+)*\.[a-z]{2,}$").unwrap()
});

/// Trim and collapse internal whitespace.
pub fn clean_name(name: &str) -> String {
    name.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Case-folded, whitespace-collapsed name used as the fallback identity.
pub fn normalize_name(name: &str) -> String {
    clean_name(name).to_lowercase()
}

/// Normalize a website to `https://host/path` with a lowercase host, no
/// fragment, no tracking parameters and no trailing slash. Returns `None` for
/// anything that is not a plausible public http(s) URL.
pub fn normalize_website(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.chars().any(char::is_whitespace) {
        return None;
    }

    let lower = trimmed.to_ascii_lowercase();
    let candidate = if lower.starts_with("https://") {
        trimmed.to_string()
    } else if lower.starts_with("http://") {
        format!("https://{}", &trimmed["http://".len()..])
    } else if trimmed.contains("://") {
        return None;
    } else {
        format!("https://{}", trimmed.trim_start_matches("//"))
    };

    let mut url = Url::parse(&candidate).ok()?;
    if !url.username().is_empty() || url.password().is_some() {
        return None;
    }
    let host = url.host_str()?;
    if !host.contains('.') {
        return None;
    }

    url.set_fragment(None);
    strip_tracking_params(&mut url);

    let mut out = url.to_string();
    if url.query().is_none() {
        while out.ends_with('/') {
            out.pop();
        }
    }
    Some(out)
}

/// Registrable domain (eTLD+1) of the website, lowercase. IP hosts and
/// hosts without a known suffix key on the bare host. Empty when there is no
/// usable website.
pub fn domain_key(website: Option<&str>) -> String {
    let Some(url) = website
        .and_then(normalize_website)
        .and_then(|w| Url::parse(&w).ok())
    else {
        return String::new();
    };

    match url.host() {
        Some(Host::Domain(host)) => {
            let host = host.trim_end_matches('.').to_ascii_lowercase();
            let registrable = psl::domain_str(&host).unwrap_or(host.as_str());
            registrable.trim_start_matches("www.").to_string()
        }
        Some(host) => host.to_string(),
        None => String::new(),
    }
}

/// Accepts `@handle`, a bare handle, or a twitter.com / x.com profile URL.
/// Returns `https://twitter.com/<handle>`.
pub fn normalize_twitter(raw: &str) -> Option<String> {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return None;
    }
    if let Some(handle) = trimmed.strip_prefix('@') {
        return twitter_profile(handle);
    }
    if RE_TWITTER_HANDLE.is_match(trimmed) {
        return twitter_profile(trimmed);
    }

    let candidate = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("https://{trimmed}")
    };
    let url = Url::parse(&candidate).ok()?;
    let host = url
        .host_str()?
        .trim_start_matches("www.")
        .trim_start_matches("mobile.");
    if host != "twitter.com" && host != "x.com" {
        return None;
    }
    let handle = url.path_segments()?.find(|s| !s.is_empty())?;
    if TWITTER_SKIP.contains(&handle) {
        return None;
    }
    twitter_profile(handle)
}

fn twitter_profile(handle: &str) -> Option<String> {
    RE_TWITTER_HANDLE
        .is_match(handle)
        .then(|| format!("https://twitter.com/{handle}"))
}

/// Canonical `https://www.linkedin.com/company/<slug>` if `raw` contains a
/// company page link. Personal `/in/` profiles and implausible slugs are
/// rejected.
pub fn linkedin_company_url(raw: &str) -> Option<String> {
    if raw.to_ascii_lowercase().contains("linkedin.com/in/") {
        return None;
    }
    let caps = RE_LINKEDIN_COMPANY.captures(raw)?;
    let slug = caps.get(1)?.as_str();
    let len = slug.chars().count();
    if !(2..100).contains(&len) {
        return None;
    }
    Some(format!(
        "https://www.linkedin.com/company/{}",
        slug.to_lowercase()
    ))
}

/// Trimmed, lowercased address, or `None` if it does not look like one.
pub fn normalize_email(raw: &str) -> Option<String> {
    let email = raw.trim();
    let email = email.strip_prefix("mailto:").unwrap_or(email).to_lowercase();
    RE_EMAIL.is_match(&email).then_some(email)
}

fn strip_tracking_params(url: &mut Url) {
    if url.query().is_none() {
        return;
    }

    let clean_pairs: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| {
            let key = key.to_ascii_lowercase();
            !key.starts_with("utm_") && !TRACKING_PARAMS.contains(&key.as_str())
        })
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    if clean_pairs.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(clean_pairs);
    }
}

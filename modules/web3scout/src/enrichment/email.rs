use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use regex::Regex;
use tracing::{debug, info, warn};
use url::Url;

use hunter_client::{HunterClient, HunterError};
use snov_client::{SnovClient, SnovError};
use web3scout_common::{normalize_email, EnrichmentError, ProjectRecord};

use super::{CallPolicy, StageOutcome};
use crate::fetch::PageFetcher;
use crate::traits::EmailFinder;

/// Pages scanned for a published address, relative to the site root.
const CONTACT_PATHS: &[&str] = &["/contact", "/about", "/team", "/contact-us"];

/// Domains whose addresses are never a project's business contact.
const IGNORED_EMAIL_DOMAINS: &[&str] = &[
    "example.com",
    "example.org",
    "domain.com",
    "email.com",
    "test.com",
    "gmail.com",
    "googlemail.com",
    "yahoo.com",
    "hotmail.com",
    "outlook.com",
    "icloud.com",
    "protonmail.com",
    "sentry.io",
    "wixpress.com",
];

const ASSET_SUFFIXES: &[&str] = &[".png", ".jpg", ".jpeg", ".gif", ".svg", ".webp"];

static RE_EMAIL_IN_TEXT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)[a-z0-9._%+-]+@[a-z0-9-]+(?:\.[a-z0-9-]+)*\.[a-z]{2,}").unwrap());

// ---------------------------------------------------------------------------
// Lookup budget
// ---------------------------------------------------------------------------

/// Caps finder calls per run. Thread-safe for concurrent enrichment.
#[derive(Debug)]
pub struct LookupBudget {
    /// 0 = unlimited.
    limit: u64,
    used: AtomicU64,
}

impl LookupBudget {
    pub fn new(limit: u64) -> Self {
        Self {
            limit,
            used: AtomicU64::new(0),
        }
    }

    /// Reserve one lookup. Returns false once the budget is spent.
    pub fn try_take(&self) -> bool {
        let limit = self.limit;
        let taken = self
            .used
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |used| {
                (limit == 0 || used < limit).then_some(used + 1)
            })
            .is_ok();
        if !taken {
            debug!(limit, "Email lookup budget exhausted");
        }
        taken
    }

    /// Start a new run's allowance.
    pub fn reset(&self) {
        self.used.store(0, Ordering::SeqCst);
    }

    pub fn used(&self) -> u64 {
        self.used.load(Ordering::SeqCst)
    }

    pub fn is_exhausted(&self) -> bool {
        self.limit > 0 && self.used() >= self.limit
    }
}

// ---------------------------------------------------------------------------
// Email stage
// ---------------------------------------------------------------------------

pub struct EmailStage {
    finder: Option<Arc<dyn EmailFinder>>,
    fetcher: Arc<dyn PageFetcher>,
    scan_website: bool,
    budget: LookupBudget,
    calls: CallPolicy,
}

impl EmailStage {
    pub fn new(
        finder: Option<Arc<dyn EmailFinder>>,
        fetcher: Arc<dyn PageFetcher>,
        scan_website: bool,
        budget: LookupBudget,
        calls: CallPolicy,
    ) -> Self {
        Self {
            finder,
            fetcher,
            scan_website,
            budget,
            calls,
        }
    }

    pub fn budget(&self) -> &LookupBudget {
        &self.budget
    }

    /// Find an email for the record's domain. `None` when the stage is
    /// skipped: no domain, email already known, nothing configured to ask,
    /// or the lookup budget is spent.
    pub async fn run(&self, record: &mut ProjectRecord) -> Option<StageOutcome> {
        if record.domain_key().is_empty() || record.email().is_some() {
            return None;
        }
        let finder_available = self.finder.is_some() && !self.budget.is_exhausted();
        if !self.scan_website && !finder_available {
            return None;
        }

        let mut consulted = 0usize;
        let mut failed = 0usize;

        if self.scan_website {
            if let Some(website) = record.website().map(str::to_string) {
                match self.scan_site(&website).await {
                    ScanResult::Found(email) => {
                        if record.set_email(&email) {
                            info!(project = record.name(), email = %email, "Email found on website");
                            return Some(StageOutcome::Found);
                        }
                    }
                    ScanResult::Missing => consulted += 1,
                    ScanResult::Unreachable => failed += 1,
                }
            }
        }

        if let Some(finder) = &self.finder {
            if !self.budget.try_take() {
                if !self.scan_website {
                    return None;
                }
                return Some(if consulted > 0 {
                    StageOutcome::NotFound
                } else {
                    StageOutcome::Error
                });
            }

            let domain = record.domain_key().to_string();
            let result = self
                .calls
                .call(finder.name(), || finder.find_email(&domain))
                .await;

            match result {
                Ok(Some(email)) => {
                    if record.set_email(&email) {
                        info!(project = record.name(), finder = finder.name(), "Email found");
                        return Some(StageOutcome::Found);
                    }
                    debug!(domain = %domain, email = %email, "Finder returned an unusable address");
                    consulted += 1;
                }
                Ok(None) | Err(EnrichmentError::NotFound) => consulted += 1,
                Err(e) => {
                    warn!(domain = %domain, finder = finder.name(), error = %e, "Email lookup failed");
                    failed += 1;
                }
            }
        }

        if consulted > 0 {
            Some(StageOutcome::NotFound)
        } else if failed > 0 {
            Some(StageOutcome::Error)
        } else {
            Some(StageOutcome::NotFound)
        }
    }

    async fn scan_site(&self, website: &str) -> ScanResult {
        let mut reached = false;
        for page in site_pages(website, CONTACT_PATHS) {
            let result = self
                .calls
                .call("fetch_page", || {
                    let fetcher = self.fetcher.clone();
                    let page = page.clone();
                    async move { fetcher.fetch(&page).await.map_err(EnrichmentError::from) }
                })
                .await;

            match result {
                Ok(html) => {
                    reached = true;
                    if let Some(email) = extract_business_email(&html) {
                        return ScanResult::Found(email);
                    }
                }
                Err(EnrichmentError::NotFound) => reached = true,
                Err(e) => debug!(page = %page, error = %e, "Contact page fetch failed"),
            }
        }
        if reached {
            ScanResult::Missing
        } else {
            ScanResult::Unreachable
        }
    }
}

enum ScanResult {
    Found(String),
    Missing,
    Unreachable,
}

/// The website itself followed by `paths` joined onto its origin.
pub fn site_pages(website: &str, paths: &[&str]) -> Vec<String> {
    let mut pages = vec![website.to_string()];
    if let Ok(base) = Url::parse(website) {
        for path in paths {
            if let Ok(url) = base.join(path) {
                let url = url.to_string();
                if !pages.contains(&url) {
                    pages.push(url);
                }
            }
        }
    }
    pages
}

/// First address in `html` that plausibly belongs to the project itself.
pub fn extract_business_email(html: &str) -> Option<String> {
    RE_EMAIL_IN_TEXT
        .find_iter(html)
        .filter_map(|m| normalize_email(m.as_str()))
        .find(|email| {
            let domain = email.rsplit('@').next().unwrap_or_default();
            !IGNORED_EMAIL_DOMAINS.contains(&domain)
                && !ASSET_SUFFIXES.iter().any(|s| email.ends_with(s))
        })
}

// ---------------------------------------------------------------------------
// Finder implementations
// ---------------------------------------------------------------------------

fn classify_status(status: u16, message: String) -> EnrichmentError {
    match status {
        401 | 403 => EnrichmentError::AuthFailure(message),
        404 => EnrichmentError::NotFound,
        429 | 500.. => EnrichmentError::Transient(format!("HTTP {status}: {message}")),
        _ => EnrichmentError::Rejected(format!("HTTP {status}: {message}")),
    }
}

fn hunter_error(e: HunterError) -> EnrichmentError {
    match e {
        HunterError::Network(m) | HunterError::Timeout(m) => EnrichmentError::Transient(m),
        HunterError::Api { status, message } => classify_status(status, message),
        HunterError::Parse(m) => EnrichmentError::Rejected(format!("unparseable response: {m}")),
    }
}

fn snov_error(e: SnovError) -> EnrichmentError {
    match e {
        SnovError::Network(m) | SnovError::Timeout(m) => EnrichmentError::Transient(m),
        SnovError::Api { status, message } => classify_status(status, message),
    }
}

#[async_trait]
impl EmailFinder for HunterClient {
    fn name(&self) -> &str {
        "hunter"
    }

    async fn find_email(&self, domain: &str) -> Result<Option<String>, EnrichmentError> {
        let search = self.domain_search(domain, 1).await.map_err(hunter_error)?;
        Ok(search.first_email().map(str::to_string))
    }
}

#[async_trait]
impl EmailFinder for SnovClient {
    fn name(&self) -> &str {
        "snov"
    }

    async fn find_email(&self, domain: &str) -> Result<Option<String>, EnrichmentError> {
        let emails = self.domain_emails(domain, 1).await.map_err(snov_error)?;
        Ok(emails.into_iter().next().map(|e| e.email))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockEmailFinder, MockFetcher};
    use chrono::Utc;
    use std::time::Duration;
    use web3scout_common::RetryPolicy;

    fn calls() -> CallPolicy {
        CallPolicy {
            retry: RetryPolicy {
                max_attempts: 3,
                base_delay: Duration::from_millis(1),
                multiplier: 1.0,
                max_delay: Duration::from_millis(1),
                jitter: Duration::ZERO,
            },
            timeout: Duration::from_secs(5),
        }
    }

    fn stage(finder: Option<MockEmailFinder>, fetcher: MockFetcher, scan: bool, limit: u64) -> EmailStage {
        EmailStage::new(
            finder.map(|f| Arc::new(f) as Arc<dyn EmailFinder>),
            Arc::new(fetcher),
            scan,
            LookupBudget::new(limit),
            calls(),
        )
    }

    fn record(website: &str) -> ProjectRecord {
        ProjectRecord::new("Acme", "test", Utc::now())
            .unwrap()
            .with_website(website)
    }

    #[tokio::test]
    async fn finder_match_sets_exact_email() {
        let stage = stage(
            Some(MockEmailFinder::new().on_domain("acme.io", "jane@acme.io")),
            MockFetcher::new(),
            false,
            0,
        );
        let mut r = record("https://acme.io");
        assert_eq!(stage.run(&mut r).await, Some(StageOutcome::Found));
        assert_eq!(r.email(), Some("jane@acme.io"));
    }

    #[tokio::test]
    async fn no_match_is_not_found_not_error() {
        let stage = stage(Some(MockEmailFinder::new()), MockFetcher::new(), false, 0);
        let mut r = record("https://acme.io");
        assert_eq!(stage.run(&mut r).await, Some(StageOutcome::NotFound));
        assert_eq!(r.email(), None);
    }

    #[tokio::test]
    async fn auth_failure_is_not_retried() {
        let finder = MockEmailFinder::new()
            .on_domain_error("acme.io", EnrichmentError::AuthFailure("bad key".into()));
        let stage = stage(Some(finder.clone()), MockFetcher::new(), false, 0);
        let mut r = record("https://acme.io");
        assert_eq!(stage.run(&mut r).await, Some(StageOutcome::Error));
        assert_eq!(finder.calls_for("acme.io"), 1);
    }

    #[tokio::test]
    async fn skipped_without_domain_or_with_existing_email() {
        let stage = stage(Some(MockEmailFinder::new()), MockFetcher::new(), false, 0);

        let mut twitter_only = ProjectRecord::new("Acme", "test", Utc::now())
            .unwrap()
            .with_twitter("@acme");
        assert_eq!(stage.run(&mut twitter_only).await, None);

        let mut known = record("https://acme.io");
        known.set_email("hello@acme.io");
        assert_eq!(stage.run(&mut known).await, None);
    }

    #[tokio::test]
    async fn budget_exhaustion_skips_remaining_records() {
        let finder = MockEmailFinder::new();
        let stage = stage(Some(finder.clone()), MockFetcher::new(), false, 1);

        let mut first = record("https://acme.io");
        let mut second = record("https://beta.xyz");
        assert_eq!(stage.run(&mut first).await, Some(StageOutcome::NotFound));
        assert_eq!(stage.run(&mut second).await, None);
        assert_eq!(finder.total_calls(), 1);
        assert_eq!(stage.budget().used(), 1);
    }

    #[tokio::test]
    async fn website_scan_runs_before_finder() {
        let finder = MockEmailFinder::new().on_domain("acme.io", "api@acme.io");
        let fetcher = MockFetcher::new()
            .on_url("https://acme.io", "<p>Nothing here</p>")
            .on_url(
                "https://acme.io/contact",
                r#"<a href="mailto:someone@gmail.com">x</a> <a href="mailto:Team@Acme.io">Team</a>"#,
            );
        let stage = stage(Some(finder.clone()), fetcher, true, 0);
        let mut r = record("https://acme.io");
        assert_eq!(stage.run(&mut r).await, Some(StageOutcome::Found));
        assert_eq!(r.email(), Some("team@acme.io"));
        assert_eq!(finder.total_calls(), 0);
    }

    #[test]
    fn business_email_filters_noise() {
        let html = "logo@2x.png support@example.com dev@gmail.com hello@acme.io";
        assert_eq!(extract_business_email(html).as_deref(), Some("hello@acme.io"));
        assert_eq!(extract_business_email("no addresses"), None);
    }

    #[test]
    fn site_pages_join_on_origin() {
        let pages = site_pages("https://acme.io/app", &["/about", "/team"]);
        assert_eq!(
            pages,
            vec![
                "https://acme.io/app".to_string(),
                "https://acme.io/about".to_string(),
                "https://acme.io/team".to_string()
            ]
        );
    }

    #[test]
    fn vendor_errors_classify() {
        let e = hunter_error(HunterError::Api {
            status: 401,
            message: "invalid key".into(),
        });
        assert!(matches!(e, EnrichmentError::AuthFailure(_)));

        let e = snov_error(SnovError::Api {
            status: 503,
            message: "busy".into(),
        });
        assert!(matches!(e, EnrichmentError::Transient(_)));
    }

    #[test]
    fn budget_zero_is_unlimited() {
        let budget = LookupBudget::new(0);
        for _ in 0..100 {
            assert!(budget.try_take());
        }
        assert!(!budget.is_exhausted());
    }
}

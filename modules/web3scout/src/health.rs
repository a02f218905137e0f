//! Component checks behind `web3scout check`: configuration, storage,
//! the email finder and web search, each reported pass/fail.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use web3scout_common::{Config, EnrichmentError};

use crate::fetch::WebSearcher;
use crate::traits::{EmailFinder, ProjectSink};

/// Domain looked up once to confirm the email service answers.
const SAMPLE_DOMAIN: &str = "example.com";
const SAMPLE_QUERY: &str = "uniswap site:linkedin.com/company";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentCheck {
    pub component: String,
    pub passed: bool,
    pub detail: String,
}

impl ComponentCheck {
    fn pass(component: &str, detail: impl Into<String>) -> Self {
        Self {
            component: component.to_string(),
            passed: true,
            detail: detail.into(),
        }
    }

    fn fail(component: &str, detail: impl Into<String>) -> Self {
        Self {
            component: component.to_string(),
            passed: false,
            detail: detail.into(),
        }
    }
}

impl fmt::Display for ComponentCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mark = if self.passed { "PASS" } else { "FAIL" };
        write!(f, "{mark}  {:<12} {}", self.component, self.detail)
    }
}

/// How the email finder came out of startup.
pub enum FinderSetup {
    Disabled,
    Ready(Arc<dyn EmailFinder>),
    /// Construction failed, e.g. the service key is missing.
    Unavailable(String),
}

pub struct HealthCheck {
    sink: Arc<dyn ProjectSink>,
    finder: FinderSetup,
    searcher: Arc<dyn WebSearcher>,
    timeout: Duration,
}

impl HealthCheck {
    pub fn new(
        sink: Arc<dyn ProjectSink>,
        finder: FinderSetup,
        searcher: Arc<dyn WebSearcher>,
        timeout: Duration,
    ) -> Self {
        Self {
            sink,
            finder,
            searcher,
            timeout,
        }
    }

    /// Run every check once, without retries. Failures never short-circuit.
    pub async fn run(&self, config: &Config) -> Vec<ComponentCheck> {
        let checks = vec![
            check_config(config),
            self.check_storage().await,
            self.check_finder().await,
            self.check_search().await,
        ];

        for check in &checks {
            if check.passed {
                info!(component = %check.component, detail = %check.detail, "Check passed");
            } else {
                warn!(component = %check.component, detail = %check.detail, "Check failed");
            }
        }
        checks
    }

    async fn check_storage(&self) -> ComponentCheck {
        let name = format!("storage ({})", self.sink.name());
        match self.bounded(self.sink.existing_keys()).await {
            Some(Ok(keys)) => ComponentCheck::pass(&name, format!("{} stored identities", keys.len())),
            Some(Err(e)) => ComponentCheck::fail(&name, e.to_string()),
            None => ComponentCheck::fail(&name, self.timed_out()),
        }
    }

    async fn check_finder(&self) -> ComponentCheck {
        let finder = match &self.finder {
            FinderSetup::Disabled => return ComponentCheck::pass("email", "disabled"),
            FinderSetup::Unavailable(reason) => return ComponentCheck::fail("email", reason.clone()),
            FinderSetup::Ready(finder) => finder,
        };

        let name = format!("email ({})", finder.name());
        match self.bounded(finder.find_email(SAMPLE_DOMAIN)).await {
            Some(Ok(Some(email))) => ComponentCheck::pass(&name, format!("{SAMPLE_DOMAIN} -> {email}")),
            Some(Ok(None)) | Some(Err(EnrichmentError::NotFound)) => {
                ComponentCheck::pass(&name, format!("{SAMPLE_DOMAIN} answered with no address"))
            }
            Some(Err(e)) => ComponentCheck::fail(&name, e.to_string()),
            None => ComponentCheck::fail(&name, self.timed_out()),
        }
    }

    async fn check_search(&self) -> ComponentCheck {
        match self.bounded(self.searcher.search(SAMPLE_QUERY, 3)).await {
            Some(Ok(results)) => ComponentCheck::pass("search", format!("{} results", results.len())),
            Some(Err(e)) => ComponentCheck::fail("search", e.to_string()),
            None => ComponentCheck::fail("search", self.timed_out()),
        }
    }

    async fn bounded<T>(&self, fut: impl Future<Output = T>) -> Option<T> {
        tokio::time::timeout(self.timeout, fut).await.ok()
    }

    fn timed_out(&self) -> String {
        format!("timed out after {}s", self.timeout.as_secs())
    }
}

fn check_config(config: &Config) -> ComponentCheck {
    match config.validate().and_then(|()| config.validate_credentials()) {
        Ok(()) => ComponentCheck::pass(
            "config",
            format!("{} enabled collectors", config.enabled_collectors().count()),
        ),
        Err(e) => ComponentCheck::fail("config", e.to_string()),
    }
}

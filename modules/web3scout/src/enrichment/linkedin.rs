use std::sync::Arc;

use tracing::{debug, info};

use web3scout_common::{linkedin_company_url, EnrichmentError, ProjectRecord};

use super::email::site_pages;
use super::{CallPolicy, StageOutcome};
use crate::fetch::{extract_links_by_pattern, unwrap_search_redirect, PageFetcher, WebSearcher};

const COMPANY_PAGE_PATHS: &[&str] = &["/about", "/team", "/contact", "/contact-us"];
const SEARCH_RESULTS: usize = 5;

/// Finds a LinkedIn company page: links on the project's own site first,
/// then a site-restricted web search.
pub struct LinkedInStage {
    fetcher: Arc<dyn PageFetcher>,
    searcher: Option<Arc<dyn WebSearcher>>,
    calls: CallPolicy,
}

#[derive(Default)]
struct Consulted {
    answered: usize,
    failed: usize,
}

impl LinkedInStage {
    pub fn new(
        fetcher: Arc<dyn PageFetcher>,
        searcher: Option<Arc<dyn WebSearcher>>,
        calls: CallPolicy,
    ) -> Self {
        Self {
            fetcher,
            searcher,
            calls,
        }
    }

    /// `None` when skipped (already known, or nothing to consult).
    pub async fn run(&self, record: &mut ProjectRecord) -> Option<StageOutcome> {
        if record.linkedin().is_some() {
            return None;
        }
        if record.website().is_none() && self.searcher.is_none() {
            return None;
        }

        let mut consulted = Consulted::default();

        if let Some(website) = record.website().map(str::to_string) {
            if let Some(url) = self.scan_site(&website, &mut consulted).await {
                record.set_linkedin(&url);
                info!(project = record.name(), linkedin = %url, "LinkedIn found on website");
                return Some(StageOutcome::Found);
            }
        }

        if let Some(searcher) = &self.searcher {
            let query = format!("site:linkedin.com/company \"{}\"", record.name());
            let result = self
                .calls
                .call("linkedin_search", || {
                    let searcher = searcher.clone();
                    let query = query.clone();
                    async move {
                        searcher
                            .search(&query, SEARCH_RESULTS)
                            .await
                            .map_err(EnrichmentError::from)
                    }
                })
                .await;

            match result {
                Ok(results) => {
                    consulted.answered += 1;
                    let found = results
                        .iter()
                        .filter_map(|r| unwrap_search_redirect(&r.url))
                        .find_map(|link| linkedin_company_url(&link));
                    if let Some(url) = found {
                        record.set_linkedin(&url);
                        info!(project = record.name(), linkedin = %url, "LinkedIn found via search");
                        return Some(StageOutcome::Found);
                    }
                }
                Err(EnrichmentError::NotFound) => consulted.answered += 1,
                Err(e) => {
                    debug!(query, error = %e, "LinkedIn search failed");
                    consulted.failed += 1;
                }
            }
        }

        if consulted.answered == 0 && consulted.failed > 0 {
            Some(StageOutcome::Error)
        } else {
            Some(StageOutcome::NotFound)
        }
    }

    async fn scan_site(&self, website: &str, consulted: &mut Consulted) -> Option<String> {
        for page in site_pages(website, COMPANY_PAGE_PATHS) {
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
                    consulted.answered += 1;
                    let found = extract_links_by_pattern(&html, &page, "linkedin.com/company/", 20)
                        .into_iter()
                        .find_map(|link| linkedin_company_url(&link));
                    if found.is_some() {
                        return found;
                    }
                }
                Err(EnrichmentError::NotFound) => consulted.answered += 1,
                Err(e) => {
                    debug!(page = %page, error = %e, "Page fetch failed");
                    consulted.failed += 1;
                }
            }
        }
        None
    }
}

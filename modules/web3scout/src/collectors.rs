use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use web3scout_common::config::{CollectorKind, CollectorSettings, FileConfig};
use web3scout_common::{CollectionError, RawItem};

use crate::fetch::{extract_anchors, PageFetcher};
use crate::traits::{CollectContext, Collector};

const MAX_ITEMS_PER_PAGE: usize = 200;

/// Generic collector for sources that list projects as plain links.
///
/// Fetches `url` (once per page when it contains `{page}`), keeps anchors
/// whose resolved href contains `link_pattern` (or points off-site when no
/// pattern is set), and emits `RawItem { name: anchor text, website: href }`.
pub struct ListingPageCollector {
    name: String,
    fetcher: Arc<dyn PageFetcher>,
}

impl ListingPageCollector {
    pub fn new(name: &str, fetcher: Arc<dyn PageFetcher>) -> Self {
        Self {
            name: name.to_string(),
            fetcher,
        }
    }
}

#[async_trait]
impl Collector for ListingPageCollector {
    fn source(&self) -> &str {
        &self.name
    }

    async fn collect(&self, ctx: &CollectContext) -> Result<Vec<RawItem>, CollectionError> {
        let settings = &ctx.settings;
        let pages = if settings.url.contains("{page}") {
            settings.max_pages.max(1)
        } else {
            1
        };

        let mut seen = HashSet::new();
        let mut items = Vec::new();

        for page in 1..=pages {
            if page > 1 {
                ctx.pacer.pace().await;
            }
            let url = settings.url.replace("{page}", &page.to_string());

            let html = match ctx
                .retry
                .run(&self.name, || self.fetcher.fetch(&url))
                .await
            {
                Ok(html) => html,
                Err(e) if page == 1 => return Err(CollectionError::from(e)),
                Err(e) => {
                    warn!(source = self.name.as_str(), page, error = %e, "Page fetch failed, stopping pagination");
                    break;
                }
            };

            let page_items = parse_listing(&html, &url, settings.link_pattern.as_deref());
            debug!(source = self.name.as_str(), page, items = page_items.len(), "Listing page parsed");
            if page_items.is_empty() && page > 1 {
                break;
            }

            for item in page_items {
                let key = item.website.clone().unwrap_or_default();
                if seen.insert(key) {
                    items.push(item);
                }
            }
        }

        info!(source = self.name.as_str(), items = items.len(), "Listing collected");
        Ok(items)
    }
}

/// Project links on one listing page, deduplicated by href.
pub fn parse_listing(html: &str, page_url: &str, link_pattern: Option<&str>) -> Vec<RawItem> {
    let listing_host = url::Url::parse(page_url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.trim_start_matches("www.").to_string()));

    let mut seen = HashSet::new();
    extract_anchors(html, page_url)
        .into_iter()
        .filter(|a| match link_pattern {
            Some(pattern) => a.href.contains(pattern),
            None => is_off_site(&a.href, listing_host.as_deref()),
        })
        .filter(|a| seen.insert(a.href.clone()))
        .take(MAX_ITEMS_PER_PAGE)
        .map(|a| RawItem::new(a.text).with_website(a.href))
        .collect()
}

fn is_off_site(href: &str, listing_host: Option<&str>) -> bool {
    let Some(host) = url::Url::parse(href)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.trim_start_matches("www.").to_string()))
    else {
        return false;
    };
    listing_host.is_none_or(|listing| host != listing && !host.ends_with(&format!(".{listing}")))
}

/// Collectors for every enabled `[[collectors]]` entry, paired with their settings.
pub fn build_collectors(
    file: &FileConfig,
    fetcher: Arc<dyn PageFetcher>,
) -> Vec<(Arc<dyn Collector>, CollectorSettings)> {
    file.collectors
        .iter()
        .filter(|c| c.enabled)
        .map(|settings| {
            let collector: Arc<dyn Collector> = match settings.kind {
                CollectorKind::ListingPage => {
                    Arc::new(ListingPageCollector::new(&settings.name, fetcher.clone()))
                }
            };
            (collector, settings.clone())
        })
        .collect()
}

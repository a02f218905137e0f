use std::collections::HashSet;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, USER_AGENT};
use tracing::{debug, info};

use web3scout_common::FetchError;

/// Desktop browser user agents rotated per request.
const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 14_4) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:125.0) Gecko/20100101 Firefox/125.0",
];

static RE_HREF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"href\s*=\s*["']([^"']+)["']"#).unwrap());

// --- PageFetcher trait ---

#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// Fetch a page and return its raw HTML.
    async fn fetch(&self, url: &str) -> Result<String, FetchError>;
}

#[async_trait]
impl<T: PageFetcher + ?Sized> PageFetcher for Arc<T> {
    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        (**self).fetch(url).await
    }
}

/// Plain HTTP fetcher with rotating desktop user agents.
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        let ua = USER_AGENTS[rand::rng().random_range(0..USER_AGENTS.len())];
        debug!(url, "Fetching page");

        let resp = self
            .client
            .get(url)
            .header(USER_AGENT, ua)
            .header(
                ACCEPT,
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            )
            .header(ACCEPT_LANGUAGE, "en-US,en;q=0.9")
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let html = resp.text().await?;
        debug!(url, bytes = html.len(), "Fetched page");
        Ok(html)
    }
}

// --- WebSearcher trait ---

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchResult {
    pub url: String,
    pub title: String,
    pub snippet: String,
}

#[async_trait]
pub trait WebSearcher: Send + Sync {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchResult>, FetchError>;
}

// --- Serper (Google Search API) ---

pub struct SerperSearcher {
    api_key: String,
    client: reqwest::Client,
}

#[derive(Debug, serde::Deserialize)]
struct SerperResponse {
    #[serde(default)]
    organic: Vec<SerperResult>,
}

#[derive(Debug, serde::Deserialize)]
struct SerperResult {
    #[serde(default)]
    link: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    snippet: String,
}

impl SerperSearcher {
    pub fn new(api_key: &str, timeout: Duration) -> Result<Self, FetchError> {
        Ok(Self {
            api_key: api_key.to_string(),
            client: reqwest::Client::builder().timeout(timeout).build()?,
        })
    }
}

#[async_trait]
impl WebSearcher for SerperSearcher {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchResult>, FetchError> {
        info!(query, max_results, "Serper search");

        let body = serde_json::json!({
            "q": query,
            "num": max_results,
        });

        let resp = self
            .client
            .post("https://google.serper.dev/search")
            .header("X-API-KEY", &self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                url: "https://google.serper.dev/search".to_string(),
            });
        }

        let data: SerperResponse = resp.json().await?;
        let results: Vec<SearchResult> = data
            .organic
            .into_iter()
            .take(max_results)
            .map(|r| SearchResult {
                url: r.link,
                title: r.title,
                snippet: r.snippet,
            })
            .collect();

        info!(query, count = results.len(), "Serper search complete");
        Ok(results)
    }
}

// --- Google results page, scraped through a PageFetcher ---

/// Keyless fallback: fetch the Google results page and pull outbound links.
pub struct GoogleHtmlSearcher<F> {
    fetcher: F,
}

impl<F: PageFetcher> GoogleHtmlSearcher<F> {
    pub fn new(fetcher: F) -> Self {
        Self { fetcher }
    }
}

#[async_trait]
impl<F: PageFetcher> WebSearcher for GoogleHtmlSearcher<F> {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchResult>, FetchError> {
        let num = max_results.to_string();
        let url = url::Url::parse_with_params(
            "https://www.google.com/search",
            &[("q", query), ("num", num.as_str()), ("hl", "en")],
        )
        .map_err(|e| FetchError::Network(e.to_string()))?;

        let html = self.fetcher.fetch(url.as_str()).await?;

        let mut seen = HashSet::new();
        let results: Vec<SearchResult> = RE_HREF
            .captures_iter(&html)
            .filter_map(|cap| unwrap_search_redirect(&cap[1]))
            .filter(|link| !is_search_engine_link(link))
            .filter(|link| seen.insert(link.clone()))
            .take(max_results)
            .map(|link| SearchResult {
                url: link,
                title: String::new(),
                snippet: String::new(),
            })
            .collect();

        debug!(query, count = results.len(), "Google HTML search complete");
        Ok(results)
    }
}

/// Resolve a search-engine redirect (`/url?q=<target>&...`) to its target.
/// Direct http(s) links pass through; anything else is `None`.
pub fn unwrap_search_redirect(href: &str) -> Option<String> {
    let href = href.replace("&amp;", "&");
    if href.starts_with("/url?") || href.contains("google.com/url?") {
        let query = href.split_once('?')?.1;
        return url::form_urlencoded::parse(query.as_bytes())
            .find(|(k, _)| k == "q" || k == "url")
            .map(|(_, v)| v.into_owned())
            .filter(|v| v.starts_with("http://") || v.starts_with("https://"));
    }
    if href.starts_with("http://") || href.starts_with("https://") {
        Some(href)
    } else {
        None
    }
}

fn is_search_engine_link(link: &str) -> bool {
    url::Url::parse(link)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_string()))
        .map(|h| h.ends_with("google.com") || h.ends_with("gstatic.com") || h.ends_with("googleusercontent.com"))
        .unwrap_or(true)
}

// --- HTML helpers ---

/// Extract links from raw HTML whose resolved URL contains `pattern`.
/// Resolves relative URLs against `base_url`, deduplicates, and caps at `limit`.
pub fn extract_links_by_pattern(html: &str, base_url: &str, pattern: &str, limit: usize) -> Vec<String> {
    let base = url::Url::parse(base_url).ok();

    let mut seen = HashSet::new();
    let mut links = Vec::new();

    for cap in RE_HREF.captures_iter(html) {
        let raw = cap[1].replace("&amp;", "&");
        let Some(resolved) = resolve_href(base.as_ref(), &raw) else {
            continue;
        };

        if resolved.contains(pattern) && seen.insert(resolved.clone()) {
            links.push(resolved);
            if links.len() >= limit {
                break;
            }
        }
    }

    links
}

/// Anchor as (resolved href, visible text).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Anchor {
    pub href: String,
    pub text: String,
}

/// All anchors in `html` with a resolvable href and non-empty text.
/// Text falls back to the alt of a child image.
pub fn extract_anchors(html: &str, base_url: &str) -> Vec<Anchor> {
    let base = url::Url::parse(base_url).ok();
    let Ok(anchor_selector) = Selector::parse("a[href]") else {
        return Vec::new();
    };

    let document = Html::parse_document(html);
    document
        .select(&anchor_selector)
        .filter_map(|element| {
            let href = resolve_href(base.as_ref(), element.value().attr("href")?)?;
            let text = anchor_text(&element)?;
            Some(Anchor { href, text })
        })
        .collect()
}

fn resolve_href(base: Option<&url::Url>, raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty()
        || raw.starts_with('#')
        || raw.starts_with("javascript:")
        || raw.starts_with("mailto:")
        || raw.starts_with("tel:")
    {
        return None;
    }
    if raw.starts_with("http://") || raw.starts_with("https://") {
        return Some(raw.to_string());
    }
    base?.join(raw).ok().map(|u| u.to_string())
}

fn anchor_text(element: &ElementRef) -> Option<String> {
    let text = collapse_whitespace(&element.text().collect::<Vec<_>>().join(" "));
    if !text.is_empty() {
        return Some(text);
    }
    let img_selector = Selector::parse("img[alt]").ok()?;
    element
        .select(&img_selector)
        .find_map(|img| img.value().attr("alt"))
        .map(collapse_whitespace)
        .filter(|alt| !alt.is_empty())
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn links_resolve_dedup_and_cap() {
        let html = r#"
            <a href="/project/acme">Acme</a>
            <a href="https://list.io/project/acme">Acme again</a>
            <a href="/project/beta">Beta</a>
            <a href="/about">About</a>
        "#;
        let links = extract_links_by_pattern(html, "https://list.io/", "/project/", 20);
        assert_eq!(
            links,
            vec![
                "https://list.io/project/acme".to_string(),
                "https://list.io/project/beta".to_string()
            ]
        );

        let capped = extract_links_by_pattern(html, "https://list.io/", "/project/", 1);
        assert_eq!(capped.len(), 1);
    }

    #[test]
    fn anchors_strip_inner_markup() {
        let html = r##"
            <a class="card" href="https://acme.io"><span>Acme</span> &amp; <b>Co</b></a>
            <a href="#top">Top</a>
            <a href="/img"><img src="x.png"></a>
            <a href="/logo"><img src="y.png" alt="Delta Swap"></a>
        "##;
        let anchors = extract_anchors(html, "https://list.io");
        assert_eq!(
            anchors,
            vec![
                Anchor {
                    href: "https://acme.io".into(),
                    text: "Acme & Co".into()
                },
                Anchor {
                    href: "https://list.io/logo".into(),
                    text: "Delta Swap".into()
                },
            ]
        );
    }

    #[test]
    fn anchors_tolerate_real_world_markup() {
        let html = r#"
            <a href="https://acme.io" title="Top > rated">Acme</a>
            <a href=https://beta.xyz>Beta</a>
            <a href="https://gamma.io">Gamma &#8211; DEX</a>
            <A HREF="/delta">Delta</A>
        "#;
        let anchors = extract_anchors(html, "https://list.io");
        assert_eq!(
            anchors,
            vec![
                Anchor {
                    href: "https://acme.io".into(),
                    text: "Acme".into()
                },
                Anchor {
                    href: "https://beta.xyz".into(),
                    text: "Beta".into()
                },
                Anchor {
                    href: "https://gamma.io".into(),
                    text: "Gamma \u{2013} DEX".into()
                },
                Anchor {
                    href: "https://list.io/delta".into(),
                    text: "Delta".into()
                },
            ]
        );
    }

    #[test]
    fn redirects_are_unwrapped() {
        assert_eq!(
            unwrap_search_redirect("/url?q=https://www.linkedin.com/company/acme&amp;sa=U").as_deref(),
            Some("https://www.linkedin.com/company/acme")
        );
        assert_eq!(
            unwrap_search_redirect("https://acme.io/team").as_deref(),
            Some("https://acme.io/team")
        );
        assert!(unwrap_search_redirect("/search?q=acme").is_none());
    }

    #[test]
    fn search_engine_links_are_filtered() {
        assert!(is_search_engine_link("https://www.google.com/preferences"));
        assert!(!is_search_engine_link("https://www.linkedin.com/company/acme"));
    }
}

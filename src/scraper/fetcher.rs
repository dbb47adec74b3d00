//! Fetch-and-parse primitive with a bounded memo cache.
//!
//! Pagination chains and retried items can request the same URL several times in a short window,
//! so recently fetched documents are kept in a capacity-bounded cache keyed by URL. Failures are
//! never cached.

use crate::crawler::cancel::CancellationToken;
use crate::scraper::client::{HttpClient, RequestError};
use crate::scraper::error::ScraperError;
use moka::sync::Cache;
use scraper::{Html, Selector};
use std::sync::Arc;

pub const DEFAULT_CACHE_CAPACITY: usize = 32;

/// A fetched HTML document.
///
/// Holds the raw body; [Document::html] parses on demand because `scraper::Html` cannot be shared
/// across worker threads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub url: String,
    pub body: String,
}

impl Document {
    pub fn new(url: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            body: body.into(),
        }
    }

    pub fn html(&self) -> Html {
        Html::parse_document(&self.body)
    }

    /// Parse a CSS selector, turning a bad selector into a parse error instead of a panic.
    pub fn selector(&self, sel: &str) -> Result<Selector, ScraperError> {
        Selector::parse(sel).map_err(|e| ScraperError::Parse {
            url: self.url.clone(),
            message: format!("invalid selector {:?}: {}", sel, e),
        })
    }

    /// Resolve `href` against this document's URL.
    pub fn resolve_url(&self, href: &str) -> Result<String, ScraperError> {
        let base = reqwest::Url::parse(&self.url).map_err(|e| ScraperError::InvalidUrl {
            input: self.url.clone(),
            reason: e.to_string(),
        })?;
        base.join(href.trim())
            .map(|u| u.to_string())
            .map_err(|e| ScraperError::InvalidUrl {
                input: href.to_string(),
                reason: e.to_string(),
            })
    }

    pub fn missing(&self, what: &str) -> ScraperError {
        ScraperError::MissingElement {
            what: what.to_string(),
            url: self.url.clone(),
        }
    }
}

/// Fetches documents over HTTP, memoizing recent results.
#[derive(Debug)]
pub struct Fetcher {
    client: HttpClient,
    /// `None` when caching is disabled.
    cache: Option<Cache<String, Arc<Document>>>,
}

impl Fetcher {
    pub fn new(client: HttpClient) -> Self {
        Self::with_capacity(client, DEFAULT_CACHE_CAPACITY)
    }

    /// A `capacity` of zero disables the cache.
    pub fn with_capacity(client: HttpClient, capacity: usize) -> Self {
        let cache = (capacity > 0).then(|| Cache::builder().max_capacity(capacity as u64).build());
        Self { client, cache }
    }

    pub fn client(&self) -> &HttpClient {
        &self.client
    }

    /// GET `url` and return its document. Non-success statuses are errors, and nothing is sent
    /// once `cancel` is set.
    pub fn fetch(
        &self,
        url: &str,
        cancel: &CancellationToken,
    ) -> Result<Arc<Document>, ScraperError> {
        if let Some(doc) = self.cache.as_ref().and_then(|c| c.get(url)) {
            tracing::trace!(url, "document cache hit");
            return Ok(doc);
        }

        // Two workers may fetch the same URL at once; that only costs a duplicate request.
        let response = self.client.get(url, cancel).map_err(|e| match e {
            RequestError::Cancelled => ScraperError::Cancelled {
                url: url.to_string(),
            },
            RequestError::Http(source) => ScraperError::Network {
                url: url.to_string(),
                source,
            },
        })?;
        let status = response.status();
        if !status.is_success() {
            return Err(ScraperError::HttpStatus {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        let body = response.text().map_err(|e| ScraperError::BodyRead {
            url: url.to_string(),
            source: e,
        })?;
        tracing::debug!(url, bytes = body.len(), "fetched document");

        let doc = Arc::new(Document::new(url, body));
        if let Some(cache) = &self.cache {
            cache.insert(url.to_string(), Arc::clone(&doc));
        }
        Ok(doc)
    }

    /// Number of cached documents, after pending evictions have been applied.
    pub fn cached_len(&self) -> usize {
        self.cache.as_ref().map_or(0, |cache| {
            cache.run_pending_tasks();
            cache.entry_count() as usize
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_url_joins_relative_hrefs() -> Result<(), ScraperError> {
        let d = Document::new("https://example.com/manga/one/", "");
        assert_eq!(
            d.resolve_url("chapter-2")?,
            "https://example.com/manga/one/chapter-2"
        );
        assert_eq!(d.resolve_url("/img/1.png")?, "https://example.com/img/1.png");
        assert_eq!(
            d.resolve_url("https://cdn.example.com/x.jpg")?,
            "https://cdn.example.com/x.jpg"
        );
        Ok(())
    }

    #[test]
    fn bad_selector_is_parse_error() {
        let d = Document::new("https://example.com/", "");
        assert!(matches!(d.selector("div[["), Err(ScraperError::Parse { .. })));
    }
}

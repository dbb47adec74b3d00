//! Site adapters and fetching. Site detection, the adapter trait, the shared client and fetcher.

mod client;
mod error;
pub mod fetcher;

pub mod manganelo;
pub mod mangapanda;

pub use client::{HttpClient, HttpClientBuilder, RequestError, DEFAULT_BACKOFF_SECS};
pub use error::ScraperError;
pub use fetcher::{Document, Fetcher, DEFAULT_CACHE_CAPACITY};

use crate::model::{Chapter, ChapterDescriptor, PageDescriptor};
use reqwest::Url;

/// Supported site. Used for dispatch and for the --site override.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Site {
    Manganelo,
    MangaPanda,
}

impl Site {
    pub fn name(self) -> &'static str {
        match self {
            Site::Manganelo => "manganelo",
            Site::MangaPanda => "mangapanda",
        }
    }
}

/// Resolve which site to use from URL and optional override.
pub fn resolve_site(url_input: &str, override_site: Option<Site>) -> Result<Site, ScraperError> {
    if let Some(site) = override_site {
        return Ok(site);
    }
    let url = Url::parse(url_input).map_err(|e| ScraperError::InvalidUrl {
        input: url_input.to_string(),
        reason: e.to_string(),
    })?;
    let host = url.host_str().ok_or_else(|| ScraperError::InvalidUrl {
        input: url_input.to_string(),
        reason: "URL has no host".to_string(),
    })?;
    if host.contains("manganelo.com") {
        Ok(Site::Manganelo)
    } else if host.contains("manga-panda.xyz") {
        Ok(Site::MangaPanda)
    } else {
        Err(ScraperError::UnrecognizedHost {
            host: host.to_string(),
        })
    }
}

/// Per-site extraction rules. One implementation per supported site; the crawler owns the fetching,
/// pagination walking, and scheduling, and only asks the adapter to read documents.
///
/// Adapters are shared by every worker thread and must not keep per-run state.
pub trait SiteAdapter: Send + Sync {
    /// Title of the work from its root document.
    fn resolve_title(&self, doc: &Document) -> Result<String, ScraperError>;

    /// Chapters listed on one page of the root document.
    fn extract_chapters(
        &self,
        root_url: &str,
        doc: &Document,
    ) -> Result<Vec<ChapterDescriptor>, ScraperError>;

    /// Whether the chapter listing spans several root documents.
    fn has_root_pagination(&self) -> bool {
        false
    }

    /// URL of the next page of the chapter listing, if any.
    fn next_root_page_url(&self, _doc: &Document) -> Result<Option<String>, ScraperError> {
        Ok(None)
    }

    /// Title of a chapter from its first document. Defaults to the already known title.
    fn resolve_chapter_title(
        &self,
        chapter: &Chapter,
        _doc: &Document,
    ) -> Result<String, ScraperError> {
        Ok(chapter.title.clone())
    }

    /// Pages listed on one page of a chapter document.
    fn extract_pages(
        &self,
        chapter_url: &str,
        chapter: &Chapter,
        doc: &Document,
    ) -> Result<Vec<PageDescriptor>, ScraperError>;

    fn has_chapter_pagination(&self) -> bool {
        false
    }

    fn next_chapter_page_url(&self, _doc: &Document) -> Result<Option<String>, ScraperError> {
        Ok(None)
    }

    /// Asset URL from a page's own document.
    fn resolve_asset_url(&self, doc: &Document) -> Result<String, ScraperError>;
}

/// Build the adapter for a site.
pub fn adapter_for(site: Site) -> Box<dyn SiteAdapter> {
    match site {
        Site::Manganelo => Box::new(manganelo::ManganeloAdapter),
        Site::MangaPanda => Box::new(mangapanda::MangaPandaAdapter),
    }
}

/// Element text with whitespace runs collapsed.
pub(crate) fn clean_text<'a>(text: impl Iterator<Item = &'a str>) -> String {
    text.collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

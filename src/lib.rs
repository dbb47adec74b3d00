//! mangacrawl: resumable crawler that downloads a manga's chapters and pages from Manganelo or
//! MangaPanda into a local directory tree, with a JSON cache mirroring progress.

pub mod cli;
pub mod config;
pub mod crawler;
pub mod download;
pub mod logging;
pub mod model;
pub mod scraper;
pub mod store;

// Re-exports for CLI and consumers.
pub use crawler::{
    CancellationToken, CrawlError, Crawler, Progress, ProgressSnapshot, RunOutcome, RunReport,
    RunState,
};
pub use download::{DownloadError, DownloadOutcome, Downloader};
pub use model::{Chapter, ChapterDescriptor, ModelError, Page, PageDescriptor, Work};
pub use scraper::{
    adapter_for, resolve_site, Document, Fetcher, HttpClient, HttpClientBuilder, ScraperError,
    Site, SiteAdapter,
};
pub use store::StoreError;

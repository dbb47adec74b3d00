//! Resumable two-stage crawl: chapter discovery feeding page downloads.
//!
//! A run moves through `Idle → ResolvingTitle → DiscoveringChapters → Dispatching → Draining →
//! Done`, or to `Cancelled` from any of them once the [CancellationToken] is observed.
//!
//! The cache file is read up to twice: once from an explicitly supplied path before anything
//! else, and once from the canonical `<output>/cache.json` after the title is known (which wins).
//! It is written after the dispatch decision, after each chapter's pages are known, after each
//! chapter's last outstanding page, and at the end of the run.

pub mod cancel;
pub mod progress;
pub mod queue;
mod worker;

pub use cancel::CancellationToken;
pub use progress::{Progress, ProgressSnapshot};

use crate::download::{DownloadError, Downloader};
use crate::model::{Chapter, ModelError, Work};
use crate::scraper::{Fetcher, HttpClient, ScraperError, SiteAdapter};
use crate::store::{self, StoreError};
use queue::WorkQueue;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::mpsc;
use std::thread;
use thiserror::Error;
use worker::{ChapterJob, ChapterNames, PageJob, WalkEnd, WorkerContext, WorkerEvent};

/// Run-global failure. The run stops early; nothing already on disk is touched.
#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ModelError),

    #[error("Failed to get the title from {url}: {source}")]
    TitleUnresolved {
        url: String,
        #[source]
        source: ScraperError,
    },

    #[error("Failed to load the chapter list: {0}")]
    Discovery(#[source] DiscoveryError),

    #[error("{0}")]
    Persistence(#[from] StoreError),
}

/// Failure while walking a listing (root chapter list or one chapter's pages).
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error(transparent)]
    Scraper(#[from] ScraperError),

    #[error("invalid item listed at {url}: {source}")]
    InvalidItem {
        url: String,
        #[source]
        source: ModelError,
    },
}

/// Failure local to one page. Never crosses the worker boundary.
#[derive(Debug, Error)]
pub enum PageError {
    #[error("page {index} has neither a document URL nor an asset URL")]
    Unresolvable { index: u32 },

    #[error("cannot resolve asset URL: {0}")]
    Resolution(#[source] ScraperError),

    #[error("{0}")]
    Transfer(#[source] DownloadError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    ResolvingTitle,
    DiscoveringChapters,
    Dispatching,
    Draining,
    Done,
    Cancelled,
}

/// Why a run ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Workers ran until the queues drained. Individual items may still have failed.
    Completed,
    /// Every chapter was already on disk; no workers were started.
    AlreadyComplete,
    /// The listing produced no chapters.
    NoChapters,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub outcome: RunOutcome,
    pub title: Option<String>,
    pub output_dir: Option<PathBuf>,
    pub chapters: usize,
    pub stats: ProgressSnapshot,
}

/// Drives one work through discovery and download.
pub struct Crawler {
    work: Work,
    adapter: Box<dyn SiteAdapter>,
    fetcher: Fetcher,
    downloader: Downloader,
    cancel: CancellationToken,
    progress: Progress,
    seed_cache: Option<PathBuf>,
    state: RunState,
}

impl Crawler {
    /// Crawler with hidden progress and the default document cache size.
    pub fn new(work: Work, adapter: Box<dyn SiteAdapter>, client: HttpClient) -> Self {
        Self {
            work,
            adapter,
            fetcher: Fetcher::new(client.clone()),
            downloader: Downloader::new(client),
            cancel: CancellationToken::new(),
            progress: Progress::hidden(),
            seed_cache: None,
            state: RunState::Idle,
        }
    }

    pub fn with_progress(mut self, progress: Progress) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_fetch_cache_size(mut self, capacity: usize) -> Self {
        self.fetcher = Fetcher::with_capacity(self.fetcher.client().clone(), capacity);
        self
    }

    /// Seed the run from an existing cache file. The file must exist.
    pub fn with_cache_file(mut self, path: impl Into<PathBuf>) -> Result<Self, CrawlError> {
        let path = path.into();
        if !path.is_file() {
            tracing::error!(path = %path.display(), "cache file not found");
            return Err(StoreError::NotFound { path }.into());
        }
        self.seed_cache = Some(path);
        Ok(self)
    }

    /// Use an existing token, e.g. one shared with a signal handler or another crawler.
    pub fn with_cancellation_token(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Handle for stopping the run from another thread.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Request cancellation. Workers stop at their next check point.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn work(&self) -> &Work {
        &self.work
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn progress(&self) -> &Progress {
        &self.progress
    }

    /// Run the crawl to completion, cancellation, or a run-global error.
    pub fn run(&mut self) -> Result<RunReport, CrawlError> {
        self.enter(RunState::Idle);
        let result = self.run_stages();
        self.progress.finish();
        match &result {
            Ok(report) if report.outcome == RunOutcome::Cancelled => self.enter(RunState::Cancelled),
            Ok(_) => self.enter(RunState::Done),
            Err(e) => {
                tracing::error!(url = %self.work.source_url, error = %e, "crawl stopped");
                self.enter(RunState::Done);
            }
        }
        result
    }

    fn run_stages(&mut self) -> Result<RunReport, CrawlError> {
        if let Some(path) = self.seed_cache.take() {
            self.work = store::load(&path)?;
            tracing::info!(path = %path.display(), "resuming from cache");
        }
        if self.cancel.is_cancelled() {
            return Ok(self.report(RunOutcome::Cancelled));
        }

        self.enter(RunState::ResolvingTitle);
        if !self.resolve_title()? {
            return Ok(self.report(RunOutcome::Cancelled));
        }
        if let Some(path) = self.work.cache_path.clone().filter(|p| p.is_file()) {
            self.work = store::load(&path)?;
            tracing::info!(path = %path.display(), "resuming from cache");
        }
        if self.cancel.is_cancelled() {
            return Ok(self.report(RunOutcome::Cancelled));
        }

        self.enter(RunState::DiscoveringChapters);
        let Some(discovered) = self.discover_chapters()? else {
            return Ok(self.report(RunOutcome::Cancelled));
        };
        let found = discovered.len();
        let added = self.work.merge_chapters(discovered);
        tracing::info!(
            title = self.work.title.as_deref().unwrap_or_default(),
            found,
            added,
            total = self.work.chapters.len(),
            "chapters fetched"
        );
        if self.work.chapters.is_empty() {
            self.progress.notice(format!(
                "No chapters were found for '{}'.",
                self.work.title.as_deref().unwrap_or_default()
            ));
            return Ok(self.report(RunOutcome::NoChapters));
        }

        self.enter(RunState::Dispatching);
        let jobs: Vec<ChapterJob> = self
            .work
            .chapters
            .iter()
            .enumerate()
            .filter(|(_, chapter)| !chapter.is_complete())
            .map(|(slot, chapter)| ChapterJob {
                slot,
                chapter: chapter.clone(),
            })
            .collect();
        store::save(&self.work)?;
        if jobs.is_empty() {
            self.progress.notice(format!(
                "All {} chapters have already been downloaded.",
                self.work.chapters.len()
            ));
            return Ok(self.report(RunOutcome::AlreadyComplete));
        }
        let already_done = self.work.chapters.len() - jobs.len();
        if already_done > 0 {
            tracing::info!(
                queued = jobs.len(),
                already_done,
                "some chapters have already been downloaded"
            );
        }
        self.progress.add_chapters(jobs.len() as u64);

        self.enter(RunState::Draining);
        self.drain(jobs)?;
        store::save(&self.work)?;

        let outcome = if self.cancel.is_cancelled() {
            RunOutcome::Cancelled
        } else {
            RunOutcome::Completed
        };
        Ok(self.report(outcome))
    }

    /// Resolve the title from the root document if unknown, deriving output and cache paths.
    /// False if cancelled before the root document was fetched.
    fn resolve_title(&mut self) -> Result<bool, CrawlError> {
        if let Some(title) = self.work.title.clone().filter(|t| !t.trim().is_empty()) {
            if self.work.cache_path.is_none() {
                self.work.set_title(&title);
            }
            return Ok(true);
        }
        let url = self.work.source_url.clone();
        let title = match self
            .fetcher
            .fetch(&url, &self.cancel)
            .and_then(|doc| self.adapter.resolve_title(&doc))
        {
            Ok(title) => title,
            Err(ScraperError::Cancelled { .. }) => return Ok(false),
            Err(source) => return Err(CrawlError::TitleUnresolved { url, source }),
        };
        self.work.set_title(&title);
        tracing::info!(title = %title, output = ?self.work.output_dir, "work title resolved");
        Ok(true)
    }

    /// Walk the root listing. `None` if cancelled part-way.
    fn discover_chapters(&self) -> Result<Option<Vec<Chapter>>, CrawlError> {
        let work_dir = self
            .work
            .output_dir
            .clone()
            .unwrap_or_else(|| self.work.base_output_dir.clone());
        let mut chapters = Vec::new();
        let end = worker::walk_pagination(
            &self.fetcher,
            &self.cancel,
            &self.work.source_url,
            self.adapter.has_root_pagination(),
            |url, doc| {
                tracing::info!(url, "fetching chapters");
                for d in self.adapter.extract_chapters(url, doc)? {
                    let chapter = Chapter::new(d.index, d.source_url, &work_dir, d.title)
                        .map_err(|source| DiscoveryError::InvalidItem {
                            url: url.to_string(),
                            source,
                        })?;
                    chapters.push(chapter);
                }
                Ok(self.adapter.next_root_page_url(doc)?)
            },
        )
        .map_err(CrawlError::Discovery)?;
        match end {
            WalkEnd::Finished => Ok(Some(chapters)),
            WalkEnd::Cancelled => Ok(None),
        }
    }

    /// Start both pools, apply worker events to the work, and wait for every worker to exit.
    fn drain(&mut self, jobs: Vec<ChapterJob>) -> Result<(), CrawlError> {
        let work_title = self.work.title.clone().unwrap_or_default();
        let chapter_workers = self.work.chapter_workers.max(1);
        let page_workers = self.work.page_workers.max(1);
        let cancel = &self.cancel;
        let names = ChapterNames::new(&self.work.chapters);
        let ctx = WorkerContext {
            fetcher: &self.fetcher,
            downloader: &self.downloader,
            adapter: &*self.adapter,
            cancel,
            progress: &self.progress,
            names: &names,
            work_title: &work_title,
        };
        let chapter_queue = WorkQueue::from_items(jobs);
        let page_queue: WorkQueue<PageJob> = WorkQueue::new();
        let (tx, rx) = mpsc::channel();
        let mut collector = Collector::new(&mut self.work);

        thread::scope(|s| {
            let ctx = &ctx;
            let chapter_queue = &chapter_queue;
            let page_queue = &page_queue;

            // Producers are registered before any page worker can observe the queue.
            let guards: Vec<_> = (0..chapter_workers).map(|_| page_queue.producer()).collect();
            let mut chapter_handles = Vec::with_capacity(chapter_workers);
            for (i, guard) in guards.into_iter().enumerate() {
                let tx = tx.clone();
                let spawned = thread::Builder::new()
                    .name(format!("chapter-worker-{}", i))
                    .spawn_scoped(s, move || worker::chapter_worker(ctx, chapter_queue, guard, tx));
                match spawned {
                    Ok(handle) => chapter_handles.push(handle),
                    Err(e) => tracing::error!(error = %e, "failed to start chapter worker"),
                }
            }
            let mut page_handles = Vec::with_capacity(page_workers);
            for i in 0..page_workers {
                let tx = tx.clone();
                let spawned = thread::Builder::new()
                    .name(format!("page-worker-{}", i))
                    .spawn_scoped(s, move || worker::page_worker(ctx, page_queue, tx));
                match spawned {
                    Ok(handle) => page_handles.push(handle),
                    Err(e) => tracing::error!(error = %e, "failed to start page worker"),
                }
            }
            drop(tx);

            // Ends once every worker has exited and dropped its sender.
            for event in rx {
                if let Err(e) = collector.apply(event) {
                    if collector.save_error.is_none() {
                        tracing::error!(error = %e, "cannot record progress; stopping");
                        cancel.cancel();
                        collector.save_error = Some(e);
                    }
                }
            }

            for handle in chapter_handles.into_iter().chain(page_handles) {
                if handle.join().is_err() {
                    tracing::error!("a worker thread panicked");
                }
            }
        });

        match collector.save_error {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }

    fn enter(&mut self, state: RunState) {
        if self.state != state {
            tracing::debug!(from = ?self.state, to = ?state, "crawl state");
            self.state = state;
        }
    }

    fn report(&self, outcome: RunOutcome) -> RunReport {
        RunReport {
            outcome,
            title: self.work.title.clone(),
            output_dir: self.work.output_dir.clone(),
            chapters: self.work.chapters.len(),
            stats: self.progress.snapshot(),
        }
    }
}

/// Applies worker events to the work and saves at chapter-level milestones.
struct Collector<'a> {
    work: &'a mut Work,
    outstanding: HashMap<usize, usize>,
    save_error: Option<StoreError>,
}

impl<'a> Collector<'a> {
    fn new(work: &'a mut Work) -> Self {
        Self {
            work,
            outstanding: HashMap::new(),
            save_error: None,
        }
    }

    fn apply(&mut self, event: WorkerEvent) -> Result<(), StoreError> {
        match event {
            WorkerEvent::ChapterDiscovered {
                slot,
                chapter,
                enqueued,
            } => {
                if let Some(target) = self.work.chapters.get_mut(slot) {
                    *target = chapter;
                }
                self.outstanding.insert(slot, enqueued);
                self.save()
            }
            WorkerEvent::PageFinished {
                slot,
                position,
                page,
            } => {
                if let Some(target) = self
                    .work
                    .chapters
                    .get_mut(slot)
                    .and_then(|c| c.pages.get_mut(position))
                    .filter(|p| p.index == page.index)
                {
                    *target = page;
                }
                let remaining = self.outstanding.get_mut(&slot).map(|n| {
                    *n = n.saturating_sub(1);
                    *n
                });
                if remaining == Some(0) {
                    self.outstanding.remove(&slot);
                    self.save()
                } else {
                    Ok(())
                }
            }
        }
    }

    fn save(&self) -> Result<(), StoreError> {
        if self.save_error.is_some() {
            return Ok(());
        }
        store::save(self.work).map(|_| ())
    }
}

//! Chapter-worker and page-worker loops.
//!
//! Workers receive owned copies of chapters and pages through the queues and report every change
//! back to the scheduler as a [WorkerEvent]; the scheduler is the only writer of the [Work].
//! Item-local failures end here: they are logged, counted, and never propagated.
//!
//! [Work]: crate::model::Work

use crate::crawler::cancel::CancellationToken;
use crate::crawler::progress::Progress;
use crate::crawler::queue::{ProducerGuard, WorkQueue};
use crate::crawler::{DiscoveryError, PageError};
use crate::download::{DownloadError, DownloadOutcome, Downloader};
use crate::model::{Chapter, Page};
use crate::scraper::{Document, Fetcher, ScraperError, SiteAdapter};
use std::collections::HashSet;
use std::sync::mpsc::Sender;
use std::sync::Mutex;

/// A chapter to process. `slot` is its position in the work's chapter list.
#[derive(Debug, Clone)]
pub(crate) struct ChapterJob {
    pub slot: usize,
    pub chapter: Chapter,
}

/// A page to download, paired with its owning chapter.
#[derive(Debug, Clone)]
pub(crate) struct PageJob {
    pub slot: usize,
    pub position: usize,
    pub chapter_title: String,
    pub page: Page,
}

#[derive(Debug)]
pub(crate) enum WorkerEvent {
    /// A chapter's page list is known (possibly partially, if discovery failed) and `enqueued`
    /// of its pages were pushed to the page queue.
    ChapterDiscovered {
        slot: usize,
        chapter: Chapter,
        enqueued: usize,
    },
    /// A page left the page queue for good, with whatever was learned about it.
    PageFinished {
        slot: usize,
        position: usize,
        page: Page,
    },
}

/// Everything a worker borrows from the scheduler.
pub(crate) struct WorkerContext<'a> {
    pub fetcher: &'a Fetcher,
    pub downloader: &'a Downloader,
    pub adapter: &'a dyn SiteAdapter,
    pub cancel: &'a CancellationToken,
    pub progress: &'a Progress,
    pub names: &'a ChapterNames,
    pub work_title: &'a str,
}

/// Chapter titles and directory names in use across the work.
///
/// A resolved title is only applied if neither it nor the directory it maps to is taken, so two
/// chapters never share an output directory.
#[derive(Debug, Default)]
pub(crate) struct ChapterNames {
    taken: Mutex<HashSet<String>>,
}

impl ChapterNames {
    pub fn new<'c>(chapters: impl IntoIterator<Item = &'c Chapter>) -> Self {
        let mut taken = HashSet::new();
        for chapter in chapters {
            taken.extend(name_keys(chapter));
        }
        Self {
            taken: Mutex::new(taken),
        }
    }

    /// Reserve the names `chapter` would get under `title`. False if any of them is taken.
    pub fn claim(&self, chapter: &Chapter, title: &str) -> bool {
        let mut renamed = chapter.clone();
        renamed.rename(title);
        let keys = name_keys(&renamed);
        let mut taken = self.taken.lock().unwrap_or_else(|e| e.into_inner());
        if keys.iter().any(|k| taken.contains(k)) {
            return false;
        }
        taken.extend(keys);
        true
    }
}

fn name_keys(chapter: &Chapter) -> Vec<String> {
    let mut keys = vec![format!("title:{}", chapter.title)];
    if let Some(dir) = chapter.output_dir.file_name() {
        keys.push(format!("dir:{}", dir.to_string_lossy()));
    }
    keys
}

/// How a pagination walk ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WalkEnd {
    Finished,
    Cancelled,
}

/// Follow a chain of "next page" documents starting at `start_url`.
///
/// `visit` reads one document and returns the next URL, if any. Only the first document is
/// visited when `paginated` is false. Cancellation is checked before every fetch, and a URL seen
/// twice ends the walk.
pub(crate) fn walk_pagination<F>(
    fetcher: &Fetcher,
    cancel: &CancellationToken,
    start_url: &str,
    paginated: bool,
    mut visit: F,
) -> Result<WalkEnd, DiscoveryError>
where
    F: FnMut(&str, &Document) -> Result<Option<String>, DiscoveryError>,
{
    let mut seen = HashSet::new();
    let mut next = Some(start_url.to_string());
    while let Some(url) = next.take() {
        if cancel.is_cancelled() {
            return Ok(WalkEnd::Cancelled);
        }
        if !seen.insert(url.clone()) {
            tracing::warn!(url = %url, "pagination loops back to a visited page; stopping");
            break;
        }
        let doc = match fetcher.fetch(&url, cancel) {
            Ok(doc) => doc,
            Err(ScraperError::Cancelled { .. }) => return Ok(WalkEnd::Cancelled),
            Err(e) => return Err(e.into()),
        };
        let following = visit(&url, &doc)?;
        if paginated {
            next = following;
        }
    }
    Ok(WalkEnd::Finished)
}

/// Chapter-worker loop. Exits when the chapter queue is empty or cancellation is observed.
///
/// `pages` keeps the page queue open until this worker exits.
pub(crate) fn chapter_worker(
    ctx: &WorkerContext<'_>,
    chapters: &WorkQueue<ChapterJob>,
    pages: ProducerGuard<'_, PageJob>,
    events: Sender<WorkerEvent>,
) {
    loop {
        if ctx.cancel.is_cancelled() {
            return;
        }
        let Some(ChapterJob { slot, mut chapter }) = chapters.try_pop() else {
            return;
        };

        if chapter.is_complete() {
            tracing::debug!(work = ctx.work_title, chapter = %chapter.title, "chapter already downloaded");
            ctx.progress.chapter_skipped(&chapter.title);
            continue;
        }

        let mut failure = None;
        if !chapter.has_pages() {
            match discover_pages(ctx, &mut chapter) {
                Ok(WalkEnd::Finished) => {}
                Ok(WalkEnd::Cancelled) => {
                    // Keep what was found; the item itself is left unprocessed.
                    let _ = events.send(WorkerEvent::ChapterDiscovered {
                        slot,
                        chapter,
                        enqueued: 0,
                    });
                    return;
                }
                Err(e) => failure = Some(e),
            }
        }

        let jobs: Vec<PageJob> = chapter
            .pages
            .iter()
            .enumerate()
            .filter(|(_, page)| !page.is_present())
            .map(|(position, page)| PageJob {
                slot,
                position,
                chapter_title: chapter.title.clone(),
                page: page.clone(),
            })
            .collect();
        ctx.progress.add_pages(jobs.len() as u64);

        // Announce the page list before any of its pages can finish.
        let _ = events.send(WorkerEvent::ChapterDiscovered {
            slot,
            chapter: chapter.clone(),
            enqueued: jobs.len(),
        });
        for job in jobs {
            pages.push(job);
        }

        match failure {
            Some(e) => {
                tracing::warn!(
                    work = ctx.work_title,
                    chapter = %chapter.title,
                    url = %chapter.source_url,
                    pages_found = chapter.pages.len(),
                    error = %e,
                    "failed to load chapter pages"
                );
                ctx.progress
                    .chapter_failed(format!("Failed to load the chapter {}: {}", chapter.title, e));
            }
            None => {
                tracing::debug!(
                    work = ctx.work_title,
                    chapter = %chapter.title,
                    pages = chapter.pages.len(),
                    "chapter processed"
                );
                ctx.progress.chapter_done();
            }
        }
    }
}

/// Walk the chapter's pagination chain, appending every page found. Pages found before a failure
/// stay in the chapter.
fn discover_pages(ctx: &WorkerContext<'_>, chapter: &mut Chapter) -> Result<WalkEnd, DiscoveryError> {
    let start_url = chapter.source_url.clone();
    let mut first = true;
    walk_pagination(
        ctx.fetcher,
        ctx.cancel,
        &start_url,
        ctx.adapter.has_chapter_pagination(),
        |url, doc| {
            if first {
                first = false;
                if chapter.has_default_title() {
                    match ctx.adapter.resolve_chapter_title(chapter, doc) {
                        Ok(title) if ctx.names.claim(chapter, &title) => chapter.rename(&title),
                        Ok(title) => tracing::warn!(
                            chapter = %chapter.title,
                            resolved = %title,
                            "resolved chapter title is already in use; keeping the default"
                        ),
                        Err(e) => {
                            tracing::debug!(chapter = %chapter.title, error = %e, "chapter title not resolved")
                        }
                    }
                }
            }
            let descriptors = ctx.adapter.extract_pages(url, chapter, doc)?;
            for d in descriptors {
                if chapter.pages.iter().any(|p| p.index == d.index) {
                    continue;
                }
                let page = Page::new(d.index, d.source_url, &chapter.output_dir, d.asset_url)
                    .map_err(|source| DiscoveryError::InvalidItem {
                        url: url.to_string(),
                        source,
                    })?;
                chapter.pages.push(page);
            }
            Ok(ctx.adapter.next_chapter_page_url(doc)?)
        },
    )
}

/// How one page ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PageStep {
    Downloaded,
    AlreadyPresent,
    Cancelled,
}

/// Page-worker loop. Exits once the page queue is empty and every chapter worker has exited, or
/// when cancellation is observed.
pub(crate) fn page_worker(
    ctx: &WorkerContext<'_>,
    pages: &WorkQueue<PageJob>,
    events: Sender<WorkerEvent>,
) {
    while let Some(job) = pages.pop(ctx.cancel) {
        let PageJob {
            slot,
            position,
            chapter_title,
            mut page,
        } = job;

        if page.is_present() {
            tracing::debug!(work = ctx.work_title, chapter = %chapter_title, page = page.index, "page is skipped");
            ctx.progress.page_skipped();
            let _ = events.send(WorkerEvent::PageFinished {
                slot,
                position,
                page,
            });
            continue;
        }

        let known_asset = page.asset_url.clone();
        let step = process_page(ctx, &mut page);
        let changed = page.asset_url != known_asset;
        match step {
            Ok(PageStep::Downloaded) => ctx.progress.page_downloaded(),
            Ok(PageStep::AlreadyPresent) => ctx.progress.page_skipped(),
            Ok(PageStep::Cancelled) => {
                if changed {
                    let _ = events.send(WorkerEvent::PageFinished {
                        slot,
                        position,
                        page,
                    });
                }
                return;
            }
            Err(e) => {
                tracing::warn!(
                    work = ctx.work_title,
                    chapter = %chapter_title,
                    page = page.index,
                    url = %page.source_url,
                    error = %e,
                    "failed to process page"
                );
                ctx.progress.page_failed(format!(
                    "Failed to process page {} of {}: {}",
                    page.index, chapter_title, e
                ));
            }
        }
        let _ = events.send(WorkerEvent::PageFinished {
            slot,
            position,
            page,
        });
    }
}

fn process_page(ctx: &WorkerContext<'_>, page: &mut Page) -> Result<PageStep, PageError> {
    if !page.is_resolvable() {
        return Err(PageError::Unresolvable { index: page.index });
    }

    if page.asset_url.is_none() {
        let doc = match ctx.fetcher.fetch(&page.source_url, ctx.cancel) {
            Ok(doc) => doc,
            Err(ScraperError::Cancelled { .. }) => return Ok(PageStep::Cancelled),
            Err(e) => return Err(PageError::Resolution(e)),
        };
        let asset_url = ctx
            .adapter
            .resolve_asset_url(&doc)
            .map_err(PageError::Resolution)?;
        let asset_url = asset_url.trim();
        if asset_url.is_empty() {
            return Err(PageError::Unresolvable { index: page.index });
        }
        page.asset_url = Some(doc.resolve_url(asset_url).map_err(PageError::Resolution)?);
        if page.is_present() {
            return Ok(PageStep::AlreadyPresent);
        }
    }

    match ctx.downloader.download(page, ctx.cancel) {
        Ok(DownloadOutcome::Written { .. }) => Ok(PageStep::Downloaded),
        Ok(DownloadOutcome::AlreadyPresent(_)) => Ok(PageStep::AlreadyPresent),
        Err(DownloadError::Cancelled { .. }) => Ok(PageStep::Cancelled),
        Err(e) => Err(PageError::Transfer(e)),
    }
}

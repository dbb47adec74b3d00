//! Progress counters and their terminal rendering.
//!
//! Counts are "processed" (attempted, regardless of outcome) against a running total; the page
//! total grows as chapter workers discover pages. Per-item failures are printed as short notices
//! above the bars.

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProgressSnapshot {
    pub chapters_total: u64,
    pub chapters_processed: u64,
    pub chapters_skipped: u64,
    pub chapters_failed: u64,
    pub pages_total: u64,
    pub pages_processed: u64,
    pub pages_skipped: u64,
    pub pages_failed: u64,
    pub pages_downloaded: u64,
}

#[derive(Debug, Default)]
struct Counters {
    chapters_total: AtomicU64,
    chapters_processed: AtomicU64,
    chapters_skipped: AtomicU64,
    chapters_failed: AtomicU64,
    pages_total: AtomicU64,
    pages_processed: AtomicU64,
    pages_skipped: AtomicU64,
    pages_failed: AtomicU64,
    pages_downloaded: AtomicU64,
}

/// Shared progress tracker. All methods take `&self` and are safe to call from any worker.
#[derive(Debug)]
pub struct Progress {
    multi: MultiProgress,
    chapters: ProgressBar,
    pages: ProgressBar,
    counters: Counters,
    visible: bool,
}

impl Progress {
    /// Progress drawn to stderr.
    pub fn new() -> Self {
        Self::with_target(ProgressDrawTarget::stderr(), true)
    }

    /// Progress that only counts; nothing is drawn.
    pub fn hidden() -> Self {
        Self::with_target(ProgressDrawTarget::hidden(), false)
    }

    fn with_target(target: ProgressDrawTarget, visible: bool) -> Self {
        let multi = MultiProgress::with_draw_target(target);
        let chapters = multi.add(ProgressBar::new(0));
        chapters.set_style(bar_style());
        chapters.set_prefix("Chapter Processing");
        let pages = multi.add(ProgressBar::new(0));
        pages.set_style(bar_style());
        pages.set_prefix("Page Download     ");
        if visible {
            chapters.enable_steady_tick(Duration::from_millis(120));
            pages.enable_steady_tick(Duration::from_millis(120));
        }
        Self {
            multi,
            chapters,
            pages,
            counters: Counters::default(),
            visible,
        }
    }

    pub fn add_chapters(&self, n: u64) {
        self.counters.chapters_total.fetch_add(n, Ordering::SeqCst);
        self.chapters.inc_length(n);
    }

    pub fn add_pages(&self, n: u64) {
        if n == 0 {
            return;
        }
        self.counters.pages_total.fetch_add(n, Ordering::SeqCst);
        self.pages.inc_length(n);
    }

    pub fn chapter_done(&self) {
        self.counters.chapters_processed.fetch_add(1, Ordering::SeqCst);
        self.chapters.inc(1);
    }

    pub fn chapter_skipped(&self, title: &str) {
        self.counters.chapters_skipped.fetch_add(1, Ordering::SeqCst);
        self.notice(format!("{} is skipped.", title));
        self.chapter_done();
    }

    pub fn chapter_failed(&self, message: String) {
        self.counters.chapters_failed.fetch_add(1, Ordering::SeqCst);
        self.notice(message);
        self.chapter_done();
    }

    pub fn page_downloaded(&self) {
        self.counters.pages_downloaded.fetch_add(1, Ordering::SeqCst);
        self.page_done();
    }

    pub fn page_skipped(&self) {
        self.counters.pages_skipped.fetch_add(1, Ordering::SeqCst);
        self.page_done();
    }

    pub fn page_failed(&self, message: String) {
        self.counters.pages_failed.fetch_add(1, Ordering::SeqCst);
        self.notice(message);
        self.page_done();
    }

    fn page_done(&self) {
        self.counters.pages_processed.fetch_add(1, Ordering::SeqCst);
        self.pages.inc(1);
    }

    /// Print a short line above the bars without disturbing them.
    pub fn notice(&self, message: impl AsRef<str>) {
        if self.visible {
            let _ = self.multi.println(message.as_ref());
        }
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        let c = &self.counters;
        ProgressSnapshot {
            chapters_total: c.chapters_total.load(Ordering::SeqCst),
            chapters_processed: c.chapters_processed.load(Ordering::SeqCst),
            chapters_skipped: c.chapters_skipped.load(Ordering::SeqCst),
            chapters_failed: c.chapters_failed.load(Ordering::SeqCst),
            pages_total: c.pages_total.load(Ordering::SeqCst),
            pages_processed: c.pages_processed.load(Ordering::SeqCst),
            pages_skipped: c.pages_skipped.load(Ordering::SeqCst),
            pages_failed: c.pages_failed.load(Ordering::SeqCst),
            pages_downloaded: c.pages_downloaded.load(Ordering::SeqCst),
        }
    }

    /// Stop drawing. Counters stay readable.
    pub fn finish(&self) {
        self.chapters.disable_steady_tick();
        self.pages.disable_steady_tick();
        self.chapters.finish_and_clear();
        self.pages.finish_and_clear();
    }
}

impl Default for Progress {
    fn default() -> Self {
        Self::new()
    }
}

fn bar_style() -> ProgressStyle {
    ProgressStyle::with_template("{spinner} {prefix} [{bar:40}] {pos}/{len} ({elapsed})")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏")
        .progress_chars("█▉▊▋▌▍▎▏ ")
}

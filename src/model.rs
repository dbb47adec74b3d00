//! Data model for a crawled work: a [Work] owns ordered [Chapter]s, each owning ordered [Page]s.
//!
//! The same shape is written to the JSON cache file by [crate::store]; field names there are
//! camelCase and all paths are absolute.

use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Name of the cache file written inside a work's output directory.
pub const CACHE_FILE_NAME: &str = "cache.json";

pub const DEFAULT_CHAPTER_WORKERS: usize = 3;
pub const DEFAULT_PAGE_WORKERS: usize = 5;

/// Punctuation kept by [safe_filename] besides alphanumerics.
const SAFE_FILENAME_CHARS: [char; 7] = [' ', '.', '_', '-', '\'', '(', ')'];

/// Invalid construction input. Fatal: raised before any work starts.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ModelError {
    #[error("{kind} index must be a positive number, got {index}")]
    InvalidIndex { kind: &'static str, index: u32 },

    #[error("{field} must not be empty")]
    EmptyField { field: &'static str },

    #[error("invalid number of {pool} workers: {count} (must be at least 1)")]
    InvalidWorkerCount { pool: &'static str, count: usize },
}

/// The smallest unit: one downloadable asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page {
    /// 1-based; defines the file name.
    pub index: u32,
    /// Document the asset URL is resolved from.
    pub source_url: String,
    /// Directory the asset is written into.
    #[serde(rename = "outputDir")]
    pub destination_dir: PathBuf,
    pub asset_url: Option<String>,
}

impl Page {
    pub fn new(
        index: u32,
        source_url: impl Into<String>,
        destination_dir: impl Into<PathBuf>,
        asset_url: Option<String>,
    ) -> Result<Self, ModelError> {
        if index < 1 {
            return Err(ModelError::InvalidIndex {
                kind: "page",
                index,
            });
        }
        let source_url = source_url.into();
        if source_url.trim().is_empty() {
            return Err(ModelError::EmptyField {
                field: "page source URL",
            });
        }
        Ok(Self {
            index,
            source_url,
            destination_dir: destination_dir.into(),
            asset_url: asset_url.filter(|u| !u.trim().is_empty()),
        })
    }

    /// `page{index:04}{ext}`; `None` while the asset URL is unknown.
    pub fn filename(&self) -> Option<String> {
        let asset_url = self.asset_url.as_deref()?;
        Some(format!("page{:04}{}", self.index, asset_extension(asset_url)))
    }

    pub fn destination_path(&self) -> Option<PathBuf> {
        self.filename().map(|name| self.destination_dir.join(name))
    }

    /// True if the asset has already been written to its destination.
    pub fn is_present(&self) -> bool {
        self.destination_path()
            .map(|p| p.is_file())
            .unwrap_or(false)
    }

    /// A page can be processed if either its document or its asset is known.
    pub fn is_resolvable(&self) -> bool {
        !self.source_url.trim().is_empty() || self.asset_url.is_some()
    }
}

/// An ordered sub-unit of a work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chapter {
    /// Ordering key. May be non-contiguous (special chapters).
    pub index: u32,
    pub source_url: String,
    pub output_dir: PathBuf,
    pub title: String,
    #[serde(default)]
    pub pages: Vec<Page>,
}

impl Chapter {
    /// Build a chapter under `work_dir`. A missing title defaults to `chapter{index:04}`.
    pub fn new(
        index: u32,
        source_url: impl Into<String>,
        work_dir: &Path,
        title: Option<String>,
    ) -> Result<Self, ModelError> {
        if index < 1 {
            return Err(ModelError::InvalidIndex {
                kind: "chapter",
                index,
            });
        }
        let source_url = source_url.into();
        if source_url.trim().is_empty() {
            return Err(ModelError::EmptyField {
                field: "chapter source URL",
            });
        }
        let title = title
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| default_chapter_title(index));
        let output_dir = work_dir.join(chapter_dir_name(index, &title));
        Ok(Self {
            index,
            source_url,
            output_dir,
            title,
            pages: Vec::new(),
        })
    }

    pub fn has_pages(&self) -> bool {
        !self.pages.is_empty()
    }

    /// Pages are known and every one of them is on disk.
    pub fn is_complete(&self) -> bool {
        self.has_pages() && self.pages.iter().all(Page::is_present)
    }

    /// True while the title is the index-derived placeholder.
    pub fn has_default_title(&self) -> bool {
        self.title == default_chapter_title(self.index)
    }

    /// Rename the chapter and move its (not yet populated) output directory alongside.
    pub fn rename(&mut self, title: &str) {
        let title = title.trim();
        if title.is_empty() || title == self.title {
            return;
        }
        self.title = title.to_string();
        if let Some(parent) = self.output_dir.parent() {
            self.output_dir = parent.join(chapter_dir_name(self.index, &self.title));
        }
        for page in &mut self.pages {
            page.destination_dir = self.output_dir.clone();
        }
    }

    pub fn present_page_count(&self) -> usize {
        self.pages.iter().filter(|p| p.is_present()).count()
    }
}

/// The top-level crawlable unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Work {
    pub source_url: String,
    pub base_output_dir: PathBuf,
    pub output_dir: Option<PathBuf>,
    pub cache_path: Option<PathBuf>,
    pub title: Option<String>,
    #[serde(rename = "chapterWorkerCount")]
    pub chapter_workers: usize,
    #[serde(rename = "pageWorkerCount")]
    pub page_workers: usize,
    #[serde(default)]
    pub chapters: Vec<Chapter>,
}

impl Work {
    /// New work with default worker counts. `base_output_dir` is made absolute.
    pub fn new(
        source_url: impl Into<String>,
        base_output_dir: impl AsRef<Path>,
    ) -> Result<Self, ModelError> {
        Self::with_workers(
            source_url,
            base_output_dir,
            DEFAULT_CHAPTER_WORKERS,
            DEFAULT_PAGE_WORKERS,
        )
    }

    pub fn with_workers(
        source_url: impl Into<String>,
        base_output_dir: impl AsRef<Path>,
        chapter_workers: usize,
        page_workers: usize,
    ) -> Result<Self, ModelError> {
        let source_url = source_url.into();
        if source_url.trim().is_empty() {
            return Err(ModelError::EmptyField {
                field: "work source URL",
            });
        }
        let base = base_output_dir.as_ref();
        if base.as_os_str().is_empty() {
            return Err(ModelError::EmptyField {
                field: "base output directory",
            });
        }
        validate_worker_counts(chapter_workers, page_workers)?;
        Ok(Self {
            source_url,
            base_output_dir: absolute(base),
            output_dir: None,
            cache_path: None,
            title: None,
            chapter_workers,
            page_workers,
            chapters: Vec::new(),
        })
    }

    /// Set the title and derive `output_dir` and `cache_path` from it.
    /// An already-set output directory is kept.
    pub fn set_title(&mut self, title: &str) {
        let title = title.trim().to_string();
        if self.output_dir.is_none() {
            let mut dir_name = safe_filename(&title);
            if dir_name.is_empty() {
                dir_name = "work".to_string();
            }
            let output_dir = self.base_output_dir.join(dir_name);
            self.cache_path = Some(output_dir.join(CACHE_FILE_NAME));
            self.output_dir = Some(output_dir);
        } else if self.cache_path.is_none() {
            self.cache_path = self.output_dir.as_ref().map(|d| d.join(CACHE_FILE_NAME));
        }
        self.title = Some(title);
    }

    pub fn has_title(&self) -> bool {
        self.title.as_deref().is_some_and(|t| !t.trim().is_empty())
    }

    pub fn sort_chapters(&mut self) {
        self.chapters.sort_by_key(|c| c.index);
    }

    /// Merge newly discovered chapters; returns how many were added.
    pub fn merge_chapters(&mut self, discovered: Vec<Chapter>) -> usize {
        merge_chapters(&mut self.chapters, discovered)
    }
}

/// Descriptor of a chapter produced by a site adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChapterDescriptor {
    pub index: u32,
    pub source_url: String,
    pub title: Option<String>,
}

/// Descriptor of a page produced by a site adapter. `asset_url` is set when the listing already
/// reveals the asset (no per-page document fetch needed).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageDescriptor {
    pub index: u32,
    pub source_url: String,
    pub asset_url: Option<String>,
}

/// Add every discovered chapter whose title and source URL are both new, then sort by index.
/// Returns the number of chapters added.
pub fn merge_chapters(existing: &mut Vec<Chapter>, discovered: Vec<Chapter>) -> usize {
    let mut added = 0;
    for chapter in discovered {
        let known = existing
            .iter()
            .any(|c| c.title == chapter.title || c.source_url == chapter.source_url);
        if !known {
            existing.push(chapter);
            added += 1;
        }
    }
    existing.sort_by_key(|c| c.index);
    added
}

pub fn validate_worker_counts(chapter_workers: usize, page_workers: usize) -> Result<(), ModelError> {
    if chapter_workers < 1 {
        return Err(ModelError::InvalidWorkerCount {
            pool: "chapter",
            count: chapter_workers,
        });
    }
    if page_workers < 1 {
        return Err(ModelError::InvalidWorkerCount {
            pool: "page",
            count: page_workers,
        });
    }
    Ok(())
}

pub fn default_chapter_title(index: u32) -> String {
    format!("chapter{:04}", index)
}

/// Keep alphanumerics and a few punctuation characters; trim the result.
pub fn safe_filename(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_alphanumeric() || SAFE_FILENAME_CHARS.contains(c))
        .collect::<String>()
        .trim()
        .to_string()
}

fn chapter_dir_name(index: u32, title: &str) -> String {
    let name = safe_filename(title);
    if name.is_empty() {
        default_chapter_title(index)
    } else {
        name
    }
}

/// Extension (with leading dot) of the URL path, or empty if there is none.
fn asset_extension(asset_url: &str) -> String {
    let path = match Url::parse(asset_url) {
        Ok(url) => url.path().to_string(),
        Err(_) => asset_url
            .split(['?', '#'])
            .next()
            .unwrap_or(asset_url)
            .to_string(),
    };
    Path::new(&path)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{}", e))
        .unwrap_or_default()
}

fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

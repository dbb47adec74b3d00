//! JSON cache file mirroring a [Work]. Used to resume an interrupted crawl and to record progress.
//!
//! The in-memory model is authoritative during a run; the file is a write-through mirror and a
//! cold-start seed. Saves go through a temporary file and a rename so a crash never leaves a
//! truncated cache behind.

use crate::model::{validate_worker_counts, Work};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Cache file not found at {}", path.display())]
    NotFound { path: PathBuf },

    #[error("Cannot read cache file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot write cache file {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid cache file {}: {source}", path.display())]
    Invalid {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Inconsistent cache file {}: {reason}", path.display())]
    Inconsistent { path: PathBuf, reason: String },

    #[error("Cannot save cache: cache path is not set")]
    PathUnset,
}

/// Write the full work to its `cache_path`, creating the parent directory if needed.
pub fn save(work: &Work) -> Result<PathBuf, StoreError> {
    let path = work.cache_path.clone().ok_or(StoreError::PathUnset)?;
    save_to(work, &path)?;
    Ok(path)
}

/// Write the full work to `path`.
pub fn save_to(work: &Work, path: &Path) -> Result<(), StoreError> {
    let write_err = |source| StoreError::Write {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(write_err)?;
        }
    }
    let tmp_path = tmp_path_for(path);
    let result = (|| {
        let file = File::create(&tmp_path)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, work)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
        drop(writer);
        fs::rename(&tmp_path, path)
    })();
    if let Err(e) = result {
        let _ = fs::remove_file(&tmp_path);
        return Err(write_err(e));
    }
    tracing::debug!(path = %path.display(), chapters = work.chapters.len(), "cache saved");
    Ok(())
}

/// Read a work back from `path`. A missing file is [StoreError::NotFound]; a file that does not
/// parse or violates the model's invariants is fatal.
pub fn load(path: &Path) -> Result<Work, StoreError> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(StoreError::NotFound {
                path: path.to_path_buf(),
            })
        }
        Err(e) => {
            return Err(StoreError::Read {
                path: path.to_path_buf(),
                source: e,
            })
        }
    };
    let work: Work =
        serde_json::from_reader(BufReader::new(file)).map_err(|e| StoreError::Invalid {
            path: path.to_path_buf(),
            source: e,
        })?;
    check_consistency(&work).map_err(|reason| StoreError::Inconsistent {
        path: path.to_path_buf(),
        reason,
    })?;
    tracing::debug!(path = %path.display(), chapters = work.chapters.len(), "cache loaded");
    Ok(work)
}

fn check_consistency(work: &Work) -> Result<(), String> {
    if work.source_url.trim().is_empty() {
        return Err("sourceUrl is empty".to_string());
    }
    validate_worker_counts(work.chapter_workers, work.page_workers).map_err(|e| e.to_string())?;
    for chapter in &work.chapters {
        if chapter.index < 1 {
            return Err(format!("chapter '{}' has index 0", chapter.title));
        }
        if chapter.source_url.trim().is_empty() {
            return Err(format!("chapter {} has an empty sourceUrl", chapter.index));
        }
        if let Some(page) = chapter.pages.iter().find(|p| p.index < 1) {
            return Err(format!(
                "chapter {} has a page with index {}",
                chapter.index, page.index
            ));
        }
    }
    Ok(())
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Chapter, Page};
    use std::error::Error;

    fn sample_work(base: &Path) -> Result<Work, Box<dyn Error>> {
        let mut work = Work::with_workers("https://example.com/manga/42", base, 2, 4)?;
        work.set_title("Sample Manga");
        let dir = work.output_dir.clone().ok_or("no output dir")?;
        let mut ch1 = Chapter::new(1, "https://example.com/c1", &dir, Some("Chapter 1".into()))?;
        ch1.pages.push(Page::new(
            1,
            "https://example.com/c1/1",
            &ch1.output_dir,
            Some("https://cdn.example.com/c1/1.jpg".into()),
        )?);
        ch1.pages.push(Page::new(2, "https://example.com/c1/2", &ch1.output_dir, None)?);
        let ch2 = Chapter::new(3, "https://example.com/c3", &dir, None)?;
        work.chapters = vec![ch1, ch2];
        Ok(work)
    }

    #[test]
    fn save_then_load_restores_work() -> Result<(), Box<dyn Error>> {
        let tmp = tempfile::tempdir()?;
        let work = sample_work(tmp.path())?;
        let path = save(&work)?;
        assert!(path.is_file());
        assert!(path.is_absolute());
        let loaded = load(&path)?;
        assert_eq!(loaded, work);
        Ok(())
    }

    #[test]
    fn save_leaves_no_temp_file() -> Result<(), Box<dyn Error>> {
        let tmp = tempfile::tempdir()?;
        let work = sample_work(tmp.path())?;
        let path = save(&work)?;
        assert!(!tmp_path_for(&path).exists());
        Ok(())
    }

    #[test]
    fn save_requires_cache_path() -> Result<(), Box<dyn Error>> {
        let work = Work::new("https://example.com/m", "/tmp/unused")?;
        assert!(matches!(save(&work), Err(StoreError::PathUnset)));
        Ok(())
    }

    #[test]
    fn load_missing_file_is_not_found() {
        let result = load(Path::new("/nonexistent_mangacrawl_dir/cache.json"));
        assert!(matches!(result, Err(StoreError::NotFound { .. })));
    }

    #[test]
    fn load_garbage_is_invalid() -> Result<(), Box<dyn Error>> {
        let tmp = tempfile::tempdir()?;
        let path = tmp.path().join("cache.json");
        std::fs::write(&path, "{ not json")?;
        assert!(matches!(load(&path), Err(StoreError::Invalid { .. })));
        Ok(())
    }

    #[test]
    fn load_rejects_zero_workers() -> Result<(), Box<dyn Error>> {
        let tmp = tempfile::tempdir()?;
        let mut work = sample_work(tmp.path())?;
        work.page_workers = 0;
        let path = tmp.path().join("bad.json");
        save_to(&work, &path)?;
        assert!(matches!(load(&path), Err(StoreError::Inconsistent { .. })));
        Ok(())
    }

    #[test]
    fn saved_file_has_expected_shape() -> Result<(), Box<dyn Error>> {
        let tmp = tempfile::tempdir()?;
        let work = sample_work(tmp.path())?;
        let path = save(&work)?;
        let value: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path)?)?;
        assert_eq!(value["title"].as_str(), Some("Sample Manga"));
        assert_eq!(value["chapterWorkerCount"].as_u64(), Some(2));
        assert_eq!(value["pageWorkerCount"].as_u64(), Some(4));
        let chapters = value["chapters"].as_array().ok_or("chapters not an array")?;
        assert_eq!(chapters.len(), 2);
        assert_eq!(chapters[1]["title"].as_str(), Some("chapter0003"));
        assert!(chapters[0]["pages"][1]["assetUrl"].is_null());
        Ok(())
    }
}

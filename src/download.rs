//! Streams page assets to disk.
//!
//! Bytes go to `<file>.part` first and the file is renamed into place only once the transfer has
//! completed, so a destination that exists is always a complete asset.

use crate::crawler::cancel::CancellationToken;
use crate::model::Page;
use crate::scraper::{HttpClient, RequestError};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("Page {index} has no asset URL")]
    MissingAssetUrl { index: u32 },

    #[error("Network error: could not download {url}: {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Cancelled before downloading {url}")]
    Cancelled { url: String },

    #[error("HTTP {status} when downloading: {url}")]
    HttpStatus { status: u16, url: String },

    #[error("Failed to write {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// What [Downloader::download] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadOutcome {
    /// The destination already existed; nothing was requested.
    AlreadyPresent(PathBuf),
    Written { path: PathBuf, bytes: u64 },
}

#[derive(Debug, Clone)]
pub struct Downloader {
    client: HttpClient,
}

impl Downloader {
    pub fn new(client: HttpClient) -> Self {
        Self { client }
    }

    /// Download the page's asset into its destination directory, creating it if absent.
    pub fn download(
        &self,
        page: &Page,
        cancel: &CancellationToken,
    ) -> Result<DownloadOutcome, DownloadError> {
        let (url, path) = match (page.asset_url.as_deref(), page.destination_path()) {
            (Some(url), Some(path)) => (url, path),
            _ => return Err(DownloadError::MissingAssetUrl { index: page.index }),
        };
        if path.is_file() {
            return Ok(DownloadOutcome::AlreadyPresent(path));
        }

        let mut response = self.client.get(url, cancel).map_err(|e| match e {
            RequestError::Cancelled => DownloadError::Cancelled {
                url: url.to_string(),
            },
            RequestError::Http(source) => DownloadError::Network {
                url: url.to_string(),
                source,
            },
        })?;
        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::HttpStatus {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        fs::create_dir_all(&page.destination_dir).map_err(|e| DownloadError::Io {
            path: page.destination_dir.clone(),
            source: e,
        })?;

        let part_path = part_path_for(&path);
        let bytes = match write_part(&mut response, &part_path) {
            Ok(n) => n,
            Err(e) => {
                let _ = fs::remove_file(&part_path);
                return Err(e);
            }
        };
        fs::rename(&part_path, &path).map_err(|e| {
            let _ = fs::remove_file(&part_path);
            DownloadError::Io {
                path: path.clone(),
                source: e,
            }
        })?;
        tracing::debug!(url, path = %path.display(), bytes, "asset written");
        Ok(DownloadOutcome::Written { path, bytes })
    }
}

fn write_part(
    response: &mut reqwest::blocking::Response,
    part_path: &Path,
) -> Result<u64, DownloadError> {
    let io_err = |source| DownloadError::Io {
        path: part_path.to_path_buf(),
        source,
    };
    let file = File::create(part_path).map_err(io_err)?;
    let mut writer = BufWriter::new(file);
    // Read errors from the body surface as io::Error here as well.
    let bytes = std::io::copy(response, &mut writer).map_err(io_err)?;
    writer.flush().map_err(io_err)?;
    Ok(bytes)
}

fn part_path_for(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".part");
    path.with_file_name(name)
}

//! Streaming HTTP downloads.
//!
//! Bodies are copied to disk in fixed-size chunks so arbitrarily large
//! files never sit in memory. Every task writes a small log file next to
//! the other logs recording either the final path or the error.

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use reqwest::blocking::Client;
use reqwest::Url;

use crate::config::{log_path, log_safe_name, CHUNK_SIZE};
use crate::error::{Error, Result};
use crate::locallist::ListEntry;

/// One file of a catalog item.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteFile {
    pub item: String,
    pub name: String,
}

impl RemoteFile {
    pub fn new(item: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            item: item.into(),
            name: name.into(),
        }
    }

    /// `<base>/download/<item>/<name>`, each segment percent-encoded.
    pub fn url(&self, base_url: &str) -> Result<String> {
        let mut url = Url::parse(base_url)
            .map_err(|e| Error::Config(format!("bad base url {base_url}: {e}")))?;
        url.path_segments_mut()
            .map_err(|_| Error::Config(format!("base url cannot carry a path: {base_url}")))?
            .pop_if_empty()
            .push("download")
            .push(&self.item)
            .extend(self.name.split('/'));
        Ok(url.into())
    }

    /// Where the file lands below the temporary directory.
    pub fn local_path(&self, dest_dir: &Path) -> PathBuf {
        dest_dir.join(&self.item).join(&self.name)
    }
}

#[derive(Debug)]
pub enum DownloadState {
    Pending,
    Downloading,
    Downloaded { bytes: u64 },
    Failed(Error),
}

/// A single download from `url` into `destination`.
#[derive(Debug)]
pub struct DownloadTask {
    pub url: Option<String>,
    pub destination: PathBuf,
    pub log_file: PathBuf,
    pub state: DownloadState,
}

impl DownloadTask {
    pub fn succeeded(&self) -> bool {
        matches!(self.state, DownloadState::Downloaded { .. })
    }

    pub fn failure(&self) -> Option<&Error> {
        match &self.state {
            DownloadState::Failed(e) => Some(e),
            _ => None,
        }
    }
}

/// Progress callback: bytes written so far and the announced total.
pub type Progress<'a> = &'a mut dyn FnMut(u64, Option<u64>);

pub struct Downloader {
    client: Client,
    base_url: String,
    logs_dir: PathBuf,
}

impl Downloader {
    pub fn new(client: Client, base_url: impl Into<String>, logs_dir: impl Into<PathBuf>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            logs_dir: logs_dir.into(),
        }
    }

    /// Download one catalog file into `dest_dir/<item>/<name>`.
    ///
    /// A name missing from `listing` fails immediately without touching the
    /// network.
    pub fn download_catalog_file(
        &self,
        file: &RemoteFile,
        listing: &[String],
        dest_dir: &Path,
        progress: Progress,
    ) -> DownloadTask {
        let mut task = DownloadTask {
            url: None,
            destination: file.local_path(dest_dir),
            log_file: log_path(&self.logs_dir, "download", &file.name),
            state: DownloadState::Pending,
        };

        if !listing.iter().any(|n| n == &file.name) {
            let err = Error::NotFound {
                item: file.item.clone(),
                file: file.name.clone(),
            };
            tracing::error!("{err}");
            self.finish(&mut task, Err(err));
            return task;
        }

        match file.url(&self.base_url) {
            Ok(url) => {
                task.url = Some(url);
                self.run(&mut task, progress);
            }
            Err(e) => self.finish(&mut task, Err(e)),
        }
        task
    }

    /// Download a list entry into `dest_dir/<basename of the URL>`.
    pub fn download_list_entry(&self, entry: &ListEntry, dest_dir: &Path, progress: Progress) -> DownloadTask {
        let file_name = url_basename(&entry.url).unwrap_or_else(|| log_safe_name(&entry.name));
        let mut task = DownloadTask {
            url: Some(entry.url.clone()),
            destination: dest_dir.join(&file_name),
            log_file: log_path(&self.logs_dir, "download", &file_name),
            state: DownloadState::Pending,
        };
        self.run(&mut task, progress);
        task
    }

    /// Drive a pending task to `Downloaded` or `Failed`. No retries.
    pub fn run(&self, task: &mut DownloadTask, progress: Progress) {
        let Some(url) = task.url.clone() else {
            self.finish(task, Err(Error::Config("download task has no url".into())));
            return;
        };
        task.state = DownloadState::Downloading;
        tracing::info!("downloading {url} -> {}", task.destination.display());
        let result = self.stream_to(&url, &task.destination, progress);
        self.finish(task, result);
    }

    /// GET `url` and copy the body into `destination` chunk by chunk.
    ///
    /// The status is checked before the file is created, so an error
    /// response leaves nothing behind.
    pub fn stream_to(&self, url: &str, destination: &Path, progress: Progress) -> Result<u64> {
        let mut res = self.client.get(url).send()?;
        if !res.status().is_success() {
            return Err(Error::Status {
                status: res.status(),
                url: url.to_string(),
            });
        }
        let total = res.content_length();

        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::at(parent, e))?;
        }
        let mut out = File::create(destination).map_err(|e| Error::at(destination, e))?;
        let mut buf = vec![0u8; CHUNK_SIZE];
        let mut written = 0u64;
        loop {
            let n = res.read(&mut buf)?;
            if n == 0 {
                break;
            }
            out.write_all(&buf[..n]).map_err(|e| Error::at(destination, e))?;
            written += n as u64;
            progress(written, total);
        }
        out.flush().map_err(|e| Error::at(destination, e))?;
        Ok(written)
    }

    fn finish(&self, task: &mut DownloadTask, result: Result<u64>) {
        let line = match &result {
            Ok(_) => format!("Downloaded: {}\n", task.destination.display()),
            Err(e) => format!("Error: {e}\n"),
        };
        if let Err(e) = write_log(&task.log_file, &line) {
            tracing::warn!("could not write {}: {e}", task.log_file.display());
        }
        task.state = match result {
            Ok(bytes) => {
                tracing::info!("download complete: {}", task.destination.display());
                DownloadState::Downloaded { bytes }
            }
            Err(e) => {
                tracing::error!("download failed, see {}: {e}", task.log_file.display());
                DownloadState::Failed(e)
            }
        };
    }
}

fn write_log(path: &Path, line: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, line)
}

/// Last non-empty path segment of `url`.
fn url_basename(url: &str) -> Option<String> {
    let last = match Url::parse(url) {
        Ok(parsed) => parsed.path_segments()?.last()?.to_string(),
        Err(_) => url.rsplit('/').next()?.to_string(),
    };
    (!last.is_empty()).then_some(last)
}

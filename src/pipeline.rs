//! Download-then-process queue.
//!
//! Selected files are handled strictly one after the other: each is fully
//! downloaded and, for catalog files, post-processed before the next one
//! starts. Individual failures never stop the queue. Progress is reported
//! as [`PipelineEvent`]s over a channel so the work can run on a
//! background thread while the terminal stays responsive.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Sender, TryRecvError};
use std::thread;
use std::time::Duration;

use crate::download::{Downloader, RemoteFile};
use crate::locallist::ListEntry;
use crate::postprocess::PostProcessor;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PipelineSummary {
    pub requested: usize,
    pub downloaded: usize,
    pub processed: usize,
    pub failed: usize,
}

#[derive(Clone, Debug, PartialEq)]
pub enum PipelineEvent {
    Started { position: usize, total: usize, name: String },
    Progress { done: u64, total: Option<u64> },
    Downloaded { name: String, path: PathBuf },
    DownloadFailed { name: String, log: PathBuf, reason: String },
    Processing { name: String },
    Processed { output: PathBuf },
    ProcessFailed { name: String, log: PathBuf, reason: String },
    Finished(PipelineSummary),
}

/// Keep `[A-Za-z0-9._-]`, turning spaces into `_` and dropping the rest.
pub fn sanitize_filename(name: &str) -> String {
    name.chars()
        .filter_map(|c| match c {
            ' ' => Some('_'),
            c if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') => Some(c),
            _ => None,
        })
        .collect()
}

pub struct Pipeline {
    downloader: Downloader,
    processor: PostProcessor,
}

impl Pipeline {
    pub fn new(downloader: Downloader, processor: PostProcessor) -> Self {
        Self { downloader, processor }
    }

    /// Download `files` of `item` into `temp_dir` and convert each one into
    /// `final_dir/<sanitized name>.decrypted.iso`, in the given order.
    pub fn run_catalog(
        &self,
        item: &str,
        files: &[String],
        listing: &[String],
        temp_dir: &Path,
        final_dir: &Path,
        events: &Sender<PipelineEvent>,
    ) -> PipelineSummary {
        let mut summary = PipelineSummary {
            requested: files.len(),
            ..Default::default()
        };
        if let Err(e) = fs::create_dir_all(final_dir) {
            tracing::warn!("could not create {}: {e}", final_dir.display());
        }

        for (i, name) in files.iter().enumerate() {
            notify(events, PipelineEvent::Started {
                position: i + 1,
                total: files.len(),
                name: name.clone(),
            });
            let file = RemoteFile::new(item, name.as_str());
            let mut progress = |done, total| notify(events, PipelineEvent::Progress { done, total });
            let task = self
                .downloader
                .download_catalog_file(&file, listing, temp_dir, &mut progress);

            let input = file.local_path(temp_dir);
            if !task.succeeded() || !input.exists() {
                summary.failed += 1;
                notify(events, PipelineEvent::DownloadFailed {
                    name: name.clone(),
                    log: task.log_file.clone(),
                    reason: reason(task.failure()),
                });
                continue;
            }
            summary.downloaded += 1;
            notify(events, PipelineEvent::Downloaded {
                name: name.clone(),
                path: input.clone(),
            });

            notify(events, PipelineEvent::Processing { name: name.clone() });
            let output = final_dir.join(format!("{}.decrypted.iso", sanitize_filename(name)));
            let processed = self.processor.process(&input, &output);
            if processed.succeeded() {
                summary.processed += 1;
                notify(events, PipelineEvent::Processed { output });
            } else {
                summary.failed += 1;
                notify(events, PipelineEvent::ProcessFailed {
                    name: name.clone(),
                    log: processed.log_file.clone(),
                    reason: reason(processed.failure()),
                });
            }
        }

        tracing::info!(?summary, "catalog queue finished");
        notify(events, PipelineEvent::Finished(summary));
        summary
    }

    /// Download list entries into `dest_dir`. No post-processing.
    pub fn run_list(&self, entries: &[ListEntry], dest_dir: &Path, events: &Sender<PipelineEvent>) -> PipelineSummary {
        let mut summary = PipelineSummary {
            requested: entries.len(),
            ..Default::default()
        };

        for (i, entry) in entries.iter().enumerate() {
            notify(events, PipelineEvent::Started {
                position: i + 1,
                total: entries.len(),
                name: entry.name.clone(),
            });
            let mut progress = |done, total| notify(events, PipelineEvent::Progress { done, total });
            let task = self.downloader.download_list_entry(entry, dest_dir, &mut progress);
            if task.succeeded() {
                summary.downloaded += 1;
                notify(events, PipelineEvent::Downloaded {
                    name: entry.name.clone(),
                    path: task.destination.clone(),
                });
            } else {
                summary.failed += 1;
                notify(events, PipelineEvent::DownloadFailed {
                    name: entry.name.clone(),
                    log: task.log_file.clone(),
                    reason: reason(task.failure()),
                });
            }
        }

        tracing::info!(?summary, "list queue finished");
        notify(events, PipelineEvent::Finished(summary));
        summary
    }
}

fn reason(failure: Option<&impl std::fmt::Display>) -> String {
    failure.map_or_else(|| "file missing after download".to_string(), ToString::to_string)
}

fn notify(events: &Sender<PipelineEvent>, event: PipelineEvent) {
    // a closed receiver just means nobody is watching
    let _ = events.send(event);
}

/// Run `work` on a worker thread and feed its events to `on_event`,
/// polling the channel every `poll_interval` without blocking on it.
///
/// Returns `None` if the worker panicked.
pub fn run_in_background<W, F>(work: W, poll_interval: Duration, mut on_event: F) -> Option<PipelineSummary>
where
    W: FnOnce(&Sender<PipelineEvent>) -> PipelineSummary + Send,
    F: FnMut(&PipelineEvent),
{
    let (tx, rx) = mpsc::channel();
    thread::scope(|scope| {
        let worker = scope.spawn(move || work(&tx));
        loop {
            loop {
                match rx.try_recv() {
                    Ok(event) => on_event(&event),
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => return worker.join().ok(),
                }
            }
            thread::sleep(poll_interval);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::http_client;
    use crate::postprocess::{ToolCommand, ToolLocator};
    use httpmock::prelude::*;

    struct Nothing;

    impl ToolLocator for Nothing {
        fn locate(&self) -> Option<ToolCommand> {
            None
        }
    }

    fn pipeline(server: &MockServer, logs: &Path, locators: Vec<Box<dyn ToolLocator>>) -> Pipeline {
        Pipeline::new(
            Downloader::new(http_client(None).unwrap(), server.base_url(), logs),
            PostProcessor::new(locators, logs),
        )
    }

    #[test]
    fn sanitizes_display_names() {
        assert_eq!(sanitize_filename("Tony Hawk's \"Project\" 8 (EU).iso"), "Tony_Hawks_Project_8_EU.iso");
        assert_eq!(sanitize_filename("a-b_c.d/é"), "a-b_c.d");
    }

    #[test]
    fn list_queue_continues_past_failures() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/ok.pkg");
            then.status(200).body("pkg");
        });
        server.mock(|when, then| {
            when.method(GET).path("/bad.pkg");
            then.status(500);
        });
        let tmp = tempfile::tempdir().unwrap();
        let entries = vec![
            ListEntry { name: "Bad".into(), url: server.url("/bad.pkg") },
            ListEntry { name: "Ok".into(), url: server.url("/ok.pkg") },
        ];

        let (tx, rx) = mpsc::channel();
        let summary = pipeline(&server, &tmp.path().join("logs"), vec![]).run_list(&entries, tmp.path(), &tx);
        drop(tx);

        assert_eq!(summary, PipelineSummary { requested: 2, downloaded: 1, processed: 0, failed: 1 });
        assert_eq!(fs::read_to_string(tmp.path().join("ok.pkg")).unwrap(), "pkg");
        let events: Vec<_> = rx.iter().collect();
        assert!(matches!(events.first(), Some(PipelineEvent::Started { position: 1, name, .. }) if name == "Bad"));
        assert_eq!(events.last(), Some(&PipelineEvent::Finished(summary)));
    }

    #[test]
    fn catalog_without_tool_keeps_download() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/download/item/Game_One.iso");
            then.status(200).body("iso");
        });
        let tmp = tempfile::tempdir().unwrap();
        let listing = vec!["Game_One.iso".to_string()];
        let (tx, _rx) = mpsc::channel();

        let summary = pipeline(&server, &tmp.path().join("logs"), vec![Box::new(Nothing)]).run_catalog(
            "item",
            &listing,
            &listing,
            &tmp.path().join("tmp"),
            &tmp.path().join("final"),
            &tx,
        );

        assert_eq!(summary.downloaded, 1);
        assert_eq!(summary.failed, 1);
        assert!(tmp.path().join("tmp").join("item").join("Game_One.iso").exists());
    }

    #[cfg(unix)]
    #[test]
    fn catalog_queue_processes_in_user_order() {
        use crate::postprocess::tests::shell_tool;

        let server = MockServer::start();
        for name in ["b.iso", "a.iso"] {
            server.mock(|when, then| {
                when.method(GET).path(format!("/download/item/{name}"));
                then.status(200).body(name);
            });
        }
        let tmp = tempfile::tempdir().unwrap();
        let order = tmp.path().join("order.txt");
        let tool = shell_tool(
            tmp.path(),
            &format!(r#"basename "$2" >> "{}"; cp "$2" "$4""#, order.display()),
        );
        let listing = vec!["a.iso".to_string(), "b.iso".to_string()];
        let picked = vec!["b.iso".to_string(), "a.iso".to_string(), "missing.iso".to_string()];
        let temp_dir = tmp.path().join("tmp");
        let final_dir = tmp.path().join("final");
        let (tx, _rx) = mpsc::channel();

        let summary = pipeline(&server, &tmp.path().join("logs"), vec![Box::new(tool)])
            .run_catalog("item", &picked, &listing, &temp_dir, &final_dir, &tx);

        assert_eq!(summary, PipelineSummary { requested: 3, downloaded: 2, processed: 2, failed: 1 });
        assert_eq!(fs::read_to_string(&order).unwrap(), "b.iso\na.iso\n");
        assert_eq!(fs::read_to_string(final_dir.join("a.iso.decrypted.iso")).unwrap(), "a.iso");
        assert!(final_dir.join("b.iso.decrypted.iso").exists());
        assert!(!temp_dir.join("item").exists());
    }

    #[test]
    fn background_run_delivers_every_event() {
        let mut seen = Vec::new();
        let summary = run_in_background(
            |tx| {
                for done in 1..=3 {
                    tx.send(PipelineEvent::Progress { done, total: Some(3) }).unwrap();
                }
                let summary = PipelineSummary { requested: 1, downloaded: 1, ..Default::default() };
                tx.send(PipelineEvent::Finished(summary)).unwrap();
                summary
            },
            Duration::from_millis(5),
            |event| seen.push(event.clone()),
        );

        assert_eq!(summary.map(|s| s.downloaded), Some(1));
        assert_eq!(seen.len(), 4);
        assert!(matches!(seen[2], PipelineEvent::Progress { done: 3, .. }));
    }

    #[test]
    fn background_panic_is_reported() {
        let summary = run_in_background(|_tx| panic!("worker died"), Duration::from_millis(1), |_| {});
        assert!(summary.is_none());
    }
}

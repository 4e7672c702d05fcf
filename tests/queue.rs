// End-to-end runs of the download queue against a local HTTP mock.

use std::fs;
use std::path::Path;
use std::sync::mpsc;

use httpmock::prelude::*;
use iaps3::api::http_client;
use iaps3::download::Downloader;
use iaps3::locallist::parse_list;
use iaps3::pipeline::{Pipeline, PipelineEvent};
use iaps3::postprocess::{PostProcessor, ToolCommand, ToolLocator};
use iaps3::selector::parse_multi;

fn pipeline(server: &MockServer, logs: &Path, tool: Option<ToolCommand>) -> Pipeline {
    let locators: Vec<Box<dyn ToolLocator>> = tool.into_iter().map(|t| Box::new(t) as Box<dyn ToolLocator>).collect();
    Pipeline::new(
        Downloader::new(http_client(None).unwrap(), server.base_url(), logs),
        PostProcessor::new(locators, logs),
    )
}

#[test]
fn list_file_selection_and_download() {
    let server = MockServer::start();
    let a = server.mock(|when, then| {
        when.method(GET).path("/a.pkg");
        then.status(200).body("AAAA");
    });
    let b = server.mock(|when, then| {
        when.method(GET).path("/b.pkg");
        then.status(200).body("BB");
    });
    let text = format!(
        "Game A - BCES01234 extra\n{}\n\nGame B\n{}\n",
        server.url("/a.pkg"),
        server.url("/b.pkg")
    );
    let entries = parse_list(&text);
    assert_eq!(entries.iter().map(|e| e.name.as_str()).collect::<Vec<_>>(), ["Game A", "Game B"]);

    let picked: Vec<_> = parse_multi("2,1", entries.len())
        .unwrap()
        .into_iter()
        .map(|i| entries[i].clone())
        .collect();

    let tmp = tempfile::tempdir().unwrap();
    let (tx, rx) = mpsc::channel();
    let summary = pipeline(&server, &tmp.path().join("logs"), None).run_list(&picked, tmp.path(), &tx);
    drop(tx);

    a.assert();
    b.assert();
    assert_eq!(summary.downloaded, 2);
    assert_eq!(fs::read_to_string(tmp.path().join("a.pkg")).unwrap(), "AAAA");
    assert_eq!(fs::read_to_string(tmp.path().join("b.pkg")).unwrap(), "BB");
    let names: Vec<String> = rx
        .iter()
        .filter_map(|e| match e {
            PipelineEvent::Downloaded { name, .. } => Some(name),
            _ => None,
        })
        .collect();
    assert_eq!(names, ["Game A", "Game B"]);
}

#[test]
fn not_found_download_is_logged_and_skipped() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/download/sony_playstation3_x/Gone.iso");
        then.status(404);
    });
    let tmp = tempfile::tempdir().unwrap();
    let logs = tmp.path().join("logs");
    let listing = vec!["Gone.iso".to_string()];
    let (tx, _rx) = mpsc::channel();

    let summary = pipeline(&server, &logs, Some(ToolCommand::new("unused"))).run_catalog(
        "sony_playstation3_x",
        &listing,
        &listing,
        &tmp.path().join("tmp"),
        &tmp.path().join("final"),
        &tx,
    );

    assert_eq!(summary.failed, 1);
    assert_eq!(summary.processed, 0);
    assert!(!tmp.path().join("tmp").join("sony_playstation3_x").join("Gone.iso").exists());
    let log = fs::read_to_string(logs.join("download_Gone_iso.log")).unwrap();
    assert!(log.contains("404"), "{log}");
}

#[cfg(unix)]
#[test]
fn processed_download_leaves_only_output() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/download/sony_playstation3_y/Game-(EU).iso");
        then.status(200).body("ciphertext");
    });
    let tmp = tempfile::tempdir().unwrap();
    let logs = tmp.path().join("logs");
    let script = tmp.path().join("decrypt.sh");
    fs::write(&script, "#!/bin/sh\ntr a-z A-Z < \"$2\" > \"$4\"\n").unwrap();
    let tool = ToolCommand::new("sh").arg(&script);

    let temp_dir = tmp.path().join("tmp");
    let final_dir = tmp.path().join("final");
    let listing = vec!["Game-(EU).iso".to_string()];
    let (tx, _rx) = mpsc::channel();

    let summary = pipeline(&server, &logs, Some(tool))
        .run_catalog("sony_playstation3_y", &listing, &listing, &temp_dir, &final_dir, &tx);

    assert_eq!(summary.processed, 1);
    let output = final_dir.join("Game-EU.iso.decrypted.iso");
    assert_eq!(fs::read_to_string(output).unwrap(), "CIPHERTEXT");
    assert!(!temp_dir.join("sony_playstation3_y").exists());
    assert!(!logs.join("libray_Game__EU__iso.log").exists());
}

// Library root
// -----------
// The binary (`main.rs`) only wires settings, logging and Ctrl+C handling
// together and hands over to `ui::main_menu`. Everything else lives here
// so the download queue can be exercised without a terminal.
//
// Module responsibilities:
// - `api`: archive.org search and file listing (`Catalog` trait).
// - `cache`: flat text caches of item and file listings.
// - `selector`: numbered single/multi choice with `1,3,5-7` ranges.
// - `download`: streaming downloads with per-task logs.
// - `postprocess`: locating and running the external decryption tool.
// - `pipeline`: the sequential download-then-process queue.
// - `locallist`: name/URL list files as an alternative source.
// - `credentials`, `config`, `cancel`, `error`: ambient plumbing.
// - `ui`: the interactive menus.
pub mod api;
pub mod cache;
pub mod cancel;
pub mod config;
pub mod credentials;
pub mod download;
pub mod error;
pub mod locallist;
pub mod pipeline;
pub mod postprocess;
pub mod selector;
pub mod ui;

pub use error::{Error, Result};

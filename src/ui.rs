// UI layer: provides the interactive menu using `dialoguer`.
// Each menu entry is a small blocking flow that returns to the menu when
// done. The download queue itself runs on a worker thread and reports back
// through a channel so the progress bar keeps moving.

use std::io::{self, Write};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use crossterm::cursor::MoveTo;
use crossterm::execute;
use crossterm::style::Stylize;
use crossterm::terminal::{Clear, ClearType};
use dialoguer::{Confirm, Input, Password, Select};
use indicatif::{ProgressBar, ProgressStyle};

use crate::api::{http_client, ArchiveClient, Catalog};
use crate::cache::{read_lines, CacheStore};
use crate::cancel::CancelToken;
use crate::config::Settings;
use crate::credentials::{self, Credentials};
use crate::download::Downloader;
use crate::locallist::{self, ListEntry};
use crate::pipeline::{run_in_background, Pipeline, PipelineEvent, PipelineSummary};
use crate::postprocess::{default_locators, PostProcessor};
use crate::selector::{Selector, TerminalPrompt};

/// How often the foreground drains the worker's event queue.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Clients built from the current credentials. Rebuilt for every flow so a
/// freshly saved key is picked up without restarting.
struct Services {
    catalog: ArchiveClient,
    pipeline: Pipeline,
}

impl Services {
    fn load(settings: &Settings) -> Result<Self> {
        let creds = Credentials::load(&settings.credentials_file)?;
        let client = http_client(creds.as_ref())?;
        Ok(Services {
            catalog: ArchiveClient::new(settings, client.clone()),
            pipeline: Pipeline::new(
                Downloader::new(client, settings.base_url.clone(), settings.logs_dir()),
                PostProcessor::new(default_locators(settings), settings.logs_dir()),
            ),
        })
    }
}

/// Main interactive menu. Runs until the user picks "Exit" or the cancel
/// token is set by Ctrl+C; the token is only checked between iterations.
pub fn main_menu(settings: Settings, cancel: CancelToken) -> Result<()> {
    let items = vec![
        "Download from Archive.org",
        "Download from PKG lists",
        "Configure Archive.org account",
        "Exit",
    ];
    while !cancel.is_cancelled() {
        show_banner()?;
        // Esc / q behaves like "Exit"
        let selection = Select::new().items(&items).default(0).interact_opt()?;
        let outcome = match selection {
            Some(0) => download_from_archive(&settings),
            Some(1) => download_from_lists(&settings),
            Some(2) => configure_account(&settings),
            _ => {
                cancel.cancel();
                break;
            }
        };
        if let Err(e) = outcome {
            tracing::error!("{e:#}");
            println!("{} {e:#}", "Error:".red().bold());
        }
        press_enter()?;
    }
    println!("{}", "\nFinishing.".red());
    Ok(())
}

fn show_banner() -> Result<()> {
    let mut out = io::stdout();
    execute!(out, Clear(ClearType::All), MoveTo(0, 0))?;
    let rule = "====================================================";
    println!("{}", rule.red());
    println!("  {}", "PS3 download and processing queue".cyan().bold());
    println!("{}", rule.red());
    println!();
    println!("  {}", "Choose a download source:".green());
    println!();
    out.flush()?;
    Ok(())
}

fn press_enter() -> Result<()> {
    let _: String = Input::new()
        .with_prompt("Press Enter to continue")
        .allow_empty(true)
        .interact_text()?;
    Ok(())
}

fn selector() -> Selector<TerminalPrompt, io::Stdout> {
    Selector::new(TerminalPrompt, io::stdout())
}

/// Reuse the cached list at `path` if the user agrees, otherwise refresh it.
/// `None` when the refresh failed; the reason has already been printed.
fn cached_or_refresh(
    path: &std::path::Path,
    question: &str,
    refresh: impl FnOnce() -> crate::Result<Vec<String>>,
) -> Result<Option<Vec<String>>> {
    if path.exists() && Confirm::new().with_prompt(question).default(true).interact()? {
        return Ok(Some(read_lines(path)?));
    }
    let spinner = spinner("Refreshing list...");
    let refreshed = refresh();
    spinner.finish_and_clear();
    match refreshed {
        Ok(list) => {
            println!("{} list saved to {}", "✓".green(), path.display());
            Ok(Some(list))
        }
        Err(e) => {
            println!("{} could not refresh the list: {e}", "✗".red());
            Ok(None)
        }
    }
}

/// Archive.org flow: item → files → directories → download/process queue.
fn download_from_archive(settings: &Settings) -> Result<()> {
    let services = Services::load(settings)?;
    let cache = CacheStore::new(&settings.home);

    let Some(items) = cached_or_refresh(&cache.items_path(), "Use the stored item list?", || {
        cache.refresh_items(&services.catalog)
    })?
    else {
        return Ok(());
    };
    if items.is_empty() {
        println!("{}", "No items found.".red());
        return Ok(());
    }

    let Some(idx) = selector().choose_one(&items, "Select an item")? else {
        println!("{}", "No item selected.".red());
        return Ok(());
    };
    let item = &items[idx];
    println!("{} {item}", "Selected item:".cyan());

    let question = format!("Use the stored file list for '{item}'?");
    let Some(files) = cached_or_refresh(&cache.files_path(item), &question, || {
        cache.refresh_files(&services.catalog, item)
    })?
    else {
        return Ok(());
    };
    if files.is_empty() {
        println!("{}", "No files found.".red());
        return Ok(());
    }

    let picked = selector().choose_many(&files, "Select files to download")?;
    if picked.is_empty() {
        println!("{}", "No valid files selected.".red());
        return Ok(());
    }
    let selected: Vec<String> = picked.into_iter().map(|i| files[i].clone()).collect();
    println!("\n{}", "Files queued for download:".cyan());
    for name in &selected {
        println!("  - {name}");
    }
    println!();

    let Some(temp_dir) = ask_dir("Download folder (encrypted images, removed once processed)")? else {
        return Ok(());
    };
    let Some(final_dir) = ask_dir("Final folder for decrypted images")? else {
        return Ok(());
    };
    for dir in [&temp_dir, &final_dir] {
        std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    }

    println!("\nStarting download and processing queue...");
    let pipeline = &services.pipeline;
    let summary = run_with_progress(|tx| pipeline.run_catalog(item, &selected, &files, &temp_dir, &final_dir, tx))?;
    println!(
        "{} queue finished: {} downloaded, {} processed, {} failed",
        "✓".green(),
        summary.downloaded,
        summary.processed,
        summary.failed
    );
    Ok(())
}

/// Flat-list flow: list files → entries → destination → download queue.
fn download_from_lists(settings: &Settings) -> Result<()> {
    let services = Services::load(settings)?;
    let lists_dir = settings.lists_dir();
    println!("{} {}", "Looking for .txt lists in".cyan(), lists_dir.display());
    let files = locallist::find_list_files(&lists_dir);
    if files.is_empty() {
        println!("{} {}", "No .txt lists found in".red(), lists_dir.display());
        return Ok(());
    }

    let labels: Vec<String> = files.iter().map(|p| p.display().to_string()).collect();
    let chosen = selector().choose_many(&labels, "Select one or more list files")?;
    if chosen.is_empty() {
        println!("{}", "No list file selected.".red());
        return Ok(());
    }

    let mut entries = Vec::new();
    for i in chosen {
        match locallist::read_list(&files[i]) {
            Ok(parsed) => entries.extend(parsed),
            Err(e) => println!("{} {e}", "Skipping list:".red()),
        }
    }
    if entries.is_empty() {
        println!("No valid entries in the selected lists.");
        return Ok(());
    }

    let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
    let picked = selector().choose_many(&names, "Select PKG games")?;
    if picked.is_empty() {
        println!("No game selected.");
        return Ok(());
    }
    // labels resolve to the first entry carrying that name
    let queue: Vec<ListEntry> = picked
        .into_iter()
        .filter_map(|i| {
            let name = &entries[i].name;
            locallist::url_for_label(&entries, name).map(|url| ListEntry {
                name: name.clone(),
                url: url.to_string(),
            })
        })
        .collect();

    let raw: String = Input::new()
        .with_prompt("Destination folder (empty for current directory)")
        .allow_empty(true)
        .interact_text()?;
    let dest_dir = expand_dir(if raw.trim().is_empty() { "." } else { raw.trim() });
    std::fs::create_dir_all(&dest_dir).with_context(|| format!("creating {}", dest_dir.display()))?;

    let pipeline = &services.pipeline;
    let summary = run_with_progress(|tx| pipeline.run_list(&queue, &dest_dir, tx))?;
    println!(
        "{} downloads finished: {} of {} games",
        "✓".green(),
        summary.downloaded,
        summary.requested
    );
    Ok(())
}

/// Account flow: show, replace or test the stored keys.
fn configure_account(settings: &Settings) -> Result<()> {
    let path = &settings.credentials_file;
    println!("\n{}", "Internet Archive account".yellow().bold());
    println!("{}\n", "Credentials are needed to access archive.org".cyan());

    let Some(current) = credentials::raw(path)? else {
        println!("{}", "No existing configuration found".yellow());
        return ask_credentials(settings);
    };

    println!("{}", "✓ Existing configuration found".green());
    let options = vec!["Show current configuration", "Set new credentials", "Test connection", "Back"];
    match Select::new().items(&options).default(0).interact_opt()? {
        Some(0) => println!("\n{}\n{current}", "Current configuration:".cyan()),
        Some(1) => ask_credentials(settings)?,
        Some(2) => test_connection(settings)?,
        _ => {}
    }
    Ok(())
}

fn ask_credentials(settings: &Settings) -> Result<()> {
    let access: String = Input::new().with_prompt("Access key").interact_text()?;
    let secret: String = Password::new().with_prompt("Secret key").interact()?;
    Credentials {
        access: access.trim().to_string(),
        secret,
    }
    .save(&settings.credentials_file)?;
    println!("{}", "✓ Credentials saved.".green());
    Ok(())
}

fn test_connection(settings: &Settings) -> Result<()> {
    let services = Services::load(settings)?;
    let spinner = spinner("Testing connection with archive.org...");
    let probed = services.catalog.probe();
    spinner.finish_and_clear();
    match probed {
        Ok(hits) => println!("{} connection OK, {hits} results", "✓".green()),
        Err(e) => println!("{} connection failed: {e}", "✗".red()),
    }
    Ok(())
}

/// Ask for a directory. An empty answer opens a folder picker; closing the
/// picker cancels.
fn ask_dir(prompt: &str) -> Result<Option<PathBuf>> {
    let raw: String = Input::new()
        .with_prompt(format!("{prompt} (empty to browse)"))
        .allow_empty(true)
        .interact_text()?;
    if !raw.trim().is_empty() {
        return Ok(Some(expand_dir(raw.trim())));
    }
    let picked = rfd::FileDialog::new().set_title(prompt).pick_folder();
    if picked.is_none() {
        println!("{}", "No folder chosen.".red());
    }
    Ok(picked)
}

/// Expand a leading `~` and make the path absolute.
fn expand_dir(raw: &str) -> PathBuf {
    let path = match raw.strip_prefix('~') {
        Some(rest) => dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(rest.trim_start_matches(['/', '\\'])),
        None => PathBuf::from(raw),
    };
    if path.is_absolute() {
        return path;
    }
    std::env::current_dir().map(|cwd| cwd.join(&path)).unwrap_or(path)
}

fn spinner(message: &'static str) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::with_template("{spinner} {msg}").unwrap());
    spinner.set_message(message);
    spinner.enable_steady_tick(POLL_INTERVAL);
    spinner
}

/// Run a queue on a worker thread, rendering its events on one bar.
fn run_with_progress<W>(work: W) -> Result<PipelineSummary>
where
    W: FnOnce(&std::sync::mpsc::Sender<PipelineEvent>) -> PipelineSummary + Send,
{
    let bar = ProgressBar::new(0);
    bar.set_style(
        ProgressStyle::with_template("{msg}\n[{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})")
            .unwrap()
            .progress_chars("=> "),
    );
    let summary = run_in_background(work, POLL_INTERVAL, |event| render(&bar, event));
    bar.finish_and_clear();
    summary.context("download worker stopped unexpectedly")
}

fn render(bar: &ProgressBar, event: &PipelineEvent) {
    match event {
        PipelineEvent::Started { position, total, name } => {
            bar.reset();
            bar.set_length(0);
            bar.set_message(format!("[{position}/{total}] Downloading {name}"));
        }
        PipelineEvent::Progress { done, total } => {
            if let Some(total) = total {
                bar.set_length(*total);
            }
            bar.set_position(*done);
        }
        PipelineEvent::Downloaded { name, .. } => {
            bar.println(format!("{} download complete: {name}", "✓".green()));
        }
        PipelineEvent::DownloadFailed { name, log, reason } => {
            bar.println(format!("{} {name}: {reason}. See '{}'", "✗".red(), log.display()));
        }
        PipelineEvent::Processing { name } => bar.set_message(format!("Processing {name}")),
        PipelineEvent::Processed { output } => {
            bar.println(format!("{} processed: {}", "✓".green(), output.display()));
        }
        PipelineEvent::ProcessFailed { name, log, reason } => {
            bar.println(format!("{} processing {name} failed: {reason}. See '{}'", "✗".red(), log.display()));
        }
        PipelineEvent::Finished(_) => {}
    }
}

// Flat name/URL lists. A list file is a sequence of blocks separated by
// blank lines; the first line of a block is the display name, the second
// the download URL, anything after that is ignored.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use walkdir::WalkDir;

use crate::error::{Error, Result};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ListEntry {
    pub name: String,
    pub url: String,
}

fn region_suffix() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r" - (BCES|BLES)\d{5}.*").expect("static regex"))
}

/// Drop a trailing ` - BCES01234...` / ` - BLES01234...` catalog code.
pub fn clean_name(raw: &str) -> String {
    region_suffix().replace(raw, "").into_owned()
}

/// Parse list contents into entries, keeping order and duplicates.
pub fn parse_list(contents: &str) -> Vec<ListEntry> {
    let mut entries = Vec::new();
    let mut block: Vec<&str> = Vec::new();

    // a trailing blank line flushes the final block
    for line in contents.lines().chain(std::iter::once("")) {
        let line = line.trim();
        if !line.is_empty() {
            block.push(line);
            continue;
        }
        if let [name, url, ..] = block.as_slice() {
            entries.push(ListEntry {
                name: clean_name(name),
                url: url.to_string(),
            });
        }
        block.clear();
    }
    entries
}

/// Read and parse one list file. Invalid UTF-8 is replaced, not rejected.
pub fn read_list(path: &Path) -> Result<Vec<ListEntry>> {
    let bytes = std::fs::read(path).map_err(|e| Error::at(path, e))?;
    Ok(parse_list(&String::from_utf8_lossy(&bytes)))
}

/// Every `*.txt` file below `dir`, sorted by path.
pub fn find_list_files(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| e.path().extension().is_some_and(|ext| ext == "txt"))
        .map(|e| e.into_path())
        .collect();
    files.sort();
    files
}

/// URL of the first entry whose name equals `label`.
pub fn url_for_label<'a>(entries: &'a [ListEntry], label: &str) -> Option<&'a str> {
    entries.iter().find(|e| e.name == label).map(|e| e.url.as_str())
}

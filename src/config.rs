// Runtime settings. Everything is read from the environment with a sane
// default, in the same spirit as the old `ApiClient::from_env`. The working
// tree lives under `~/.iaPS3` unless `IAPS3_HOME` points elsewhere.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

/// Search keyword sent to the catalog.
pub const DEFAULT_SEARCH_QUERY: &str = "sony_playstation3";
/// Only identifiers carrying this prefix are kept from the search results.
pub const IDENTIFIER_PREFIX: &str = "sony_playstation3_";
pub const DEFAULT_BASE_URL: &str = "https://archive.org";
pub const DEFAULT_TOOL: &str = "libray";
/// Connect and per-read transport timeout.
pub const HTTP_TIMEOUT: Duration = Duration::from_secs(60);
/// Read buffer used while streaming a response body to disk.
pub const CHUNK_SIZE: usize = 1024 * 1024;
const DEFAULT_SEARCH_ROWS: usize = 10_000;

#[derive(Clone, Debug)]
pub struct Settings {
    /// Root working directory (`~/.iaPS3`).
    pub home: PathBuf,
    pub base_url: String,
    pub search_query: String,
    pub identifier_prefix: String,
    pub search_rows: usize,
    /// Credential file in `[s3]` layout.
    pub credentials_file: PathBuf,
    /// Name of the post-processing executable looked up on `PATH`.
    pub tool: String,
    /// Tree scanned for a `site-packages` install when `tool` is not on `PATH`.
    pub tool_search_root: PathBuf,
}

impl Settings {
    /// Build settings from environment variables, falling back to
    /// home-relative defaults.
    pub fn from_env() -> Result<Self> {
        let user_home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        let home = env_path("IAPS3_HOME").unwrap_or_else(|| user_home.join(".iaPS3"));
        let credentials_file = env_path("IA_CONFIG_FILE")
            .unwrap_or_else(|| user_home.join(".config").join("internetarchive").join("config"));
        let tool_search_root = env_path("IAPS3_TOOL_SEARCH_ROOT").unwrap_or_else(|| {
            // pip --user installs land under AppData on Windows and ~/.local elsewhere
            if cfg!(windows) {
                user_home.join("AppData")
            } else {
                user_home.join(".local")
            }
        });

        let search_rows = match std::env::var("IAPS3_SEARCH_ROWS") {
            Ok(raw) => raw
                .parse()
                .map_err(|_| Error::Config(format!("IAPS3_SEARCH_ROWS is not a number: {raw}")))?,
            Err(_) => DEFAULT_SEARCH_ROWS,
        };

        Ok(Settings {
            home,
            base_url: std::env::var("ARCHIVE_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.into()),
            search_query: std::env::var("IAPS3_SEARCH_QUERY")
                .unwrap_or_else(|_| DEFAULT_SEARCH_QUERY.into()),
            identifier_prefix: IDENTIFIER_PREFIX.into(),
            search_rows,
            credentials_file,
            tool: std::env::var("IAPS3_TOOL").unwrap_or_else(|_| DEFAULT_TOOL.into()),
            tool_search_root,
        })
    }

    /// Settings rooted at an explicit directory. Used by tests and by callers
    /// that do not want to read the environment.
    pub fn rooted_at(home: impl Into<PathBuf>, base_url: impl Into<String>) -> Self {
        let home = home.into();
        Settings {
            credentials_file: home.join("ia.ini"),
            tool_search_root: home.join("tools"),
            home,
            base_url: base_url.into(),
            search_query: DEFAULT_SEARCH_QUERY.into(),
            identifier_prefix: IDENTIFIER_PREFIX.into(),
            search_rows: DEFAULT_SEARCH_ROWS,
            tool: DEFAULT_TOOL.into(),
        }
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.home.join("logs")
    }

    /// Directory scanned for flat `.txt` name/URL lists.
    pub fn lists_dir(&self) -> PathBuf {
        self.home.join("pkg")
    }

    /// Create the working directories. Failing here is the one fatal error
    /// at startup.
    pub fn ensure_dirs(&self) -> Result<()> {
        for dir in [self.home.clone(), self.logs_dir(), self.lists_dir()] {
            std::fs::create_dir_all(&dir).map_err(|e| Error::at(&dir, e))?;
        }
        Ok(())
    }
}

fn env_path(key: &str) -> Option<PathBuf> {
    std::env::var_os(key)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

/// Replace every character that is not ASCII alphanumeric with `_`.
/// Used to derive log file names that are safe on every platform.
pub fn log_safe_name(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

/// Path of a per-task log file inside `logs_dir`.
pub fn log_path(logs_dir: &Path, prefix: &str, name: &str) -> PathBuf {
    logs_dir.join(format!("{prefix}_{}.log", log_safe_name(name)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_names_collapse_non_alphanumerics() {
        assert_eq!(log_safe_name("Game (EU) v1.01.iso"), "Game__EU__v1_01_iso");
        assert_eq!(log_safe_name("ñandú"), "_and_");
    }

    #[test]
    fn ensure_dirs_creates_working_tree() {
        let tmp = tempfile::tempdir().unwrap();
        let settings = Settings::rooted_at(tmp.path().join("home"), DEFAULT_BASE_URL);
        settings.ensure_dirs().unwrap();
        assert!(settings.logs_dir().is_dir());
        assert!(settings.lists_dir().is_dir());
    }
}

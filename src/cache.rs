// Flat text caches for catalog listings: one entry per line, rewritten in
// full on every refresh.

use std::fs;
use std::path::{Path, PathBuf};

use crate::api::Catalog;
use crate::error::{Error, Result};

#[derive(Clone, Debug)]
pub struct CacheStore {
    root: PathBuf,
}

impl CacheStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Cache of catalog identifiers.
    pub fn items_path(&self) -> PathBuf {
        self.root.join("ps3_items_cache.txt")
    }

    /// Cache of the file names of one item.
    pub fn files_path(&self, identifier: &str) -> PathBuf {
        self.root.join(format!("{identifier}_files_cache.txt"))
    }

    /// Query the catalog and persist the identifier list.
    pub fn refresh_items(&self, catalog: &dyn Catalog) -> Result<Vec<String>> {
        let items = catalog.search_identifiers()?;
        if items.is_empty() {
            return Err(Error::EmptyListing("item"));
        }
        let path = self.items_path();
        write_lines(&path, &items)?;
        tracing::info!("item list saved to {}", path.display());
        Ok(items)
    }

    /// Query the catalog and persist the file list for `identifier`.
    pub fn refresh_files(&self, catalog: &dyn Catalog, identifier: &str) -> Result<Vec<String>> {
        let files = catalog.list_files(identifier)?;
        if files.is_empty() {
            return Err(Error::EmptyListing("file"));
        }
        let path = self.files_path(identifier);
        write_lines(&path, &files)?;
        tracing::info!("file list for '{identifier}' saved to {}", path.display());
        Ok(files)
    }
}

/// Overwrite `path` with `lines` joined by newlines.
pub fn write_lines<S: AsRef<str>>(path: &Path, lines: &[S]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| Error::at(parent, e))?;
    }
    let body = lines.iter().map(AsRef::as_ref).collect::<Vec<_>>().join("\n");
    fs::write(path, body).map_err(|e| Error::at(path, e))
}

/// Read the non-blank, trimmed lines of `path` in order.
pub fn read_lines(path: &Path) -> Result<Vec<String>> {
    let text = fs::read_to_string(path).map_err(|e| Error::at(path, e))?;
    Ok(text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(String::from)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::tests::FakeCatalog;

    #[test]
    fn lines_round_trip_in_order() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested").join("cache.txt");
        let ids = vec!["sony_playstation3_b", "sony_playstation3_a", "sony_playstation3_c"];
        write_lines(&path, &ids).unwrap();
        assert_eq!(read_lines(&path).unwrap(), ids);
    }

    #[test]
    fn read_skips_blank_lines() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("cache.txt");
        fs::write(&path, "one\n\n  \n two \r\nthree\n").unwrap();
        assert_eq!(read_lines(&path).unwrap(), vec!["one", "two", "three"]);
    }

    #[test]
    fn refresh_rewrites_whole_file() {
        let tmp = tempfile::tempdir().unwrap();
        let store = CacheStore::new(tmp.path());
        fs::write(store.files_path("item"), "stale-1\nstale-2\nstale-3").unwrap();

        let catalog = FakeCatalog::with_files(&["fresh.iso"]);
        store.refresh_files(&catalog, "item").unwrap();
        assert_eq!(read_lines(&store.files_path("item")).unwrap(), vec!["fresh.iso"]);
    }

    #[test]
    fn empty_listing_keeps_existing_cache() {
        let tmp = tempfile::tempdir().unwrap();
        let store = CacheStore::new(tmp.path());
        fs::write(store.items_path(), "kept").unwrap();

        let catalog = FakeCatalog::with_items(&[]);
        let err = store.refresh_items(&catalog).unwrap_err();
        assert!(matches!(err, Error::EmptyListing("item")));
        assert_eq!(read_lines(&store.items_path()).unwrap(), vec!["kept"]);
    }
}

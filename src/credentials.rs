// Archive.org S3-style keys, stored in the same `[s3]` layout the
// `internetarchive` tooling reads so both can share one file.

use std::fs;
use std::path::Path;

use crate::error::{Error, Result};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Credentials {
    pub access: String,
    pub secret: String,
}

impl Credentials {
    /// Load the `[s3]` keys. `Ok(None)` when the file is missing or either
    /// key is absent.
    pub fn load(path: &Path) -> Result<Option<Self>> {
        match raw(path)? {
            Some(text) => Ok(parse(&text)),
            None => Ok(None),
        }
    }

    /// Write the file, replacing any previous content.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::at(parent, e))?;
        }
        let body = format!("[s3]\naccess = {}\nsecret = {}\n", self.access, self.secret);
        fs::write(path, body).map_err(|e| Error::at(path, e))?;
        tracing::info!("credentials saved to {}", path.display());
        Ok(())
    }

    pub fn authorization_header(&self) -> String {
        format!("LOW {}:{}", self.access, self.secret)
    }
}

/// Raw file text, for the "show current configuration" option.
pub fn raw(path: &Path) -> Result<Option<String>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(String::from_utf8_lossy(&bytes).into_owned())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(Error::at(path, e)),
    }
}

fn parse(text: &str) -> Option<Credentials> {
    let mut section = "";
    let mut access = None;
    let mut secret = None;
    for line in text.lines().map(str::trim) {
        if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
            section = name.trim();
            continue;
        }
        if section != "s3" {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            match key.trim() {
                "access" => access = Some(value.trim().to_string()),
                "secret" => secret = Some(value.trim().to_string()),
                _ => {}
            }
        }
    }
    Some(Credentials {
        access: access.filter(|a| !a.is_empty())?,
        secret: secret.filter(|s| !s.is_empty())?,
    })
}

//! Per-domain cookie files handed to the fetch tool.
//!
//! The store is a flat directory. A request picks the file whose name
//! contains the request hostname with any leading `www.` removed, so
//! `youtube.com.txt` serves `https://www.youtube.com/watch?v=...`.

use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;
use tokio::fs;
use tracing::debug;
use url::Url;
use walkdir::WalkDir;

pub const COOKIE_EXTENSION: &str = "txt";

#[derive(Debug, Error)]
pub enum CookieError {
    #[error("io error at {path}: {source}")]
    Io {
        source: std::io::Error,
        path: PathBuf,
    },
    #[error("could not scan cookie directory: {0}")]
    Walk(#[from] walkdir::Error),
    #[error("invalid cookie file name: {0}")]
    InvalidName(String),
}

pub type CookieResult<T> = Result<T, CookieError>;

#[derive(Debug, Clone, Serialize)]
pub struct CookieFile {
    pub name: String,
    pub path: PathBuf,
    pub size_bytes: u64,
}

#[derive(Debug, Clone)]
pub struct CookieStore {
    dir: PathBuf,
}

impl CookieStore {
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn ensure_dir(&self) -> CookieResult<()> {
        std::fs::create_dir_all(&self.dir).map_err(|source| CookieError::Io {
            source,
            path: self.dir.clone(),
        })
    }

    pub fn resolve(&self, url: &Url) -> CookieResult<Option<PathBuf>> {
        match url.host_str() {
            Some(host) => self.resolve_host(host),
            None => Ok(None),
        }
    }

    /// Files are visited in name order and the last match wins.
    pub fn resolve_host(&self, host: &str) -> CookieResult<Option<PathBuf>> {
        let domain = domain_key(host);
        if domain.is_empty() || !self.dir.is_dir() {
            return Ok(None);
        }
        let mut found = None;
        for entry in self.entries() {
            let entry = entry?;
            if entry.file_name().to_string_lossy().contains(domain) {
                found = Some(entry.into_path());
            }
        }
        if let Some(path) = &found {
            debug!(domain, cookie = %path.display(), "matched cookie file");
        }
        Ok(found)
    }

    pub fn list(&self) -> CookieResult<Vec<CookieFile>> {
        if !self.dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut files = Vec::new();
        for entry in self.entries() {
            let entry = entry?;
            let size_bytes = entry.metadata()?.len();
            files.push(CookieFile {
                name: entry.file_name().to_string_lossy().to_string(),
                path: entry.into_path(),
                size_bytes,
            });
        }
        Ok(files)
    }

    /// Stores `contents` verbatim under the final component of `file_name`.
    pub async fn save(&self, file_name: &str, contents: &[u8]) -> CookieResult<PathBuf> {
        let name = sanitize_file_name(file_name)?;
        fs::create_dir_all(&self.dir)
            .await
            .map_err(|source| CookieError::Io {
                source,
                path: self.dir.clone(),
            })?;
        let path = self.dir.join(name);
        fs::write(&path, contents)
            .await
            .map_err(|source| CookieError::Io {
                source,
                path: path.clone(),
            })?;
        Ok(path)
    }

    fn entries(&self) -> impl Iterator<Item = walkdir::Result<walkdir::DirEntry>> {
        WalkDir::new(&self.dir)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter(|entry| {
                entry
                    .as_ref()
                    .map(|entry| entry.file_type().is_file())
                    .unwrap_or(true)
            })
    }
}

pub fn domain_key(host: &str) -> &str {
    host.strip_prefix("www.").unwrap_or(host)
}

pub fn is_cookie_attachment(file_name: &str) -> bool {
    Path::new(file_name)
        .extension()
        .map(|ext| ext == COOKIE_EXTENSION)
        .unwrap_or(false)
}

fn sanitize_file_name(file_name: &str) -> CookieResult<&str> {
    let name = Path::new(file_name)
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| CookieError::InvalidName(file_name.to_string()))?;
    if name.starts_with('.') {
        return Err(CookieError::InvalidName(file_name.to_string()));
    }
    Ok(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store_with(files: &[&str]) -> (TempDir, CookieStore) {
        let dir = TempDir::new().unwrap();
        for file in files {
            std::fs::write(dir.path().join(file), "# Netscape HTTP Cookie File\n").unwrap();
        }
        let store = CookieStore::new(dir.path());
        (dir, store)
    }

    #[test]
    fn strips_www_before_matching() {
        let (_dir, store) = store_with(&["youtube.com.txt", "vimeo.com.txt"]);
        let url = Url::parse("https://www.youtube.com/watch?v=abc").unwrap();
        let path = store.resolve(&url).unwrap().unwrap();
        assert!(path.ends_with("youtube.com.txt"));
    }

    #[test]
    fn no_match_yields_none() {
        let (_dir, store) = store_with(&["youtube.com.txt"]);
        let url = Url::parse("https://example.org/video").unwrap();
        assert!(store.resolve(&url).unwrap().is_none());
    }

    #[test]
    fn last_match_in_name_order_wins() {
        let (_dir, store) = store_with(&["b-twitter.com.txt", "a-twitter.com.txt"]);
        let path = store.resolve_host("twitter.com").unwrap().unwrap();
        assert!(path.ends_with("b-twitter.com.txt"));
    }

    #[test]
    fn missing_directory_is_not_an_error() {
        let dir = TempDir::new().unwrap();
        let store = CookieStore::new(dir.path().join("absent"));
        assert!(store.resolve_host("youtube.com").unwrap().is_none());
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn empty_host_never_matches() {
        let (_dir, store) = store_with(&["youtube.com.txt"]);
        assert!(store.resolve_host("").unwrap().is_none());
        assert!(store.resolve_host("www.").unwrap().is_none());
    }

    #[tokio::test]
    async fn save_keeps_only_the_file_name() {
        let dir = TempDir::new().unwrap();
        let store = CookieStore::new(dir.path().join("cookies"));
        let path = store
            .save("../../etc/youtube.com.txt", b"cookie-data")
            .await
            .unwrap();
        assert_eq!(path, dir.path().join("cookies").join("youtube.com.txt"));
        assert_eq!(std::fs::read(&path).unwrap(), b"cookie-data");
        let listed = store.list().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].size_bytes, 11);
    }

    #[tokio::test]
    async fn save_rejects_hidden_names() {
        let dir = TempDir::new().unwrap();
        let store = CookieStore::new(dir.path());
        assert!(matches!(
            store.save(".txt", b"x").await,
            Err(CookieError::InvalidName(_))
        ));
    }

    #[test]
    fn only_txt_attachments_are_cookies() {
        assert!(is_cookie_attachment("youtube.com.txt"));
        assert!(!is_cookie_attachment("youtube.com.json"));
        assert!(!is_cookie_attachment("txt"));
    }
}

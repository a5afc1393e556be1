//! Static resources served to plain HTTP requests.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Component, Path};

use bytes::Bytes;
use tracing::{debug, info};

use crate::buffer::Buffer;
use crate::error::RelayError;

/// The chat page served when no index file is found on disk.
pub const EMBEDDED_INDEX: &[u8] = include_bytes!("../static/index.html");

/// Looks up a resource by its path relative to the resource root.
#[cfg_attr(test, mockall::automock)]
pub trait ResourceLoader: Send + Sync {
    /// Fails with [`RelayError::ResourceNotFound`] when there is no such resource.
    fn load(&self, path: &str) -> Result<Buffer, RelayError>;
}

/// An in-memory set of files, read once at startup.
#[derive(Debug, Clone, Default)]
pub struct StaticFiles {
    files: HashMap<String, Bytes>,
}

impl StaticFiles {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads every file below `dir`, keyed by its `/` separated relative path.
    pub fn load_dir(dir: impl AsRef<Path>) -> io::Result<Self> {
        let dir = dir.as_ref();
        let mut files = Self::new();
        files.read_dir(dir, "")?;
        info!(dir = %dir.display(), files = files.len(), "loaded static resources");
        Ok(files)
    }

    /// Only the embedded chat page, as `index_file`.
    pub fn embedded(index_file: &str) -> Self {
        let mut files = Self::new();
        files.insert(index_file, Bytes::from_static(EMBEDDED_INDEX));
        files
    }

    /// Adds the embedded chat page as `index_file` unless a file of that name exists.
    #[must_use]
    pub fn with_index_fallback(mut self, index_file: &str) -> Self {
        if !self.files.contains_key(index_file) {
            debug!(index_file, "using the embedded index page");
            self.insert(index_file, Bytes::from_static(EMBEDDED_INDEX));
        }
        self
    }

    pub fn insert(&mut self, path: &str, content: impl Into<Bytes>) {
        self.files.insert(path.trim_start_matches('/').to_owned(), content.into());
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    fn read_dir(&mut self, dir: &Path, prefix: &str) -> io::Result<()> {
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            let key = if prefix.is_empty() { name } else { format!("{prefix}/{name}") };

            if entry.file_type()?.is_dir() {
                self.read_dir(&entry.path(), &key)?;
            } else {
                let content = fs::read(entry.path())?;
                self.files.insert(key, Bytes::from(content));
            }
        }
        Ok(())
    }
}

impl ResourceLoader for StaticFiles {
    fn load(&self, path: &str) -> Result<Buffer, RelayError> {
        let path = path.trim_start_matches('/');
        let escapes = Path::new(path).components().any(|component| !matches!(component, Component::Normal(_)));
        if escapes {
            return Err(RelayError::not_found(path));
        }

        self.files.get(path).map(|content| Buffer::wrap(content.clone())).ok_or_else(|| RelayError::not_found(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_by_relative_path() {
        let mut files = StaticFiles::new();
        files.insert("index.html", "<html></html>");
        files.insert("/js/chat.js", "let x;");

        assert_eq!(files.load("index.html").unwrap().to_bytes().unwrap(), "<html></html>");
        assert_eq!(files.load("/js/chat.js").unwrap().readable_bytes(), 6);
        assert!(matches!(files.load("missing.css"), Err(RelayError::ResourceNotFound { .. })));
    }

    #[test]
    fn parent_components_never_match() {
        let mut files = StaticFiles::new();
        files.insert("secret", "x");

        assert!(files.load("js/../secret").is_err());
        assert!(files.load("../secret").is_err());
    }

    #[test]
    fn embedded_index_is_a_fallback() {
        let files = StaticFiles::new().with_index_fallback("index.html");
        assert_eq!(files.load("index.html").unwrap().readable_bytes(), EMBEDDED_INDEX.len());

        let mut files = StaticFiles::new();
        files.insert("index.html", "mine");
        let files = files.with_index_fallback("index.html");
        assert_eq!(files.load("index.html").unwrap().to_bytes().unwrap(), "mine");
    }

    #[test]
    fn reads_a_directory_tree() {
        let root = std::env::temp_dir().join(format!("micro-relay-static-{}", std::process::id()));
        fs::create_dir_all(root.join("css")).unwrap();
        fs::write(root.join("index.html"), "hi").unwrap();
        fs::write(root.join("css").join("chat.css"), "body{}").unwrap();

        let files = StaticFiles::load_dir(&root).unwrap();
        fs::remove_dir_all(&root).unwrap();

        assert_eq!(files.len(), 2);
        assert_eq!(files.load("css/chat.css").unwrap().to_bytes().unwrap(), "body{}");
    }

    #[test]
    fn missing_directory_is_an_error() {
        assert!(StaticFiles::load_dir("/definitely/not/here").is_err());
    }
}

//! Script source loading for `execute_file`.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};

/// Resolves a script path to its source text.
pub trait ScriptLoader {
    /// Read the script at `path`.
    fn load(&self, path: &Path) -> io::Result<String>;
}

/// Loads scripts from the local filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsLoader;

impl ScriptLoader for FsLoader {
    fn load(&self, path: &Path) -> io::Result<String> {
        std::fs::read_to_string(path)
    }
}

/// Serves scripts from memory, keyed by path.
#[derive(Debug, Clone, Default)]
pub struct MemoryLoader {
    scripts: HashMap<PathBuf, String>,
}

impl MemoryLoader {
    /// Create an empty loader.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a script under `path`, replacing any previous one.
    pub fn insert(&mut self, path: impl Into<PathBuf>, source: impl Into<String>) {
        self.scripts.insert(path.into(), source.into());
    }

    /// Builder-style variant of [`insert`](Self::insert).
    pub fn with_script(mut self, path: impl Into<PathBuf>, source: impl Into<String>) -> Self {
        self.insert(path, source);
        self
    }

    /// Number of scripts held.
    pub fn len(&self) -> usize {
        self.scripts.len()
    }

    /// Check if the loader holds no scripts.
    pub fn is_empty(&self) -> bool {
        self.scripts.is_empty()
    }
}

impl ScriptLoader for MemoryLoader {
    fn load(&self, path: &Path) -> io::Result<String> {
        self.scripts.get(path).cloned().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("no script registered at {}", path.display()),
            )
        })
    }
}

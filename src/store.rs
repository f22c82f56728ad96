//! Template resource stores.
//!
//! Templates are addressed by logical name (`"bohrprotokoll.pdf"`). Where the
//! bytes live is up to the store.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};

use crate::error::{Result, StampError};

/// Source of template bytes by logical name.
pub trait TemplateStore: Send + Sync {
    fn load(&self, name: &str) -> Result<Vec<u8>>;
}

/// Templates read from files below a root directory.
#[derive(Debug, Clone)]
pub struct DirTemplateStore {
    root: PathBuf,
}

impl DirTemplateStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Path of `name` below the root. Names that would escape the root
    /// (absolute paths, `..`) are refused.
    fn path_for(&self, name: &str) -> Option<PathBuf> {
        let relative = Path::new(name);
        let contained = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
        if name.is_empty() || !contained {
            return None;
        }
        Some(self.root.join(relative))
    }
}

impl TemplateStore for DirTemplateStore {
    fn load(&self, name: &str) -> Result<Vec<u8>> {
        let path = self
            .path_for(name)
            .ok_or_else(|| StampError::TemplateNotFound(name.to_string()))?;
        match std::fs::read(&path) {
            Ok(bytes) => {
                log::debug!("read template {} from {}", name, path.display());
                Ok(bytes)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StampError::TemplateNotFound(name.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Templates held in memory, mainly for tests and embedded callers.
#[derive(Debug, Clone, Default)]
pub struct MemoryTemplateStore {
    templates: HashMap<String, Vec<u8>>,
}

impl MemoryTemplateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, bytes: Vec<u8>) {
        self.templates.insert(name.into(), bytes);
    }

    pub fn with(mut self, name: impl Into<String>, bytes: Vec<u8>) -> Self {
        self.insert(name, bytes);
        self
    }
}

impl TemplateStore for MemoryTemplateStore {
    fn load(&self, name: &str) -> Result<Vec<u8>> {
        self.templates
            .get(name)
            .cloned()
            .ok_or_else(|| StampError::TemplateNotFound(name.to_string()))
    }
}

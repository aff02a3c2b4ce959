//! File-store capability - the existence check behind the trailing system filter

use async_trait::async_trait;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Existence check for candidate image paths.
#[async_trait]
pub trait FileStore: Send + Sync {
    async fn exists(&self, path: &Path) -> bool;
}

/// File store backed by the local filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiskFileStore;

#[async_trait]
impl FileStore for DiskFileStore {
    async fn exists(&self, path: &Path) -> bool {
        tokio::fs::try_exists(path).await.unwrap_or(false)
    }
}

/// In-memory file store for hermetic tests.
#[derive(Debug, Clone, Default)]
pub struct MemoryFileStore {
    paths: HashSet<PathBuf>,
}

impl MemoryFileStore {
    pub fn new(paths: impl IntoIterator<Item = impl Into<PathBuf>>) -> Self {
        Self { paths: paths.into_iter().map(Into::into).collect() }
    }

    pub fn insert(&mut self, path: impl Into<PathBuf>) {
        self.paths.insert(path.into());
    }
}

#[async_trait]
impl FileStore for MemoryFileStore {
    async fn exists(&self, path: &Path) -> bool {
        self.paths.contains(path)
    }
}

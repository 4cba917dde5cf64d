//! Attached documents with lazily loaded, cached content.
//!
//! The ingestion pipeline and its storage live outside this crate. A run only
//! sees the ordered list of attached documents: metadata is available
//! immediately, content is fetched through a [`DocumentLoader`] the first
//! time anything asks for it and cached for the lifetime of the document.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use tracing::debug;

use crate::error::Result;

/// Source of a document's content.
#[async_trait]
pub trait DocumentLoader: Send + Sync {
    async fn load(&self) -> Result<String>;
}

/// Loader over content that is already in memory.
#[derive(Debug, Clone)]
pub struct StaticLoader {
    content: String,
}

impl StaticLoader {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
        }
    }
}

#[async_trait]
impl DocumentLoader for StaticLoader {
    async fn load(&self) -> Result<String> {
        Ok(self.content.clone())
    }
}

/// Loader that reads a UTF-8 file.
#[derive(Debug, Clone)]
pub struct FileLoader {
    path: PathBuf,
}

impl FileLoader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl DocumentLoader for FileLoader {
    async fn load(&self) -> Result<String> {
        Ok(tokio::fs::read_to_string(&self.path).await?)
    }
}

/// Metadata rendered into the prompt and kept in snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRef {
    pub filename: String,
    pub mime_type: String,
    pub size: u64,
}

/// A read-only document attached to an agent context.
pub struct Document {
    meta: DocumentRef,
    loader: Arc<dyn DocumentLoader>,
    content: OnceCell<Arc<str>>,
}

impl std::fmt::Debug for Document {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Document")
            .field("filename", &self.meta.filename)
            .field("mime_type", &self.meta.mime_type)
            .field("size", &self.meta.size)
            .field("loaded", &self.is_loaded())
            .finish()
    }
}

impl Document {
    pub fn new(
        filename: &str,
        mime_type: &str,
        size: u64,
        loader: Arc<dyn DocumentLoader>,
    ) -> Self {
        Self {
            meta: DocumentRef {
                filename: filename.to_string(),
                mime_type: mime_type.to_string(),
                size,
            },
            loader,
            content: OnceCell::new(),
        }
    }

    /// Document whose content is already known.
    pub fn from_text(filename: &str, mime_type: &str, content: &str) -> Self {
        Self::new(
            filename,
            mime_type,
            content.len() as u64,
            Arc::new(StaticLoader::new(content)),
        )
    }

    pub fn filename(&self) -> &str {
        &self.meta.filename
    }

    pub fn mime_type(&self) -> &str {
        &self.meta.mime_type
    }

    pub fn size(&self) -> u64 {
        self.meta.size
    }

    pub fn metadata(&self) -> &DocumentRef {
        &self.meta
    }

    /// Whether the content has been fetched.
    pub fn is_loaded(&self) -> bool {
        self.content.initialized()
    }

    /// Document content. The loader runs on the first call only; concurrent
    /// first calls share a single load. A failed load is not cached.
    pub async fn content(&self) -> Result<Arc<str>> {
        let content = self
            .content
            .get_or_try_init(|| async {
                debug!(document = %self.meta.filename, "Loading document content");
                self.loader.load().await.map(Arc::<str>::from)
            })
            .await?;
        Ok(content.clone())
    }
}

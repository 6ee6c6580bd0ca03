//! Lazy, race-free creation of documents by name.
//!
//! Lock order:
//! ```text
//! documents map (std Mutex, never held across .await)
//!     └─ reserve/fetch slot, release
//! slot (tokio Mutex)
//!     └─ first holder: filename → restore hook → replicate dispatch → open store
//! document (tokio Mutex, see document.rs)
//! ```
//! Resolvers of one unseen name queue on its slot until initialisation ends;
//! resolvers of other names only ever touch the map lock briefly.
//!
//! A failed initialisation leaves the slot empty, so the next resolver of that
//! name runs the whole slow path again.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::document::Document;
use crate::hooks::{HookError, HookRunner};
use crate::storage::{FilenameStore, GraphStore, StoreConfig, StoreError};

/// Directory name of the filename registry inside the data directory.
pub const REGISTRY_DIR: &str = "registry";

type DocumentSlot = tokio::sync::Mutex<Option<Arc<Document>>>;

/// Registry errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("Failed to get document filename: {0}")]
    Filename(StoreError),
    #[error("Failed to restore document: {0}")]
    Restore(#[from] HookError),
    #[error("Failed to open document: {0}")]
    Open(StoreError),
}

pub struct DocumentRegistry {
    documents: Mutex<HashMap<String, Arc<DocumentSlot>>>,
    filenames: FilenameStore,
    hooks: HookRunner,
    /// Tuning applied to every document store; the path is replaced per document
    store_config: StoreConfig,
    open_count: AtomicUsize,
}

impl DocumentRegistry {
    /// Open the filename registry under `hooks.data_dir()`.
    ///
    /// The data directory is created if missing. Startup hooks for the
    /// registry itself are the caller's business.
    pub fn open(hooks: HookRunner, store_config: StoreConfig) -> Result<Self, StoreError> {
        std::fs::create_dir_all(hooks.data_dir())?;
        let filenames =
            FilenameStore::open(store_config.with_path(hooks.data_dir().join(REGISTRY_DIR)))?;

        Ok(Self {
            documents: Mutex::new(HashMap::new()),
            filenames,
            hooks,
            store_config,
            open_count: AtomicUsize::new(0),
        })
    }

    /// Get the document called `name`, creating it on first use.
    pub async fn resolve(&self, name: &str) -> Result<Arc<Document>, RegistryError> {
        let slot = {
            let mut documents = self.documents.lock().unwrap_or_else(PoisonError::into_inner);
            documents.entry(name.to_string()).or_default().clone()
        };

        let mut entry = slot.lock().await;
        if let Some(document) = entry.as_ref() {
            return Ok(document.clone());
        }

        let document = Arc::new(self.create(name).await?);
        *entry = Some(document.clone());
        self.open_count.fetch_add(1, Ordering::Relaxed);
        Ok(document)
    }

    async fn create(&self, name: &str) -> Result<Document, RegistryError> {
        let filename = self
            .filenames
            .filename_for(name)
            .map_err(RegistryError::Filename)?;

        self.hooks.restore(&filename).await?;
        self.hooks.replicate(&filename);

        let store = GraphStore::open(self.store_config.with_path(self.document_path(&filename)))
            .map_err(RegistryError::Open)?;

        log::info!("Opened document {name:?} ({filename}, {} vertices)", store.len());
        Ok(Document::new(name, store))
    }

    fn document_path(&self, filename: &str) -> PathBuf {
        self.hooks.data_dir().join(filename)
    }

    /// Number of documents opened by this process.
    pub fn open_documents(&self) -> usize {
        self.open_count.load(Ordering::Relaxed)
    }

    pub fn filenames(&self) -> &FilenameStore {
        &self.filenames
    }

    pub fn data_dir(&self) -> &Path {
        self.hooks.data_dir()
    }

    pub fn hooks(&self) -> &HookRunner {
        &self.hooks
    }
}

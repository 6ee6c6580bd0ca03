//! Persistent storage for causal document graphs.
//!
//! Layout under the data directory:
//! ```text
//! <data>/
//! ├── registry/          FilenameStore (TransactionDB)
//! │     CF "documents"   name → filename
//! ├── <uuid>.db/         GraphStore, one per document
//! │     CF "vertices"    id → seq
//! │     CF "log"         seq → vertex row (insertion order)
//! │     CF "edges"       child ‖ parent → ∅
//! └── ...
//! ```
//!
//! The registry maps a logical document name to a stable random filename so
//! that restore/replicate hooks always address the same on-disk directory.

pub mod rocks;
pub mod graph;
pub mod registry;

pub use rocks::{StoreConfig, StoreError};
pub use graph::GraphStore;
pub use registry::FilenameStore;

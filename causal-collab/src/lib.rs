//! # causal-collab: sync server for append-only causal document graphs
//!
//! Each named document is a DAG of immutable vertices whose edges point at
//! causal parents. Clients append vertices, pull what they have not seen
//! (relative to a frontier they already hold), and stream new vertices live.
//!
//! ## Architecture
//!
//! ```text
//!  HTTP / WebSocket
//!        │
//! ┌──────▼───────┐   name → filename   ┌───────────────┐
//! │ SyncServer   │ ──────────────────► │ FilenameStore │
//! └──────┬───────┘                     │ (TransactionDB)│
//!        │ resolve(name)               └───────────────┘
//! ┌──────▼───────────┐  restore (awaited) / replicate (background)
//! │ DocumentRegistry │ ──────────────────────────────► HookRunner
//! └──────┬───────────┘
//!        │ Arc<Document>
//! ┌──────▼───────────────────────────────┐
//! │ Document  (one lock)                  │
//! │   ├── GraphStore    (RocksDB per doc) │
//! │   └── SubscriberHub (live fan-out)    │
//! └───────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`]: `Vertex` JSON form, frontier parsing
//! - [`storage`]: RocksDB stores: filename registry and per-document graph
//! - [`broadcast`]: subscriber fan-out in commit order
//! - [`document`]: store + hub behind a single lock
//! - [`registry`]: lazy document creation with restore/replicate hooks
//! - [`hooks`]: external hook processes, bounded replicate pool
//! - [`server`]: axum routes and WebSocket streaming

pub mod protocol;
pub mod storage;
pub mod broadcast;
pub mod document;
pub mod registry;
pub mod hooks;
pub mod server;

// Re-exports for convenience
pub use protocol::{parse_frontier, ProtocolError, Vertex};
pub use storage::{FilenameStore, GraphStore, StoreConfig, StoreError};
pub use broadcast::{DeliveryFn, HubStats, SubscriberHub, SubscriberToken};
pub use document::{Document, DocumentStats};
pub use registry::{DocumentRegistry, RegistryError};
pub use hooks::{HookError, HookRunner};
pub use server::{ServerConfig, SyncServer};

//! # Converge Replica
//!
//! The store-facing half of Converge: replication protocols over a
//! revision-tracked document store holding one document per entity.
//!
//! Where `converge-engine` defines the data model (versions, documents,
//! the merge contract), this crate does the IO: conditional writes,
//! point reads, conflict resolution, and continuous change streaming
//! against a [`DocumentStore`] backend. Two backends ship with the
//! crate: [`HttpStore`] for a remote member speaking the store's HTTP
//! interface, and [`MemoryStore`] for tests and process-local caches.
//!
//! ## Protocols
//!
//! - [`Writer`] - create, update, and delete with optimistic
//!   concurrency; lost races are merged and retried, not surfaced
//! - [`Reader`] - point reads of the winning version, raw or typed
//! - [`Resolver`] - collapse conflicting siblings through a
//!   caller-supplied merge, committed atomically
//! - [`StreamReader`] - a background worker that follows the change
//!   feed and fans decoded versions out to subscribers
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use converge_engine::Entity;
//! use converge_replica::{CreateOutcome, MemoryStore, Reader, Writer};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, Clone, Serialize, Deserialize)]
//! struct Note {
//!     id: String,
//!     body: String,
//! }
//!
//! impl Entity for Note {
//!     const KIND: &'static str = "note";
//!
//!     fn identity(&self) -> &str {
//!         &self.id
//!     }
//! }
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> converge_replica::Result<()> {
//! let store = Arc::new(MemoryStore::new());
//! let writer = Writer::new(store.clone(), "side-a");
//!
//! let note = Note { id: "note-1".into(), body: "hello".into() };
//! let outcome = writer.try_create(&note, chrono::Utc::now()).await?;
//! assert!(matches!(outcome, CreateOutcome::Created(_)));
//!
//! let reader = Reader::new(store);
//! let version = reader.read("note-1").await?;
//! assert_eq!(version.entity["body"], "hello");
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod pool;
pub mod reader;
pub mod resolver;
pub mod store;
pub mod stream;
pub mod writer;

// Re-export main types at crate root
pub use config::{ConfigError, ReplicaConfig, RetryPolicy};
pub use error::{Error, Result};
pub use pool::{ConnectionPool, PooledConnection};
pub use reader::Reader;
pub use resolver::Resolver;
pub use store::{BulkOp, ChangeStream, DocumentStore, FetchedDocument, HttpStore, MemoryStore};
pub use stream::{StreamEvent, StreamReader, StreamState};
pub use writer::{CreateOutcome, Writer};

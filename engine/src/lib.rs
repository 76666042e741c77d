//! # Converge Engine
//!
//! The data model and contracts for Converge, a multi-master replication
//! engine over a revision-tracked document store.
//!
//! This crate provides the pure core: versions, wire documents, the kind-tag
//! registry, and the pluggable merge contract. The protocols that talk to a
//! store (create/update/delete, point reads, change streaming) live in
//! `converge-replica`.
//!
//! ## Design Principles
//!
//! - **No IO**: the engine has no knowledge of stores, network, or platform
//! - **Deterministic**: shipped merge strategies resolve the same inputs to
//!   the same winner, whatever the sibling order
//! - **Opaque payloads**: entities are JSON values the engine never interprets
//! - **Pluggable merge**: conflict resolution is supplied by the application
//!
//! ## Core Concepts
//!
//! ### Versions
//!
//! A [`Version`] is an immutable snapshot of an entity plus:
//! - The store-assigned revision token (the optimistic-concurrency guard)
//! - The side that wrote it
//! - Modification time
//! - A tombstone flag (soft delete)
//! - A transient `is_new` flag marking candidates the store has not accepted
//!
//! ### Documents
//!
//! A [`Document`] is the store-level shape of a version: `{ id, kind, entity,
//! side, modified, deleted? }`. The `kind` tag enables polymorphic decode,
//! since one store holds many different entity kinds.
//!
//! ### Type Registry
//!
//! The [`TypeRegistry`] maps kind tags to decode functions, registered
//! explicitly at startup. No runtime type scanning.
//!
//! ### Merge
//!
//! Conflicting sibling revisions are collapsed by a caller-supplied
//! [`MergeAlgorithm`]. Two baseline strategies ship with the crate:
//! - [`LastWriteWins`] - newest write wins wholesale
//! - [`ShallowMerge`] - field-level union, newest write wins per field
//!
//! ## Quick Start
//!
//! ```rust
//! use converge_engine::{Entity, TypeRegistry, Version};
//! use serde::{Deserialize, Serialize};
//! use serde_json::json;
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
//! // 1. Register kinds once at startup
//! let mut registry = TypeRegistry::new();
//! registry.register::<Note>();
//!
//! // 2. Build a candidate version for a local write
//! let note = Note { id: "note-1".into(), body: "hello".into() };
//! let version = Version::candidate(&note, "side-a", chrono::Utc::now()).unwrap();
//! assert!(version.is_new);
//! assert!(version.revision.is_none());
//!
//! // 3. Decode a stored payload back through the registry
//! let payload = json!({"id": "note-1", "body": "hello"});
//! let decoded = registry.decode("note", &payload).unwrap();
//! assert_eq!(decoded, payload);
//! ```

pub mod document;
pub mod error;
pub mod merge;
pub mod registry;
pub mod version;

// Re-export main types at crate root
pub use document::{ChangeRecord, Document};
pub use error::Error;
pub use merge::{LastWriteWins, MergeAlgorithm, ShallowMerge, TypedMerge};
pub use registry::{DecodeFn, TypeRegistry};
pub use version::{Entity, TypedVersion, Version};

/// Type aliases for clarity
pub type EntityId = String;
pub type KindTag = String;
pub type SideId = String;
pub type RevisionId = String;
pub type Checkpoint = String;

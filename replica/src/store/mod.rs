//! Storage backends for revision-tracked documents.
//!
//! A [`DocumentStore`] is the replica's view of one store member. Every
//! write is conditioned on the revision the writer last observed, so a
//! lost race surfaces as a conflict instead of silently clobbering
//! another side's change.

pub mod http;
pub mod memory;

use std::time::Duration;

use async_trait::async_trait;
use converge_engine::{ChangeRecord, Checkpoint, Document, EntityId, RevisionId};
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub use http::HttpStore;
pub use memory::MemoryStore;

/// Stream of change records produced by [`DocumentStore::changes`].
pub type ChangeStream = BoxStream<'static, Result<ChangeRecord>>;

/// A document fetched from the store together with its winning revision.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchedDocument {
    /// The winning revision's document
    #[serde(flatten)]
    pub document: Document,
    /// Revision token of the winning revision
    pub revision: RevisionId,
    /// Live sibling revisions, populated only when conflicts were
    /// requested
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conflicts: Vec<RevisionId>,
}

/// One operation inside an atomic bulk write.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum BulkOp {
    /// Write a document, conditioned on `revision` when present.
    Put {
        #[serde(flatten)]
        document: Document,
        #[serde(skip_serializing_if = "Option::is_none")]
        revision: Option<RevisionId>,
    },
    /// Delete one specific revision of a document.
    Delete { id: EntityId, revision: RevisionId },
}

impl BulkOp {
    /// Identity the operation targets.
    pub fn id(&self) -> &str {
        match self {
            BulkOp::Put { document, .. } => &document.id,
            BulkOp::Delete { id, .. } => id,
        }
    }
}

/// Operations every store backend supports.
///
/// Implementations are shared across readers, writers, resolvers, and
/// stream readers behind `Arc<dyn DocumentStore>`.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Fetch the winning revision of a document.
    ///
    /// Returns `None` when no live document exists under the identity;
    /// tombstoned documents read as absent.
    async fn get(&self, id: &str) -> Result<Option<FetchedDocument>>;

    /// Fetch the winning revision together with live sibling revisions.
    async fn get_with_conflicts(&self, id: &str) -> Result<Option<FetchedDocument>>;

    /// Fetch one specific revision of a document, tombstones included.
    async fn get_revision(&self, id: &str, revision: &str) -> Result<Option<Document>>;

    /// Write a document conditioned on an expected revision.
    ///
    /// `expected` of `None` requires that the identity holds no
    /// revisions at all. Returns the revision token the store assigned.
    async fn put(
        &self,
        id: &str,
        expected: Option<&str>,
        document: &Document,
    ) -> Result<RevisionId>;

    /// Apply a batch of writes and deletes atomically.
    ///
    /// Either every operation applies or none does. Returned revisions
    /// align with the operation order.
    async fn bulk(&self, ops: Vec<BulkOp>) -> Result<Vec<RevisionId>>;

    /// Open a continuous change feed starting after `since`.
    ///
    /// The store sends heartbeats at the given interval while idle so
    /// the consumer can tell a quiet feed from a dead connection.
    async fn changes(&self, since: Option<Checkpoint>, heartbeat: Duration)
        -> Result<ChangeStream>;
}

//! In-memory store backend.
//!
//! Keeps every revision leaf per document, live and tombstoned, with
//! the same conditional-write and sibling semantics as a remote member.
//! Used by tests and by deployments that replicate into a
//! process-local cache.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use converge_engine::{ChangeRecord, Checkpoint, Document, EntityId, RevisionId};
use futures::StreamExt;
use tokio::sync::{watch, Mutex};
use uuid::Uuid;

use super::{BulkOp, ChangeStream, DocumentStore, FetchedDocument};
use crate::error::{Error, Result};

/// In-memory [`DocumentStore`] with revision-leaf semantics.
///
/// Cloning is cheap and clones share the same underlying state.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
    notify: Arc<watch::Sender<u64>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        let (notify, _) = watch::channel(0);
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            notify: Arc::new(notify),
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    docs: HashMap<EntityId, DocState>,
    log: Vec<LogEntry>,
    sequence: u64,
}

/// Current revision leaves of one document, keyed by revision token.
#[derive(Debug, Default, Clone)]
struct DocState {
    leaves: HashMap<RevisionId, Document>,
}

#[derive(Debug, Clone)]
struct LogEntry {
    sequence: u64,
    id: EntityId,
    deleted: bool,
    revisions: Vec<RevisionId>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inject a revision leaf as if it arrived through store-to-store
    /// replication, creating a sibling when other leaves exist.
    ///
    /// No-op when the revision is already present.
    pub async fn replicate_existing(
        &self,
        document: Document,
        revision: impl Into<RevisionId>,
    ) {
        let revision = revision.into();
        let sequence = {
            let mut inner = self.inner.lock().await;
            let state = inner.docs.entry(document.id.clone()).or_default();
            if state.leaves.contains_key(&revision) {
                return;
            }
            let id = document.id.clone();
            state.leaves.insert(revision.clone(), document);
            inner.record_change(&id, vec![revision])
        };
        self.notify.send_replace(sequence);
    }
}

impl Inner {
    /// Winning leaf: the live leaf with the highest generation, ties
    /// broken lexicographically.
    fn winner(&self, id: &str) -> Option<(&RevisionId, &Document)> {
        self.docs
            .get(id)?
            .leaves
            .iter()
            .filter(|(_, document)| !document.deleted)
            .max_by(|(a, _), (b, _)| rev_order(a, b))
    }

    fn fetch(&self, id: &str, with_conflicts: bool) -> Option<FetchedDocument> {
        let (revision, document) = self.winner(id)?;

        let mut conflicts = Vec::new();
        if with_conflicts {
            let state = self.docs.get(id)?;
            conflicts = state
                .leaves
                .iter()
                .filter(|(rev, document)| !document.deleted && *rev != revision)
                .map(|(rev, _)| rev.clone())
                .collect();
            conflicts.sort_by(|a, b| rev_order(b, a));
        }

        Some(FetchedDocument {
            document: document.clone(),
            revision: revision.clone(),
            conflicts,
        })
    }

    fn validate_put(&self, id: &str, expected: Option<&str>) -> Result<()> {
        let state = self.docs.get(id);
        match expected {
            None => {
                // A fresh create requires a clean identity. Tombstones
                // count: resurrecting one goes through its revision.
                if state.map(|s| !s.leaves.is_empty()).unwrap_or(false) {
                    return Err(Error::Conflict(id.to_string()));
                }
            }
            Some(revision) => {
                let Some(state) = state else {
                    return Err(Error::NotFound(id.to_string()));
                };
                if !state.leaves.contains_key(revision) {
                    return Err(Error::Conflict(id.to_string()));
                }
            }
        }
        Ok(())
    }

    /// Replace the expected leaf with a new one. Callers validate first.
    fn apply_put(&mut self, id: &str, expected: Option<&str>, document: &Document) -> RevisionId {
        let state = self.docs.entry(id.to_string()).or_default();
        let next_generation = expected.map(|rev| generation(rev) + 1).unwrap_or(1);
        let revision = mint_revision(next_generation);

        if let Some(rev) = expected {
            state.leaves.remove(rev);
        }
        state.leaves.insert(revision.clone(), document.clone());
        revision
    }

    /// Replace a leaf with its tombstone. Callers validate first.
    fn apply_delete(&mut self, id: &str, revision: &str) -> Result<RevisionId> {
        let state = self
            .docs
            .get_mut(id)
            .ok_or_else(|| Error::Conflict(id.to_string()))?;
        let mut document = state
            .leaves
            .remove(revision)
            .ok_or_else(|| Error::Conflict(id.to_string()))?;
        document.deleted = true;

        let tombstone = mint_revision(generation(revision) + 1);
        state.leaves.insert(tombstone.clone(), document);
        Ok(tombstone)
    }

    fn record_change(&mut self, id: &str, revisions: Vec<RevisionId>) -> u64 {
        self.sequence += 1;
        let deleted = self.winner(id).is_none();
        self.log.push(LogEntry {
            sequence: self.sequence,
            id: id.to_string(),
            deleted,
            revisions,
        });
        self.sequence
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, id: &str) -> Result<Option<FetchedDocument>> {
        let inner = self.inner.lock().await;
        Ok(inner.fetch(id, false))
    }

    async fn get_with_conflicts(&self, id: &str) -> Result<Option<FetchedDocument>> {
        let inner = self.inner.lock().await;
        Ok(inner.fetch(id, true))
    }

    async fn get_revision(&self, id: &str, revision: &str) -> Result<Option<Document>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .docs
            .get(id)
            .and_then(|state| state.leaves.get(revision))
            .cloned())
    }

    async fn put(
        &self,
        id: &str,
        expected: Option<&str>,
        document: &Document,
    ) -> Result<RevisionId> {
        let (revision, sequence) = {
            let mut inner = self.inner.lock().await;
            inner.validate_put(id, expected)?;
            let revision = inner.apply_put(id, expected, document);
            let sequence = inner.record_change(id, vec![revision.clone()]);
            (revision, sequence)
        };
        self.notify.send_replace(sequence);
        Ok(revision)
    }

    async fn bulk(&self, ops: Vec<BulkOp>) -> Result<Vec<RevisionId>> {
        if ops.is_empty() {
            return Ok(Vec::new());
        }

        let mut revisions = Vec::with_capacity(ops.len());
        let last_sequence = {
            let mut inner = self.inner.lock().await;

            // Operations validate and apply against a scratch copy, so
            // a rejected batch leaves the store untouched even when the
            // operations conflict with each other.
            let mut scratch = Inner {
                docs: inner.docs.clone(),
                log: Vec::new(),
                sequence: inner.sequence,
            };

            for op in &ops {
                match op {
                    BulkOp::Put { document, revision } => {
                        scratch.validate_put(&document.id, revision.as_deref())?;
                        let rev = scratch.apply_put(&document.id, revision.as_deref(), document);
                        scratch.record_change(&document.id, vec![rev.clone()]);
                        revisions.push(rev);
                    }
                    BulkOp::Delete { id, revision } => {
                        let rev = scratch.apply_delete(id, revision)?;
                        scratch.record_change(id, vec![rev.clone()]);
                        revisions.push(rev);
                    }
                }
            }

            inner.docs = scratch.docs;
            inner.log.append(&mut scratch.log);
            inner.sequence = scratch.sequence;
            inner.sequence
        };

        self.notify.send_replace(last_sequence);
        Ok(revisions)
    }

    async fn changes(
        &self,
        since: Option<Checkpoint>,
        _heartbeat: Duration,
    ) -> Result<ChangeStream> {
        let cursor = match since {
            Some(token) => token
                .parse::<u64>()
                .map_err(|_| Error::Protocol(format!("invalid checkpoint: {token}")))?,
            None => 0,
        };

        let inner = Arc::clone(&self.inner);
        let receiver = self.notify.subscribe();

        let stream = futures::stream::unfold(
            (inner, receiver, cursor),
            |(inner, mut receiver, cursor)| async move {
                loop {
                    let next = {
                        let guard = inner.lock().await;
                        let index = guard.log.partition_point(|entry| entry.sequence <= cursor);
                        guard.log.get(index).cloned()
                    };

                    if let Some(entry) = next {
                        let record = ChangeRecord {
                            sequence: entry.sequence.to_string(),
                            id: entry.id,
                            deleted: entry.deleted,
                            revisions_changed: entry.revisions,
                        };
                        let cursor = entry.sequence;
                        return Some((Ok(record), (inner, receiver, cursor)));
                    }

                    // Nothing new yet. Wait for a write, then rescan.
                    if receiver.changed().await.is_err() {
                        return None;
                    }
                }
            },
        );

        Ok(stream.boxed())
    }
}

fn generation(revision: &str) -> u64 {
    revision
        .split_once('-')
        .and_then(|(gen, _)| gen.parse().ok())
        .unwrap_or(0)
}

fn rev_order(a: &str, b: &str) -> Ordering {
    generation(a).cmp(&generation(b)).then_with(|| a.cmp(b))
}

fn mint_revision(generation: u64) -> RevisionId {
    format!("{generation}-{}", Uuid::new_v4().simple())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use serde_json::json;

    fn at(millis: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(millis).unwrap()
    }

    fn doc(id: &str, title: &str) -> Document {
        Document::new(
            id,
            "task",
            json!({"id": id, "title": title}),
            "side-a",
            at(1_000),
        )
    }

    #[tokio::test]
    async fn create_then_get() {
        let store = MemoryStore::new();
        let revision = store.put("task-1", None, &doc("task-1", "first")).await.unwrap();
        assert!(revision.starts_with("1-"));

        let fetched = store.get("task-1").await.unwrap().unwrap();
        assert_eq!(fetched.revision, revision);
        assert_eq!(fetched.document.entity["title"], "first");
        assert!(fetched.conflicts.is_empty());
    }

    #[tokio::test]
    async fn create_conflicts_when_identity_taken() {
        let store = MemoryStore::new();
        store.put("task-1", None, &doc("task-1", "first")).await.unwrap();

        let err = store
            .put("task-1", None, &doc("task-1", "second"))
            .await
            .unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn conditional_put_replaces_winner() {
        let store = MemoryStore::new();
        let r1 = store.put("task-1", None, &doc("task-1", "first")).await.unwrap();
        let r2 = store
            .put("task-1", Some(&r1), &doc("task-1", "second"))
            .await
            .unwrap();
        assert!(r2.starts_with("2-"));

        let fetched = store.get("task-1").await.unwrap().unwrap();
        assert_eq!(fetched.document.entity["title"], "second");

        // The replaced revision is gone.
        assert!(store.get_revision("task-1", &r1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn stale_revision_conflicts() {
        let store = MemoryStore::new();
        let r1 = store.put("task-1", None, &doc("task-1", "first")).await.unwrap();
        store
            .put("task-1", Some(&r1), &doc("task-1", "second"))
            .await
            .unwrap();

        let err = store
            .put("task-1", Some(&r1), &doc("task-1", "third"))
            .await
            .unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn tombstone_hides_document() {
        let store = MemoryStore::new();
        let r1 = store.put("task-1", None, &doc("task-1", "first")).await.unwrap();

        let mut tombstone = doc("task-1", "first");
        tombstone.deleted = true;
        let r2 = store.put("task-1", Some(&r1), &tombstone).await.unwrap();

        assert!(store.get("task-1").await.unwrap().is_none());

        // The tombstone leaf itself is still addressable.
        let leaf = store.get_revision("task-1", &r2).await.unwrap().unwrap();
        assert!(leaf.deleted);

        // The identity is not clean: fresh creates still conflict.
        let err = store
            .put("task-1", None, &doc("task-1", "again"))
            .await
            .unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn replicated_leaf_becomes_sibling() {
        let store = MemoryStore::new();
        store.put("task-1", None, &doc("task-1", "mine")).await.unwrap();
        store
            .replicate_existing(doc("task-1", "theirs"), "1-zzzzzzzz")
            .await;

        let fetched = store.get_with_conflicts("task-1").await.unwrap().unwrap();
        assert_eq!(fetched.conflicts.len(), 1);

        // Plain reads never report conflicts.
        let fetched = store.get("task-1").await.unwrap().unwrap();
        assert!(fetched.conflicts.is_empty());
    }

    #[tokio::test]
    async fn replicate_existing_is_idempotent() {
        let store = MemoryStore::new();
        store
            .replicate_existing(doc("task-1", "theirs"), "1-zzzzzzzz")
            .await;
        store
            .replicate_existing(doc("task-1", "theirs"), "1-zzzzzzzz")
            .await;

        let fetched = store.get_with_conflicts("task-1").await.unwrap().unwrap();
        assert!(fetched.conflicts.is_empty());
    }

    #[tokio::test]
    async fn bulk_applies_all_or_nothing() {
        let store = MemoryStore::new();
        let r1 = store.put("task-1", None, &doc("task-1", "mine")).await.unwrap();
        store
            .replicate_existing(doc("task-1", "theirs"), "1-zzzzzzzz")
            .await;

        // One op conditioned on a stale revision rejects the whole batch.
        let err = store
            .bulk(vec![
                BulkOp::Put {
                    document: doc("task-1", "merged"),
                    revision: Some(r1.clone()),
                },
                BulkOp::Delete {
                    id: "task-1".to_string(),
                    revision: "1-missing".to_string(),
                },
            ])
            .await
            .unwrap_err();
        assert!(err.is_conflict());

        // The store is untouched by the rejected batch.
        let fetched = store.get_with_conflicts("task-1").await.unwrap().unwrap();
        assert_eq!(fetched.conflicts.len(), 1);

        // A consistent batch collapses the siblings.
        let loser_revision = fetched.conflicts[0].clone();
        let revisions = store
            .bulk(vec![
                BulkOp::Put {
                    document: doc("task-1", "merged"),
                    revision: Some(fetched.revision.clone()),
                },
                BulkOp::Delete {
                    id: "task-1".to_string(),
                    revision: loser_revision,
                },
            ])
            .await
            .unwrap();
        assert_eq!(revisions.len(), 2);

        let fetched = store.get_with_conflicts("task-1").await.unwrap().unwrap();
        assert!(fetched.conflicts.is_empty());
        assert_eq!(fetched.document.entity["title"], "merged");
    }

    #[tokio::test]
    async fn bulk_rejects_a_batch_that_conflicts_with_itself() {
        let store = MemoryStore::new();
        let r1 = store.put("task-1", None, &doc("task-1", "mine")).await.unwrap();

        // Each op is valid on its own; the second delete targets the
        // leaf the first one already consumed.
        let err = store
            .bulk(vec![
                BulkOp::Put {
                    document: doc("task-2", "new"),
                    revision: None,
                },
                BulkOp::Delete {
                    id: "task-1".to_string(),
                    revision: r1.clone(),
                },
                BulkOp::Delete {
                    id: "task-1".to_string(),
                    revision: r1.clone(),
                },
            ])
            .await
            .unwrap_err();
        assert!(err.is_conflict());

        // Nothing from the rejected batch is visible.
        assert!(store.get("task-2").await.unwrap().is_none());
        let fetched = store.get("task-1").await.unwrap().unwrap();
        assert_eq!(fetched.revision, r1);

        // The change log is clean too: the next write follows the seed
        // directly, with no phantom entries in between.
        store.put("task-3", None, &doc("task-3", "later")).await.unwrap();
        let mut feed = store.changes(None, Duration::from_secs(1)).await.unwrap();
        let first = feed.next().await.unwrap().unwrap();
        assert_eq!(first.sequence, "1");
        assert_eq!(first.id, "task-1");
        let second = feed.next().await.unwrap().unwrap();
        assert_eq!(second.sequence, "2");
        assert_eq!(second.id, "task-3");
    }

    #[tokio::test]
    async fn changes_replays_then_tails() {
        let store = MemoryStore::new();
        store.put("task-1", None, &doc("task-1", "a")).await.unwrap();
        store.put("task-2", None, &doc("task-2", "b")).await.unwrap();

        let mut feed = store.changes(None, Duration::from_secs(1)).await.unwrap();

        let first = feed.next().await.unwrap().unwrap();
        assert_eq!(first.sequence, "1");
        assert_eq!(first.id, "task-1");
        assert!(!first.deleted);
        assert_eq!(first.revisions_changed.len(), 1);

        let second = feed.next().await.unwrap().unwrap();
        assert_eq!(second.id, "task-2");

        // New writes show up on the live tail.
        store.put("task-3", None, &doc("task-3", "c")).await.unwrap();
        let third = feed.next().await.unwrap().unwrap();
        assert_eq!(third.id, "task-3");
    }

    #[tokio::test]
    async fn changes_since_skips_consumed_prefix() {
        let store = MemoryStore::new();
        store.put("task-1", None, &doc("task-1", "a")).await.unwrap();
        store.put("task-2", None, &doc("task-2", "b")).await.unwrap();

        let mut feed = store
            .changes(Some("1".to_string()), Duration::from_secs(1))
            .await
            .unwrap();
        let record = feed.next().await.unwrap().unwrap();
        assert_eq!(record.id, "task-2");
    }

    #[tokio::test]
    async fn changes_marks_deletions() {
        let store = MemoryStore::new();
        let r1 = store.put("task-1", None, &doc("task-1", "a")).await.unwrap();

        let mut tombstone = doc("task-1", "a");
        tombstone.deleted = true;
        store.put("task-1", Some(&r1), &tombstone).await.unwrap();

        let mut feed = store.changes(None, Duration::from_secs(1)).await.unwrap();
        let create = feed.next().await.unwrap().unwrap();
        assert!(!create.deleted);
        let delete = feed.next().await.unwrap().unwrap();
        assert!(delete.deleted);
    }

    #[tokio::test]
    async fn invalid_checkpoint_rejected() {
        let store = MemoryStore::new();
        let err = store
            .changes(Some("not-a-number".to_string()), Duration::from_secs(1))
            .await
            .map(|_| ())
            .unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[test]
    fn revision_ordering() {
        assert_eq!(rev_order("2-aaa", "1-zzz"), Ordering::Greater);
        assert_eq!(rev_order("1-aaa", "1-zzz"), Ordering::Less);
        assert_eq!(rev_order("10-aaa", "9-zzz"), Ordering::Greater);
        assert_eq!(generation("3-abc"), 3);
        assert_eq!(generation("garbage"), 0);
    }
}

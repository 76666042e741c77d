//! Conflict resolution: collapse sibling revisions into one winner.
//!
//! Divergent replicas leave a document with several leaf revisions. The
//! resolver fetches all of them, merges the siblings onto the current
//! winner, and commits the result atomically: one write replacing the
//! winner plus one tombstone per sibling, all in a single batch. If a
//! concurrent writer slips a new sibling in between the read and the
//! batch, the whole batch is rejected and resolution starts over from a
//! fresh read.

use std::sync::Arc;

use converge_engine::{MergeAlgorithm, Version};

use crate::config::RetryPolicy;
use crate::error::{Error, Result};
use crate::store::{BulkOp, DocumentStore};

/// Resolves conflicted documents with a caller-supplied merge.
pub struct Resolver {
    store: Arc<dyn DocumentStore>,
    retry: RetryPolicy,
}

impl Resolver {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            store,
            retry: RetryPolicy::default(),
        }
    }

    /// Override the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Resolve the document behind `version`.
    pub async fn resolve(&self, version: &Version, merge: &dyn MergeAlgorithm) -> Result<Version> {
        self.resolve_by_id(&version.id, merge).await
    }

    /// Resolve a document by identity.
    ///
    /// Returns the stored version left behind: the merge result when
    /// siblings existed, or the current version untouched when the
    /// document was already clean.
    pub async fn resolve_by_id(&self, id: &str, merge: &dyn MergeAlgorithm) -> Result<Version> {
        let mut attempt = 0u32;

        'restart: loop {
            attempt += 1;
            if attempt > self.retry.max_attempts {
                return Err(Error::RetriesExhausted {
                    id: id.to_string(),
                    attempts: self.retry.max_attempts,
                });
            }

            let fetched = self
                .store
                .get_with_conflicts(id)
                .await?
                .ok_or_else(|| Error::NotFound(id.to_string()))?;
            if fetched.conflicts.is_empty() {
                return Ok(Version::stored(fetched.document, fetched.revision));
            }

            let sibling_revisions = fetched.conflicts.clone();
            let current_revision = fetched.revision.clone();
            let current = Version::stored(fetched.document, fetched.revision);

            let mut siblings = Vec::with_capacity(sibling_revisions.len());
            for revision in &sibling_revisions {
                match self.store.get_revision(id, revision).await? {
                    Some(document) => siblings.push(Version::stored(document, revision.clone())),
                    None => {
                        // Someone else resolved this sibling already.
                        // The read set is stale, start over.
                        tokio::time::sleep(self.retry.delay(attempt)).await;
                        continue 'restart;
                    }
                }
            }

            // Merge failures are bugs in the caller's algorithm, never
            // something a retry can fix.
            let winner = merge.merge(&current, &siblings)?.into_candidate();

            let mut ops = Vec::with_capacity(sibling_revisions.len() + 1);
            ops.push(BulkOp::Put {
                document: winner.to_document(),
                revision: Some(current_revision),
            });
            for revision in sibling_revisions {
                ops.push(BulkOp::Delete {
                    id: id.to_string(),
                    revision,
                });
            }
            let sibling_count = ops.len() - 1;

            match self.store.bulk(ops).await {
                Ok(revisions) => {
                    tracing::info!(id = %id, siblings = sibling_count, "conflicts resolved");
                    let revision = revisions.into_iter().next().ok_or_else(|| {
                        Error::Protocol("bulk commit returned no revisions".to_string())
                    })?;
                    return Ok(winner.persisted(revision));
                }
                Err(error) if error.is_conflict() => {
                    tracing::debug!(id = %id, attempt, "resolution raced a concurrent write");
                    tokio::time::sleep(self.retry.delay(attempt)).await;
                }
                Err(error) => return Err(error),
            }
        }
    }
}

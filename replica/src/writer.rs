//! Write path: optimistic creates, merged updates, and deletes.
//!
//! Every write is conditioned on the revision the writer last observed.
//! Losing a race is expected in a multi-master topology, so the writer
//! absorbs conflicts: creates report them as an outcome, updates merge
//! and retry, deletes re-read and retry.

use std::slice;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use converge_engine::{Entity, MergeAlgorithm, Version};

use crate::config::RetryPolicy;
use crate::error::{Error, Result};
use crate::store::DocumentStore;

/// Outcome of a create attempt.
#[derive(Debug)]
pub enum CreateOutcome {
    /// The document was created; this is its stored version.
    Created(Version),
    /// Another writer got there first. Carries the winning version
    /// when the store still holds a live one.
    Conflict(Option<Version>),
}

/// Writes documents with optimistic concurrency control.
pub struct Writer {
    store: Arc<dyn DocumentStore>,
    side: String,
    retry: RetryPolicy,
}

impl Writer {
    pub fn new(store: Arc<dyn DocumentStore>, side: impl Into<String>) -> Self {
        Self {
            store,
            side: side.into(),
            retry: RetryPolicy::default(),
        }
    }

    /// Override the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Create a document that must not already exist.
    ///
    /// A lost creation race is not an error: the losing writer gets
    /// [`CreateOutcome::Conflict`] carrying whatever version won.
    pub async fn try_create<T: Entity>(
        &self,
        entity: &T,
        modified: DateTime<Utc>,
    ) -> Result<CreateOutcome> {
        let candidate = Version::candidate(entity, &self.side, modified)?;

        match self
            .store
            .put(&candidate.id, None, &candidate.to_document())
            .await
        {
            Ok(revision) => {
                tracing::debug!(id = %candidate.id, revision = %revision, "document created");
                Ok(CreateOutcome::Created(candidate.persisted(revision)))
            }
            Err(error) if error.is_conflict() => {
                let current = self
                    .store
                    .get(&candidate.id)
                    .await?
                    .map(|fetched| Version::stored(fetched.document, fetched.revision));
                tracing::debug!(id = %candidate.id, "create lost the race");
                Ok(CreateOutcome::Conflict(current))
            }
            Err(error) => Err(error),
        }
    }

    /// Update a document the caller last saw at `known_revision`.
    ///
    /// When the store has moved past that revision, the incoming change
    /// is merged onto the latest version instead of overwriting it, and
    /// the write retries until it lands or the attempt budget runs out.
    pub async fn update<T: Entity>(
        &self,
        entity: &T,
        known_revision: &str,
        modified: DateTime<Utc>,
        merge: &dyn MergeAlgorithm,
    ) -> Result<Version> {
        let base = Version::candidate(entity, &self.side, modified)?;
        let mut merged = false;
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            if attempt > self.retry.max_attempts {
                return Err(Error::RetriesExhausted {
                    id: base.id.clone(),
                    attempts: self.retry.max_attempts,
                });
            }

            let fetched = self
                .store
                .get(&base.id)
                .await?
                .ok_or_else(|| Error::NotFound(base.id.clone()))?;
            let latest = Version::stored(fetched.document, fetched.revision);

            // Writing back what is already stored is a no-op, but only
            // while the change is untouched by merging.
            if !merged && latest.entity == base.entity {
                return Ok(latest);
            }

            let mut winner = base.clone();
            if merged || latest.revision.as_deref() != Some(known_revision) {
                winner = merge.merge(&latest, slice::from_ref(&base))?.into_candidate();
                merged = true;
            }

            match self
                .store
                .put(&base.id, latest.revision.as_deref(), &winner.to_document())
                .await
            {
                Ok(revision) => {
                    tracing::debug!(id = %base.id, revision = %revision, merged, "document updated");
                    return Ok(winner.persisted(revision));
                }
                Err(error) if error.is_conflict() => {
                    tracing::debug!(id = %base.id, attempt, "update raced a concurrent write");
                    tokio::time::sleep(self.retry.delay(attempt)).await;
                }
                Err(error) => return Err(error),
            }
        }
    }

    /// Delete a document, retrying around concurrent writes.
    ///
    /// Deleting an absent document succeeds: the goal state is already
    /// reached.
    pub async fn delete(&self, id: &str) -> Result<()> {
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            if attempt > self.retry.max_attempts {
                return Err(Error::RetriesExhausted {
                    id: id.to_string(),
                    attempts: self.retry.max_attempts,
                });
            }

            let Some(fetched) = self.store.get(id).await? else {
                return Ok(());
            };
            let revision = fetched.revision.clone();
            let tombstone =
                Version::stored(fetched.document, revision.clone()).tombstone(&self.side, Utc::now());

            match self
                .store
                .put(id, Some(&revision), &tombstone.to_document())
                .await
            {
                Ok(revision) => {
                    tracing::debug!(id = %id, revision = %revision, "document deleted");
                    return Ok(());
                }
                Err(error) if error.is_conflict() => {
                    tracing::debug!(id = %id, attempt, "delete raced a concurrent write");
                    tokio::time::sleep(self.retry.delay(attempt)).await;
                }
                Err(error) if error.is_not_found() => return Ok(()),
                Err(error) => return Err(error),
            }
        }
    }
}

//! Version model: an immutable snapshot of an entity and its store state.

use crate::{document::Document, error::Result, EntityId, KindTag, RevisionId, SideId};
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

/// Contract implemented by application entity types.
///
/// The engine never interprets entity fields; this trait only exposes the
/// stable identity and the kind tag stored alongside the payload.
pub trait Entity: Serialize + DeserializeOwned + 'static {
    /// Kind tag stored in the document for polymorphic decode.
    const KIND: &'static str;

    /// Stable, globally unique identity.
    fn identity(&self) -> &str;
}

/// A snapshot of an entity plus its store revision and write metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Version {
    /// Entity identity (document id)
    pub id: EntityId,
    /// Kind tag for polymorphic decode
    pub kind: KindTag,
    /// The serialized entity payload (JSON value)
    pub entity: serde_json::Value,
    /// Store-assigned revision token; `None` until the store accepts the write
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revision: Option<RevisionId>,
    /// Side that produced this version
    pub side: SideId,
    /// When the version was written
    pub modified: DateTime<Utc>,
    /// Tombstone flag
    #[serde(default)]
    pub deleted: bool,
    /// True only for a candidate winner built in memory and not yet
    /// accepted by the store; never true for a version read back
    #[serde(skip)]
    pub is_new: bool,
}

impl Version {
    /// Build a candidate winner from a typed entity, not yet persisted.
    pub fn candidate<T: Entity>(
        entity: &T,
        side: impl Into<SideId>,
        modified: DateTime<Utc>,
    ) -> Result<Self> {
        let payload = serde_json::to_value(entity)?;
        Ok(Self::candidate_value(
            entity.identity(),
            T::KIND,
            payload,
            side,
            modified,
        ))
    }

    /// Build a candidate winner from an already-serialized payload.
    pub fn candidate_value(
        id: impl Into<EntityId>,
        kind: impl Into<KindTag>,
        entity: serde_json::Value,
        side: impl Into<SideId>,
        modified: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            entity,
            revision: None,
            side: side.into(),
            modified,
            deleted: false,
            is_new: true,
        }
    }

    /// Reconstruct a version read back from the store.
    pub fn stored(document: Document, revision: impl Into<RevisionId>) -> Self {
        Self {
            id: document.id,
            kind: document.kind,
            entity: document.entity,
            revision: Some(revision.into()),
            side: document.side,
            modified: document.modified,
            deleted: document.deleted,
            is_new: false,
        }
    }

    /// The store-level representation of this version.
    pub fn to_document(&self) -> Document {
        Document {
            id: self.id.clone(),
            kind: self.kind.clone(),
            entity: self.entity.clone(),
            side: self.side.clone(),
            modified: self.modified,
            deleted: self.deleted,
        }
    }

    /// Decode the payload into a concrete entity type.
    pub fn entity_as<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.entity.clone())?)
    }

    /// Candidate tombstone derived from this version (payload retained).
    pub fn tombstone(&self, side: impl Into<SideId>, modified: DateTime<Utc>) -> Self {
        Self {
            id: self.id.clone(),
            kind: self.kind.clone(),
            entity: self.entity.clone(),
            revision: None,
            side: side.into(),
            modified,
            deleted: true,
            is_new: true,
        }
    }

    /// Recast as an in-memory candidate (revision cleared, `is_new` set).
    pub fn into_candidate(mut self) -> Self {
        self.revision = None;
        self.is_new = true;
        self
    }

    /// Recast as persisted with the revision the store assigned.
    pub fn persisted(mut self, revision: impl Into<RevisionId>) -> Self {
        self.revision = Some(revision.into());
        self.is_new = false;
        self
    }

    /// Check if the version is active (not a tombstone).
    pub fn is_active(&self) -> bool {
        !self.deleted
    }
}

/// A version whose payload has been decoded to a concrete entity type.
#[derive(Debug, Clone, PartialEq)]
pub struct TypedVersion<T> {
    /// The decoded entity
    pub entity: T,
    /// Store-assigned revision token
    pub revision: Option<RevisionId>,
    /// Side that produced this version
    pub side: SideId,
    /// When the version was written
    pub modified: DateTime<Utc>,
    /// Tombstone flag
    pub deleted: bool,
    /// Candidate-winner flag, mirrors [`Version::is_new`]
    pub is_new: bool,
}

impl<T: Entity> TypedVersion<T> {
    /// Decode an untyped version.
    pub fn from_version(version: &Version) -> Result<Self> {
        Ok(Self {
            entity: version.entity_as()?,
            revision: version.revision.clone(),
            side: version.side.clone(),
            modified: version.modified,
            deleted: version.deleted,
            is_new: version.is_new,
        })
    }

    /// Serialize back into an untyped version.
    pub fn into_version(self) -> Result<Version> {
        let id = self.entity.identity().to_string();
        let entity = serde_json::to_value(&self.entity)?;
        Ok(Version {
            id,
            kind: T::KIND.into(),
            entity,
            revision: self.revision,
            side: self.side,
            modified: self.modified,
            deleted: self.deleted,
            is_new: self.is_new,
        })
    }
}

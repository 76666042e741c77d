//! Read access to the winning state of documents.

use std::sync::Arc;

use converge_engine::{Entity, TypedVersion, Version};

use crate::error::{Error, Result};
use crate::store::DocumentStore;

/// Reads the winning version of documents from a store.
#[derive(Clone)]
pub struct Reader {
    store: Arc<dyn DocumentStore>,
}

impl Reader {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Fetch the winning version of a document.
    ///
    /// Tombstoned documents read as absent and yield `NotFound`.
    pub async fn read(&self, id: &str) -> Result<Version> {
        let fetched = self
            .store
            .get(id)
            .await?
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        Ok(Version::stored(fetched.document, fetched.revision))
    }

    /// Fetch the winning version decoded into a concrete entity type.
    pub async fn read_as<T: Entity>(&self, id: &str) -> Result<TypedVersion<T>> {
        let version = self.read(id).await?;
        Ok(TypedVersion::from_version(&version)?)
    }

    /// Fetch one specific revision of a document.
    pub async fn read_revision(&self, id: &str, revision: &str) -> Result<Version> {
        let document = self
            .store
            .get_revision(id, revision)
            .await?
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        Ok(Version::stored(document, revision))
    }
}

//! Kind-tag registry for polymorphic payload decoding.
//!
//! One store holds many entity kinds in the same keyspace, so stored documents
//! carry a `kind` tag. The registry maps that tag back to a decode function,
//! letting a generic payload be checked and rebuilt without any runtime type
//! scanning. Decoders are registered explicitly at startup.

use crate::{error::Result, Entity, Error, KindTag};
use std::collections::HashMap;
use std::sync::Arc;

/// Decode function stored per kind tag.
///
/// Takes the raw stored payload and returns the checked, normalized payload.
pub type DecodeFn = Arc<dyn Fn(&serde_json::Value) -> Result<serde_json::Value> + Send + Sync>;

/// Registry mapping kind tags to payload decoders.
#[derive(Clone, Default)]
pub struct TypeRegistry {
    decoders: HashMap<KindTag, DecodeFn>,
}

impl TypeRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an entity type under its kind tag.
    ///
    /// The derived decoder parses the payload as `T` and re-serializes it,
    /// rejecting payloads that do not match the entity shape.
    pub fn register<T: Entity>(&mut self) -> &mut Self {
        let decoder: DecodeFn = Arc::new(|payload| {
            let entity: T = serde_json::from_value(payload.clone())
                .map_err(|e| Error::decode(T::KIND, e.to_string()))?;
            Ok(serde_json::to_value(&entity)?)
        });
        self.decoders.insert(T::KIND.into(), decoder);
        self
    }

    /// Register a custom decode function for a kind tag.
    pub fn register_with<F>(&mut self, kind: impl Into<KindTag>, decoder: F) -> &mut Self
    where
        F: Fn(&serde_json::Value) -> Result<serde_json::Value> + Send + Sync + 'static,
    {
        self.decoders.insert(kind.into(), Arc::new(decoder));
        self
    }

    /// Builder-style method to register an entity type.
    pub fn with_kind<T: Entity>(mut self) -> Self {
        self.register::<T>();
        self
    }

    /// Get the decoder for a kind tag.
    pub fn get(&self, kind: &str) -> Result<DecodeFn> {
        self.decoders
            .get(kind)
            .cloned()
            .ok_or_else(|| Error::UnknownKind(kind.into()))
    }

    /// Decode a stored payload for the given kind tag.
    pub fn decode(&self, kind: &str, payload: &serde_json::Value) -> Result<serde_json::Value> {
        self.get(kind)?(payload)
    }

    /// Check whether a kind tag is registered.
    pub fn contains(&self, kind: &str) -> bool {
        self.decoders.contains_key(kind)
    }

    /// Registered kind tags, in no particular order.
    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.decoders.keys().map(String::as_str)
    }
}

impl std::fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypeRegistry")
            .field("kinds", &self.decoders.keys().collect::<Vec<_>>())
            .finish()
    }
}

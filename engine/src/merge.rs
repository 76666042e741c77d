//! Merge contracts and baseline strategies.
//!
//! The engine never merges entities itself. A [`MergeAlgorithm`] is supplied
//! by the application and invoked with the latest version plus every
//! conflicting sibling, never a subset. Restarted resolution passes may call
//! the same algorithm again with a changed sibling set, so implementations
//! must be deterministic and order-insensitive for convergence to hold. The
//! two strategies shipped here satisfy both requirements.

use crate::{error::Result, Entity, TypedVersion, Version};
use std::cmp::Ordering;
use std::marker::PhantomData;

/// Caller-supplied conflict merge.
pub trait MergeAlgorithm: Send + Sync {
    /// Collapse `latest` and all conflicting siblings into a single winner.
    ///
    /// The returned version is treated as an in-memory candidate; its
    /// revision and `is_new` flag are reset by the caller before writing.
    fn merge(&self, latest: &Version, conflicts: &[Version]) -> Result<Version>;
}

/// Adapter exposing the typed merge contract over a concrete entity type.
pub struct TypedMerge<T, F> {
    merge_fn: F,
    _entity: PhantomData<fn() -> T>,
}

impl<T, F> TypedMerge<T, F>
where
    T: Entity,
    F: Fn(TypedVersion<T>, Vec<TypedVersion<T>>) -> Result<TypedVersion<T>> + Send + Sync,
{
    /// Wrap a typed merge function.
    pub fn new(merge_fn: F) -> Self {
        Self {
            merge_fn,
            _entity: PhantomData,
        }
    }
}

impl<T, F> MergeAlgorithm for TypedMerge<T, F>
where
    T: Entity,
    F: Fn(TypedVersion<T>, Vec<TypedVersion<T>>) -> Result<TypedVersion<T>> + Send + Sync,
{
    fn merge(&self, latest: &Version, conflicts: &[Version]) -> Result<Version> {
        let latest = TypedVersion::from_version(latest)?;
        let conflicts = conflicts
            .iter()
            .map(TypedVersion::from_version)
            .collect::<Result<Vec<_>>>()?;
        (self.merge_fn)(latest, conflicts)?.into_version()
    }
}

/// Deterministic total order over concurrent writes: greater is newer.
///
/// Ordered by `modified`, ties broken by side name, then revision.
fn write_order(a: &Version, b: &Version) -> Ordering {
    a.modified
        .cmp(&b.modified)
        .then_with(|| a.side.cmp(&b.side))
        .then_with(|| a.revision.cmp(&b.revision))
}

/// Newest write wins wholesale.
#[derive(Debug, Clone, Copy, Default)]
pub struct LastWriteWins;

impl MergeAlgorithm for LastWriteWins {
    fn merge(&self, latest: &Version, conflicts: &[Version]) -> Result<Version> {
        let winner = conflicts
            .iter()
            .fold(latest, |winner, candidate| {
                match write_order(candidate, winner) {
                    Ordering::Greater => candidate,
                    _ => winner,
                }
            });
        Ok(winner.clone().into_candidate())
    }
}

/// Field-level union over object payloads; the newest write wins per field.
///
/// Non-object payloads fall back to [`LastWriteWins`] semantics.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShallowMerge;

impl MergeAlgorithm for ShallowMerge {
    fn merge(&self, latest: &Version, conflicts: &[Version]) -> Result<Version> {
        // Sort oldest first so folding lets newer fields overwrite older ones
        let mut ordered: Vec<&Version> = Vec::with_capacity(conflicts.len() + 1);
        ordered.push(latest);
        ordered.extend(conflicts.iter());
        ordered.sort_by(|a, b| write_order(a, b));

        let newest = ordered.last().copied().unwrap_or(latest);
        let merged = ordered
            .iter()
            .map(|v| &v.entity)
            .fold(serde_json::Value::Null, |acc, entity| {
                union_fields(&acc, entity)
            });

        let mut winner = newest.clone().into_candidate();
        winner.entity = merged;
        Ok(winner)
    }
}

/// Object union: fields of `overlay` win over fields of `base`.
///
/// Anything that is not a pair of objects resolves to `overlay`.
fn union_fields(base: &serde_json::Value, overlay: &serde_json::Value) -> serde_json::Value {
    match (base, overlay) {
        (serde_json::Value::Object(base), serde_json::Value::Object(overlay)) => {
            let mut merged = base.clone();
            for (key, value) in overlay {
                merged.insert(key.clone(), value.clone());
            }
            serde_json::Value::Object(merged)
        }
        _ => overlay.clone(),
    }
}

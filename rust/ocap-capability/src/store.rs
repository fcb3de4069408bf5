//! Storage contracts for capabilities and references.
//!
//! The capability model itself is synchronous; the calls below are the only
//! points where it reaches a service boundary. Implementations must make
//! them safe to retry: creating capabilities is idempotent and the
//! `(origin, receiver, target)` uniqueness of references is enforced
//! atomically with the update-in-place branch of [`ReferenceStore::upsert`].

mod volatile;
pub use volatile::*;

use async_trait::async_trait;
use uuid::Uuid;

use crate::{Agent, Capability, ConditionalSync, Reference, StoreError, Target};

/// Deduplicating capability storage, keyed by `(name, max_derive)`.
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
pub trait CapabilityStore: ConditionalSync {
    /// Return the stored capabilities matching `candidates`, creating the
    /// missing ones.
    ///
    /// The result is deduplicated and ordered by first appearance in
    /// `candidates`. Concurrent calls for the same new pair must both
    /// observe a single stored row and neither may fail on a duplicate key.
    async fn get_or_create_many(
        &self,
        candidates: &[Capability],
    ) -> Result<Vec<Capability>, StoreError>;
}

/// Filter a loaded reference for listing queries.
///
/// A stored grant whose chain no longer validates, or whose origin is gone,
/// is unreachable: listings skip it instead of failing, so one broken chain
/// can not hide a holder's other references. Backend failures still
/// propagate.
pub fn reachable<T: Target>(
    loaded: Result<Reference<T>, StoreError>,
) -> Result<Option<Reference<T>>, StoreError> {
    match loaded {
        Ok(reference) => Ok(Some(reference)),
        Err(error @ (StoreError::Invalid(_) | StoreError::NotFound(_))) => {
            tracing::warn!(kind = T::KIND, %error, "skipping unreachable reference");
            Ok(None)
        }
        Err(error) => Err(error),
    }
}

/// What to do when a derived reference already exists for the same
/// `(origin, receiver, target)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Conflict {
    /// Fail with [`StoreError::Conflict`].
    #[default]
    Reject,
    /// Replace the capabilities of the existing grant, keeping its id.
    Update,
}

/// Reference storage for one [`Target`] type.
///
/// Stores must resolve a derived reference's origin from their own records
/// before persisting it, so a caller can not smuggle in a forged parent.
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
pub trait ReferenceStore<T: Target>: ConditionalSync {
    /// Reference `public_id` held by `receiver`.
    ///
    /// Fails with [`StoreError::NotFound`] when it does not exist or is held
    /// by another agent.
    async fn find(&self, receiver: &Agent, public_id: &Uuid) -> Result<Reference<T>, StoreError>;

    /// References among `public_ids` held by `receiver`. Unknown ids and
    /// references held by other agents are skipped.
    async fn find_many(
        &self,
        receiver: &Agent,
        public_ids: &[Uuid],
    ) -> Result<Vec<Reference<T>>, StoreError>;

    /// Direct children of `origin`.
    async fn find_by_origin(&self, origin: &Reference<T>) -> Result<Vec<Reference<T>>, StoreError>;

    /// References held by `agent`.
    async fn find_by_receiver(&self, agent: &Agent) -> Result<Vec<Reference<T>>, StoreError>;

    /// References emitted by `agent`: those derived from a reference `agent`
    /// holds, plus the root references `agent` created.
    async fn find_by_emitter(&self, agent: &Agent) -> Result<Vec<Reference<T>>, StoreError>;

    /// Validate and persist `reference`.
    ///
    /// For derived references an existing grant with the same
    /// `(origin, receiver, target)` is either rejected or updated in place
    /// according to `conflict`. Root references are not subject to that
    /// rule. A duplicate `public_id` is always a conflict.
    async fn upsert(&self, reference: Reference<T>, conflict: Conflict)
    -> Result<Reference<T>, StoreError>;

    /// Validate every reference, then insert them one by one.
    async fn insert_many(
        &self,
        references: Vec<Reference<T>>,
    ) -> Result<Vec<Reference<T>>, StoreError> {
        Reference::validate_all(&references)?;

        let mut inserted = Vec::with_capacity(references.len());
        for reference in references {
            inserted.push(self.upsert(reference, Conflict::Reject).await?);
        }
        Ok(inserted)
    }
}

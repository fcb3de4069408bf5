use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use uuid::Uuid;

use crate::{
    Agent, Capability, CapabilitySet, CapabilityStore, Conflict, Origin, Reference,
    ReferenceRecord, ReferenceStore, StoreError, Target, reachable,
};

/// In-memory store for capabilities and references of every [`Target`].
///
/// Clones share the same state, so a single `Volatile` can be handed to
/// several tasks. Nothing survives the process; use it for tests and
/// short-lived sessions.
#[derive(Clone, Default)]
pub struct Volatile {
    capabilities: Arc<RwLock<HashSet<Capability>>>,
    references: Arc<RwLock<Vec<Row>>>,
}

/// Stored form of a reference. The target key is kept as JSON so one store
/// can hold every reference family side by side.
#[derive(Debug, Clone)]
struct Row {
    public_id: Uuid,
    origin: Option<Uuid>,
    depth: u32,
    receiver: Agent,
    kind: &'static str,
    target: Value,
    capabilities: CapabilitySet,
}

impl Row {
    fn origin<T: Target>(&self) -> Result<Origin<T>, StoreError> {
        Ok(Origin {
            public_id: self.public_id,
            depth: self.depth,
            receiver: self.receiver.clone(),
            target: decode::<T>(&self.target)?,
            capabilities: self.capabilities.clone(),
        })
    }
}

impl Volatile {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct stored capabilities.
    pub fn capability_count(&self) -> usize {
        self.capabilities.read().len()
    }

    /// Number of stored references, across all targets.
    pub fn reference_count(&self) -> usize {
        self.references.read().len()
    }

    fn remember(&self, capabilities: &CapabilitySet) {
        let mut stored = self.capabilities.write();
        stored.extend(capabilities.iter().cloned());
    }
}

fn decode<T: Target>(value: &Value) -> Result<T::Key, StoreError> {
    serde_json::from_value(value.clone()).map_err(|error| StoreError::Backend(error.to_string()))
}

fn not_found<T: Target>(public_id: &Uuid) -> StoreError {
    StoreError::NotFound(format!("{} reference {}", T::KIND, public_id))
}

fn find_row<'a, T: Target>(rows: &'a [Row], public_id: &Uuid) -> Option<&'a Row> {
    rows.iter()
        .find(|row| row.kind == T::KIND && row.public_id == *public_id)
}

fn load<T: Target>(rows: &[Row], row: &Row) -> Result<Reference<T>, StoreError> {
    let origin = match &row.origin {
        Some(public_id) => Some(
            find_row::<T>(rows, public_id)
                .ok_or_else(|| not_found::<T>(public_id))?
                .origin::<T>()?,
        ),
        None => None,
    };

    Ok(Reference::from_record(ReferenceRecord {
        public_id: row.public_id,
        origin,
        depth: row.depth,
        receiver: row.receiver.clone(),
        target: decode::<T>(&row.target)?,
        capabilities: row.capabilities.clone(),
    })?)
}

fn load_where<T: Target>(
    rows: &[Row],
    predicate: impl Fn(&Row) -> bool,
) -> Result<Vec<Reference<T>>, StoreError> {
    rows.iter()
        .filter(|row| row.kind == T::KIND && predicate(row))
        .filter_map(|row| reachable(load(rows, row)).transpose())
        .collect()
}

#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
impl CapabilityStore for Volatile {
    async fn get_or_create_many(
        &self,
        candidates: &[Capability],
    ) -> Result<Vec<Capability>, StoreError> {
        let mut stored = self.capabilities.write();
        let mut seen = HashSet::new();
        let mut resolved = Vec::with_capacity(candidates.len());

        for candidate in candidates {
            if !seen.insert(candidate) {
                continue;
            }
            if !stored.contains(candidate) {
                tracing::trace!(capability = %candidate, "creating capability");
                stored.insert(candidate.clone());
            }
            resolved.push(candidate.clone());
        }

        Ok(resolved)
    }
}

#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
impl<T: Target> ReferenceStore<T> for Volatile {
    async fn find(&self, receiver: &Agent, public_id: &Uuid) -> Result<Reference<T>, StoreError> {
        let rows = self.references.read();
        let row = find_row::<T>(&rows, public_id)
            .filter(|row| row.receiver == *receiver)
            .ok_or_else(|| not_found::<T>(public_id))?;
        load(&rows, row)
    }

    async fn find_many(
        &self,
        receiver: &Agent,
        public_ids: &[Uuid],
    ) -> Result<Vec<Reference<T>>, StoreError> {
        let rows = self.references.read();
        public_ids
            .iter()
            .filter_map(|public_id| find_row::<T>(&rows, public_id))
            .filter(|row| row.receiver == *receiver)
            .filter_map(|row| reachable(load(&rows, row)).transpose())
            .collect()
    }

    async fn find_by_origin(&self, origin: &Reference<T>) -> Result<Vec<Reference<T>>, StoreError> {
        let rows = self.references.read();
        let public_id = origin.public_id();
        load_where(&rows, |row| row.origin == Some(public_id))
    }

    async fn find_by_receiver(&self, agent: &Agent) -> Result<Vec<Reference<T>>, StoreError> {
        let rows = self.references.read();
        load_where(&rows, |row| row.receiver == *agent)
    }

    async fn find_by_emitter(&self, agent: &Agent) -> Result<Vec<Reference<T>>, StoreError> {
        let rows = self.references.read();
        load_where(&rows, |row| match &row.origin {
            Some(origin) => {
                find_row::<T>(&rows, origin).is_some_and(|parent| parent.receiver == *agent)
            }
            None => row.receiver == *agent,
        })
    }

    async fn upsert(
        &self,
        reference: Reference<T>,
        conflict: Conflict,
    ) -> Result<Reference<T>, StoreError> {
        let mut record = reference.into_record();
        let target = serde_json::to_value(&record.target)
            .map_err(|error| StoreError::Backend(error.to_string()))?;

        let mut rows = self.references.write();

        if let Some(public_id) = record.origin.as_ref().map(|origin| origin.public_id) {
            let parent =
                find_row::<T>(&rows, &public_id).ok_or_else(|| not_found::<T>(&public_id))?;
            record.origin = Some(parent.origin::<T>()?);
        }
        let reference = Reference::from_record(record)?;

        if let Some(origin) = reference.origin() {
            let existing = rows.iter().position(|row| {
                row.kind == T::KIND
                    && row.origin == Some(origin.public_id)
                    && row.receiver == *reference.receiver()
                    && row.target == target
            });

            if let Some(index) = existing {
                if conflict == Conflict::Reject {
                    return Err(StoreError::Conflict(format!(
                        "{} already holds a reference derived from {}",
                        reference.receiver(),
                        origin.public_id
                    )));
                }

                let public_id = rows[index].public_id;
                let stranded = reference.capabilities().stranded(
                    rows.iter()
                        .filter(|row| row.kind == T::KIND && row.origin == Some(public_id))
                        .map(|row| &row.capabilities),
                );
                if !stranded.is_empty() {
                    return Err(StoreError::Conflict(format!(
                        "updating {} would strand grants derived from it: {}",
                        public_id,
                        stranded.join(", ")
                    )));
                }

                let row = &mut rows[index];
                tracing::debug!(kind = T::KIND, public_id = %row.public_id, "updating reference");
                row.capabilities = reference.capabilities().clone();
                let updated = row.clone();

                let mut record = reference.into_record();
                record.public_id = updated.public_id;
                record.depth = updated.depth;
                let reference = Reference::from_record(record)?;

                drop(rows);
                self.remember(&updated.capabilities);
                return Ok(reference);
            }
        }

        if rows.iter().any(|row| row.public_id == reference.public_id()) {
            return Err(StoreError::Conflict(format!(
                "reference {} already exists",
                reference.public_id()
            )));
        }

        tracing::debug!(kind = T::KIND, public_id = %reference.public_id(), "storing reference");
        rows.push(Row {
            public_id: reference.public_id(),
            origin: reference.origin().map(|origin| origin.public_id),
            depth: reference.depth(),
            receiver: reference.receiver().clone(),
            kind: T::KIND,
            target,
            capabilities: reference.capabilities().clone(),
        });
        drop(rows);

        self.remember(reference.capabilities());
        Ok(reference)
    }
}

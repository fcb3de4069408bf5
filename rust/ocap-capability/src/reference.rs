//! References: capability-bearing grants from one agent to another.
//!
//! References to one object form a tree. The root is created by the
//! authority minting the grant; every other reference is derived from a
//! parent (its *origin*), one level deeper, holding an attenuation of the
//! parent's capabilities and owned by the receiving agent.
//!
//! ```text
//! root   (A, depth 0)  {read:2, write:2}
//!   └── r1 (B, depth 1)  {read:1}
//!         └── r2 (C, depth 2)  {read:0}
//! ```
//!
//! Chain invariants are checked by [`Reference::is_valid`] before anything
//! is persisted, and again by stores against their own copy of the origin.

use std::fmt::{Debug, Formatter};

use uuid::Uuid;

use crate::{
    Agent, Capability, CapabilityError, CapabilityInput, CapabilitySet, CapabilityStore,
    Conflict, PermissionDenied, ReferenceStore, Target, ValidationError,
};

/// Snapshot of the parent grant a reference was derived from.
///
/// This is a weak link: stores persist only the parent's id, and the
/// snapshot is rebuilt from the stored parent when a reference is loaded.
pub struct Origin<T: Target> {
    /// Parent's public id.
    pub public_id: Uuid,
    /// Parent's depth.
    pub depth: u32,
    /// Agent holding the parent, hence emitter of the child.
    pub receiver: Agent,
    /// Parent's target.
    pub target: T::Key,
    /// Parent's capabilities.
    pub capabilities: CapabilitySet,
}

impl<T: Target> Clone for Origin<T> {
    fn clone(&self) -> Self {
        Self {
            public_id: self.public_id,
            depth: self.depth,
            receiver: self.receiver.clone(),
            target: self.target.clone(),
            capabilities: self.capabilities.clone(),
        }
    }
}

impl<T: Target> Debug for Origin<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Origin")
            .field("public_id", &self.public_id)
            .field("depth", &self.depth)
            .field("receiver", &self.receiver)
            .field("target", &self.target)
            .field("capabilities", &self.capabilities)
            .finish()
    }
}

/// Plain-data form of a [`Reference`], used by store implementations to
/// persist and rebuild references.
pub struct ReferenceRecord<T: Target> {
    /// Externally visible identifier.
    pub public_id: Uuid,
    /// Parent grant, `None` for roots.
    pub origin: Option<Origin<T>>,
    /// Position in the chain, 0 for roots.
    pub depth: u32,
    /// Agent holding the grant.
    pub receiver: Agent,
    /// Object the grant is for.
    pub target: T::Key,
    /// Granted capabilities.
    pub capabilities: CapabilitySet,
}

/// Options for [`Reference::create_with`].
#[derive(Debug, Clone, Default)]
pub struct RootOptions {
    /// Use this public id instead of a random one.
    pub public_id: Option<Uuid>,
    /// Must be `None`: a root has no origin.
    pub origin: Option<Uuid>,
}

/// A grant of capabilities over one target object.
pub struct Reference<T: Target> {
    public_id: Uuid,
    origin: Option<Origin<T>>,
    depth: u32,
    receiver: Agent,
    target: T::Key,
    capabilities: CapabilitySet,
}

impl<T: Target> Reference<T> {
    /// Create and persist a root reference held by `emitter`.
    ///
    /// Capabilities are taken as given, with no attenuation check: the
    /// creator is the authority minting the grant. They are still resolved
    /// through the capability store before being attached.
    pub async fn create<S>(
        store: &S,
        emitter: &Agent,
        target: T::Key,
        capabilities: impl IntoIterator<Item = Capability>,
    ) -> Result<Reference<T>, CapabilityError>
    where
        S: CapabilityStore + ReferenceStore<T> + ?Sized,
    {
        Self::create_with(store, emitter, target, capabilities, RootOptions::default()).await
    }

    /// [`Reference::create`] with explicit options.
    pub async fn create_with<S>(
        store: &S,
        emitter: &Agent,
        target: T::Key,
        capabilities: impl IntoIterator<Item = Capability>,
        options: RootOptions,
    ) -> Result<Reference<T>, CapabilityError>
    where
        S: CapabilityStore + ReferenceStore<T> + ?Sized,
    {
        if options.origin.is_some() {
            return Err(ValidationError::OriginOnCreate.into());
        }

        let requested = CapabilitySet::new(capabilities)?;
        let resolved = if requested.is_empty() {
            requested
        } else {
            CapabilitySet::new(store.get_or_create_many(requested.as_slice()).await?)?
        };

        let reference = Reference {
            public_id: options.public_id.unwrap_or_else(Uuid::new_v4),
            origin: None,
            depth: 0,
            receiver: emitter.clone(),
            target,
            capabilities: resolved,
        };

        tracing::debug!(
            kind = T::KIND,
            public_id = %reference.public_id,
            receiver = %reference.receiver,
            "creating root reference"
        );

        reference.save(store, Conflict::Reject).await
    }

    /// Derive a reference for `receiver` and persist it.
    ///
    /// Without `items` every capability that can still be handed on is
    /// passed as a leaf. With `items` each requested capability must be an
    /// attenuation of the one held here, otherwise the whole call fails with
    /// [`PermissionDenied`]. A derivation that would grant nothing, as from
    /// a holder of leaves only, is denied the same way.
    ///
    /// When `update` is set and `receiver` already holds a reference derived
    /// from this one, that grant is updated in place. Otherwise a second
    /// derivation for the same receiver is a conflict.
    pub async fn derive<S>(
        &self,
        store: &S,
        receiver: &Agent,
        items: Option<Vec<CapabilityInput>>,
        update: bool,
    ) -> Result<Reference<T>, CapabilityError>
    where
        S: CapabilityStore + ReferenceStore<T> + ?Sized,
    {
        let capabilities = self.capabilities.derive_caps(store, items).await?;
        if capabilities.is_empty() {
            let denied = PermissionDenied {
                actions: self
                    .capabilities
                    .iter()
                    .map(|capability| capability.name().to_string())
                    .collect(),
            };
            tracing::warn!(
                kind = T::KIND,
                origin = %self.public_id,
                %denied,
                "nothing left to derive"
            );
            return Err(denied.into());
        }
        let depth = self.depth.checked_add(1).ok_or(ValidationError::Depth {
            origin: self.depth,
            depth: self.depth,
        })?;

        let reference = Reference {
            public_id: Uuid::new_v4(),
            origin: Some(self.to_origin()),
            depth,
            receiver: receiver.clone(),
            target: self.target.clone(),
            capabilities: CapabilitySet::new(capabilities)?,
        };

        tracing::debug!(
            kind = T::KIND,
            origin = %self.public_id,
            receiver = %receiver,
            depth,
            update,
            "deriving reference"
        );

        let conflict = if update {
            Conflict::Update
        } else {
            Conflict::Reject
        };
        reference.save(store, conflict).await
    }

    /// Validate, then persist through `store`.
    pub async fn save<S>(self, store: &S, conflict: Conflict) -> Result<Reference<T>, CapabilityError>
    where
        S: ReferenceStore<T> + ?Sized,
    {
        self.is_valid()?;
        Ok(store.upsert(self, conflict).await?)
    }

    /// Check the chain invariants against the origin snapshot.
    ///
    /// A derived reference must be strictly deeper than its origin, target
    /// the same object, and hold only capabilities its origin can derive.
    pub fn is_valid(&self) -> Result<(), ValidationError> {
        self.receiver.validate()?;

        let Some(origin) = &self.origin else {
            return Ok(());
        };

        let result = if origin.depth >= self.depth {
            Err(ValidationError::Depth {
                origin: origin.depth,
                depth: self.depth,
            })
        } else if origin.target != self.target {
            Err(ValidationError::TargetMismatch)
        } else {
            let actions = origin.capabilities.underived(&self.capabilities);
            if actions.is_empty() {
                Ok(())
            } else {
                Err(ValidationError::NotDerived { actions })
            }
        };

        if let Err(error) = &result {
            tracing::warn!(kind = T::KIND, public_id = %self.public_id, %error, "invalid reference");
        }
        result
    }

    /// Validate a batch, failing on the first invalid reference.
    pub fn validate_all<'a>(
        references: impl IntoIterator<Item = &'a Reference<T>>,
    ) -> Result<(), ValidationError> {
        references
            .into_iter()
            .try_for_each(|reference| reference.is_valid())
    }

    /// Returns true if `other` is a legitimate descendant grant of `self`:
    /// deeper in the chain, on the same target, with derived capabilities.
    pub fn is_derived(&self, other: &Reference<T>) -> bool {
        other.depth > self.depth
            && self.target == other.target
            && self.capabilities.is_derived(&other.capabilities)
    }

    /// Externally visible identifier.
    pub fn public_id(&self) -> Uuid {
        self.public_id
    }

    /// Parent grant, if any.
    pub fn origin(&self) -> Option<&Origin<T>> {
        self.origin.as_ref()
    }

    /// Whether this is a root reference.
    pub fn is_root(&self) -> bool {
        self.origin.is_none()
    }

    /// Position in the chain.
    pub fn depth(&self) -> u32 {
        self.depth
    }

    /// Agent holding this grant.
    pub fn receiver(&self) -> &Agent {
        &self.receiver
    }

    /// Agent who produced this grant: the origin's receiver, or the
    /// receiver itself for a root.
    pub fn emitter(&self) -> &Agent {
        self.origin
            .as_ref()
            .map_or(&self.receiver, |origin| &origin.receiver)
    }

    /// Object this grant is for.
    pub fn target(&self) -> &T::Key {
        &self.target
    }

    /// Granted capabilities.
    pub fn capabilities(&self) -> &CapabilitySet {
        &self.capabilities
    }

    /// Snapshot of this reference to attach to a child.
    pub fn to_origin(&self) -> Origin<T> {
        Origin {
            public_id: self.public_id,
            depth: self.depth,
            receiver: self.receiver.clone(),
            target: self.target.clone(),
            capabilities: self.capabilities.clone(),
        }
    }

    /// Rebuild a reference, checking its invariants.
    pub fn from_record(record: ReferenceRecord<T>) -> Result<Self, ValidationError> {
        let reference = Reference {
            public_id: record.public_id,
            origin: record.origin,
            depth: record.depth,
            receiver: record.receiver,
            target: record.target,
            capabilities: record.capabilities,
        };
        reference.is_valid()?;
        Ok(reference)
    }

    /// Break the reference into its parts.
    pub fn into_record(self) -> ReferenceRecord<T> {
        ReferenceRecord {
            public_id: self.public_id,
            origin: self.origin,
            depth: self.depth,
            receiver: self.receiver,
            target: self.target,
            capabilities: self.capabilities,
        }
    }
}

impl<T: Target> Clone for Reference<T> {
    fn clone(&self) -> Self {
        Self {
            public_id: self.public_id,
            origin: self.origin.clone(),
            depth: self.depth,
            receiver: self.receiver.clone(),
            target: self.target.clone(),
            capabilities: self.capabilities.clone(),
        }
    }
}

impl<T: Target> Debug for Reference<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reference")
            .field("kind", &T::KIND)
            .field("public_id", &self.public_id)
            .field("origin", &self.origin.as_ref().map(|origin| origin.public_id))
            .field("depth", &self.depth)
            .field("receiver", &self.receiver)
            .field("target", &self.target)
            .field("capabilities", &self.capabilities)
            .finish()
    }
}

/// References are equal when they are the same stored grant.
impl<T: Target> PartialEq for Reference<T> {
    fn eq(&self, other: &Self) -> bool {
        self.public_id == other.public_id
    }
}

impl<T: Target> Eq for Reference<T> {}

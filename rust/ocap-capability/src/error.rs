/// A requested capability can not be derived from the holder's set.
///
/// Carries every offending action name, in the order they were requested,
/// so a caller can fix the whole request in one round trip.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Permission denied: can not derive {}", .actions.join(", "))]
pub struct PermissionDenied {
    /// Actions that failed the attenuation check.
    pub actions: Vec<String>,
}

impl PermissionDenied {
    /// Denial for a single action.
    pub fn action(name: impl Into<String>) -> Self {
        Self {
            actions: vec![name.into()],
        }
    }
}

/// A chain or model invariant does not hold.
///
/// These indicate a programming or tampering error and are always raised
/// before anything reaches a store.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// The origin is not strictly shallower than the reference.
    #[error("Origin depth {origin} is not lower than reference depth {depth}")]
    Depth {
        /// Depth of the origin reference.
        origin: u32,
        /// Depth claimed by the reference.
        depth: u32,
    },

    /// The reference does not target the same object as its origin.
    #[error("Reference target differs from its origin's target")]
    TargetMismatch,

    /// The reference holds capabilities its origin can not derive.
    #[error("Capabilities not derived from origin: {}", .actions.join(", "))]
    NotDerived {
        /// Offending action names.
        actions: Vec<String>,
    },

    /// An origin was supplied when creating a root reference.
    #[error("An origin can not be passed when creating a root reference, derive instead")]
    OriginOnCreate,

    /// Two capabilities in one set share the same action name.
    #[error("Duplicate capability '{0}'")]
    DuplicateCapability(String),

    /// Only individual (user) agents may be marked default.
    #[error("Only user agents can be marked as default")]
    DefaultNotAllowed,
}

/// Capability-like input could not be normalized.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    /// The input shape is not one of the accepted forms.
    #[error("Unsupported capability value: {0}")]
    Unsupported(String),

    /// The derivation budget is negative or out of range.
    #[error("Invalid derivation budget: {0}")]
    InvalidBudget(String),

    /// A mapping is missing a required key.
    #[error("Missing field '{0}'")]
    MissingField(&'static str),

    /// The action name is empty.
    #[error("Capability name can not be empty")]
    Empty,
}

/// Errors surfaced by capability and reference stores.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// Lookup miss.
    #[error("Not found: {0}")]
    NotFound(String),

    /// A uniqueness constraint would be violated.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The record being persisted or loaded is invalid.
    #[error(transparent)]
    Invalid(#[from] ValidationError),

    /// The storage backend failed.
    #[error("Storage backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Returns true for lookup misses.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Returns true when a uniqueness constraint was hit.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}

/// The common error type used by this crate.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CapabilityError {
    /// Attenuation budget or name check failed.
    #[error(transparent)]
    PermissionDenied(#[from] PermissionDenied),

    /// Chain or model invariant violated.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Malformed capability input.
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// Store failure, including lookup misses and conflicts.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl CapabilityError {
    /// Returns true for lookup misses.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Store(error) if error.is_not_found())
    }

    /// Returns true when a uniqueness constraint was hit.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Store(error) if error.is_conflict())
    }
}

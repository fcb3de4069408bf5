use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{CapabilityInput, ParseError, PermissionDenied};

/// Permission to perform a single named action.
///
/// `max_derive` is the number of further attenuations this capability may
/// undergo. A capability with `max_derive == 0` is a leaf: it grants the
/// action but can never be handed on.
///
/// Capabilities are plain values. Two capabilities are equal when both the
/// action name and the budget match, which is also the key under which
/// stores deduplicate them. Attenuation never mutates a capability, it
/// returns a new one:
///
/// ```rust
/// use ocap_capability::Capability;
///
/// let read = Capability::new("read", 2);
/// let shared = read.derive(None).unwrap();
///
/// assert_eq!(shared.max_derive(), 1);
/// assert!(read.is_derived(&shared));
/// assert!(!shared.is_derived(&read));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "CapabilityInput")]
pub struct Capability {
    name: String,
    max_derive: u32,
}

impl Capability {
    /// Create a capability for `name` with the given derivation budget.
    pub fn new(name: impl Into<String>, max_derive: u32) -> Self {
        Self {
            name: name.into(),
            max_derive,
        }
    }

    /// Create a leaf capability, which can not be derived further.
    pub fn leaf(name: impl Into<String>) -> Self {
        Self::new(name, 0)
    }

    /// Action this capability grants.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Remaining derivation budget.
    pub fn max_derive(&self) -> u32 {
        self.max_derive
    }

    /// Whether this capability is a leaf.
    pub fn is_leaf(&self) -> bool {
        self.max_derive == 0
    }

    /// Returns true if a capability with budget `max_derive` (or the
    /// default budget when `None`) can be derived from this one.
    pub fn can_derive(&self, max_derive: Option<u32>) -> bool {
        self.max_derive > 0 && max_derive.is_none_or(|budget| budget < self.max_derive)
    }

    /// Derive an attenuated copy.
    ///
    /// Without an explicit budget exactly one unit is consumed.
    pub fn derive(&self, max_derive: Option<u32>) -> Result<Capability, PermissionDenied> {
        if !self.can_derive(max_derive) {
            return Err(PermissionDenied::action(&self.name));
        }

        Ok(Capability {
            name: self.name.clone(),
            max_derive: max_derive.unwrap_or(self.max_derive - 1),
        })
    }

    /// Normalize a request. A bare name is a leaf.
    pub fn from_input(input: impl Into<CapabilityInput>) -> Self {
        match input.into() {
            CapabilityInput::Name(name) => Capability::leaf(name),
            CapabilityInput::Pair(name, max_derive) => Capability::new(name, max_derive),
            CapabilityInput::Record { name, max_derive } => Capability::new(name, max_derive),
            CapabilityInput::Capability(capability) => capability,
        }
    }

    /// Returns true if `other` is a legitimate attenuation of `self`.
    pub fn is_derived(&self, other: &Capability) -> bool {
        self.name == other.name && self.can_derive(Some(other.max_derive))
    }
}

impl From<CapabilityInput> for Capability {
    fn from(value: CapabilityInput) -> Self {
        Self::from_input(value)
    }
}

impl Display for Capability {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.name, self.max_derive)
    }
}

/// Parses `name` (a leaf) or `name:max_derive`.
impl FromStr for Capability {
    type Err = ParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let (name, budget) = match value.rsplit_once(':') {
            Some((name, budget)) => (name, Some(budget)),
            None => (value, None),
        };

        let name = name.trim();
        if name.is_empty() {
            return Err(ParseError::Empty);
        }

        let max_derive = match budget {
            Some(budget) => budget
                .trim()
                .parse::<u32>()
                .map_err(|_| ParseError::InvalidBudget(budget.to_string()))?,
            None => 0,
        };

        Ok(Capability::new(name, max_derive))
    }
}

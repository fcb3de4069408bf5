use std::fmt::Debug;
use std::hash::Hash;

use serde::{Serialize, de::DeserializeOwned};

use crate::ConditionalSync;

/// An object type that references can grant access to.
///
/// Each implementer gets its own reference family, `Reference<Self>`, so a
/// reference to one object type can never be mistaken for a reference to
/// another.
///
/// ```rust
/// use ocap_capability::Target;
///
/// struct Document;
///
/// impl Target for Document {
///     type Key = u64;
///     const KIND: &'static str = "document";
/// }
/// ```
pub trait Target: 'static {
    /// Key identifying one object of this type.
    type Key: Clone + Eq + Hash + Debug + Serialize + DeserializeOwned + ConditionalSync;

    /// Stable name of the object type, used by stores to keep reference
    /// families apart.
    const KIND: &'static str;
}

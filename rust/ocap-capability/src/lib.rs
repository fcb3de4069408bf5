#![warn(missing_docs)]

//! Object-capability authorization.
//!
//! Access to an object is granted by holding a [`Reference`] to it. A
//! reference carries a [`CapabilitySet`]: one [`Capability`] per permitted
//! action, each with a derivation budget (`max_derive`). A holder may hand
//! a reference on to another [`Agent`], but only with capabilities that are
//! strictly weaker than its own, so authority can only shrink along a chain.
//!
//! # Quick Example
//!
//! ```rust
//! use ocap_capability::{Agent, Capability, Reference, Target, UserId, Volatile};
//!
//! struct Document;
//!
//! impl Target for Document {
//!     type Key = u64;
//!     const KIND: &'static str = "document";
//! }
//!
//! # tokio_test::block_on(async {
//! let store = Volatile::new();
//! let (alice, bob, carol) = (
//!     Agent::user(UserId(1)),
//!     Agent::user(UserId(2)),
//!     Agent::user(UserId(3)),
//! );
//!
//! // Alice mints a grant over document 7.
//! let root = Reference::<Document>::create(
//!     &store,
//!     &alice,
//!     7,
//!     [Capability::new("read", 2), Capability::new("write", 2)],
//! )
//! .await?;
//!
//! // She shares read access with Bob, who may share it once more.
//! let shared = root
//!     .derive(&store, &bob, Some(vec![("read", 1).into()]), false)
//!     .await?;
//!
//! // Bob passes it on to Carol as a leaf.
//! let leaf = shared.derive(&store, &carol, None, false).await?;
//! assert!(leaf.capabilities().get("read").unwrap().is_leaf());
//!
//! // Carol can not pass it on.
//! assert!(leaf.derive(&store, &alice, Some(vec!["read".into()]), false).await.is_err());
//! # Ok::<_, ocap_capability::CapabilityError>(())
//! # }).unwrap();
//! ```
//!
//! # Key Types
//!
//! | Type | Role |
//! |------|------|
//! | [`Capability`] | Permission for one action, with a derivation budget |
//! | [`CapabilitySet`] | Capabilities held by one reference, unique by name |
//! | [`Agent`] | Identity that holds and emits references |
//! | [`Reference<T>`] | A grant over one object of [`Target`] type `T` |
//! | [`CapabilityStore`] | Deduplicating capability storage |
//! | [`ReferenceStore<T>`] | Reference storage and chain queries |
//! | [`Volatile`] | In-memory implementation of both stores |

mod error;
pub use error::*;

mod sync;
pub use sync::*;

mod capability;
pub use capability::*;

mod input;
pub use input::*;

mod set;
pub use set::*;

mod agent;
pub use agent::*;

mod target;
pub use target::*;

mod reference;
pub use reference::*;

mod store;
pub use store::*;

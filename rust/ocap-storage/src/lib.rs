#![warn(missing_docs)]

//! Durable storage for `ocap-capability`.
//!
//! [`Sqlite`] implements both [`CapabilityStore`] and [`ReferenceStore`] on
//! top of a single SQLite database. Uniqueness of capabilities and of
//! derived references is enforced by the schema, so concurrent writers can
//! not create duplicates even when they race.
//!
//! ```rust
//! use ocap_capability::{Agent, Capability, Reference, Target, UserId};
//! use ocap_storage::{Settings, Sqlite};
//!
//! struct Document;
//!
//! impl Target for Document {
//!     type Key = u64;
//!     const KIND: &'static str = "document";
//! }
//!
//! # tokio_test::block_on(async {
//! let store = Sqlite::open(&Settings::default())?;
//! let owner = Agent::user(UserId(1));
//!
//! let root = Reference::<Document>::create(&store, &owner, 7, [Capability::new("read", 1)])
//!     .await?;
//! let shared = root.derive(&store, &Agent::anonymous(), None, false).await?;
//! assert_eq!(shared.depth(), 1);
//! # Ok::<_, Box<dyn std::error::Error>>(())
//! # }).unwrap();
//! ```
//!
//! [`CapabilityStore`]: ocap_capability::CapabilityStore
//! [`ReferenceStore`]: ocap_capability::ReferenceStore

mod error;
pub use error::*;

mod settings;
pub use settings::*;

mod schema;

mod sqlite;
pub use sqlite::*;

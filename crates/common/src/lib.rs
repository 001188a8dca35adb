//! Core data model for Emporous collections.
//!
//! A collection is a DAG of digest-identified nodes. Manifest nodes have
//! children, blob nodes carry content. Every node carries a set of
//! structured attributes that a [`Matcher`] can select on.
//!
//! The registry itself is abstracted behind [`RegistryClient`]; an in-memory
//! implementation lives in [`memory`] for tests and demos.

pub mod digest;
pub mod matcher;
pub mod memory;
pub mod node;
pub mod registry;

pub use digest::{Digest, DigestError};
pub use matcher::{AttributeQuery, JsonSubsetMatcher, Matcher, QueryError};
pub use node::{Attributes, Collection, Node, NodeKind, TITLE_ANNOTATION};
pub use registry::{RegistryClient, RegistryError};

// src/core/metadata/mod.rs

//! The membership catalog: the persisted description of every cluster, its
//! members and its routers. Each member stores a replicated copy; any member
//! serves reads, only the primary accepts writes.

pub mod catalog;
pub mod model;
pub mod schema;

pub use catalog::MembershipCatalog;
pub use model::{
    CatalogChange, CatalogSnapshot, ClusterDescriptor, MemberDescriptor, MemberRef, MemberRole,
    MemberSslMode, RouterDescriptor, TopologyMode,
};
pub use schema::{SCHEMA_CURRENT, SCHEMA_FLOOR, SchemaVersion};

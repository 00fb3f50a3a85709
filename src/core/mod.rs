// src/core/mod.rs

//! The recovery library: member sessions, the membership catalog, and the
//! reboot and quorum-restoring procedures built on them.

pub mod admin;
pub mod errors;
pub mod gtid;
pub mod instance;
pub mod metadata;
pub mod protocol;
pub mod recovery;

pub use errors::ClusterAdminError;
pub use gtid::GtidSet;

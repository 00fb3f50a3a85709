// src/lib.rs

pub mod config;
pub mod core;

// Re-export
pub use crate::core::admin::{ClusterAdmin, ClusterHandle, RebootOptions, RemoveOptions};
pub use crate::core::errors::ClusterAdminError;

// src/core/protocol/mod.rs

//! Wire frames exchanged with the per-member admin agent.

pub mod frame;
pub use frame::{Frame, FrameCodec};

//! Runtime module
//!
//! Abstraction over the container runtime the agent inspects, through the
//! RuntimeAdapter trait. Docker is the only implementation.

pub mod adapter;
pub mod docker;

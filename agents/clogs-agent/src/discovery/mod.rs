//! Discovery module
//!
//! Container classification, monitored-set filtering and reconciliation of
//! the observed containers against the backend.

pub mod context;
pub mod engine;
pub mod filter;
pub mod monitored;
pub mod registry;

//! Backend module
//!
//! Communication with the remote monitoring backend.

pub mod client;
pub mod model;

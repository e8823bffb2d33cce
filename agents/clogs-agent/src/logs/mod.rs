//! Log collection module
//!
//! Per-container log streaming, batching and upload to the backend.

pub mod batch;
pub mod collector;
pub mod record;
pub mod stream;

//! Command-line support: configuration loading.

pub mod config;

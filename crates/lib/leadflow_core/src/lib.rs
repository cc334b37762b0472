//! # leadflow_core
//!
//! Client core for Leadflow: session and role resolution, access guarding,
//! remote lead management and migration of offline-captured leads.

pub mod auth;
pub mod backend;
pub mod config;
pub mod leads;
pub mod migration;
pub mod models;
pub mod notify;
pub mod storage;
pub mod store;
pub mod users;

#[cfg(test)]
mod testing;

/// Returns the crate version.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

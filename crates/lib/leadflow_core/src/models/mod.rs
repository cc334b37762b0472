//! Domain models.
//!
//! These are internal domain models shared by the backend client, the
//! session layer and the local store.

pub mod auth;
pub mod leads;

//! Route handlers for the HTTP API.

pub mod cover;
pub mod formats;
pub mod health;
pub mod sessions;
pub mod stream;

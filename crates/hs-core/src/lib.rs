//! hs-core: shared error type, configuration, and media-domain types.
//!
//! This crate is the foundational dependency for all other hs-* crates.
//! It knows nothing about ffmpeg or HTTP; it only describes what a media
//! source looks like and how the server is configured.

pub mod config;
pub mod error;
pub mod media;

// Re-export the most commonly used items at the crate root.
pub use error::{Error, Result};
pub use media::*;

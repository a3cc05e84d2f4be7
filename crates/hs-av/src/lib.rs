//! # hs-av
//!
//! External tool plumbing for the homestream transcoding pipeline.
//!
//! This crate provides:
//!
//! - **Tool discovery** ([`ToolRegistry`]) -- find and cache paths to ffmpeg
//!   and ffprobe.
//! - **Command execution** ([`ToolCommand`]) -- async builder with timeout
//!   support for one-shot invocations.
//! - **Capability discovery** ([`ToolCapabilities`]) -- the muxers, encoders
//!   and filters the installed ffmpeg supports.
//! - **Probing** ([`probe::probe_file`]) -- ffprobe JSON to [`hs_core::StreamInfo`].
//! - **Long-lived processes** ([`TranscodeProcess`]) -- spawn with piped
//!   output and guaranteed termination.

pub mod capabilities;
pub mod command;
pub mod probe;
pub mod process;
pub mod tools;

// ---- Re-exports for convenience ----

pub use capabilities::{CapabilityGate, ToolCapabilities};
pub use command::{ToolCommand, ToolOutput};
pub use process::{ProcessExit, TranscodeProcess};
pub use tools::{ToolConfig, ToolInfo, ToolRegistry};

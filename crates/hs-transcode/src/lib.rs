//! # hs-transcode
//!
//! Decision logic of the streaming pipeline, free of any I/O:
//!
//! - [`registry`] -- the static container/codec compatibility table.
//! - [`candidate`] -- client capability strings parsed against the table.
//! - [`negotiate`] -- stream selection, copy narrowing, final choice.
//! - [`command`] -- the ffmpeg invocation for a negotiated choice.

pub mod candidate;
pub mod command;
pub mod negotiate;
pub mod registry;

pub use candidate::{Candidate, ClientCapabilities};
pub use command::{build_command, ProcessInput, ProcessSpec, SeekPlan, TargetSize, SEEK_THRESHOLD};
pub use negotiate::{negotiate, NegotiatedChoice, NegotiationRequest, StreamSelection};
pub use registry::{CodecDefinition, CodecSlot, CompatRule, ContainerFormat, FormatsMatrix, Registry};

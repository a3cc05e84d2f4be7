//! Unified error type for the homestream workspace.
//!
//! Negotiation, probing and process failures all end up in [`Error`]; the
//! HTTP layer picks the response status with [`Error::http_status`].

use std::fmt;

/// Unified error type covering all failure modes in homestream.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A provider or resource lookup came back empty.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// The kind of entity (e.g. "resource", "provider").
        entity: String,
        /// Lookup key as given by the caller.
        id: String,
    },

    /// The request cannot be served as asked (bad stream selection, no
    /// playable format, unknown provider...).
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// The streaming subsystem is not usable yet (or at all).
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    /// Reading a source or talking to a child process failed.
    #[error("IO error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    /// An external tool (ffmpeg, ffprobe) returned an error.
    #[error("Tool error [{tool}]: {message}")]
    Tool {
        /// `ffmpeg` or `ffprobe`.
        tool: String,
        message: String,
    },

    /// Media probing failed.
    #[error("Probe error: {0}")]
    Probe(String),

    /// Static tables or configuration are inconsistent.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Broken invariants on our side.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Status code used when this error reaches an HTTP client.
    pub fn http_status(&self) -> u16 {
        match self {
            Error::NotFound { .. } => 404,
            Error::BadRequest(_) => 400,
            Error::Unavailable(_) => 503,
            Error::Io { .. } => 500,
            Error::Tool { .. } => 502,
            Error::Probe(_) => 422,
            Error::Config(_) => 500,
            Error::Internal(_) => 500,
        }
    }

    /// Shorthand for [`Error::NotFound`].
    pub fn not_found(entity: impl Into<String>, id: impl fmt::Display) -> Self {
        Error::NotFound {
            entity: entity.into(),
            id: id.to_string(),
        }
    }

    /// Shorthand for [`Error::BadRequest`].
    pub fn bad_request(message: impl Into<String>) -> Self {
        Error::BadRequest(message.into())
    }

    /// Shorthand for [`Error::Tool`].
    pub fn tool(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Tool {
            tool: tool.into(),
            message: message.into(),
        }
    }
}

/// Result alias used across the homestream crates.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_display() {
        let err = Error::not_found("resource", "album/track.flac");
        assert_eq!(err.to_string(), "resource not found: album/track.flac");
        assert_eq!(err.http_status(), 404);
    }

    #[test]
    fn bad_request_display() {
        let err = Error::bad_request("no compatible client format");
        assert_eq!(err.to_string(), "Bad request: no compatible client format");
        assert_eq!(err.http_status(), 400);
    }

    #[test]
    fn unavailable_is_503() {
        let err = Error::Unavailable("ffmpeg capabilities not probed yet".into());
        assert_eq!(err.http_status(), 503);
    }

    #[test]
    fn io_from_std() {
        let err: Error = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "stdin closed").into();
        assert!(matches!(err, Error::Io { .. }));
        assert_eq!(err.http_status(), 500);
    }

    #[test]
    fn tool_display() {
        let err = Error::tool("ffprobe", "timed out after 30s");
        assert_eq!(err.to_string(), "Tool error [ffprobe]: timed out after 30s");
        assert_eq!(err.http_status(), 502);
    }

    #[test]
    fn config_and_internal_are_500() {
        assert_eq!(Error::Config("missing codec".into()).http_status(), 500);
        assert_eq!(Error::Internal("boom".into()).http_status(), 500);
    }
}

//! Error types for versync.
//!
//! Channel and protocol failures are reported with the target process id so
//! the sync loop can surface them to the user and move on to the next
//! candidate. Store merges never fail; only attach/connect/decode paths do.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the versync library.
#[derive(Debug, Error)]
pub enum SyncError {
    // Injection channel errors
    #[error("Failed to attach agent to process {pid}: {message}")]
    Attach {
        pid: u32,
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    // Handshake / connecting errors
    #[error("Connection to process {pid} failed: {message}")]
    Connect { pid: u32, message: String },

    #[error("Agent in process {pid} speaks protocol {got}, expected {expected}")]
    ProtocolMismatch { pid: u32, got: u32, expected: u32 },

    #[error("Connection to process {pid} lost")]
    ConnectionLost { pid: u32 },

    #[error("A connection to process {pid} is already active")]
    AlreadyConnected { pid: u32 },

    // Decode errors: the offending batch or file is rejected as a whole
    #[error("Failed to decode {source_name}: {message}")]
    Decode {
        /// Where the payload came from ("live dump" or a file path).
        source_name: String,
        message: String,
        #[source]
        cause: Option<serde_json::Error>,
    },

    // File system errors
    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("Frame of {size} bytes exceeds maximum {max}")]
    FrameTooLarge { size: usize, max: usize },

    #[error("Agent injection is not supported on this platform")]
    UnsupportedPlatform,
}

/// Result type alias for versync operations.
pub type Result<T> = std::result::Result<T, SyncError>;

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl SyncError {
    /// Create an IO error with path context.
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        SyncError::Io {
            message: err.to_string(),
            path: Some(path.into()),
            source: Some(err),
        }
    }

    /// Create a decode error for a payload that arrived over the channel.
    pub fn decode_live(err: serde_json::Error) -> Self {
        SyncError::Decode {
            source_name: "live dump".to_string(),
            message: err.to_string(),
            cause: Some(err),
        }
    }

    /// True for failures that end the current connection rather than the
    /// current batch.
    ///
    /// Frame-level errors count as fatal: an oversized or truncated frame
    /// leaves unread payload bytes on the stream, so no later frame can be
    /// read correctly. A fully-read but undecodable payload ([`Decode`])
    /// is not fatal; the stream is still aligned on frame boundaries.
    ///
    /// [`Decode`]: SyncError::Decode
    pub fn is_fatal_to_connection(&self) -> bool {
        matches!(
            self,
            SyncError::ConnectionLost { .. }
                | SyncError::Attach { .. }
                | SyncError::Connect { .. }
                | SyncError::ProtocolMismatch { .. }
                | SyncError::FrameTooLarge { .. }
        )
    }
}

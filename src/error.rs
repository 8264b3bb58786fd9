//! Error types for neotestdb
//!
//! Every fallible library operation returns [`Result`]. The CLI wraps these
//! in `anyhow` for reporting.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::instance::InstanceState;

/// Errors that can occur while configuring or driving a server instance
#[derive(Debug, Error)]
pub enum Error {
    /// No HTTP port was supplied at construction
    #[error("port is required")]
    PortRequired,

    /// Filesystem errors, with the path or action that failed
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// The server binary could not be launched
    #[error("failed to spawn {binary}: {source}")]
    Spawn {
        binary: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The server wrote to stderr or logged an ERROR line
    #[error("server reported an error: {0}")]
    ServerOutput(String),

    /// Output closed before the expected marker was seen
    #[error("server exited before {0} completed")]
    Exited(&'static str),

    /// The ready or shutdown marker did not appear in time
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    /// Operation not allowed in the current lifecycle state
    #[error("cannot {operation} while instance is {state}")]
    InvalidState {
        operation: &'static str,
        state: InstanceState,
    },

    /// Refused to delete a path outside the install root
    #[error("refusing to delete {0}: outside the install root")]
    UnsafePath(PathBuf),

    /// Invalid or unreadable harness options
    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Error::Io {
            context: context.into(),
            source,
        }
    }
}

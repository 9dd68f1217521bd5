use std::process::ExitStatus;
use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum IscsiError {
    #[error("iscsiadm could not be started: {output} ({source})")]
    SpawnFailed {
        /// Combined output captured before the spawn failed (usually empty).
        output: String,
        #[source]
        source: std::io::Error,
    },

    #[error("iscsiadm error: {output} ({status})")]
    CommandFailed {
        status: ExitStatus,
        /// Combined stdout and stderr of the failed invocation.
        output: String,
    },

    #[error("iscsiadm {command} timed out after {timeout:?}")]
    Timeout { command: String, timeout: Duration },

    #[error("failed portals [{portals}]: {source}")]
    FailedPortals {
        /// Comma-separated list of every portal that failed in the batch.
        portals: String,
        /// First failure encountered, in portal order.
        #[source]
        source: Box<IscsiError>,
    },
}

pub type Result<T> = std::result::Result<T, IscsiError>;

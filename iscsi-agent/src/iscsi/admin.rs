//! Thin executor around the iscsiadm(8) initiator tool.
//!
//! All session state lives in iscsiadm's own node database; this module
//! only spawns the tool, captures its combined output, and classifies
//! failures. It never goes through a shell, so arguments reach the tool
//! verbatim.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::error::{IscsiError, Result};
use crate::metrics;

/// Deadline applied to every iscsiadm invocation. An unreachable portal
/// can otherwise hang a discovery indefinitely.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(120);

const DEFAULT_BINARY: &str = "iscsiadm";

/// Executes iscsiadm invocations.
///
/// The session orchestrator only sees this trait, so tests substitute an
/// in-memory executor and production injects [`IscsiAdmCli`].
#[async_trait]
pub trait IscsiAdm: Send + Sync {
    /// Run iscsiadm with the given arguments and return its combined
    /// stdout/stderr output.
    async fn run(&self, args: &[&str]) -> Result<String>;
}

/// Production executor that spawns the real iscsiadm binary.
pub struct IscsiAdmCli {
    binary: String,
    command_timeout: Duration,
}

impl IscsiAdmCli {
    pub fn new(binary: impl Into<String>, command_timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            command_timeout,
        }
    }
}

impl Default for IscsiAdmCli {
    fn default() -> Self {
        Self::new(DEFAULT_BINARY, DEFAULT_COMMAND_TIMEOUT)
    }
}

#[async_trait]
impl IscsiAdm for IscsiAdmCli {
    async fn run(&self, args: &[&str]) -> Result<String> {
        info!(
            command = %format!("{} {}", self.binary, args.join(" ")),
            "Executing iscsiadm command"
        );

        // The mode argument ("discoverydb", "node") labels the metrics.
        let mode = args.get(1).copied().unwrap_or("unknown");

        let mut cmd = Command::new(&self.binary);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // If the caller's future is dropped (gRPC cancellation, timeout)
            // the child must not be leaked.
            .kill_on_drop(true);

        let result = match tokio::time::timeout(self.command_timeout, cmd.output()).await {
            Ok(Ok(output)) => {
                let combined = combine_output(&output.stdout, &output.stderr);
                if output.status.success() {
                    Ok(combined)
                } else {
                    Err(IscsiError::CommandFailed {
                        status: output.status,
                        output: combined,
                    })
                }
            }
            Ok(Err(source)) => Err(IscsiError::SpawnFailed {
                output: String::new(),
                source,
            }),
            Err(_) => Err(IscsiError::Timeout {
                command: args.join(" "),
                timeout: self.command_timeout,
            }),
        };

        match &result {
            Ok(output) => {
                debug!(output = %escape_newlines(output), "iscsiadm output");
                metrics::record_command(mode, "success");
            }
            Err(err) => {
                if let IscsiError::CommandFailed { output, .. } = err {
                    debug!(output = %escape_newlines(output), "iscsiadm output");
                }
                warn!(error = %err, "iscsiadm command failed");
                metrics::record_command(mode, error_label(err));
            }
        }

        result
    }
}

/// iscsiadm interleaves progress and errors across both streams; callers
/// only ever want one buffer.
fn combine_output(stdout: &[u8], stderr: &[u8]) -> String {
    let mut combined = String::from_utf8_lossy(stdout).into_owned();
    combined.push_str(&String::from_utf8_lossy(stderr));
    combined
}

fn escape_newlines(output: &str) -> String {
    output.replace('\n', "\\n")
}

fn error_label(err: &IscsiError) -> &'static str {
    match err {
        IscsiError::SpawnFailed { .. } => "spawn_failed",
        IscsiError::CommandFailed { .. } => "command_failed",
        IscsiError::Timeout { .. } => "timeout",
        IscsiError::FailedPortals { .. } => "batch_failed",
    }
}

//! Error taxonomy shared across the pipefire workspace.
//!
//! Narrowed to the five kinds spec.md §7 names, rather than a generic
//! catch-all `ErrorKind`: every error that crosses a component boundary in
//! this daemon falls cleanly into one of these.

use thiserror::Error;

/// A single task failure, carrying enough context to be actionable from one
/// log line: which task, which run, and what went wrong underneath it.
#[derive(Debug, Error)]
#[error("task '{task}' failed: {source}")]
pub struct TaskFailure {
    pub task: String,
    #[source]
    pub source: PipelineError,
}

impl TaskFailure {
    pub fn new(task: impl Into<String>, source: PipelineError) -> Self {
        Self {
            task: task.into(),
            source,
        }
    }
}

/// The error taxonomy of spec.md §7.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Missing configuration, malformed pipeline definition. Fatal at
    /// startup.
    #[error("configuration error: {0}")]
    Config(String),

    /// Broker disconnect, SSH dial failure, database round-trip failure.
    /// Surfaced to the supervisor; triggers the reconnect loop. Never
    /// requeues a message.
    #[error("transient infrastructure error: {0}")]
    TransientInfra(String),

    /// A per-file or per-operation task failure. Whether it aborts the run
    /// depends on the task type (see pipefire-executor).
    #[error("task error: {0}")]
    Task(String),

    /// Reservation duplicate-key (informational — an earlier run already
    /// did this work) or a ciphertext/plaintext hash mismatch (fatal for
    /// the file).
    #[error("integrity error: {0}")]
    Integrity(String),

    /// Undecodable bus payload. The message is nacked without requeue; the
    /// run never begins.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Underlying I/O failure, preserved with its source for diagnostics.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_failure_message_names_the_task() {
        let failure = TaskFailure::new("sftp.put", PipelineError::Integrity("hash mismatch".to_string()));
        assert_eq!(failure.to_string(), "task 'sftp.put' failed: integrity error: hash mismatch");
    }
}

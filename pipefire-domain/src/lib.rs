//! Shared domain types for the pipefire daemon.
//!
//! This crate has no I/O and no async runtime dependency of its own; it is
//! the vocabulary every other pipefire crate speaks — `RunContext`,
//! `TaskDefinition`, and the `PipelineError` taxonomy of spec §7.

mod error;
mod message;
mod run_context;
mod task;

pub use error::{PipelineError, Result, TaskFailure};
pub use message::{MessagePayload, TransferFilesPayload, ZERO_CORRELATION_ID};
pub use run_context::RunContext;
pub use task::{TaskDefinition, TaskType};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_correlation_id_is_replaced() {
        let msg = MessagePayload {
            task: "directdebit".to_string(),
            start_date: "2026-07-28".to_string(),
            correlation_id: ZERO_CORRELATION_ID,
            files: vec![],
        };
        let ctx = RunContext::new("directdebit", msg, vec![]);
        assert_ne!(ctx.correlation_id, ZERO_CORRELATION_ID);
    }

    #[test]
    fn non_zero_correlation_id_is_preserved() {
        let id = uuid::Uuid::new_v4();
        let msg = MessagePayload {
            task: "directdebit".to_string(),
            start_date: "2026-07-28".to_string(),
            correlation_id: id,
            files: vec![],
        };
        let ctx = RunContext::new("directdebit", msg, vec![]);
        assert_eq!(ctx.correlation_id, id);
    }

    #[test]
    fn fatal_task_types() {
        assert!(TaskType::SftpGet.is_fatal_on_failure());
        assert!(TaskType::Encrypt.is_fatal_on_failure());
        assert!(!TaskType::SftpPut.is_fatal_on_failure());
        assert!(!TaskType::Archive.is_fatal_on_failure());
        assert!(!TaskType::Cleanup.is_fatal_on_failure());
        assert!(!TaskType::SftpClean.is_fatal_on_failure());
    }

    #[test]
    fn task_definition_deserializes_from_json() {
        let json = serde_json::json!({
            "name": "pull-from-anz",
            "type": "sftp.get",
            "enabled": true,
            "taskConfig": { "host": "sftp.anz.example" }
        });
        let task: TaskDefinition = serde_json::from_value(json).unwrap();
        assert_eq!(task.name, "pull-from-anz");
        assert_eq!(task.task_type, TaskType::SftpGet);
        assert!(task.enabled);
    }
}

use serde::{Deserialize, Serialize};

/// The recognized task types a pipeline may be composed of (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    #[serde(rename = "sftp.get")]
    SftpGet,
    #[serde(rename = "sftp.clean")]
    SftpClean,
    Encrypt,
    #[serde(rename = "sftp.put")]
    SftpPut,
    Archive,
    Cleanup,
}

impl TaskType {
    /// Tasks whose failure is fatal to the run: downstream tasks depend on
    /// their output (spec.md §4.5).
    pub fn is_fatal_on_failure(self) -> bool {
        matches!(self, TaskType::SftpGet | TaskType::Encrypt)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskType::SftpGet => "sftp.get",
            TaskType::SftpClean => "sftp.clean",
            TaskType::Encrypt => "encrypt",
            TaskType::SftpPut => "sftp.put",
            TaskType::Archive => "archive",
            TaskType::Cleanup => "cleanup",
        }
    }
}

/// One element of a pipeline's ordered task list. Order within the
/// containing `Vec<TaskDefinition>` is significant and is preserved as read
/// from configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDefinition {
    pub name: String,
    #[serde(rename = "type")]
    pub task_type: TaskType,
    pub enabled: bool,
    /// Opaque, task-specific configuration. Each runner deserializes only
    /// the shape it expects.
    #[serde(rename = "taskConfig", default)]
    pub config: serde_json::Value,
}

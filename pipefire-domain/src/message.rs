use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The zero UUID a producer sends to mean "the listener should generate a
/// fresh correlation id for this run" (spec.md §3, §4.6).
pub const ZERO_CORRELATION_ID: Uuid = Uuid::nil();

/// Wire shape of a bus delivery: `{ "MessageType": [...], "Message": {...} }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferFilesPayload {
    #[serde(rename = "MessageType", default)]
    pub message_type: Vec<String>,
    #[serde(rename = "Message")]
    pub message: MessagePayload,
}

/// The `Message` object inside a bus delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagePayload {
    pub task: String,
    pub start_date: String,
    #[serde(rename = "correlationId")]
    pub correlation_id: Uuid,
    #[serde(default)]
    pub files: Vec<serde_json::Value>,
}

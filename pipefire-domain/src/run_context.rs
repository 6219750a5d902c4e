use tracing::Span;
use uuid::Uuid;

use crate::message::MessagePayload;
use crate::task::TaskDefinition;

/// The per-run value carrying everything a task needs to know about the run
/// it is participating in. Created once per bus message by the listener and
/// handed down through the executor to each task runner (spec.md §3).
///
/// `RunContext` owns the task-scoped working state; it does not own the
/// ledgers or endpoint connections, which are process-wide or task-scoped
/// respectively — see `pipefire_tasks::Services` for those.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub correlation_id: Uuid,
    pub pipeline_name: String,
    pub message: MessagePayload,
    pub tasks: Vec<TaskDefinition>,
    /// A `tracing` span entered for the run's duration; every event emitted
    /// while it is entered carries `correlation_id` and `pipeline` fields.
    span: Span,
}

impl RunContext {
    /// Builds a run context for `pipeline_name`, substituting a fresh v4
    /// UUID for the zero correlation id (spec.md §3, §4.6) and logging a
    /// warning when it does so.
    pub fn new(pipeline_name: impl Into<String>, mut message: MessagePayload, tasks: Vec<TaskDefinition>) -> Self {
        let pipeline_name = pipeline_name.into();

        if message.correlation_id == Uuid::nil() {
            let generated = Uuid::new_v4();
            tracing::warn!(
                pipeline = %pipeline_name,
                generated_correlation_id = %generated,
                "correlationId was the zero UUID; generating a fresh one"
            );
            message.correlation_id = generated;
        }

        let span = tracing::info_span!(
            "pipeline_run",
            pipeline = %pipeline_name,
            correlation_id = %message.correlation_id,
        );

        Self {
            correlation_id: message.correlation_id,
            pipeline_name,
            message,
            tasks,
            span,
        }
    }

    /// Enters the run's contextual span for the duration of `f`, stamping
    /// every event `f` emits with this run's correlation id.
    pub fn in_span<R>(&self, f: impl FnOnce() -> R) -> R {
        let _guard = self.span.enter();
        f()
    }

    pub fn span(&self) -> &Span {
        &self.span
    }
}

use async_trait::async_trait;
use tracing::Instrument;

use pipefire_domain::{MessagePayload, PipelineError, RunContext, TaskDefinition};
use pipefire_executor::ExecutionOutcome;
use pipefire_tasks::Services;

/// The interface the Message Listener (C6) drives against, independent of
/// what a pipeline's task list actually contains (spec.md §9 Design Note).
#[async_trait]
pub trait Pipeline: Send + Sync {
    fn version(&self) -> &'static str;

    /// Runs this pipeline's task list against one bus message.
    async fn execute(&self, message: MessagePayload) -> ExecutionOutcome;

    /// Releases any resources the pipeline holds open across runs. Most
    /// pipelines hold none — task runners open and close their own
    /// connections per run — but the trait leaves room for one that does.
    async fn close(&self) -> Result<(), PipelineError> {
        Ok(())
    }
}

/// The one pipeline implementation this daemon ships: a task list driven
/// straight through the executor, with no pipeline-specific logic of its
/// own. Every entry in the plugin registry currently resolves to this;
/// the registry exists so a future plugin with genuinely different
/// behavior (not just a different task list) has somewhere to go without
/// changing the listener or executor (spec.md §9).
pub struct GenericPipeline {
    name: String,
    tasks: Vec<TaskDefinition>,
    services: Services,
}

impl GenericPipeline {
    pub fn new(name: impl Into<String>, tasks: Vec<TaskDefinition>, services: Services) -> Self {
        Self {
            name: name.into(),
            tasks,
            services,
        }
    }
}

#[async_trait]
impl Pipeline for GenericPipeline {
    fn version(&self) -> &'static str {
        "1"
    }

    async fn execute(&self, message: MessagePayload) -> ExecutionOutcome {
        let ctx = RunContext::new(self.name.clone(), message, self.tasks.clone());
        let span = ctx.span().clone();
        async move { pipefire_executor::execute(&ctx, &self.services).await }
            .instrument(span)
            .await
    }
}

use std::sync::Arc;

use tracing::{debug, info};

use crate::console::ConsoleLevel;
use crate::sandbox::{ExecutionContext, ExecutionResult, ExecutionSandbox};
use crate::snippet::Snippet;

/// Fires `executeOnLoad` snippets whose pattern matches the current location.
///
/// Executions within one load event are strictly sequential and in snippet
/// order; a failing snippet never stops the ones after it.
pub struct AutoRunScheduler {
    sandbox: Arc<ExecutionSandbox>,
}

impl AutoRunScheduler {
    pub fn new(sandbox: Arc<ExecutionSandbox>) -> Self {
        Self { sandbox }
    }

    /// Snippets that would fire for `location`, in order.
    pub fn matching<'a>(snippets: &'a [Snippet], location: &str) -> Vec<&'a Snippet> {
        snippets.iter().filter(|s| s.fires_on(location)).collect()
    }

    /// Run every eligible snippet once the context's document is ready.
    pub async fn execute_on_load(
        &self,
        snippets: &[Snippet],
        context: &dyn ExecutionContext,
        location: &str,
    ) -> Vec<ExecutionResult> {
        if !context.is_ready() {
            debug!(location = %location, "Document not ready, deferring auto-run");
            context.ready().await;
        }

        let eligible = Self::matching(snippets, location);
        info!(
            location = %location,
            total = snippets.len(),
            eligible = eligible.len(),
            "Auto-running snippets"
        );

        let mut results = Vec::with_capacity(eligible.len());
        for snippet in eligible {
            self.sandbox.sink().log(
                ConsoleLevel::Auto,
                format!("Auto-executing snippet '{}'", snippet.name),
                Some(snippet.id.as_str()),
            );
            results.push(self.sandbox.run_snippet(snippet, Some(context)).await);
        }

        let failed = results.iter().filter(|r| !r.success).count();
        if failed > 0 {
            debug!(failed, "Some auto-run snippets failed");
        }
        results
    }
}

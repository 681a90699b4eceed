use std::time::Instant;

use tracing::trace;

use crate::sandbox::outcome::ResourceUsage;
use crate::sandbox::traits::{ChangeCounter, ChangeObserver, ExecutionContext};

/// Per-execution sampler of elapsed time, memory growth and document mutations.
///
/// Instrumentation is best-effort: a host without memory introspection or a
/// document model reports zero for that measure.
pub struct ResourceMonitor {
    started: Instant,
    baseline_memory: u64,
    has_memory: bool,
    counter: ChangeCounter,
    observer: Option<Box<dyn ChangeObserver>>,
}

impl ResourceMonitor {
    /// Start sampling against `context`.
    pub fn start(context: &dyn ExecutionContext) -> Self {
        let baseline = context.memory_usage();
        let counter = ChangeCounter::new();
        let observer = context
            .document()
            .map(|document| document.observe(counter.clone()));

        trace!(
            has_memory = baseline.is_some(),
            observing = observer.is_some(),
            "Resource monitor started"
        );

        Self {
            started: Instant::now(),
            baseline_memory: baseline.unwrap_or(0),
            has_memory: baseline.is_some(),
            counter,
            observer,
        }
    }

    /// Current usage relative to the start of execution.
    pub fn snapshot(&self, context: &dyn ExecutionContext) -> ResourceUsage {
        let memory_delta = if self.has_memory {
            context
                .memory_usage()
                .map(|current| current.saturating_sub(self.baseline_memory))
                .unwrap_or(0)
        } else {
            0
        };

        ResourceUsage {
            elapsed_ms: self.started.elapsed().as_millis() as u64,
            memory_delta,
            dom_mutations: self.counter.get(),
        }
    }

    /// Handle to the mutation count, usable without borrowing the monitor.
    pub fn counter(&self) -> ChangeCounter {
        self.counter.clone()
    }

    /// Detach the document observer. Safe to call more than once.
    pub fn dispose(&mut self) {
        if let Some(mut observer) = self.observer.take() {
            observer.disconnect();
            trace!("Resource monitor disposed");
        }
    }
}

impl Drop for ResourceMonitor {
    fn drop(&mut self) {
        self.dispose();
    }
}

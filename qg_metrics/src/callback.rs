//! ABOUTME: Lifecycle hooks that turn database operations into counter and histogram samples
//! ABOUTME: Stamps start time before an operation and records outcome and duration after it

use std::sync::Arc;

use qg_core::{MonotonicTimer, Result};
use tracing::trace;

use crate::collectors::QueryCounters;
use crate::host::{Callbacks, Operation, OperationKind};
use crate::labels::{default_labels, merge_labels, Labels, Status};
use crate::plugin::PluginOptions;
use crate::registry::CollectorRegistry;

/// Operation setting holding the start stamp between before and after hooks
pub const START_TIME_KEY: &str = "querygauge:start_time";

/// Label values fixed for one instrumented handle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtraInfo {
    /// Logical name of the database
    pub db_name: String,
    /// Driver powering the handle
    pub driver_name: String,
}

impl ExtraInfo {
    pub fn labels(&self) -> Labels {
        default_labels(&self.db_name, &self.driver_name)
    }
}

/// Keeps query statistics current by hooking every operation on a handle.
#[derive(Debug)]
pub struct CallbackHandler {
    scope: String,
    counters: Arc<QueryCounters>,
    default_labels: Labels,
}

impl CallbackHandler {
    /// Create a handler whose counters come from `registry` under the
    /// configured namespace.
    pub fn new(registry: &CollectorRegistry, info: &ExtraInfo, opts: &PluginOptions) -> Result<Self> {
        let counters = registry
            .query_counters(opts.namespace())
            .map_err(|e| e.context("could not create query counters"))?;

        Ok(Self::with_counters(counters, info, opts.callback_scope()))
    }

    pub fn with_counters(counters: Arc<QueryCounters>, info: &ExtraInfo, scope: &str) -> Self {
        Self {
            scope: scope.to_string(),
            counters,
            default_labels: info.labels(),
        }
    }

    pub fn counters(&self) -> &Arc<QueryCounters> {
        &self.counters
    }

    /// Hook name under the configured scope, e.g. `querygauge:after_query`
    pub fn callback_name(&self, callback: &str) -> String {
        format!("{}:{}", self.scope, callback)
    }

    /// Attach a before/after pair for every operation kind
    pub fn register(self: &Arc<Self>, callbacks: &Callbacks) {
        for kind in OperationKind::ALL {
            let handler = Arc::clone(self);
            callbacks.register_before(
                kind,
                self.callback_name(&format!("before_{}", kind)),
                move |op| handler.set_start_time(op),
            );

            let handler = Arc::clone(self);
            callbacks.register_after(
                kind,
                self.callback_name(&format!("after_{}", kind)),
                move |op| handler.record(op),
            );
        }

        tracing::debug!(scope = %self.scope, "Registered metrics callbacks");
    }

    pub fn set_start_time(&self, op: &mut Operation) {
        op.set(START_TIME_KEY, MonotonicTimer::new());
    }

    /// Count the operation and, if a start stamp exists, observe its duration.
    ///
    /// Status reflects whether the live connection could be obtained, not
    /// whether the statement succeeded.
    pub fn record(&self, op: &mut Operation) {
        let kind = op.kind();
        let status = Status::from_connection(&op.connection());
        let labels = merge_labels(status.labels(), &self.default_labels);

        for counter in [self.counters.counter(kind), self.counters.all.as_ref()]
            .into_iter()
            .flatten()
        {
            counter.inc(&labels);
        }

        let Some(start) = op.take::<MonotonicTimer>(START_TIME_KEY) else {
            trace!(kind = %kind, "No start time on operation, skipping duration");
            return;
        };

        let elapsed = start.elapsed_millis() as f64;
        for histogram in [self.counters.duration(kind), self.counters.all_duration.as_ref()]
            .into_iter()
            .flatten()
        {
            histogram.observe(&labels, elapsed);
        }

        trace!(kind = %kind, status = %status, elapsed_ms = elapsed, "Recorded operation");
    }
}

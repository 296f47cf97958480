//! ABOUTME: Entry point that instruments a database handle
//! ABOUTME: Wires the hook interceptor and spawns the pool poller for one handle

use std::sync::Arc;
use std::time::Duration;

use qg_config::{
    validate_metric_prefix, MetricsConfig, DEFAULT_CALLBACK_SCOPE, DEFAULT_NAMESPACE,
    DEFAULT_POLL_INTERVAL_MS,
};
use qg_core::{Error, Result};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::callback::{CallbackHandler, ExtraInfo};
use crate::host::Database;
use crate::poller::DatabaseMetrics;
use crate::registry::CollectorRegistry;

/// Options for one registration. Empty strings fall back to the defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginOptions {
    namespace: String,
    callback_scope: String,
    poll_interval: Duration,
}

impl Default for PluginOptions {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            callback_scope: DEFAULT_CALLBACK_SCOPE.to_string(),
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
        }
    }
}

impl PluginOptions {
    /// Metric name prefix
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        let namespace = namespace.into();
        if !namespace.is_empty() {
            self.namespace = namespace;
        }
        self
    }

    /// Hook name prefix
    pub fn with_callback_scope(mut self, scope: impl Into<String>) -> Self {
        let scope = scope.into();
        if !scope.is_empty() {
            self.callback_scope = scope;
        }
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        if !interval.is_zero() {
            self.poll_interval = interval;
        }
        self
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn callback_scope(&self) -> &str {
        &self.callback_scope
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }
}

impl From<&MetricsConfig> for PluginOptions {
    fn from(config: &MetricsConfig) -> Self {
        Self::default()
            .with_namespace(config.namespace.as_str())
            .with_callback_scope(config.callback_scope.as_str())
            .with_poll_interval(config.poll_interval())
    }
}

/// Handle to the instrumentation of one database handle
#[derive(Debug)]
pub struct Instrumentation {
    handler: Arc<CallbackHandler>,
    poller: JoinHandle<()>,
    shutdown: CancellationToken,
}

impl Instrumentation {
    pub fn handler(&self) -> &Arc<CallbackHandler> {
        &self.handler
    }

    pub fn is_polling(&self) -> bool {
        !self.poller.is_finished()
    }

    /// Stop the pool poller and wait for it to exit. Hooks stay registered.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        if let Err(e) = self.poller.await {
            tracing::warn!(error = %e, "Connection pool poller ended abnormally");
        }
    }
}

/// Instrument `db`: register query hooks on its callback chain and start a
/// background task publishing its pool statistics.
///
/// Must be called inside a tokio runtime. The poller runs until
/// [`Instrumentation::shutdown`] is called.
pub fn register_interface(
    registry: &CollectorRegistry,
    db: Option<Arc<dyn Database>>,
    db_name: &str,
    opts: PluginOptions,
) -> Result<Instrumentation> {
    let db = db.ok_or(Error::NilDatabase)?;

    validate_metric_prefix(opts.namespace()).map_err(|_| {
        Error::Config(format!(
            "Invalid metric namespace '{}': must match [a-zA-Z_:][a-zA-Z0-9_:]*",
            opts.namespace()
        ))
    })?;

    let runtime = tokio::runtime::Handle::try_current()
        .map_err(|e| Error::Config(format!("No tokio runtime for pool poller: {}", e)))?;

    let info = ExtraInfo {
        db_name: db_name.to_string(),
        driver_name: db.driver_name().to_string(),
    };

    let handler = CallbackHandler::new(registry, &info, &opts)
        .map(Arc::new)
        .map_err(|e| e.context("could not create callback handler"))?;

    // Built before any hook is attached so a failure leaves the handle untouched
    let db_metrics = DatabaseMetrics::new(registry, Arc::clone(&db), &info, &opts)
        .map_err(|e| e.context("could not create database metrics exporter"))?;

    handler.register(db.callbacks());

    let shutdown = CancellationToken::new();
    let poller = runtime.spawn(db_metrics.maintain_until(shutdown.clone()));

    info!(
        database = %info.db_name,
        driver = %info.driver_name,
        namespace = %opts.namespace(),
        "Database instrumented"
    );

    Ok(Instrumentation {
        handler,
        poller,
        shutdown,
    })
}

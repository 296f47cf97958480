//! ABOUTME: Metrics backend wrapping a prometheus-client registry
//! ABOUTME: Rejects duplicate metric identities and encodes the exposition text

use std::collections::HashSet;
use std::sync::Mutex;

use prometheus_client::{encoding::text::encode, registry::Registry};
use qg_core::{Error, Result};
use tracing::debug;

use crate::collectors::Collector;

#[derive(Debug, Default)]
struct BackendInner {
    registry: Registry,
    names: HashSet<String>,
}

/// Collector registry shared by every instrumented handle.
///
/// Registering a metric name twice is an error, the same way a Prometheus
/// default registry treats it.
#[derive(Debug, Default)]
pub struct MetricsBackend {
    inner: Mutex<BackendInner>,
}

impl MetricsBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, BackendInner>> {
        self.inner
            .lock()
            .map_err(|e| Error::Metrics(format!("Failed to lock metrics registry: {}", e)))
    }

    /// Register a single collector
    pub fn register(&self, collector: &Collector) -> Result<()> {
        self.register_all("standalone", std::slice::from_ref(collector))
    }

    /// Register every collector or none of them.
    ///
    /// All names are checked, against the backend and against each other,
    /// before anything is added. On failure the error carries `family` and
    /// the first conflicting name.
    pub fn register_all(&self, family: &'static str, collectors: &[Collector]) -> Result<()> {
        let mut inner = self.lock()?;

        let mut pending = HashSet::with_capacity(collectors.len());
        for collector in collectors {
            let identity = collector.identity();
            if inner.names.contains(identity) || !pending.insert(identity) {
                return Err(Error::registration(
                    family,
                    Error::AlreadyRegistered(collector.name().to_string()),
                ));
            }
        }

        for collector in collectors {
            collector.register_into(&mut inner.registry);
            inner.names.insert(collector.identity().to_string());
        }

        debug!(family = family, count = collectors.len(), "Registered collectors");
        Ok(())
    }

    /// Number of collectors registered so far
    pub fn registrations(&self) -> usize {
        self.lock().map(|inner| inner.names.len()).unwrap_or(0)
    }

    /// Whether `identity` is taken. Counters are known by their name
    /// without `_total`.
    pub fn is_registered(&self, identity: &str) -> bool {
        self.lock()
            .map(|inner| inner.names.contains(identity))
            .unwrap_or(false)
    }

    /// Render every registered collector in the text exposition format
    pub fn encode(&self) -> Result<String> {
        let inner = self.lock()?;

        let mut buffer = String::new();
        encode(&mut buffer, &inner.registry)
            .map_err(|e| Error::Metrics(format!("Failed to encode metrics: {}", e)))?;

        Ok(buffer)
    }
}

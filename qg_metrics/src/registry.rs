//! ABOUTME: Per-namespace cache of query counters and connection gauges
//! ABOUTME: Ensures each namespace registers its collectors with the backend only once

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use qg_core::{Error, Result};
use tracing::debug;

use crate::backend::MetricsBackend;
use crate::collectors::{DatabaseGauges, QueryCounters};

const FAMILY_QUERY: &str = "query counters";
const FAMILY_DATABASE: &str = "connection gauges";

/// Hands out one [`QueryCounters`] and one [`DatabaseGauges`] per namespace.
///
/// Several handles may be instrumented under the same namespace (for example
/// a primary and its replicas). Only the first request for a namespace
/// creates and registers collectors; later requests get the cached bundle.
#[derive(Debug)]
pub struct CollectorRegistry {
    backend: Arc<MetricsBackend>,
    query: Mutex<HashMap<String, Arc<QueryCounters>>>,
    database: Mutex<HashMap<String, Arc<DatabaseGauges>>>,
}

impl CollectorRegistry {
    pub fn new(backend: Arc<MetricsBackend>) -> Self {
        Self {
            backend,
            query: Mutex::new(HashMap::new()),
            database: Mutex::new(HashMap::new()),
        }
    }

    pub fn backend(&self) -> &Arc<MetricsBackend> {
        &self.backend
    }

    /// Query counters for `namespace`, created and registered on first use
    pub fn query_counters(&self, namespace: &str) -> Result<Arc<QueryCounters>> {
        get_or_create(&self.query, namespace, || {
            let counters = QueryCounters::new(namespace);
            self.backend
                .register_all(FAMILY_QUERY, &counters.collectors())?;
            Ok(counters)
        })
    }

    /// Connection gauges for `namespace`, created and registered on first use
    pub fn database_gauges(&self, namespace: &str) -> Result<Arc<DatabaseGauges>> {
        get_or_create(&self.database, namespace, || {
            let gauges = DatabaseGauges::new(namespace);
            self.backend
                .register_all(FAMILY_DATABASE, &gauges.collectors())?;
            Ok(gauges)
        })
    }

    /// Exposition text for everything registered through this registry's backend
    pub fn encode(&self) -> Result<String> {
        self.backend.encode()
    }
}

impl Default for CollectorRegistry {
    fn default() -> Self {
        Self::new(Arc::new(MetricsBackend::new()))
    }
}

/// The lock is held across `create` so concurrent first requests for one
/// namespace register exactly once. Setup is rare, so serialising it across
/// namespaces is acceptable.
fn get_or_create<T>(
    cache: &Mutex<HashMap<String, Arc<T>>>,
    namespace: &str,
    create: impl FnOnce() -> Result<T>,
) -> Result<Arc<T>> {
    let mut cache = cache
        .lock()
        .map_err(|e| Error::Metrics(format!("Failed to lock collector cache: {}", e)))?;

    if let Some(existing) = cache.get(namespace) {
        return Ok(Arc::clone(existing));
    }

    let created = Arc::new(create()?);
    cache.insert(namespace.to_string(), Arc::clone(&created));
    debug!(namespace = %namespace, "Created collectors for namespace");

    Ok(created)
}

//! ABOUTME: Labelled counter, histogram, and gauge vectors plus the per-namespace bundles
//! ABOUTME: QueryCounters holds ten query collectors, DatabaseGauges holds three pool gauges

use prometheus_client::metrics::{
    counter::Counter, family::Family, gauge::Gauge, histogram::Histogram,
};
use tracing::warn;

use crate::host::OperationKind;
use crate::labels::{Labels, GAUGE_LABELS, QUERY_LABELS};

pub const METRIC_ALL_TOTAL: &str = "all_total";
pub const METRIC_ALL_DURATION: &str = "all_duration";
pub const METRIC_CREATES_TOTAL: &str = "creates_total";
pub const METRIC_CREATES_DURATION: &str = "creates_duration";
pub const METRIC_DELETES_TOTAL: &str = "deletes_total";
pub const METRIC_DELETES_DURATION: &str = "deletes_duration";
pub const METRIC_QUERIES_TOTAL: &str = "queries_total";
pub const METRIC_QUERIES_DURATION: &str = "queries_duration";
pub const METRIC_UPDATES_TOTAL: &str = "updates_total";
pub const METRIC_UPDATES_DURATION: &str = "updates_duration";

pub const METRIC_OPEN_CONNECTIONS: &str = "connections_open";
pub const METRIC_IDLE_CONNECTIONS: &str = "connections_idle";
pub const METRIC_IN_USE_CONNECTIONS: &str = "connections_in_use";

const HELP_ALL_TOTAL: &str = "All queries requested";
const HELP_ALL_DURATION: &str = "Duration in milliseconds of all queries requested";
const HELP_CREATES_TOTAL: &str = "All create queries requested";
const HELP_CREATES_DURATION: &str = "Duration in milliseconds of all create queries requested";
const HELP_DELETES_TOTAL: &str = "All delete queries requested";
const HELP_DELETES_DURATION: &str = "Duration in milliseconds of all delete queries requested";
const HELP_QUERIES_TOTAL: &str = "All select queries requested";
const HELP_QUERIES_DURATION: &str = "Duration in milliseconds of all select queries requested";
const HELP_UPDATES_TOTAL: &str = "All update queries requested";
const HELP_UPDATES_DURATION: &str = "Duration in milliseconds of all update queries requested";

const HELP_OPEN_CONNECTIONS: &str = "Currently open connections to the database";
const HELP_IDLE_CONNECTIONS: &str = "Currently idle connections to the database";
const HELP_IN_USE_CONNECTIONS: &str = "Currently in use connections";

/// Histogram buckets for operation duration, in milliseconds
pub const DURATION_BUCKETS_MS: &[f64] = &[
    1.0, 2.5, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0, 10000.0,
];

/// Encoded label set, sorted by label name
type LabelSet = Vec<(String, String)>;

fn duration_histogram() -> Histogram {
    Histogram::new(DURATION_BUCKETS_MS.iter().copied())
}

/// Checks `labels` against a fixed schema and converts it to a family key.
fn label_set(metric: &str, schema: &[&str], labels: &Labels) -> Option<LabelSet> {
    let matches =
        labels.len() == schema.len() && schema.iter().all(|name| labels.contains_key(*name));

    if !matches {
        warn!(
            metric = %metric,
            expected = ?schema,
            got = ?labels.keys().collect::<Vec<_>>(),
            "Label set does not match collector schema, dropping observation"
        );
        return None;
    }

    Some(
        labels
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
    )
}

/// Monotonic counter partitioned by a fixed label schema
#[derive(Debug, Clone)]
pub struct CounterVec {
    name: String,
    help: &'static str,
    schema: &'static [&'static str],
    family: Family<LabelSet, Counter>,
}

impl CounterVec {
    /// `name` is the exposed sample name and should end in `_total`
    pub fn new(name: impl Into<String>, help: &'static str, schema: &'static [&'static str]) -> Self {
        Self {
            name: name.into(),
            help,
            schema,
            family: Family::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Increment the child for `labels` by one. Returns false if the labels
    /// don't fit the schema.
    pub fn inc(&self, labels: &Labels) -> bool {
        match label_set(&self.name, self.schema, labels) {
            Some(set) => {
                self.family.get_or_create(&set).inc();
                true
            }
            None => false,
        }
    }
}

/// Distribution of observed values partitioned by a fixed label schema
#[derive(Debug, Clone)]
pub struct HistogramVec {
    name: String,
    help: &'static str,
    schema: &'static [&'static str],
    family: Family<LabelSet, Histogram, fn() -> Histogram>,
}

impl HistogramVec {
    pub fn new(name: impl Into<String>, help: &'static str, schema: &'static [&'static str]) -> Self {
        Self {
            name: name.into(),
            help,
            schema,
            family: Family::new_with_constructor(duration_histogram as fn() -> Histogram),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn observe(&self, labels: &Labels, value: f64) -> bool {
        match label_set(&self.name, self.schema, labels) {
            Some(set) => {
                self.family.get_or_create(&set).observe(value);
                true
            }
            None => false,
        }
    }
}

/// Point-in-time value partitioned by a fixed label schema
#[derive(Debug, Clone)]
pub struct GaugeVec {
    name: String,
    help: &'static str,
    schema: &'static [&'static str],
    family: Family<LabelSet, Gauge>,
}

impl GaugeVec {
    pub fn new(name: impl Into<String>, help: &'static str, schema: &'static [&'static str]) -> Self {
        Self {
            name: name.into(),
            help,
            schema,
            family: Family::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set(&self, labels: &Labels, value: i64) -> bool {
        match label_set(&self.name, self.schema, labels) {
            Some(set) => {
                self.family.get_or_create(&set).set(value);
                true
            }
            None => false,
        }
    }
}

/// Any collector the backend knows how to register
#[derive(Debug, Clone)]
pub enum Collector {
    Counter(CounterVec),
    Histogram(HistogramVec),
    Gauge(GaugeVec),
}

impl Collector {
    /// Identity as exposed to scrapers
    pub fn name(&self) -> &str {
        match self {
            Collector::Counter(c) => c.name(),
            Collector::Histogram(h) => h.name(),
            Collector::Gauge(g) => g.name(),
        }
    }

    /// Name the collector is registered under. The text encoder appends
    /// `_total` to counters itself, so `app_creates_total` and `app_creates`
    /// share one identity.
    pub fn identity(&self) -> &str {
        match self {
            Collector::Counter(c) => c.name.strip_suffix("_total").unwrap_or(&c.name),
            Collector::Histogram(h) => &h.name,
            Collector::Gauge(g) => &g.name,
        }
    }

    pub(crate) fn register_into(&self, registry: &mut prometheus_client::registry::Registry) {
        let identity = self.identity();
        match self {
            Collector::Counter(c) => registry.register(identity, c.help, c.family.clone()),
            Collector::Histogram(h) => registry.register(identity, h.help, h.family.clone()),
            Collector::Gauge(g) => registry.register(identity, g.help, g.family.clone()),
        }
    }
}

fn metric_name(namespace: &str, metric: &str) -> String {
    format!("{}_{}", namespace, metric)
}

/// Counters and duration histograms for every operation kind plus the
/// aggregate. A field left as `None` is skipped when recording.
#[derive(Debug, Clone, Default)]
pub struct QueryCounters {
    pub all: Option<CounterVec>,
    pub all_duration: Option<HistogramVec>,
    pub creates: Option<CounterVec>,
    pub creates_duration: Option<HistogramVec>,
    pub deletes: Option<CounterVec>,
    pub deletes_duration: Option<HistogramVec>,
    pub queries: Option<CounterVec>,
    pub queries_duration: Option<HistogramVec>,
    pub updates: Option<CounterVec>,
    pub updates_duration: Option<HistogramVec>,
}

impl QueryCounters {
    /// Build the full set of collectors for `namespace`, unregistered
    pub fn new(namespace: &str) -> Self {
        let counter = |metric: &str, help: &'static str| {
            Some(CounterVec::new(metric_name(namespace, metric), help, QUERY_LABELS))
        };
        let histogram = |metric: &str, help: &'static str| {
            Some(HistogramVec::new(metric_name(namespace, metric), help, QUERY_LABELS))
        };

        Self {
            all: counter(METRIC_ALL_TOTAL, HELP_ALL_TOTAL),
            all_duration: histogram(METRIC_ALL_DURATION, HELP_ALL_DURATION),
            creates: counter(METRIC_CREATES_TOTAL, HELP_CREATES_TOTAL),
            creates_duration: histogram(METRIC_CREATES_DURATION, HELP_CREATES_DURATION),
            deletes: counter(METRIC_DELETES_TOTAL, HELP_DELETES_TOTAL),
            deletes_duration: histogram(METRIC_DELETES_DURATION, HELP_DELETES_DURATION),
            queries: counter(METRIC_QUERIES_TOTAL, HELP_QUERIES_TOTAL),
            queries_duration: histogram(METRIC_QUERIES_DURATION, HELP_QUERIES_DURATION),
            updates: counter(METRIC_UPDATES_TOTAL, HELP_UPDATES_TOTAL),
            updates_duration: histogram(METRIC_UPDATES_DURATION, HELP_UPDATES_DURATION),
        }
    }

    pub fn counter(&self, kind: OperationKind) -> Option<&CounterVec> {
        match kind {
            OperationKind::Create => self.creates.as_ref(),
            OperationKind::Delete => self.deletes.as_ref(),
            OperationKind::Query => self.queries.as_ref(),
            OperationKind::Update => self.updates.as_ref(),
        }
    }

    pub fn duration(&self, kind: OperationKind) -> Option<&HistogramVec> {
        match kind {
            OperationKind::Create => self.creates_duration.as_ref(),
            OperationKind::Delete => self.deletes_duration.as_ref(),
            OperationKind::Query => self.queries_duration.as_ref(),
            OperationKind::Update => self.updates_duration.as_ref(),
        }
    }

    /// Every collector that is set, in registration order
    pub fn collectors(&self) -> Vec<Collector> {
        let counters = [
            &self.all,
            &self.creates,
            &self.deletes,
            &self.queries,
            &self.updates,
        ];
        let histograms = [
            &self.all_duration,
            &self.creates_duration,
            &self.deletes_duration,
            &self.queries_duration,
            &self.updates_duration,
        ];

        counters
            .into_iter()
            .zip(histograms)
            .flat_map(|(c, h)| {
                [
                    c.clone().map(Collector::Counter),
                    h.clone().map(Collector::Histogram),
                ]
            })
            .flatten()
            .collect()
    }
}

/// Gauges mirroring the connection pool of instrumented handles
#[derive(Debug, Clone)]
pub struct DatabaseGauges {
    pub open: GaugeVec,
    pub idle: GaugeVec,
    pub in_use: GaugeVec,
}

impl DatabaseGauges {
    pub fn new(namespace: &str) -> Self {
        let gauge = |metric: &str, help: &'static str| {
            GaugeVec::new(metric_name(namespace, metric), help, GAUGE_LABELS)
        };

        Self {
            open: gauge(METRIC_OPEN_CONNECTIONS, HELP_OPEN_CONNECTIONS),
            idle: gauge(METRIC_IDLE_CONNECTIONS, HELP_IDLE_CONNECTIONS),
            in_use: gauge(METRIC_IN_USE_CONNECTIONS, HELP_IN_USE_CONNECTIONS),
        }
    }

    pub fn collectors(&self) -> Vec<Collector> {
        vec![
            Collector::Gauge(self.open.clone()),
            Collector::Gauge(self.idle.clone()),
            Collector::Gauge(self.in_use.clone()),
        ]
    }
}

//! ABOUTME: Query and connection pool metrics for instrumented database handles
//! ABOUTME: Registry, hook interceptor, and pool poller built on prometheus-client
//!
//! Operations on an instrumented handle are counted per kind and in
//! aggregate, labelled with `database`, `driver`, and `status`. `status` is
//! `fail` only when the operation's live connection could not be obtained;
//! a statement that errors on a healthy connection is still a `success`.

pub mod backend;
pub mod callback;
pub mod collectors;
pub mod host;
pub mod labels;
pub mod plugin;
pub mod poller;
pub mod registry;

pub use backend::MetricsBackend;
pub use callback::{CallbackHandler, ExtraInfo};
pub use collectors::{DatabaseGauges, QueryCounters};
pub use host::{Callbacks, Database, Operation, OperationKind, PoolStats};
pub use labels::{merge_labels, Labels, Status};
pub use plugin::{register_interface, Instrumentation, PluginOptions};
pub use poller::DatabaseMetrics;
pub use registry::CollectorRegistry;

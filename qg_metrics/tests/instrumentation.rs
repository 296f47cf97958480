//! ABOUTME: End-to-end tests for instrumenting a database handle
//! ABOUTME: Drives operations through the hook chain and reads the exposition text

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use qg_core::{Error, Result};
use qg_metrics::{
    register_interface, Callbacks, CollectorRegistry, Database, Operation, OperationKind,
    PluginOptions, PoolStats,
};
use test_support::{render_labels, sample, sample_sum};

/// In-memory handle that runs operations through its hook chain
struct FakeDatabase {
    callbacks: Callbacks,
    driver: &'static str,
    stats: Mutex<Option<PoolStats>>,
}

impl FakeDatabase {
    fn new(driver: &'static str) -> Arc<Self> {
        Arc::new(Self {
            callbacks: Callbacks::new(),
            driver,
            stats: Mutex::new(None),
        })
    }

    fn set_stats(&self, stats: PoolStats) {
        *self.stats.lock().unwrap() = Some(stats);
    }

    /// Run one operation; `connected` controls the live connection accessor
    fn perform(&self, kind: OperationKind, connected: bool) {
        let mut op = Operation::new(kind);
        self.callbacks.run_before(&mut op);
        if !connected {
            op.fail_connection("connection refused");
        }
        self.callbacks.run_after(&mut op);
    }

    /// Run one operation without its before-hooks
    fn perform_after_only(&self, kind: OperationKind) {
        let mut op = Operation::new(kind);
        self.callbacks.run_after(&mut op);
    }
}

impl Database for FakeDatabase {
    fn callbacks(&self) -> &Callbacks {
        &self.callbacks
    }

    fn driver_name(&self) -> &str {
        self.driver
    }

    fn pool_stats(&self) -> Result<PoolStats> {
        self.stats
            .lock()
            .unwrap()
            .ok_or_else(|| Error::Connection("pool not ready".to_string()))
    }
}

fn handle(db: &Arc<FakeDatabase>) -> Option<Arc<dyn Database>> {
    Some(Arc::clone(db) as Arc<dyn Database>)
}

fn app_options() -> PluginOptions {
    PluginOptions::default()
        .with_namespace("app")
        .with_poll_interval(Duration::from_secs(1))
}

fn query_labels(db: &str, status: &str) -> String {
    render_labels(&[("database", db), ("driver", "pg"), ("status", status)])
}

#[tokio::test]
async fn three_creates_with_one_connection_failure() {
    let registry = CollectorRegistry::default();
    let db = FakeDatabase::new("pg");
    let _instrumentation =
        register_interface(&registry, handle(&db), "main", app_options()).unwrap();

    db.perform(OperationKind::Create, true);
    db.perform(OperationKind::Create, false);
    db.perform(OperationKind::Create, true);

    let text = registry.encode().unwrap();
    assert_eq!(
        sample(&text, "app_creates_total", &query_labels("main", "success")),
        Some(2.0)
    );
    assert_eq!(
        sample(&text, "app_creates_total", &query_labels("main", "fail")),
        Some(1.0)
    );
    assert_eq!(sample_sum(&text, "app_all_total", &[]), 3.0);
    assert_eq!(sample_sum(&text, "app_creates_duration_count", &[]), 3.0);
    assert_eq!(sample_sum(&text, "app_all_duration_count", &[]), 3.0);
}

#[tokio::test]
async fn counters_add_up_per_kind_and_in_aggregate() {
    let registry = CollectorRegistry::default();
    let db = FakeDatabase::new("pg");
    let _instrumentation =
        register_interface(&registry, handle(&db), "main", app_options()).unwrap();

    let plan = [
        (OperationKind::Query, 5, 4),
        (OperationKind::Update, 3, 1),
        (OperationKind::Delete, 2, 2),
    ];
    for (kind, total, successes) in plan {
        for i in 0..total {
            db.perform(kind, i < successes);
        }
    }

    let text = registry.encode().unwrap();
    for (metric, total, successes) in [
        ("app_queries_total", 5.0, 4.0),
        ("app_updates_total", 3.0, 1.0),
        ("app_deletes_total", 2.0, 2.0),
    ] {
        assert_eq!(
            sample_sum(&text, metric, &["status=\"success\""]),
            successes,
            "{}",
            metric
        );
        assert_eq!(
            sample_sum(&text, metric, &["status=\"fail\""]),
            total - successes,
            "{}",
            metric
        );
    }
    assert_eq!(sample_sum(&text, "app_all_total", &[]), 10.0);
    assert_eq!(sample_sum(&text, "app_creates_total", &[]), 0.0);

    // no status value other than success and fail ever appears
    let statuses = sample_sum(&text, "app_all_total", &["status=\"success\""])
        + sample_sum(&text, "app_all_total", &["status=\"fail\""]);
    assert_eq!(statuses, 10.0);
}

#[tokio::test]
async fn after_hook_without_before_hook_records_no_duration() {
    let registry = CollectorRegistry::default();
    let db = FakeDatabase::new("pg");
    let _instrumentation =
        register_interface(&registry, handle(&db), "main", app_options()).unwrap();

    db.perform_after_only(OperationKind::Update);

    let text = registry.encode().unwrap();
    assert_eq!(sample_sum(&text, "app_updates_total", &[]), 1.0);
    assert_eq!(sample_sum(&text, "app_updates_duration_count", &[]), 0.0);
    assert_eq!(sample_sum(&text, "app_all_duration_count", &[]), 0.0);
}

#[tokio::test]
async fn handles_sharing_a_namespace_share_collectors() {
    let registry = CollectorRegistry::default();
    let primary = FakeDatabase::new("pg");
    let replica = FakeDatabase::new("pg");

    let first =
        register_interface(&registry, handle(&primary), "primary", app_options()).unwrap();
    let second =
        register_interface(&registry, handle(&replica), "replica", app_options()).unwrap();

    assert!(Arc::ptr_eq(
        first.handler().counters(),
        second.handler().counters()
    ));
    assert_eq!(registry.backend().registrations(), 13);

    primary.perform(OperationKind::Query, true);
    replica.perform(OperationKind::Query, true);
    replica.perform(OperationKind::Query, true);

    let text = registry.encode().unwrap();
    assert_eq!(
        sample(&text, "app_queries_total", &query_labels("primary", "success")),
        Some(1.0)
    );
    assert_eq!(
        sample(&text, "app_queries_total", &query_labels("replica", "success")),
        Some(2.0)
    );
}

#[tokio::test(start_paused = true)]
async fn poller_publishes_pool_statistics() {
    let registry = CollectorRegistry::default();
    let db = FakeDatabase::new("pg");
    let instrumentation =
        register_interface(&registry, handle(&db), "main", app_options()).unwrap();

    // the first ticks fail until the pool reports statistics
    tokio::time::sleep(Duration::from_millis(1500)).await;
    db.set_stats(PoolStats {
        open: 10,
        idle: 4,
        in_use: 6,
    });
    tokio::time::sleep(Duration::from_secs(1)).await;

    let text = registry.encode().unwrap();
    let labels = render_labels(&[("database", "main"), ("driver", "pg")]);
    assert_eq!(sample(&text, "app_connections_open", &labels), Some(10.0));
    assert_eq!(sample(&text, "app_connections_idle", &labels), Some(4.0));
    assert_eq!(sample(&text, "app_connections_in_use", &labels), Some(6.0));

    assert!(instrumentation.is_polling());
    instrumentation.shutdown().await;
}

#[tokio::test]
async fn gauge_collision_leaves_handle_unhooked() {
    let registry = CollectorRegistry::default();
    registry
        .backend()
        .register(&qg_metrics::collectors::Collector::Gauge(
            qg_metrics::collectors::GaugeVec::new(
                "app_connections_idle",
                "registered elsewhere",
                qg_metrics::labels::GAUGE_LABELS,
            ),
        ))
        .unwrap();
    let db = FakeDatabase::new("pg");

    let err = register_interface(&registry, handle(&db), "main", app_options()).unwrap_err();

    assert!(matches!(
        err,
        Error::Registration {
            family: "connection gauges",
            ..
        }
    ));
    assert!(err.to_string().contains("app_connections_idle"));
    assert!(db.callbacks().names(OperationKind::Create).is_empty());
}

#[tokio::test]
async fn concurrent_operations_are_all_counted() {
    let registry = CollectorRegistry::default();
    let db = FakeDatabase::new("pg");
    let _instrumentation =
        register_interface(&registry, handle(&db), "main", app_options()).unwrap();

    let workers: Vec<_> = (0..8)
        .map(|worker| {
            let db = Arc::clone(&db);
            thread::spawn(move || {
                for i in 0..250 {
                    let kind = OperationKind::ALL[(worker + i) % OperationKind::ALL.len()];
                    db.perform(kind, i % 10 != 0);
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    let text = registry.encode().unwrap();
    assert_eq!(sample_sum(&text, "app_all_total", &[]), 2000.0);
    assert_eq!(
        sample_sum(&text, "app_all_total", &["status=\"fail\""]),
        200.0
    );
    assert_eq!(sample_sum(&text, "app_all_duration_count", &[]), 2000.0);
}

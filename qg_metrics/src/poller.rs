//! ABOUTME: Background task that republishes connection pool statistics as gauges
//! ABOUTME: Samples one handle on a fixed interval until shut down

use std::sync::Arc;
use std::time::Duration;

use qg_core::Result;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::callback::ExtraInfo;
use crate::collectors::DatabaseGauges;
use crate::host::{Database, PoolStats};
use crate::labels::Labels;
use crate::plugin::PluginOptions;
use crate::registry::CollectorRegistry;

/// Exports pool statistics of one database handle
pub struct DatabaseMetrics {
    db: Arc<dyn Database>,
    gauges: Arc<DatabaseGauges>,
    labels: Labels,
    interval: Duration,
}

impl DatabaseMetrics {
    pub fn new(
        registry: &CollectorRegistry,
        db: Arc<dyn Database>,
        info: &ExtraInfo,
        opts: &PluginOptions,
    ) -> Result<Self> {
        let gauges = registry
            .database_gauges(opts.namespace())
            .map_err(|e| e.context("could not create database gauges"))?;

        Ok(Self {
            db,
            gauges,
            labels: info.labels(),
            interval: opts.poll_interval(),
        })
    }

    pub fn gauges(&self) -> &Arc<DatabaseGauges> {
        &self.gauges
    }

    /// Read pool statistics once and publish them
    pub fn sample(&self) -> Result<PoolStats> {
        let stats = self.db.pool_stats()?;

        self.gauges.open.set(&self.labels, stats.open);
        self.gauges.idle.set(&self.labels, stats.idle);
        self.gauges.in_use.set(&self.labels, stats.in_use);

        Ok(stats)
    }

    fn tick(&self) {
        match self.sample() {
            Ok(stats) => debug!(
                open = stats.open,
                idle = stats.idle,
                in_use = stats.in_use,
                "Sampled connection pool"
            ),
            Err(e) => warn!(error = %e, "Failed to read connection pool statistics"),
        }
    }

    /// Sample forever
    pub async fn maintain(self) {
        self.maintain_until(CancellationToken::new()).await
    }

    /// Sample on every interval tick until `shutdown` is cancelled. A failed
    /// sample leaves the gauges at their last value.
    pub async fn maintain_until(self, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    info!("Connection pool poller stopped");
                    break;
                }
                _ = ticker.tick() => self.tick(),
            }
        }
    }

    /// Run [`DatabaseMetrics::maintain_until`] as a detached tokio task
    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.maintain_until(shutdown))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::Callbacks;
    use qg_core::Error;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use test_support::sample;

    const LABELS: &str = "database=\"main\",driver=\"pg\"";

    /// Replays scripted pool readings, then repeats the last one
    struct ScriptedPool {
        callbacks: Callbacks,
        readings: Mutex<VecDeque<Result<PoolStats>>>,
        polls: Mutex<usize>,
    }

    impl ScriptedPool {
        fn new(readings: Vec<Result<PoolStats>>) -> Arc<Self> {
            Arc::new(Self {
                callbacks: Callbacks::new(),
                readings: Mutex::new(readings.into()),
                polls: Mutex::new(0),
            })
        }

        fn polls(&self) -> usize {
            *self.polls.lock().unwrap()
        }
    }

    impl Database for ScriptedPool {
        fn callbacks(&self) -> &Callbacks {
            &self.callbacks
        }

        fn driver_name(&self) -> &str {
            "pg"
        }

        fn pool_stats(&self) -> Result<PoolStats> {
            *self.polls.lock().unwrap() += 1;
            let mut readings = self.readings.lock().unwrap();
            if readings.len() > 1 {
                readings.pop_front().unwrap()
            } else {
                match readings.front() {
                    Some(Ok(stats)) => Ok(*stats),
                    Some(Err(e)) => Err(Error::Database(e.to_string())),
                    None => Ok(PoolStats::default()),
                }
            }
        }
    }

    fn info() -> ExtraInfo {
        ExtraInfo {
            db_name: "main".to_string(),
            driver_name: "pg".to_string(),
        }
    }

    fn stats(open: i64, idle: i64, in_use: i64) -> PoolStats {
        PoolStats { open, idle, in_use }
    }

    fn poller(registry: &CollectorRegistry, db: Arc<ScriptedPool>) -> DatabaseMetrics {
        let opts = PluginOptions::default()
            .with_namespace("app")
            .with_poll_interval(Duration::from_secs(1));
        DatabaseMetrics::new(registry, db, &info(), &opts).unwrap()
    }

    #[test]
    fn test_sample_sets_gauges() {
        let registry = CollectorRegistry::default();
        let db = ScriptedPool::new(vec![Ok(stats(10, 4, 6))]);

        let stats = poller(&registry, db).sample().unwrap();
        assert_eq!(stats.open, 10);

        let text = registry.encode().unwrap();
        assert_eq!(sample(&text, "app_connections_open", LABELS), Some(10.0));
        assert_eq!(sample(&text, "app_connections_idle", LABELS), Some(4.0));
        assert_eq!(sample(&text, "app_connections_in_use", LABELS), Some(6.0));
    }

    #[test]
    fn test_failed_sample_keeps_last_value() {
        let registry = CollectorRegistry::default();
        let db = ScriptedPool::new(vec![
            Ok(stats(3, 1, 2)),
            Err(Error::Connection("pool closed".to_string())),
        ]);
        let metrics = poller(&registry, db);

        metrics.sample().unwrap();
        assert!(metrics.sample().is_err());

        let text = registry.encode().unwrap();
        assert_eq!(sample(&text, "app_connections_open", LABELS), Some(3.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_survives_errors_until_shutdown() {
        let registry = CollectorRegistry::default();
        let db = ScriptedPool::new(vec![
            Err(Error::Connection("not ready".to_string())),
            Ok(stats(5, 5, 0)),
            Err(Error::Connection("blip".to_string())),
            Ok(stats(8, 2, 6)),
        ]);
        let shutdown = CancellationToken::new();
        let handle = poller(&registry, Arc::clone(&db)).spawn(shutdown.clone());

        // paused clock auto-advances; ticks at 0s, 1s, 2s, 3s, 4s
        tokio::time::sleep(Duration::from_millis(4500)).await;

        assert_eq!(db.polls(), 5);
        let text = registry.encode().unwrap();
        assert_eq!(sample(&text, "app_connections_open", LABELS), Some(8.0));
        assert_eq!(sample(&text, "app_connections_in_use", LABELS), Some(6.0));

        shutdown.cancel();
        handle.await.unwrap();
    }
}

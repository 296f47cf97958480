//! ABOUTME: Sample workload that exercises an instrumented SQLite handle
//! ABOUTME: Returns the exposition text once the pool poller has sampled

use std::sync::Arc;

use qg_config::Config;
use qg_core::Result;
use qg_metrics::{CollectorRegistry, PluginOptions};
use qg_sqlx::SqliteDatabase;
use tracing::{info, warn};

/// Instrument the configured database, run `iterations` rounds of
/// insert/update/select/delete, wait one poll interval, and return the
/// encoded metrics.
pub async fn run(config: &Config, iterations: u32) -> Result<String> {
    let registry = CollectorRegistry::default();
    let db = Arc::new(SqliteDatabase::from_config(&config.database).await?);

    let instrumentation = qg_sqlx::instrument(
        &registry,
        &db,
        &config.database.name,
        PluginOptions::from(&config.metrics),
    )?;

    db.create("CREATE TABLE IF NOT EXISTS readings (id INTEGER PRIMARY KEY, value INTEGER NOT NULL)")
        .await?;

    for i in 0..iterations {
        db.create(&format!("INSERT INTO readings (value) VALUES ({})", i))
            .await?;
        db.update(&format!("UPDATE readings SET value = value + 1 WHERE value = {}", i))
            .await?;
        db.query("SELECT id, value FROM readings").await?;
        if i % 2 == 1 {
            db.delete(&format!("DELETE FROM readings WHERE value = {}", i + 1))
                .await?;
        }
    }

    // A statement error still counts as a successful operation
    if let Err(e) = db.query("SELECT * FROM no_such_table").await {
        warn!(error = %e, "Expected statement failure");
    }

    info!(iterations, "Workload finished, waiting for pool sample");
    tokio::time::sleep(config.metrics.poll_interval()).await;

    let text = registry.encode()?;
    instrumentation.shutdown().await;
    Ok(text)
}

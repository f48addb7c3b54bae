//! Background revalidation loop
//!
//! One long-lived task per process. Each cycle batch-refreshes every
//! registered key through the engine, then sleeps for the configured
//! interval. Refresh failures are already folded into the report by the
//! engine, so nothing here can terminate the loop short of the shutdown
//! signal.
//!
//! Running this in every replica is safe but multiplies upstream batches;
//! deployments that care should dedicate one replica to it.

use crate::engine::RateCacheEngine;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info};

pub async fn run(
    engine: Arc<RateCacheEngine>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(interval_secs = interval.as_secs(), "revalidator started");

    loop {
        let report = engine.refresh_all().await;
        if report.updated > 0 || report.errors > 0 {
            info!(
                updated = report.updated,
                errors = report.errors,
                "revalidation cycle finished"
            );
        } else {
            debug!("revalidation cycle found nothing to refresh");
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown.changed() => {
                info!("revalidator shutting down");
                return;
            }
        }
    }
}

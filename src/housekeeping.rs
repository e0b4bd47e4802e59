//! Housekeeping scheduler. Cron-driven, single-writer: exactly one broker
//! instance in a deployment should be configured with `run_housekeeping`,
//! the rest leave it unset and never touch this module. Each tick lists
//! snapshots owned by this broker older than the retention window and
//! deletes them; a failure is logged and the next tick proceeds normally,
//! the same swallow-and-continue discipline as [`crate::broker::rotation`].

use std::str::FromStr;
use std::time::Duration as StdDuration;

use chrono::{Duration, Utc};
use cron::Schedule;
use tracing::{error, info, warn};

use crate::broker::BrokerContext;
use crate::error::BrokerError;
use crate::provider::ListSnapshotsFilter;

/// Parses `cron_schedule` once at startup so a malformed expression fails
/// fast rather than silently never firing.
pub fn parse_schedule(cron_schedule: &str) -> Result<Schedule, BrokerError> {
    Schedule::from_str(cron_schedule)
        .map_err(|err| BrokerError::BadConfig(format!("invalid cron_schedule {cron_schedule:?}: {err}")))
}

/// Runs forever, sleeping between ticks according to `schedule`. Intended to
/// be spawned as its own task; never returns under normal operation.
pub async fn run(ctx: &BrokerContext, schedule: &Schedule, keep_snapshots_for_days: i64) {
    loop {
        let now = Utc::now();
        let Some(next) = schedule.after(&now).next() else {
            error!("cron schedule has no future occurrences, housekeeping is stuck");
            return;
        };
        let wait = next.signed_duration_since(now).to_std().unwrap_or(StdDuration::ZERO);
        tokio::time::sleep(wait).await;

        if let Err(err) = run_once(ctx, keep_snapshots_for_days).await {
            warn!(error = %err, "housekeeping tick failed, will retry next schedule");
        }
    }
}

async fn run_once(ctx: &BrokerContext, keep_snapshots_for_days: i64) -> Result<(), BrokerError> {
    let older_than = Utc::now() - Duration::days(keep_snapshots_for_days);
    let filter = ListSnapshotsFilter {
        broker_name: ctx.settings.broker_name.clone(),
        older_than,
    };
    let expired = ctx.provider.list_snapshots(&filter).await?;
    if expired.is_empty() {
        return Ok(());
    }
    info!(count = expired.len(), "housekeeping reaping expired snapshots");
    for snapshot in expired {
        if let Err(err) = ctx.provider.delete_snapshot(&snapshot.id).await {
            warn!(snapshot_id = %snapshot.id, error = %err, "failed to delete expired snapshot");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_five_field_unix_cron() {
        assert!(parse_schedule("0 */6 * * *").is_err());
    }

    #[test]
    fn accepts_six_field_cron_with_seconds() {
        assert!(parse_schedule("0 0 */6 * * *").is_ok());
    }

    #[tokio::test]
    async fn run_once_deletes_expired_snapshots() {
        use crate::broker::deprovision;
        use crate::fixtures::{seed_instance, test_broker_context};
        use crate::provider::{ListSnapshotsFilter, ProviderAdapter};

        let ctx = test_broker_context();
        seed_instance(&ctx, "instance-1").await;
        deprovision(&ctx, "instance-1", "svc-1", "postgres-micro")
            .await
            .unwrap();

        run_once(&ctx, 0).await.unwrap();

        let remaining = ctx
            .provider
            .list_snapshots(&ListSnapshotsFilter {
                broker_name: ctx.settings.broker_name.clone(),
                older_than: Utc::now(),
            })
            .await
            .unwrap();
        assert!(remaining.is_empty());
    }
}

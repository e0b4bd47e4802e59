//! End-to-end scenarios exercising Broker Core's full request lifecycle
//! against fakes, in the style of `coredb-operator`'s fixture-backed
//! reconciler tests — no real AWS or SQL connection, since acting as a
//! database driver or the cloud provider API is out of scope here.

use std::sync::Arc;

use crate::broker::{
    bind, deprovision, last_operation, provision, run_credential_check, unbind, update,
    BindParams, LastOperationRequest, ProvisionOutcome, ProvisionParams, ReportedState,
    UpdateOutcome, UpdateParams,
};
use crate::credentials::derive_master_password;
use crate::fixtures::{
    broker_context_sharing, seed_instance, test_broker_context_with_seed,
    test_broker_context_with_sql_factory, FakeProvider, FakeSqlEngineFactory,
};
use crate::provider::ListSnapshotsFilter;
use crate::tags;

const SERVICE_ID: &str = "svc-1";
const PLAN_ID: &str = "postgres-micro";

async fn poll_until_succeeded(ctx: &crate::broker::BrokerContext, instance_id: &str, operation: &str) {
    for _ in 0..5 {
        let response = last_operation(
            ctx,
            LastOperationRequest {
                instance_id: instance_id.to_owned(),
                service_id: Some(SERVICE_ID.to_owned()),
                plan_id: Some(PLAN_ID.to_owned()),
                operation: operation.to_owned(),
            },
        )
        .await
        .unwrap();
        match response.state {
            ReportedState::Succeeded => return,
            ReportedState::InProgress => continue,
            other => panic!("unexpected last_operation state {other:?}"),
        }
    }
    panic!("instance {instance_id:?} did not reach succeeded within the poll budget");
}

#[tokio::test]
async fn provision_bind_unbind_bind_round_trip() {
    let ctx = test_broker_context_with_seed("seed-1");

    let outcome = provision(&ctx, "instance-1", SERVICE_ID, PLAN_ID, ProvisionParams::default())
        .await
        .unwrap();
    let ProvisionOutcome::Accepted(accepted) = outcome else {
        panic!("expected an accepted async op");
    };
    poll_until_succeeded(&ctx, "instance-1", &accepted.token()).await;

    let first_bind = bind(&ctx, "instance-1", "binding-1", BindParams::default())
        .await
        .unwrap();
    assert!(first_bind.uri.starts_with("postgres://"));

    unbind(&ctx, "instance-1", "binding-1").await.unwrap();

    let second_bind = bind(&ctx, "instance-1", "binding-1", BindParams::default())
        .await
        .unwrap();
    assert!(second_bind.uri.starts_with("postgres://"));
    assert_ne!(first_bind.password, second_bind.password);
}

#[tokio::test]
async fn deprovision_with_skip_final_snapshot_leaves_no_final_snapshot() {
    let ctx = test_broker_context_with_seed("seed-1");
    let outcome = provision(
        &ctx,
        "instance-2",
        SERVICE_ID,
        PLAN_ID,
        ProvisionParams {
            skip_final_snapshot: Some(true),
            ..Default::default()
        },
    )
    .await
    .unwrap();
    let ProvisionOutcome::Accepted(accepted) = outcome else {
        panic!("expected an accepted async op");
    };
    poll_until_succeeded(&ctx, "instance-2", &accepted.token()).await;

    deprovision(&ctx, "instance-2", SERVICE_ID, PLAN_ID).await.unwrap();

    let snapshots = ctx
        .provider
        .list_snapshots(&ListSnapshotsFilter {
            broker_name: ctx.settings.broker_name.clone(),
            older_than: chrono::Utc::now() + chrono::Duration::days(1),
        })
        .await
        .unwrap();
    assert!(snapshots.is_empty());
}

#[tokio::test]
async fn update_to_skip_final_snapshot_overrides_the_plan_default_at_deprovision() {
    let ctx = test_broker_context_with_seed("seed-1");
    let outcome = provision(&ctx, "instance-3", SERVICE_ID, PLAN_ID, ProvisionParams::default())
        .await
        .unwrap();
    let ProvisionOutcome::Accepted(accepted) = outcome else {
        panic!("expected an accepted async op");
    };
    poll_until_succeeded(&ctx, "instance-3", &accepted.token()).await;

    let outcome = update(
        &ctx,
        "instance-3",
        SERVICE_ID,
        PLAN_ID,
        UpdateParams {
            skip_final_snapshot: Some(true),
            ..Default::default()
        },
    )
    .await
    .unwrap();
    assert!(matches!(outcome, UpdateOutcome::CompletedSynchronously));

    deprovision(&ctx, "instance-3", SERVICE_ID, PLAN_ID).await.unwrap();

    let snapshots = ctx
        .provider
        .list_snapshots(&ListSnapshotsFilter {
            broker_name: ctx.settings.broker_name.clone(),
            older_than: chrono::Utc::now() + chrono::Duration::days(1),
        })
        .await
        .unwrap();
    assert!(snapshots.is_empty());
}

#[tokio::test]
async fn provision_applies_the_plans_default_extensions() {
    let (ctx, sql_engines) = test_broker_context_with_sql_factory("seed-1");
    let outcome = provision(&ctx, "instance-4", SERVICE_ID, PLAN_ID, ProvisionParams::default())
        .await
        .unwrap();
    let ProvisionOutcome::Accepted(accepted) = outcome else {
        panic!("expected an accepted async op");
    };
    poll_until_succeeded(&ctx, "instance-4", &accepted.token()).await;

    let enabled = sql_engines.enabled_extensions("instance-4");
    assert!(enabled.contains("uuid-ossp"));
}

#[tokio::test]
async fn enabling_then_disabling_an_extension_both_require_reboot_true_and_succeed() {
    let (ctx, sql_engines) = test_broker_context_with_sql_factory("seed-1");
    let outcome = provision(&ctx, "instance-5", SERVICE_ID, PLAN_ID, ProvisionParams::default())
        .await
        .unwrap();
    let ProvisionOutcome::Accepted(accepted) = outcome else {
        panic!("expected an accepted async op");
    };
    poll_until_succeeded(&ctx, "instance-5", &accepted.token()).await;

    let enable_outcome = update(
        &ctx,
        "instance-5",
        SERVICE_ID,
        PLAN_ID,
        UpdateParams {
            enable_extensions: vec!["pg_stat_statements".to_owned()],
            reboot: Some(true),
            ..Default::default()
        },
    )
    .await
    .unwrap();
    let UpdateOutcome::Accepted(accepted) = enable_outcome else {
        panic!("expected an accepted async op");
    };
    poll_until_succeeded(&ctx, "instance-5", &accepted.token()).await;
    assert!(sql_engines
        .enabled_extensions("instance-5")
        .contains("pg_stat_statements"));

    let disable_outcome = update(
        &ctx,
        "instance-5",
        SERVICE_ID,
        PLAN_ID,
        UpdateParams {
            disable_extensions: vec!["pg_stat_statements".to_owned()],
            reboot: Some(true),
            ..Default::default()
        },
    )
    .await
    .unwrap();
    let UpdateOutcome::Accepted(accepted) = disable_outcome else {
        panic!("expected an accepted async op");
    };
    poll_until_succeeded(&ctx, "instance-5", &accepted.token()).await;
    assert!(!sql_engines
        .enabled_extensions("instance-5")
        .contains("pg_stat_statements"));
}

#[tokio::test]
async fn credential_check_resets_the_master_password_and_a_later_bind_succeeds() {
    let provider = Arc::new(FakeProvider::default());
    let sql_engines = Arc::new(FakeSqlEngineFactory::default());

    let ctx_old_seed = broker_context_sharing(provider.clone(), sql_engines.clone(), "seed-old");
    seed_instance(&ctx_old_seed, "instance-6").await;
    let current_password = derive_master_password("seed-old", "instance-6");
    sql_engines.set_expected_master_password(&current_password);

    let ctx_new_seed = broker_context_sharing(provider.clone(), sql_engines.clone(), "seed-new");
    run_credential_check(&ctx_new_seed).await;

    let rds_id = ctx_new_seed.rds_instance_identifier("instance-6");
    let tags_after = ctx_new_seed.provider.list_tags(&rds_id).await.unwrap();
    assert!(tags::is_true(&tags_after, tags::PENDING_RESET));

    // The broker asked the provider to reset the password; once that takes
    // effect on the cloud side, a Bind against the new seed succeeds.
    let reset_password = derive_master_password("seed-new", "instance-6");
    sql_engines.set_expected_master_password(&reset_password);

    let response = bind(&ctx_new_seed, "instance-6", "binding-6", BindParams::default())
        .await
        .unwrap();
    assert!(response.uri.starts_with("postgres://"));
}

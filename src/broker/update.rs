use serde::Deserialize;
use std::collections::BTreeSet;

use super::{AsyncOpAccepted, BrokerContext};
use crate::error::BrokerError;
use crate::operation::OperationToken;
use crate::provider::ModifyDiff;
use crate::tags;

#[derive(Clone, Debug, Deserialize, Default)]
pub struct UpdateParams {
    pub reboot: Option<bool>,
    pub skip_final_snapshot: Option<bool>,
    #[serde(default)]
    pub enable_extensions: Vec<String>,
    #[serde(default)]
    pub disable_extensions: Vec<String>,
    pub apply_at_maintenance_window: Option<bool>,
    pub backup_retention_period: Option<i32>,
    pub preferred_backup_window: Option<String>,
    pub preferred_maintenance_window: Option<String>,
}

#[derive(Debug)]
pub enum UpdateOutcome {
    Accepted(AsyncOpAccepted),
    /// Mode 3 (`skip_final_snapshot` tag update) completes synchronously —
    /// no provider RPC is issued, so there is nothing to poll.
    CompletedSynchronously,
}

/// `Update`. The four modes are mutually exclusive and
/// evaluated in order; the first one that matches wins.
pub async fn update(
    ctx: &BrokerContext,
    instance_id: &str,
    service_id: &str,
    to_plan_id: &str,
    params: UpdateParams,
) -> Result<UpdateOutcome, BrokerError> {
    let plan = ctx.catalog.plan(service_id, to_plan_id)?;
    let rds_id = ctx.rds_instance_identifier(instance_id);

    // Mode 1: extension diff. Checked ahead of the plain-reboot mode so a
    // request carrying both `enable_extensions`/`disable_extensions` and
    // `reboot: true` applies the parameter group change and reboots in one
    // step, rather than the reboot flag alone short-circuiting the update.
    if !params.enable_extensions.is_empty() || !params.disable_extensions.is_empty() {
        if !plan.rds_properties.engine.supports_extensions() {
            return Err(BrokerError::ExtensionsUnsupported(
                params.enable_extensions.clone(),
            ));
        }
        // A plan default may never be dropped via `disable_extensions`, so
        // any entry naming one is silently ignored rather than honored.
        let disable: BTreeSet<String> = params
            .disable_extensions
            .into_iter()
            .filter(|e| !plan.default_extensions.iter().any(|d| d == e))
            .collect();
        let desired: Vec<String> = params
            .enable_extensions
            .into_iter()
            .chain(plan.default_extensions.iter().cloned())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .filter(|e| !disable.contains(e))
            .collect();
        for ext in &desired {
            if !plan.allowed_extensions.iter().any(|a| a == ext) {
                return Err(BrokerError::ValidationError(format!(
                    "extension {ext:?} is not allowed by plan {to_plan_id:?}"
                )));
            }
        }

        let engine_family = plan
            .rds_properties
            .engine
            .family(major_version(&plan.rds_properties.engine_version));
        let planner = ctx.param_group_planner();
        let group_name = planner.plan_for(&engine_family, &desired).await?;

        let current = ctx
            .provider
            .describe_instance(&rds_id)
            .await?
            .ok_or_else(|| BrokerError::NotFound(format!("instance {instance_id:?}")))?;
        let reboot_required = current.parameter_group_name.as_deref() != Some(group_name.as_str());
        if reboot_required && !params.reboot.unwrap_or(false) {
            // Enabling/disabling preload-requiring extensions is not
            // effective until a reboot, and the broker only applies the new
            // group when `reboot: true` is in the *same* request.
            return Err(BrokerError::ValidationError(
                "changing extensions that require a parameter group change also requires reboot: true in the same request".to_owned(),
            ));
        }

        ctx.provider
            .attach_parameter_group(&rds_id, &group_name)
            .await?;
        if reboot_required {
            ctx.provider
                .reboot_instance(&rds_id, plan.rds_properties.multi_az)
                .await?;
        }

        let mut current_tags = current.tags.clone();
        current_tags.insert(
            tags::PENDING_UPDATE_SETTINGS.to_owned(),
            serde_json::to_string(&desired).unwrap_or_default(),
        );
        ctx.provider.set_tags(&rds_id, &current_tags).await?;

        return Ok(UpdateOutcome::Accepted(AsyncOpAccepted {
            operation: OperationToken::UpdateExtensions {
                instance_id: instance_id.to_owned(),
                service_id: service_id.to_owned(),
                plan_id: to_plan_id.to_owned(),
                parameter_group_name: group_name,
                updated_extensions: desired,
                reboot_required,
            },
        }));
    }

    // Mode 2: plain reboot, no extension change requested.
    if params.reboot.unwrap_or(false) {
        ctx.provider
            .reboot_instance(&rds_id, plan.rds_properties.multi_az)
            .await?;
        return Ok(UpdateOutcome::Accepted(AsyncOpAccepted {
            operation: OperationToken::Reboot {
                instance_id: instance_id.to_owned(),
            },
        }));
    }

    // Mode 3: skip_final_snapshot tag update, synchronous.
    if let Some(skip) = params.skip_final_snapshot {
        let mut current_tags = ctx.provider.list_tags(&rds_id).await?;
        tags::set_bool(&mut current_tags, tags::SKIP_FINAL_SNAPSHOT, skip);
        ctx.provider.set_tags(&rds_id, &current_tags).await?;
        return Ok(UpdateOutcome::CompletedSynchronously);
    }

    // Mode 4: plan-allowed attribute merge (windows, retention).
    let diff = ModifyDiff {
        backup_retention_period: params.backup_retention_period,
        preferred_backup_window: params.preferred_backup_window,
        preferred_maintenance_window: params.preferred_maintenance_window,
        ..Default::default()
    };
    let apply_immediately = !params.apply_at_maintenance_window.unwrap_or(false);
    ctx.provider
        .modify_instance(&rds_id, &diff, apply_immediately)
        .await?;
    Ok(UpdateOutcome::Accepted(AsyncOpAccepted {
        operation: OperationToken::UpdateAttributes {
            instance_id: instance_id.to_owned(),
        },
    }))
}

fn major_version(engine_version: &str) -> &str {
    engine_version.split('.').next().unwrap_or(engine_version)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{seed_instance, test_broker_context};

    #[tokio::test]
    async fn reboot_mode_issues_a_plain_reboot_when_no_extensions_change() {
        let ctx = test_broker_context();
        seed_instance(&ctx, "instance-1").await;
        let outcome = update(
            &ctx,
            "instance-1",
            "svc-1",
            "postgres-micro",
            UpdateParams {
                reboot: Some(true),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        match outcome {
            UpdateOutcome::Accepted(accepted) => {
                assert!(matches!(accepted.operation, OperationToken::Reboot { .. }))
            }
            UpdateOutcome::CompletedSynchronously => panic!("expected an accepted async op"),
        }
    }

    #[tokio::test]
    async fn extension_update_with_reboot_applies_the_parameter_group_and_reboots() {
        let ctx = test_broker_context();
        seed_instance(&ctx, "instance-1").await;
        let outcome = update(
            &ctx,
            "instance-1",
            "svc-1",
            "postgres-micro",
            UpdateParams {
                enable_extensions: vec!["pg_stat_statements".to_owned()],
                reboot: Some(true),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        match outcome {
            UpdateOutcome::Accepted(accepted) => assert!(matches!(
                accepted.operation,
                OperationToken::UpdateExtensions { .. }
            )),
            UpdateOutcome::CompletedSynchronously => panic!("expected an accepted async op"),
        }
    }

    #[tokio::test]
    async fn disabling_an_extension_also_requires_reboot_true() {
        let ctx = test_broker_context();
        seed_instance(&ctx, "instance-1").await;
        let err = update(
            &ctx,
            "instance-1",
            "svc-1",
            "postgres-micro",
            UpdateParams {
                disable_extensions: vec!["uuid-ossp".to_owned()],
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, BrokerError::ValidationError(_)));
    }

    #[tokio::test]
    async fn skip_final_snapshot_mode_completes_synchronously() {
        let ctx = test_broker_context();
        seed_instance(&ctx, "instance-1").await;
        let outcome = update(
            &ctx,
            "instance-1",
            "svc-1",
            "postgres-micro",
            UpdateParams {
                skip_final_snapshot: Some(true),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert!(matches!(outcome, UpdateOutcome::CompletedSynchronously));
    }

    #[tokio::test]
    async fn extension_update_without_reboot_is_rejected() {
        let ctx = test_broker_context();
        seed_instance(&ctx, "instance-1").await;
        let err = update(
            &ctx,
            "instance-1",
            "svc-1",
            "postgres-micro",
            UpdateParams {
                enable_extensions: vec!["pg_stat_statements".to_owned()],
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, BrokerError::ValidationError(_)));
    }
}

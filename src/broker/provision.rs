use chrono::Utc;
use serde::Deserialize;
use std::collections::BTreeMap;

use super::{AsyncOpAccepted, BrokerContext};
use crate::credentials::{derive_master_password, random_alphanumeric};
use crate::engine::Engine;
use crate::error::BrokerError;
use crate::operation::OperationToken;
use crate::provider::{InstanceSpec, InstanceState};
use crate::tags;

const MASTER_USERNAME_LEN: usize = 16;

#[derive(Clone, Debug, Deserialize, Default)]
pub struct ProvisionParams {
    pub restore_from_latest_snapshot_of: Option<String>,
    pub chargeable_entity: Option<String>,
    pub skip_final_snapshot: Option<bool>,
}

#[derive(Debug)]
pub enum ProvisionOutcome {
    Accepted(AsyncOpAccepted),
    /// Repeating `Provision` for an instance that already exists under the
    /// same plan is a no-op — nothing was issued to the provider, so there
    /// is no operation to poll.
    AlreadyProvisioned,
}

/// `Provision`. Returns `provision:<instanceId>` (encoded
/// as an [`OperationToken::Provision`]) unless an identical instance
/// already exists, in which case it resolves immediately — `Provision`
/// followed by `Provision` with the same `instanceId` and request body is
/// a no-op.
pub async fn provision(
    ctx: &BrokerContext,
    instance_id: &str,
    service_id: &str,
    plan_id: &str,
    params: ProvisionParams,
) -> Result<ProvisionOutcome, BrokerError> {
    let plan = ctx.catalog.plan(service_id, plan_id)?;
    let rds_id = ctx.rds_instance_identifier(instance_id);

    if let Some(existing) = ctx.provider.describe_instance(&rds_id).await? {
        let same_plan = existing
            .tags
            .get(tags::PLAN_ID)
            .map(|p| p == plan_id)
            .unwrap_or(false);
        if same_plan {
            return Ok(ProvisionOutcome::AlreadyProvisioned);
        }
        return Err(BrokerError::AlreadyExists(format!(
            "instance {instance_id:?} already exists under a different plan"
        )));
    }

    let master_username = random_alphanumeric(MASTER_USERNAME_LEN);
    let master_password = derive_master_password(&ctx.settings.master_password_seed, instance_id);

    let mut instance_tags: BTreeMap<String, String> = tags::base_tags(
        &ctx.settings.broker_name,
        params.chargeable_entity.as_deref().unwrap_or("unknown"),
    );
    instance_tags.insert(tags::PLAN_ID.to_owned(), plan_id.to_owned());
    instance_tags.insert(tags::SERVICE_ID.to_owned(), service_id.to_owned());
    tags::set_bool(
        &mut instance_tags,
        tags::SKIP_FINAL_SNAPSHOT,
        params.skip_final_snapshot.unwrap_or(plan.rds_properties.skip_final_snapshot),
    );

    let spec = InstanceSpec {
        instance_identifier: rds_id.clone(),
        master_username,
        master_password,
        instance_class: plan.rds_properties.instance_class.clone(),
        allocated_storage: plan.rds_properties.allocated_storage,
        engine: plan.rds_properties.engine,
        engine_version: plan.rds_properties.engine_version.clone(),
        multi_az: plan.rds_properties.multi_az,
        db_subnet_group_name: plan.rds_properties.db_subnet_group_name.clone(),
        vpc_security_group_ids: plan.rds_properties.vpc_security_group_ids.clone(),
        db_parameter_group_name: None,
        backup_retention_period: plan.rds_properties.backup_retention_period,
        preferred_backup_window: plan.rds_properties.preferred_backup_window.clone(),
        preferred_maintenance_window: plan.rds_properties.preferred_maintenance_window.clone(),
        tags: instance_tags.clone(),
    };

    if let Some(source_instance) = &params.restore_from_latest_snapshot_of {
        let source_rds_id = ctx.rds_instance_identifier(source_instance);
        let source = ctx
            .provider
            .describe_instance(&source_rds_id)
            .await?
            .ok_or_else(|| BrokerError::NotFound(format!("source instance {source_instance:?}")))?;
        if source.engine_version != spec.engine_version {
            // Reject cross-version restores unless the plan explicitly
            // permits it (no plan here does).
            return Err(BrokerError::ValidationError(format!(
                "cannot restore onto engine version {:?} from a snapshot taken on {:?}",
                spec.engine_version, source.engine_version
            )));
        }
        let snapshot_id = ctx
            .provider
            .latest_snapshot_of(&source_rds_id)
            .await?
            .ok_or_else(|| {
                BrokerError::NotFound(format!("no snapshot found for {source_instance:?}"))
            })?;
        let mut restore_tags = instance_tags.clone();
        restore_tags.insert(
            tags::RESTORED_FROM_SNAPSHOT.to_owned(),
            snapshot_id.clone(),
        );
        restore_tags.insert(tags::ORIGINAL_RDS_INSTANCE.to_owned(), source_rds_id);
        let mut restore_spec = spec.clone();
        restore_spec.tags = restore_tags;
        ctx.provider
            .restore_from_snapshot(&restore_spec, &snapshot_id)
            .await?;
    } else {
        ctx.provider.create_instance(&spec).await?;
    }

    Ok(ProvisionOutcome::Accepted(AsyncOpAccepted {
        operation: OperationToken::Provision {
            instance_id: instance_id.to_owned(),
            service_id: service_id.to_owned(),
            plan_id: plan_id.to_owned(),
            issued_at: Utc::now(),
        },
    }))
}

/// Whether `describe_instance`'s absence should still be reported as "in
/// progress" rather than "failed", given the configured not-found grace
/// period and when the provision operation was issued.
pub fn within_not_found_grace(
    ctx: &BrokerContext,
    issued_at: chrono::DateTime<Utc>,
) -> bool {
    let elapsed = Utc::now().signed_duration_since(issued_at);
    elapsed.to_std().unwrap_or_default() < ctx.settings.describe_not_found_grace
}

pub(crate) fn engine_matches_plan(engine: Engine, plan_engine: Engine) -> bool {
    engine == plan_engine
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::test_broker_context;

    #[tokio::test]
    async fn provision_returns_a_provision_token() {
        let ctx = test_broker_context();
        let outcome = provision(
            &ctx,
            "instance-1",
            "svc-1",
            "postgres-micro",
            ProvisionParams::default(),
        )
        .await
        .unwrap();
        let ProvisionOutcome::Accepted(accepted) = outcome else {
            panic!("expected an accepted async op");
        };
        assert_eq!(accepted.operation.instance_id(), "instance-1");
    }

    #[tokio::test]
    async fn provision_is_idempotent_for_the_same_instance_and_plan() {
        let ctx = test_broker_context();
        provision(
            &ctx,
            "instance-1",
            "svc-1",
            "postgres-micro",
            ProvisionParams::default(),
        )
        .await
        .unwrap();
        let second = provision(
            &ctx,
            "instance-1",
            "svc-1",
            "postgres-micro",
            ProvisionParams::default(),
        )
        .await
        .unwrap();
        assert!(matches!(second, ProvisionOutcome::AlreadyProvisioned));
    }

    #[tokio::test]
    async fn provision_rejects_unknown_plan() {
        let ctx = test_broker_context();
        let err = provision(
            &ctx,
            "instance-1",
            "svc-1",
            "does-not-exist",
            ProvisionParams::default(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, BrokerError::NotFound(_)));
    }
}

use tracing::{info, warn};

use super::{admin_uri, BrokerContext};
use crate::credentials::derive_master_password;
use crate::error::BrokerError;
use crate::provider::{InstanceDetails, ModifyDiff};
use crate::tags;

/// Master-password rotation loop. Run once at process
/// start: for every instance tagged with this broker's name, recompute the
/// expected master password from the current seed and probe an admin
/// connection. A mismatch means the seed changed since the instance was
/// created (or last rotated); the broker then resets the password itself
/// rather than waiting for an operator to notice failed binds.
pub async fn run_credential_check(ctx: &BrokerContext) {
    let instances = match ctx
        .provider
        .list_instances_for_broker(&ctx.settings.broker_name)
        .await
    {
        Ok(instances) => instances,
        Err(err) => {
            warn!(error = %err, "credentials check could not list instances");
            info!("credentials check has ended");
            return;
        }
    };

    let prefix = format!("{}-", ctx.settings.db_prefix);
    for details in &instances {
        let Some(instance_id) = details.instance_identifier.strip_prefix(&prefix) else {
            continue;
        };
        if let Err(err) = check_one(ctx, instance_id, details).await {
            warn!(%instance_id, error = %err, "credentials check failed for instance");
        }
    }

    info!("credentials check has ended");
}

async fn check_one(
    ctx: &BrokerContext,
    instance_id: &str,
    details: &InstanceDetails,
) -> Result<(), BrokerError> {
    let (Some(host), Some(port)) = (details.endpoint_host.clone(), details.endpoint_port) else {
        return Ok(());
    };
    let Some(plan_id) = details.tags.get(tags::PLAN_ID) else {
        return Ok(());
    };
    let service_id = details.tags.get(tags::SERVICE_ID).cloned().unwrap_or_default();
    let plan = ctx.catalog.plan(&service_id, plan_id)?;
    let engine = plan.rds_properties.engine;

    let expected_password = derive_master_password(&ctx.settings.master_password_seed, instance_id);
    let probe_uri = admin_uri(engine, &host, port, &details.master_username, &expected_password);

    match ctx.sql_engines.open(engine, &probe_uri).await {
        Ok(_) => Ok(()),
        Err(BrokerError::AuthenticationFailed(_)) => {
            info!(%instance_id, "Will attempt to reset the password.");
            let rds_id = ctx.rds_instance_identifier(instance_id);
            ctx.provider
                .modify_instance(
                    &rds_id,
                    &ModifyDiff {
                        master_user_password: Some(expected_password),
                        ..Default::default()
                    },
                    true,
                )
                .await?;
            let mut new_tags = details.tags.clone();
            tags::set_bool(&mut new_tags, tags::PENDING_RESET, true);
            ctx.provider.set_tags(&rds_id, &new_tags).await?;
            Ok(())
        }
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{seed_instance, test_broker_context};

    #[tokio::test]
    async fn credentials_check_completes_without_instances() {
        let ctx = test_broker_context();
        run_credential_check(&ctx).await;
    }

    #[tokio::test]
    async fn credentials_check_runs_against_a_seeded_instance() {
        let ctx = test_broker_context();
        seed_instance(&ctx, "instance-1").await;
        run_credential_check(&ctx).await;
    }
}

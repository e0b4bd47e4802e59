use super::{admin_uri, BrokerContext};
use crate::credentials::{derive_binding_username, derive_binding_username_legacy, derive_master_password};
use crate::error::BrokerError;

/// `Unbind`. Tries the current SHA-256-derived username
/// first, then the legacy MD5-derived one; absence under both names is not
/// an error, since an already-unbound binding must be safe to unbind again.
pub async fn unbind(
    ctx: &BrokerContext,
    instance_id: &str,
    binding_id: &str,
) -> Result<(), BrokerError> {
    let rds_id = ctx.rds_instance_identifier(instance_id);
    let details = ctx
        .provider
        .describe_instance(&rds_id)
        .await?
        .ok_or_else(|| BrokerError::NotFound(format!("instance {instance_id:?}")))?;
    let host = details
        .endpoint_host
        .ok_or_else(|| BrokerError::ProviderTransient(format!("instance {instance_id:?} has no endpoint yet")))?;
    let port = details
        .endpoint_port
        .ok_or_else(|| BrokerError::ProviderTransient(format!("instance {instance_id:?} has no endpoint yet")))?;

    let plan_id = details
        .tags
        .get(crate::tags::PLAN_ID)
        .ok_or_else(|| BrokerError::NotFound(format!("instance {instance_id:?} has no recorded plan")))?;
    let service_id = details.tags.get(crate::tags::SERVICE_ID).cloned().unwrap_or_default();
    let plan = ctx.catalog.plan(&service_id, plan_id)?;
    let engine = plan.rds_properties.engine;

    let master_password = derive_master_password(&ctx.settings.master_password_seed, instance_id);
    let master_uri = admin_uri(engine, &host, port, &details.master_username, &master_password);
    let sql_engine = ctx.sql_engines.open(engine, &master_uri).await?;

    let database = instance_id.to_owned();
    let username = derive_binding_username(binding_id, sql_engine.max_identifier_len());
    if engine.supports_extensions() {
        sql_engine.correct_access_privileges(&database, &username).await?;
    }
    if sql_engine.drop_user(&username).await? {
        return Ok(());
    }

    let legacy_username = derive_binding_username_legacy(binding_id, sql_engine.max_identifier_len());
    if engine.supports_extensions() {
        sql_engine.correct_access_privileges(&database, &legacy_username).await?;
    }
    sql_engine.drop_user(&legacy_username).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::bind::{bind, BindParams};
    use crate::fixtures::{seed_instance, test_broker_context};

    #[tokio::test]
    async fn unbind_after_bind_leaves_the_instance_unbound() {
        let ctx = test_broker_context();
        seed_instance(&ctx, "instance-1").await;
        bind(&ctx, "instance-1", "binding-1", BindParams::default())
            .await
            .unwrap();
        unbind(&ctx, "instance-1", "binding-1").await.unwrap();
    }

    #[tokio::test]
    async fn unbind_is_not_an_error_when_nothing_was_ever_bound() {
        let ctx = test_broker_context();
        seed_instance(&ctx, "instance-1").await;
        unbind(&ctx, "instance-1", "never-bound").await.unwrap();
    }
}

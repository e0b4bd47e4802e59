use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{admin_uri, BrokerContext};
use crate::credentials::{derive_binding_username, derive_master_password, random_alphanumeric};
use crate::error::BrokerError;

const BINDING_PASSWORD_LEN: usize = 32;
const AUTH_RETRY_TIMEOUT: Duration = Duration::from_secs(120);
const AUTH_RETRY_BACKOFF: Duration = Duration::from_secs(2);

#[derive(Clone, Debug, Deserialize, Default)]
pub struct BindParams {}

#[derive(Clone, Debug, Serialize)]
pub struct BindResponse {
    pub uri: String,
    pub jdbc_uri: String,
    pub name: String,
    pub username: String,
    pub password: String,
    pub host: String,
    pub port: u16,
}

/// `Bind`. The master password may be mid-rotation
/// ([`super::rotation`]), so authentication against the admin connection is
/// retried with backoff rather than failed on the first attempt: a
/// concurrent bind during a pending password reset must tolerate transient
/// authentication failure.
pub async fn bind(
    ctx: &BrokerContext,
    instance_id: &str,
    binding_id: &str,
    _params: BindParams,
) -> Result<BindResponse, BrokerError> {
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
    let service_id = details
        .tags
        .get(crate::tags::SERVICE_ID)
        .cloned()
        .unwrap_or_default();
    let plan = ctx.catalog.plan(&service_id, plan_id)?;
    let engine = plan.rds_properties.engine;

    let master_password = derive_master_password(&ctx.settings.master_password_seed, instance_id);
    let master_uri = admin_uri(engine, &host, port, &details.master_username, &master_password);
    let sql_engine = open_with_retry(ctx, engine, &master_uri).await?;

    let username = derive_binding_username(binding_id, sql_engine.max_identifier_len());
    let password = random_alphanumeric(BINDING_PASSWORD_LEN);
    let database = instance_id.to_owned();

    let group_role = if engine.supports_extensions() {
        Some(format!("{database}_group"))
    } else {
        None
    };
    let dsn = sql_engine
        .create_user(
            &username,
            &password,
            &database,
            &host,
            port,
            group_role.as_deref(),
        )
        .await?;

    Ok(BindResponse {
        uri: dsn.uri,
        jdbc_uri: dsn.jdbc_uri,
        name: database,
        username,
        password,
        host,
        port,
    })
}

async fn open_with_retry(
    ctx: &BrokerContext,
    engine: crate::engine::Engine,
    admin_uri: &str,
) -> Result<Box<dyn crate::sql::SqlEngine>, BrokerError> {
    let deadline = std::time::Instant::now() + AUTH_RETRY_TIMEOUT;
    loop {
        match ctx.sql_engines.open(engine, admin_uri).await {
            Ok(sql_engine) => return Ok(sql_engine),
            Err(BrokerError::AuthenticationFailed(_)) if std::time::Instant::now() < deadline => {
                tokio::time::sleep(AUTH_RETRY_BACKOFF).await;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{seed_instance, test_broker_context};

    #[tokio::test]
    async fn bind_returns_usable_credentials() {
        let ctx = test_broker_context();
        seed_instance(&ctx, "instance-1").await;
        let response = bind(&ctx, "instance-1", "binding-1", BindParams::default())
            .await
            .unwrap();
        assert!(response.uri.starts_with("postgres://"));
        assert!(!response.username.is_empty());
        assert!(!response.password.is_empty());
    }

    #[tokio::test]
    async fn bind_rejects_unknown_instance() {
        let ctx = test_broker_context();
        let err = bind(&ctx, "does-not-exist", "binding-1", BindParams::default())
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::NotFound(_)));
    }
}

use serde::{Deserialize, Serialize};

use super::{admin_uri, BrokerContext};
use crate::credentials::derive_master_password;
use crate::error::BrokerError;
use crate::operation::OperationToken;
use crate::provider::InstanceState;

use super::provision::within_not_found_grace;

#[derive(Clone, Debug, Deserialize)]
pub struct LastOperationRequest {
    pub instance_id: String,
    pub service_id: Option<String>,
    pub plan_id: Option<String>,
    pub operation: String,
}

#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ReportedState {
    InProgress,
    Succeeded,
    Failed,
    /// Not an OSBAPI state on the wire — callers map this to HTTP 410 for
    /// a last-operation poll of a deleted instance.
    Gone,
}

#[derive(Clone, Debug, Serialize)]
pub struct LastOperationResponse {
    pub state: ReportedState,
    pub description: Option<String>,
}

impl LastOperationResponse {
    fn state(state: ReportedState) -> Self {
        Self {
            state,
            description: None,
        }
    }

    fn described(state: ReportedState, description: impl Into<String>) -> Self {
        Self {
            state,
            description: Some(description.into()),
        }
    }
}

/// `LastOperation`. The only site where deferred
/// in-database initialization for a newly-provisioned instance happens,
/// since the database isn't reachable until the cloud side reports
/// `available`. Every deferred action here must be idempotent: this
/// handler is polled repeatedly until it reports a terminal state.
pub async fn last_operation(
    ctx: &BrokerContext,
    request: LastOperationRequest,
) -> Result<LastOperationResponse, BrokerError> {
    let token = OperationToken::decode(&request.operation)?;
    let rds_id = ctx.rds_instance_identifier(&request.instance_id);

    match token {
        OperationToken::Provision {
            service_id,
            plan_id,
            issued_at,
            ..
        } => {
            let details = ctx.provider.describe_instance(&rds_id).await?;
            let Some(details) = details else {
                return Ok(if within_not_found_grace(ctx, issued_at) {
                    LastOperationResponse::state(ReportedState::InProgress)
                } else {
                    LastOperationResponse::described(
                        ReportedState::Failed,
                        "instance did not become describable within the grace period",
                    )
                });
            };
            match details.state {
                InstanceState::Creating | InstanceState::Modifying => {
                    Ok(LastOperationResponse::state(ReportedState::InProgress))
                }
                InstanceState::Available => {
                    initialize_database(ctx, &request.instance_id, &service_id, &plan_id, &details)
                        .await?;
                    Ok(LastOperationResponse::state(ReportedState::Succeeded))
                }
                InstanceState::Deleting | InstanceState::Gone | InstanceState::Failed => Ok(
                    LastOperationResponse::described(ReportedState::Failed, "provision failed"),
                ),
            }
        }

        OperationToken::Reboot { .. } => {
            let details = ctx.provider.describe_instance(&rds_id).await?;
            match details.map(|d| d.state) {
                Some(InstanceState::Available) => {
                    Ok(LastOperationResponse::state(ReportedState::Succeeded))
                }
                Some(InstanceState::Creating | InstanceState::Modifying) | None => {
                    Ok(LastOperationResponse::state(ReportedState::InProgress))
                }
                Some(InstanceState::Deleting | InstanceState::Gone | InstanceState::Failed) => {
                    Ok(LastOperationResponse::described(ReportedState::Failed, "reboot failed"))
                }
            }
        }

        OperationToken::UpdateExtensions {
            instance_id,
            service_id,
            plan_id,
            parameter_group_name,
            updated_extensions,
            ..
        } => {
            let details = ctx
                .provider
                .describe_instance(&rds_id)
                .await?
                .ok_or_else(|| BrokerError::NotFound(format!("instance {instance_id:?}")))?;
            match details.state {
                InstanceState::Creating | InstanceState::Modifying => {
                    Ok(LastOperationResponse::state(ReportedState::InProgress))
                }
                InstanceState::Available => {
                    if details.parameter_group_name.as_deref() != Some(parameter_group_name.as_str()) {
                        return Ok(LastOperationResponse::state(ReportedState::InProgress));
                    }
                    if details.parameter_apply_status_pending_reboot {
                        ctx.provider.reboot_instance(&rds_id, false).await?;
                        return Ok(LastOperationResponse::state(ReportedState::InProgress));
                    }
                    let plan = ctx.catalog.plan(&service_id, &plan_id)?;
                    let engine = plan.rds_properties.engine;
                    let sql_engine = open_admin_connection(ctx, &instance_id, engine, &details).await?;
                    sql_engine
                        .ensure_extensions(&instance_id, &updated_extensions, &plan.default_extensions)
                        .await?;
                    Ok(LastOperationResponse::state(ReportedState::Succeeded))
                }
                InstanceState::Deleting | InstanceState::Gone | InstanceState::Failed => Ok(
                    LastOperationResponse::described(ReportedState::Failed, "extension update failed"),
                ),
            }
        }

        OperationToken::UpdateAttributes { .. } => {
            let details = ctx.provider.describe_instance(&rds_id).await?;
            match details.map(|d| d.state) {
                Some(InstanceState::Available) => {
                    Ok(LastOperationResponse::state(ReportedState::Succeeded))
                }
                Some(InstanceState::Creating | InstanceState::Modifying) | None => {
                    Ok(LastOperationResponse::state(ReportedState::InProgress))
                }
                Some(InstanceState::Deleting | InstanceState::Gone | InstanceState::Failed) => Ok(
                    LastOperationResponse::described(ReportedState::Failed, "attribute update failed"),
                ),
            }
        }

        OperationToken::Deprovision { .. } => {
            let details = ctx.provider.describe_instance(&rds_id).await?;
            match details {
                None => Ok(LastOperationResponse::state(ReportedState::Gone)),
                Some(d) if d.state == InstanceState::Deleting => {
                    Ok(LastOperationResponse::state(ReportedState::InProgress))
                }
                Some(_) => Ok(LastOperationResponse::state(ReportedState::InProgress)),
            }
        }
    }
}

async fn initialize_database(
    ctx: &BrokerContext,
    instance_id: &str,
    service_id: &str,
    plan_id: &str,
    details: &crate::provider::InstanceDetails,
) -> Result<(), BrokerError> {
    let plan = ctx.catalog.plan(service_id, plan_id)?;
    let engine = plan.rds_properties.engine;
    let sql_engine = open_admin_connection(ctx, instance_id, engine, details).await?;
    sql_engine.create_database(instance_id).await?;
    if engine.supports_extensions() && !plan.default_extensions.is_empty() {
        // `create_user` (called on first Bind) idempotently creates the
        // per-instance group role, so there is nothing extra to do for it
        // here beyond making the database and its default extensions ready.
        sql_engine
            .ensure_extensions(instance_id, &plan.default_extensions, &plan.default_extensions)
            .await?;
    }
    Ok(())
}

async fn open_admin_connection(
    ctx: &BrokerContext,
    instance_id: &str,
    engine: crate::engine::Engine,
    details: &crate::provider::InstanceDetails,
) -> Result<Box<dyn crate::sql::SqlEngine>, BrokerError> {
    let host = details
        .endpoint_host
        .clone()
        .ok_or_else(|| BrokerError::ProviderTransient(format!("instance {instance_id:?} has no endpoint")))?;
    let port = details
        .endpoint_port
        .ok_or_else(|| BrokerError::ProviderTransient(format!("instance {instance_id:?} has no endpoint")))?;
    let master_password = derive_master_password(&ctx.settings.master_password_seed, instance_id);
    let uri = admin_uri(engine, &host, port, &details.master_username, &master_password);
    ctx.sql_engines.open(engine, &uri).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::provision::{provision, ProvisionOutcome, ProvisionParams};
    use crate::fixtures::test_broker_context;

    #[tokio::test]
    async fn provision_reports_in_progress_while_creating() {
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
        let response = last_operation(
            &ctx,
            LastOperationRequest {
                instance_id: "instance-1".to_owned(),
                service_id: Some("svc-1".to_owned()),
                plan_id: Some("postgres-micro".to_owned()),
                operation: accepted.token(),
            },
        )
        .await
        .unwrap();
        assert_eq!(response.state, ReportedState::InProgress);
    }

    #[tokio::test]
    async fn deprovision_of_a_gone_instance_reports_gone() {
        let ctx = test_broker_context();
        let token = OperationToken::Deprovision {
            instance_id: "never-existed".to_owned(),
        };
        let response = last_operation(
            &ctx,
            LastOperationRequest {
                instance_id: "never-existed".to_owned(),
                service_id: None,
                plan_id: None,
                operation: token.encode(),
            },
        )
        .await
        .unwrap();
        assert_eq!(response.state, ReportedState::Gone);
    }
}

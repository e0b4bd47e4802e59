use super::{AsyncOpAccepted, BrokerContext};
use crate::error::BrokerError;
use crate::operation::OperationToken;
use crate::provider::DeleteOptions;
use crate::tags;

/// `Deprovision`. `skipFinalSnapshot` is the plan default
/// unless overridden by the instance's own `SkipFinalSnapshot` tag (set
/// through `Update` mode 2), so a final snapshot taken at provision time
/// is never silently lost by a later plan change.
pub async fn deprovision(
    ctx: &BrokerContext,
    instance_id: &str,
    service_id: &str,
    plan_id: &str,
) -> Result<AsyncOpAccepted, BrokerError> {
    let plan = ctx.catalog.plan(service_id, plan_id)?;
    let rds_id = ctx.rds_instance_identifier(instance_id);

    let existing = ctx.provider.describe_instance(&rds_id).await?;
    let skip_final_snapshot = match &existing {
        Some(details) if details.tags.contains_key(tags::SKIP_FINAL_SNAPSHOT) => {
            tags::is_true(&details.tags, tags::SKIP_FINAL_SNAPSHOT)
        }
        _ => plan.rds_properties.skip_final_snapshot,
    };

    let final_snapshot_id = if skip_final_snapshot {
        None
    } else {
        Some(ctx.final_snapshot_id(&rds_id))
    };

    ctx.provider
        .delete_instance(
            &rds_id,
            &DeleteOptions {
                skip_final_snapshot,
                final_snapshot_id,
            },
        )
        .await?;

    Ok(AsyncOpAccepted {
        operation: OperationToken::Deprovision {
            instance_id: instance_id.to_owned(),
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{seed_instance, test_broker_context};

    #[tokio::test]
    async fn deprovision_returns_a_deprovision_token() {
        let ctx = test_broker_context();
        seed_instance(&ctx, "instance-1").await;
        let accepted = deprovision(&ctx, "instance-1", "svc-1", "postgres-micro")
            .await
            .unwrap();
        assert!(matches!(
            accepted.operation,
            OperationToken::Deprovision { .. }
        ));
    }
}

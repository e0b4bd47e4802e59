//! AWS RDS implementation of [`ProviderAdapter`], wired the way
//! `conductor/src/aws/cloudformation.rs`'s `AWSConfigState` wires its
//! CloudFormation client: load the SDK config once from the environment,
//! build one client, hold it behind an `Arc` for the life of the process.

use async_trait::async_trait;
use aws_sdk_rds::error::SdkError;
use aws_sdk_rds::types::{Filter, Tag};
use aws_sdk_rds::Client;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{
    DeleteOptions, InstanceDetails, InstanceSpec, InstanceState, ListSnapshotsFilter, ModifyDiff,
    ProviderAdapter, Snapshot,
};
use crate::error::BrokerError;

pub struct RdsProviderAdapter {
    client: Arc<Client>,
    /// How long a `describe` miss is treated as "creating" rather than
    /// "gone" when called right after a `create_instance`.
    describe_not_found_grace: Duration,
}

impl RdsProviderAdapter {
    pub async fn new(region: &str, describe_not_found_grace: Duration) -> Self {
        let config = aws_config::from_env()
            .region(aws_sdk_rds::config::Region::new(region.to_owned()))
            .load()
            .await;
        let client = Arc::new(Client::new(&config));
        Self {
            client,
            describe_not_found_grace,
        }
    }

    pub fn describe_not_found_grace(&self) -> Duration {
        self.describe_not_found_grace
    }
}

#[async_trait]
impl ProviderAdapter for RdsProviderAdapter {
    async fn create_instance(&self, spec: &InstanceSpec) -> Result<(), BrokerError> {
        info!(instance = %spec.instance_identifier, "creating RDS instance");
        let mut request = self
            .client
            .create_db_instance()
            .db_instance_identifier(&spec.instance_identifier)
            .master_username(&spec.master_username)
            .master_user_password(&spec.master_password)
            .db_instance_class(&spec.instance_class)
            .allocated_storage(spec.allocated_storage)
            .engine(spec.engine.rds_engine_name())
            .engine_version(&spec.engine_version)
            .multi_az(spec.multi_az)
            .db_subnet_group_name(&spec.db_subnet_group_name)
            .backup_retention_period(spec.backup_retention_period)
            .set_vpc_security_group_ids(Some(spec.vpc_security_group_ids.clone()))
            .set_tags(Some(to_sdk_tags(&spec.tags)));
        if let Some(pg) = &spec.db_parameter_group_name {
            request = request.db_parameter_group_name(pg);
        }
        if let Some(w) = &spec.preferred_backup_window {
            request = request.preferred_backup_window(w);
        }
        if let Some(w) = &spec.preferred_maintenance_window {
            request = request.preferred_maintenance_window(w);
        }
        request
            .send()
            .await
            .map(|_| ())
            .map_err(classify_sdk_error)
    }

    async fn modify_instance(
        &self,
        id: &str,
        diff: &ModifyDiff,
        apply_immediately: bool,
    ) -> Result<(), BrokerError> {
        if diff.is_empty() {
            return Ok(());
        }
        let mut request = self
            .client
            .modify_db_instance()
            .db_instance_identifier(id)
            .apply_immediately(apply_immediately);
        if let Some(v) = &diff.instance_class {
            request = request.db_instance_class(v);
        }
        if let Some(v) = diff.allocated_storage {
            request = request.allocated_storage(v);
        }
        if let Some(v) = &diff.db_parameter_group_name {
            request = request.db_parameter_group_name(v);
        }
        if let Some(v) = diff.backup_retention_period {
            request = request.backup_retention_period(v);
        }
        if let Some(v) = &diff.preferred_backup_window {
            request = request.preferred_backup_window(v);
        }
        if let Some(v) = &diff.preferred_maintenance_window {
            request = request.preferred_maintenance_window(v);
        }
        if let Some(v) = &diff.master_user_password {
            request = request.master_user_password(v);
        }
        request
            .send()
            .await
            .map(|_| ())
            .map_err(classify_sdk_error)
    }

    async fn reboot_instance(&self, id: &str, force_failover: bool) -> Result<(), BrokerError> {
        self.client
            .reboot_db_instance()
            .db_instance_identifier(id)
            .force_failover(force_failover)
            .send()
            .await
            .map(|_| ())
            .map_err(classify_sdk_error)
    }

    async fn delete_instance(&self, id: &str, options: &DeleteOptions) -> Result<(), BrokerError> {
        let mut request = self
            .client
            .delete_db_instance()
            .db_instance_identifier(id)
            .skip_final_snapshot(options.skip_final_snapshot);
        if !options.skip_final_snapshot {
            let snapshot_id = options.final_snapshot_id.as_deref().ok_or_else(|| {
                BrokerError::ValidationError(
                    "final_snapshot_id is required when skip_final_snapshot is false".to_owned(),
                )
            })?;
            request = request.final_db_snapshot_identifier(snapshot_id);
        }
        request
            .send()
            .await
            .map(|_| ())
            .map_err(classify_sdk_error)
    }

    async fn describe_instance(&self, id: &str) -> Result<Option<InstanceDetails>, BrokerError> {
        let result = self
            .client
            .describe_db_instances()
            .db_instance_identifier(id)
            .send()
            .await;
        let output = match result {
            Ok(output) => output,
            Err(err) if is_instance_not_found(&err) => return Ok(None),
            Err(err) => return Err(classify_sdk_error(err)),
        };
        let instance = output
            .db_instances()
            .and_then(|list| list.first())
            .cloned();
        match instance {
            None => Ok(None),
            Some(instance) => {
                let tags = self.list_tags(id).await.unwrap_or_default();
                Ok(Some(from_sdk_instance(instance, tags)))
            }
        }
    }

    async fn list_instances_for_broker(
        &self,
        broker_name: &str,
    ) -> Result<Vec<InstanceDetails>, BrokerError> {
        let output = self
            .client
            .describe_db_instances()
            .send()
            .await
            .map_err(classify_sdk_error)?;
        let mut result = Vec::new();
        for instance in output.db_instances().unwrap_or_default() {
            let Some(id) = instance.db_instance_identifier() else {
                continue;
            };
            let tags = self.list_tags(id).await.unwrap_or_default();
            if tags.get(crate::tags::BROKER_NAME).map(String::as_str) != Some(broker_name) {
                continue;
            }
            result.push(from_sdk_instance(instance.clone(), tags));
        }
        Ok(result)
    }

    async fn restore_from_snapshot(
        &self,
        spec: &InstanceSpec,
        snapshot_id: &str,
    ) -> Result<(), BrokerError> {
        info!(instance = %spec.instance_identifier, %snapshot_id, "restoring RDS instance from snapshot");
        self.client
            .restore_db_instance_from_db_snapshot()
            .db_instance_identifier(&spec.instance_identifier)
            .db_snapshot_identifier(snapshot_id)
            .db_instance_class(&spec.instance_class)
            .multi_az(spec.multi_az)
            .db_subnet_group_name(&spec.db_subnet_group_name)
            .set_vpc_security_group_ids(Some(spec.vpc_security_group_ids.clone()))
            .set_tags(Some(to_sdk_tags(&spec.tags)))
            .send()
            .await
            .map(|_| ())
            .map_err(classify_sdk_error)
    }

    async fn latest_snapshot_of(&self, id: &str) -> Result<Option<String>, BrokerError> {
        let output = self
            .client
            .describe_db_snapshots()
            .db_instance_identifier(id)
            .send()
            .await
            .map_err(classify_sdk_error)?;
        let mut snapshots: Vec<_> = output.db_snapshots().unwrap_or_default().to_vec();
        snapshots.sort_by_key(|s| s.snapshot_create_time().map(|t| t.secs()));
        Ok(snapshots
            .last()
            .and_then(|s| s.db_snapshot_identifier())
            .map(str::to_owned))
    }

    async fn list_snapshots(
        &self,
        filter: &ListSnapshotsFilter,
    ) -> Result<Vec<Snapshot>, BrokerError> {
        let output = self
            .client
            .describe_db_snapshots()
            .filters(
                Filter::builder()
                    .name("tag:Broker Name")
                    .values(&filter.broker_name)
                    .build(),
            )
            .send()
            .await
            .map_err(classify_sdk_error)?;
        let mut result = Vec::new();
        for snapshot in output.db_snapshots().unwrap_or_default() {
            let created_at = snapshot
                .snapshot_create_time()
                .and_then(|t| DateTime::<Utc>::from_timestamp(t.secs(), 0))
                .unwrap_or_else(Utc::now);
            if created_at >= filter.older_than {
                continue;
            }
            let id = match snapshot.db_snapshot_identifier() {
                Some(id) => id.to_owned(),
                None => continue,
            };
            let tags = self.list_tags(&id).await.unwrap_or_default();
            if tags.get("Broker Name").map(String::as_str) != Some(filter.broker_name.as_str()) {
                debug!(%id, "skipping snapshot without matching Broker Name tag");
                continue;
            }
            result.push(Snapshot {
                id,
                source_instance_identifier: snapshot
                    .db_instance_identifier()
                    .unwrap_or_default()
                    .to_owned(),
                created_at,
                tags,
            });
        }
        Ok(result)
    }

    async fn delete_snapshot(&self, id: &str) -> Result<(), BrokerError> {
        self.client
            .delete_db_snapshot()
            .db_snapshot_identifier(id)
            .send()
            .await
            .map(|_| ())
            .map_err(classify_sdk_error)
    }

    async fn ensure_parameter_group(
        &self,
        name: &str,
        family: &str,
        settings: &BTreeMap<String, String>,
    ) -> Result<(), BrokerError> {
        let exists = self
            .client
            .describe_db_parameter_groups()
            .db_parameter_group_name(name)
            .send()
            .await;
        if exists.is_ok() {
            debug!(%name, "parameter group already exists, reusing");
            return Ok(());
        }
        self.client
            .create_db_parameter_group()
            .db_parameter_group_name(name)
            .db_parameter_group_family(family)
            .description(format!("rds-broker managed parameter group for {family}"))
            .send()
            .await
            .map_err(classify_sdk_error)?;
        for (key, value) in settings {
            if value.is_empty() {
                continue;
            }
            self.client
                .modify_db_parameter_group()
                .db_parameter_group_name(name)
                .parameters(
                    aws_sdk_rds::types::Parameter::builder()
                        .parameter_name(key)
                        .parameter_value(value)
                        .apply_method(aws_sdk_rds::types::ApplyMethod::PendingReboot)
                        .build(),
                )
                .send()
                .await
                .map_err(classify_sdk_error)?;
        }
        Ok(())
    }

    async fn attach_parameter_group(&self, id: &str, name: &str) -> Result<(), BrokerError> {
        self.client
            .modify_db_instance()
            .db_instance_identifier(id)
            .db_parameter_group_name(name)
            .apply_immediately(true)
            .send()
            .await
            .map(|_| ())
            .map_err(classify_sdk_error)
    }

    async fn list_tags(&self, id: &str) -> Result<BTreeMap<String, String>, BrokerError> {
        let arn = self.instance_arn(id).await?;
        let output = self
            .client
            .list_tags_for_resource()
            .resource_name(arn)
            .send()
            .await
            .map_err(classify_sdk_error)?;
        Ok(from_sdk_tags(output.tag_list().unwrap_or_default()))
    }

    async fn set_tags(&self, id: &str, tags: &BTreeMap<String, String>) -> Result<(), BrokerError> {
        let arn = self.instance_arn(id).await?;
        self.client
            .add_tags_to_resource()
            .resource_name(arn)
            .set_tags(Some(to_sdk_tags(tags)))
            .send()
            .await
            .map(|_| ())
            .map_err(classify_sdk_error)
    }
}

impl RdsProviderAdapter {
    async fn instance_arn(&self, id: &str) -> Result<String, BrokerError> {
        let output = self
            .client
            .describe_db_instances()
            .db_instance_identifier(id)
            .send()
            .await
            .map_err(classify_sdk_error)?;
        output
            .db_instances()
            .and_then(|list| list.first())
            .and_then(|i| i.db_instance_arn())
            .map(str::to_owned)
            .ok_or_else(|| BrokerError::NotFound(format!("instance {id:?}")))
    }
}

fn from_sdk_instance(
    instance: aws_sdk_rds::types::DbInstance,
    tags: BTreeMap<String, String>,
) -> InstanceDetails {
    let state = instance
        .db_instance_status()
        .map(normalize_state)
        .unwrap_or(InstanceState::Failed);
    let (host, port) = instance
        .endpoint()
        .map(|e| (e.address().map(str::to_owned), Some(e.port() as u16)))
        .unwrap_or((None, None));
    let pending_reboot = instance
        .db_parameter_groups()
        .unwrap_or_default()
        .iter()
        .any(|g| {
            g.parameter_apply_status()
                .map(|s| s == "pending-reboot")
                .unwrap_or(false)
        });
    InstanceDetails {
        instance_identifier: instance.db_instance_identifier().unwrap_or_default().to_owned(),
        state,
        master_username: instance.master_username().unwrap_or_default().to_owned(),
        endpoint_host: host,
        endpoint_port: port,
        engine_version: instance.engine_version().unwrap_or_default().to_owned(),
        parameter_group_name: instance
            .db_parameter_groups()
            .and_then(|g| g.first())
            .and_then(|g| g.db_parameter_group_name())
            .map(str::to_owned),
        parameter_apply_status_pending_reboot: pending_reboot,
        tags,
    }
}

fn normalize_state(status: &str) -> InstanceState {
    match status {
        "creating" | "backing-up" | "configuring-enhanced-monitoring" => InstanceState::Creating,
        "modifying" | "upgrading" | "storage-optimization" | "renaming" => {
            InstanceState::Modifying
        }
        "available" => InstanceState::Available,
        "deleting" => InstanceState::Deleting,
        "failed" | "incompatible-parameters" | "incompatible-restore" => InstanceState::Failed,
        other => {
            warn!(status = other, "unrecognized RDS instance status, treating as Modifying");
            InstanceState::Modifying
        }
    }
}

fn to_sdk_tags(tags: &BTreeMap<String, String>) -> Vec<Tag> {
    tags.iter()
        .map(|(k, v)| Tag::builder().key(k).value(v).build())
        .collect()
}

fn from_sdk_tags(tags: &[Tag]) -> BTreeMap<String, String> {
    tags.iter()
        .filter_map(|t| Some((t.key()?.to_owned(), t.value().unwrap_or_default().to_owned())))
        .collect()
}

fn is_instance_not_found<E>(err: &SdkError<E>) -> bool
where
    E: std::fmt::Debug,
{
    // The generated error types all expose a `DBInstanceNotFoundFault`
    // variant; matching on the debug representation keeps this adapter
    // independent of the exact SDK major version's error enum shape.
    format!("{err:?}").contains("DBInstanceNotFound")
}

fn classify_sdk_error<E: std::fmt::Debug>(err: SdkError<E>) -> BrokerError {
    let message = format!("{err:?}");
    if message.contains("Throttling")
        || message.contains("InternalFailure")
        || message.contains("ServiceUnavailable")
        || message.contains("timeout")
    {
        BrokerError::ProviderTransient(message)
    } else {
        BrokerError::ProviderPermanent(message)
    }
}

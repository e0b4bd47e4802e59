//! Provider Adapter — the broker's only view of the cloud
//! database service. Defined as a trait so Broker Core and the Parameter
//! Group Planner can be unit-tested against a fake, the way
//! `coredb-operator`'s reconcile functions are tested against a fake
//! Kubernetes `Context` in `fixtures.rs`.

mod rds;

pub use rds::RdsProviderAdapter;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

use crate::error::BrokerError;

/// Normalized, broker-visible instance lifecycle state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InstanceState {
    Creating,
    Modifying,
    Available,
    Deleting,
    Gone,
    Failed,
}

#[derive(Clone, Debug)]
pub struct InstanceDetails {
    pub instance_identifier: String,
    pub state: InstanceState,
    pub master_username: String,
    pub endpoint_host: Option<String>,
    pub endpoint_port: Option<u16>,
    pub engine_version: String,
    pub parameter_group_name: Option<String>,
    /// True once a pending parameter group change requires (or has had) a
    /// reboot to take effect — RDS surfaces this as `pending-reboot`.
    pub parameter_apply_status_pending_reboot: bool,
    pub tags: BTreeMap<String, String>,
}

#[derive(Clone, Debug)]
pub struct InstanceSpec {
    pub instance_identifier: String,
    pub master_username: String,
    pub master_password: String,
    pub instance_class: String,
    pub allocated_storage: i32,
    pub engine: crate::engine::Engine,
    pub engine_version: String,
    pub multi_az: bool,
    pub db_subnet_group_name: String,
    pub vpc_security_group_ids: Vec<String>,
    pub db_parameter_group_name: Option<String>,
    pub backup_retention_period: i32,
    pub preferred_backup_window: Option<String>,
    pub preferred_maintenance_window: Option<String>,
    pub tags: BTreeMap<String, String>,
}

#[derive(Clone, Debug, Default)]
pub struct ModifyDiff {
    pub instance_class: Option<String>,
    pub allocated_storage: Option<i32>,
    pub db_parameter_group_name: Option<String>,
    pub backup_retention_period: Option<i32>,
    pub preferred_backup_window: Option<String>,
    pub preferred_maintenance_window: Option<String>,
    pub master_user_password: Option<String>,
}

impl ModifyDiff {
    pub fn is_empty(&self) -> bool {
        self.instance_class.is_none()
            && self.allocated_storage.is_none()
            && self.db_parameter_group_name.is_none()
            && self.backup_retention_period.is_none()
            && self.preferred_backup_window.is_none()
            && self.preferred_maintenance_window.is_none()
            && self.master_user_password.is_none()
    }
}

pub struct DeleteOptions {
    pub skip_final_snapshot: bool,
    pub final_snapshot_id: Option<String>,
}

#[derive(Clone, Debug)]
pub struct Snapshot {
    pub id: String,
    pub source_instance_identifier: String,
    pub created_at: DateTime<Utc>,
    pub tags: BTreeMap<String, String>,
}

pub struct ListSnapshotsFilter {
    pub broker_name: String,
    pub older_than: DateTime<Utc>,
}

/// The cloud provider's side of the broker. Every mutation returns
/// immediately; callers observe completion through polling `describe_instance`.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    async fn create_instance(&self, spec: &InstanceSpec) -> Result<(), BrokerError>;

    async fn modify_instance(
        &self,
        id: &str,
        diff: &ModifyDiff,
        apply_immediately: bool,
    ) -> Result<(), BrokerError>;

    async fn reboot_instance(&self, id: &str, force_failover: bool) -> Result<(), BrokerError>;

    async fn delete_instance(&self, id: &str, options: &DeleteOptions) -> Result<(), BrokerError>;

    /// `Ok(None)` means the instance is not found (callers apply their own
    /// not-found grace period, since only the caller knows whether this is
    /// "recently created" or "long gone").
    async fn describe_instance(&self, id: &str) -> Result<Option<InstanceDetails>, BrokerError>;

    /// Every instance currently tagged with `broker_name` — used by the
    /// master-password rotation loop at startup, which has no other way to
    /// enumerate "instances this broker owns" without a local datastore.
    async fn list_instances_for_broker(
        &self,
        broker_name: &str,
    ) -> Result<Vec<InstanceDetails>, BrokerError>;

    async fn restore_from_snapshot(
        &self,
        spec: &InstanceSpec,
        snapshot_id: &str,
    ) -> Result<(), BrokerError>;

    async fn latest_snapshot_of(&self, id: &str) -> Result<Option<String>, BrokerError>;

    async fn list_snapshots(
        &self,
        filter: &ListSnapshotsFilter,
    ) -> Result<Vec<Snapshot>, BrokerError>;

    async fn delete_snapshot(&self, id: &str) -> Result<(), BrokerError>;

    async fn ensure_parameter_group(
        &self,
        name: &str,
        family: &str,
        settings: &BTreeMap<String, String>,
    ) -> Result<(), BrokerError>;

    async fn attach_parameter_group(&self, id: &str, name: &str) -> Result<(), BrokerError>;

    async fn list_tags(&self, id: &str) -> Result<BTreeMap<String, String>, BrokerError>;

    async fn set_tags(&self, id: &str, tags: &BTreeMap<String, String>) -> Result<(), BrokerError>;
}

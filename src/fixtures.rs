//! Shared test fakes, in the spirit of `coredb-operator/src/fixtures.rs`:
//! one module that every other module's `#[cfg(test)]` block pulls a fake
//! `ProviderAdapter`/`SqlEngineFactory`/`BrokerContext` from, instead of
//! each test file growing its own ad hoc mock.

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::broker::{BrokerContext, BrokerSettings, SqlEngineFactory};
use crate::catalog::{Catalog, Plan, RdsProperties, Service};
use crate::engine::Engine;
use crate::error::BrokerError;
use crate::provider::{
    DeleteOptions, InstanceDetails, InstanceSpec, InstanceState, ListSnapshotsFilter, ModifyDiff,
    ProviderAdapter, Snapshot,
};
use crate::sql::{Dsn, SqlEngine};

struct FakeInstance {
    engine_version: String,
    master_username: String,
    parameter_group_name: Option<String>,
    tags: BTreeMap<String, String>,
    polls: usize,
    deleting: bool,
}

/// A fake cloud side, good enough to exercise the broker's control flow
/// without talking to AWS. `describe_instance` models RDS's eventual
/// consistency: an instance reports `Creating` for its first poll, then
/// settles to `Available`, the way a real `DescribeDBInstances` poll loop
/// would observe.
#[derive(Default)]
pub struct FakeProvider {
    instances: Mutex<HashMap<String, FakeInstance>>,
    parameter_groups: Mutex<HashMap<String, BTreeMap<String, String>>>,
    parameter_group_create_calls: AtomicUsize,
    snapshots: Mutex<Vec<Snapshot>>,
}

impl FakeProvider {
    pub fn parameter_group_create_calls(&self) -> usize {
        self.parameter_group_create_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProviderAdapter for FakeProvider {
    async fn create_instance(&self, spec: &InstanceSpec) -> Result<(), BrokerError> {
        self.instances.lock().unwrap().insert(
            spec.instance_identifier.clone(),
            FakeInstance {
                engine_version: spec.engine_version.clone(),
                master_username: spec.master_username.clone(),
                parameter_group_name: spec.db_parameter_group_name.clone(),
                tags: spec.tags.clone(),
                polls: 0,
                deleting: false,
            },
        );
        Ok(())
    }

    async fn modify_instance(
        &self,
        id: &str,
        diff: &ModifyDiff,
        _apply_immediately: bool,
    ) -> Result<(), BrokerError> {
        let mut instances = self.instances.lock().unwrap();
        let instance = instances
            .get_mut(id)
            .ok_or_else(|| BrokerError::NotFound(format!("instance {id:?}")))?;
        if let Some(group) = &diff.db_parameter_group_name {
            instance.parameter_group_name = Some(group.clone());
        }
        Ok(())
    }

    async fn reboot_instance(&self, id: &str, _force_failover: bool) -> Result<(), BrokerError> {
        if self.instances.lock().unwrap().contains_key(id) {
            Ok(())
        } else {
            Err(BrokerError::NotFound(format!("instance {id:?}")))
        }
    }

    async fn delete_instance(&self, id: &str, options: &DeleteOptions) -> Result<(), BrokerError> {
        let mut instances = self.instances.lock().unwrap();
        let instance = instances
            .get_mut(id)
            .ok_or_else(|| BrokerError::NotFound(format!("instance {id:?}")))?;
        instance.deleting = true;
        if !options.skip_final_snapshot {
            if let Some(snapshot_id) = &options.final_snapshot_id {
                self.snapshots.lock().unwrap().push(Snapshot {
                    id: snapshot_id.clone(),
                    source_instance_identifier: id.to_owned(),
                    created_at: chrono::Utc::now(),
                    tags: instance.tags.clone(),
                });
            }
        }
        Ok(())
    }

    async fn describe_instance(&self, id: &str) -> Result<Option<InstanceDetails>, BrokerError> {
        let mut instances = self.instances.lock().unwrap();
        let Some(instance) = instances.get_mut(id) else {
            return Ok(None);
        };
        instance.polls += 1;
        let state = if instance.deleting {
            InstanceState::Deleting
        } else if instance.polls < 2 {
            InstanceState::Creating
        } else {
            InstanceState::Available
        };
        Ok(Some(InstanceDetails {
            instance_identifier: id.to_owned(),
            state,
            master_username: instance.master_username.clone(),
            endpoint_host: Some("fake-endpoint.internal".to_owned()),
            endpoint_port: Some(5432),
            engine_version: instance.engine_version.clone(),
            parameter_group_name: instance.parameter_group_name.clone(),
            parameter_apply_status_pending_reboot: false,
            tags: instance.tags.clone(),
        }))
    }

    async fn list_instances_for_broker(
        &self,
        broker_name: &str,
    ) -> Result<Vec<InstanceDetails>, BrokerError> {
        let ids: Vec<String> = self
            .instances
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, i)| {
                i.tags.get(crate::tags::BROKER_NAME).map(String::as_str) == Some(broker_name)
            })
            .map(|(id, _)| id.clone())
            .collect();
        let mut result = Vec::new();
        for id in ids {
            if let Some(details) = self.describe_instance(&id).await? {
                result.push(details);
            }
        }
        Ok(result)
    }

    async fn restore_from_snapshot(
        &self,
        spec: &InstanceSpec,
        _snapshot_id: &str,
    ) -> Result<(), BrokerError> {
        self.create_instance(spec).await
    }

    async fn latest_snapshot_of(&self, id: &str) -> Result<Option<String>, BrokerError> {
        Ok(self
            .snapshots
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.source_instance_identifier == id)
            .max_by_key(|s| s.created_at)
            .map(|s| s.id.clone()))
    }

    async fn list_snapshots(
        &self,
        filter: &ListSnapshotsFilter,
    ) -> Result<Vec<Snapshot>, BrokerError> {
        Ok(self
            .snapshots
            .lock()
            .unwrap()
            .iter()
            .filter(|s| {
                s.tags.get(crate::tags::BROKER_NAME).map(String::as_str)
                    == Some(filter.broker_name.as_str())
                    && s.created_at < filter.older_than
            })
            .cloned()
            .collect())
    }

    async fn delete_snapshot(&self, id: &str) -> Result<(), BrokerError> {
        self.snapshots.lock().unwrap().retain(|s| s.id != id);
        Ok(())
    }

    async fn ensure_parameter_group(
        &self,
        name: &str,
        _family: &str,
        settings: &BTreeMap<String, String>,
    ) -> Result<(), BrokerError> {
        let mut groups = self.parameter_groups.lock().unwrap();
        if !groups.contains_key(name) {
            groups.insert(name.to_owned(), settings.clone());
            self.parameter_group_create_calls.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn attach_parameter_group(&self, id: &str, name: &str) -> Result<(), BrokerError> {
        let mut instances = self.instances.lock().unwrap();
        let instance = instances
            .get_mut(id)
            .ok_or_else(|| BrokerError::NotFound(format!("instance {id:?}")))?;
        instance.parameter_group_name = Some(name.to_owned());
        Ok(())
    }

    async fn list_tags(&self, id: &str) -> Result<BTreeMap<String, String>, BrokerError> {
        self.instances
            .lock()
            .unwrap()
            .get(id)
            .map(|i| i.tags.clone())
            .ok_or_else(|| BrokerError::NotFound(format!("instance {id:?}")))
    }

    async fn set_tags(&self, id: &str, tags: &BTreeMap<String, String>) -> Result<(), BrokerError> {
        let mut instances = self.instances.lock().unwrap();
        let instance = instances
            .get_mut(id)
            .ok_or_else(|| BrokerError::NotFound(format!("instance {id:?}")))?;
        instance.tags = tags.clone();
        Ok(())
    }
}

#[derive(Default)]
struct SharedSqlState {
    databases: BTreeSet<String>,
    users: HashMap<String, String>,
    extensions: HashMap<String, BTreeSet<String>>,
}

pub struct FakeSqlEngine {
    engine: Engine,
    state: Arc<Mutex<SharedSqlState>>,
}

#[async_trait]
impl SqlEngine for FakeSqlEngine {
    async fn create_database(&self, name: &str) -> Result<(), BrokerError> {
        self.state.lock().unwrap().databases.insert(name.to_owned());
        Ok(())
    }

    async fn drop_database(&self, name: &str) -> Result<(), BrokerError> {
        self.state.lock().unwrap().databases.remove(name);
        Ok(())
    }

    async fn create_user(
        &self,
        username: &str,
        password: &str,
        database: &str,
        host: &str,
        port: u16,
        _granted_to: Option<&str>,
    ) -> Result<Dsn, BrokerError> {
        self.state
            .lock()
            .unwrap()
            .users
            .insert(username.to_owned(), password.to_owned());
        let scheme = self.engine.dsn_scheme();
        Ok(Dsn {
            uri: format!("{scheme}://{username}:{password}@{host}:{port}/{database}"),
            jdbc_uri: format!(
                "jdbc:{scheme}://{host}:{port}/{database}?user={username}&password={password}"
            ),
        })
    }

    async fn drop_user(&self, username: &str) -> Result<bool, BrokerError> {
        Ok(self.state.lock().unwrap().users.remove(username).is_some())
    }

    async fn reset_user_password(&self, username: &str, password: &str) -> Result<(), BrokerError> {
        self.state
            .lock()
            .unwrap()
            .users
            .insert(username.to_owned(), password.to_owned());
        Ok(())
    }

    async fn grant_privileges(&self, _from_user: &str, _to_user: &str) -> Result<(), BrokerError> {
        Ok(())
    }

    async fn ensure_extensions(
        &self,
        database: &str,
        desired: &[String],
        protected: &[String],
    ) -> Result<(), BrokerError> {
        if !self.engine.supports_extensions() && !desired.is_empty() {
            return Err(BrokerError::ExtensionsUnsupported(desired.to_vec()));
        }
        let mut state = self.state.lock().unwrap();
        let enabled = state.extensions.entry(database.to_owned()).or_default();
        enabled.retain(|e| desired.contains(e) || protected.contains(e));
        enabled.extend(desired.iter().cloned());
        Ok(())
    }

    async fn correct_access_privileges(&self, _database: &str, _username: &str) -> Result<(), BrokerError> {
        Ok(())
    }

    fn max_identifier_len(&self) -> usize {
        self.engine.max_identifier_len()
    }
}

#[derive(Default)]
pub struct FakeSqlEngineFactory {
    state: Arc<Mutex<SharedSqlState>>,
    expected_master_password: Mutex<Option<String>>,
}

impl FakeSqlEngineFactory {
    /// Makes `open` reject admin connections whose URI doesn't carry this
    /// password, the way a real `sqlx::Pool::connect` would fail against a
    /// master password that has drifted from the expected one — lets
    /// rotation tests exercise the "existing seed no longer authenticates"
    /// path without a real database.
    pub fn set_expected_master_password(&self, password: impl Into<String>) {
        *self.expected_master_password.lock().unwrap() = Some(password.into());
    }

    /// The extension set `ensure_extensions` last converged `database` to.
    pub fn enabled_extensions(&self, database: &str) -> BTreeSet<String> {
        self.state
            .lock()
            .unwrap()
            .extensions
            .get(database)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl SqlEngineFactory for FakeSqlEngineFactory {
    async fn open(&self, engine: Engine, admin_uri: &str) -> Result<Box<dyn SqlEngine>, BrokerError> {
        if let Some(expected) = self.expected_master_password.lock().unwrap().as_deref() {
            let actual_password = admin_uri
                .split_once("://")
                .and_then(|(_, rest)| rest.split_once('@').map(|(creds, _)| creds))
                .and_then(|creds| creds.split_once(':').map(|(_, password)| password));
            if actual_password != Some(expected) {
                return Err(BrokerError::AuthenticationFailed(
                    "master password mismatch".to_owned(),
                ));
            }
        }
        Ok(Box::new(FakeSqlEngine {
            engine,
            state: Arc::clone(&self.state),
        }))
    }
}

fn sample_plan() -> Plan {
    Plan {
        id: "postgres-micro".to_owned(),
        name: "postgres-micro".to_owned(),
        description: "test plan".to_owned(),
        rds_properties: RdsProperties {
            instance_class: "db.t3.micro".to_owned(),
            allocated_storage: 20,
            engine: Engine::Postgres,
            engine_version: "15.4".to_owned(),
            multi_az: false,
            db_subnet_group_name: "default".to_owned(),
            vpc_security_group_ids: vec!["sg-1".to_owned()],
            skip_final_snapshot: false,
            preferred_backup_window: None,
            preferred_maintenance_window: None,
            backup_retention_period: 7,
        },
        allowed_extensions: vec!["pg_stat_statements".to_owned(), "uuid-ossp".to_owned()],
        default_extensions: vec!["uuid-ossp".to_owned()],
    }
}

pub fn test_broker_context() -> BrokerContext {
    test_broker_context_with_seed("test-seed")
}

pub fn test_broker_context_with_seed(master_password_seed: &str) -> BrokerContext {
    let (ctx, _) = test_broker_context_with_sql_factory(master_password_seed);
    ctx
}

/// Like [`test_broker_context`], but also hands back the concrete
/// [`FakeSqlEngineFactory`] so a test can call
/// [`FakeSqlEngineFactory::set_expected_master_password`] on it after the
/// context is built.
pub fn test_broker_context_with_sql_factory(
    master_password_seed: &str,
) -> (BrokerContext, Arc<FakeSqlEngineFactory>) {
    let provider = Arc::new(FakeProvider::default());
    let sql_engines = Arc::new(FakeSqlEngineFactory::default());
    let ctx = broker_context_sharing(provider, sql_engines.clone(), master_password_seed);
    (ctx, sql_engines)
}

/// Builds a `BrokerContext` over caller-supplied fakes, so a test can share
/// one `FakeProvider` across two contexts to model "the broker restarted
/// with a different `master_password_seed`" — the fake cloud side survives
/// the restart, the only thing that changed is the broker's own settings.
pub fn broker_context_sharing(
    provider: Arc<FakeProvider>,
    sql_engines: Arc<FakeSqlEngineFactory>,
    master_password_seed: &str,
) -> BrokerContext {
    let catalog = Catalog::load(vec![Service {
        id: "svc-1".to_owned(),
        name: "postgres".to_owned(),
        description: "managed postgres".to_owned(),
        plans: vec![sample_plan()],
    }])
    .unwrap();
    let settings = BrokerSettings {
        master_password_seed: master_password_seed.to_owned(),
        ..Default::default()
    };
    BrokerContext::new(Arc::new(catalog), provider, sql_engines, settings)
}

/// Creates `instance_id` directly against the fake provider (bypassing
/// `provision`) and polls it past `Creating` so it reads back `Available`
/// with an endpoint — for tests of `Bind`/`Update`/`Deprovision`/`Unbind`
/// that assume a already-running instance.
pub async fn seed_instance(ctx: &BrokerContext, instance_id: &str) {
    let plan = ctx.catalog.plan("svc-1", "postgres-micro").unwrap();
    let rds_id = ctx.rds_instance_identifier(instance_id);
    let mut tags = BTreeMap::new();
    tags.insert(crate::tags::PLAN_ID.to_owned(), "postgres-micro".to_owned());
    tags.insert(crate::tags::SERVICE_ID.to_owned(), "svc-1".to_owned());
    tags.insert(
        crate::tags::BROKER_NAME.to_owned(),
        ctx.settings.broker_name.clone(),
    );
    let spec = InstanceSpec {
        instance_identifier: rds_id.clone(),
        master_username: "fakemaster".to_owned(),
        master_password: "unused".to_owned(),
        instance_class: plan.rds_properties.instance_class.clone(),
        allocated_storage: plan.rds_properties.allocated_storage,
        engine: plan.rds_properties.engine,
        engine_version: plan.rds_properties.engine_version.clone(),
        multi_az: plan.rds_properties.multi_az,
        db_subnet_group_name: plan.rds_properties.db_subnet_group_name.clone(),
        vpc_security_group_ids: plan.rds_properties.vpc_security_group_ids.clone(),
        db_parameter_group_name: None,
        backup_retention_period: plan.rds_properties.backup_retention_period,
        preferred_backup_window: None,
        preferred_maintenance_window: None,
        tags,
    };
    ctx.provider.create_instance(&spec).await.unwrap();
    let _ = ctx.provider.describe_instance(&rds_id).await.unwrap();
    let _ = ctx.provider.describe_instance(&rds_id).await.unwrap();
}

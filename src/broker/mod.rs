//! Broker Core — the principal state machine. Every public
//! entry point takes a `&BrokerContext`, the way every `coredb-operator`
//! reconcile function takes a `&Context` carrying the Kubernetes client,
//! diagnostics, and metrics.

mod bind;
mod deprovision;
mod last_operation;
mod provision;
mod rotation;
mod unbind;
mod update;

pub use bind::{bind, BindParams, BindResponse};
pub use deprovision::deprovision;
pub use last_operation::{last_operation, LastOperationRequest, LastOperationResponse, ReportedState};
pub use provision::{provision, ProvisionOutcome, ProvisionParams};
pub use rotation::run_credential_check;
pub use unbind::unbind;
pub use update::{update, UpdateOutcome, UpdateParams};

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::catalog::Catalog;
use crate::engine::Engine;
use crate::error::BrokerError;
use crate::operation::OperationToken;
use crate::paramgroup::{ParameterGroupPlanner, DEFAULT_PRELOAD_LIBRARIES};
use crate::provider::ProviderAdapter;
use crate::sql::SqlEngine;

/// Opens a `SqlEngine` connection for a given engine/admin-URI pair.
/// Separated from `SqlEngine` itself so Broker Core never has to know how
/// the concrete `sqlx` pool is constructed — it only asks for "a connection
/// to this engine at this admin URI", matching the way `coredb-operator`'s
/// `Context` hands reconcile functions an already-built `kube::Client`
/// rather than constructing one per call.
#[async_trait]
pub trait SqlEngineFactory: Send + Sync {
    async fn open(&self, engine: Engine, admin_uri: &str) -> Result<Box<dyn SqlEngine>, BrokerError>;
}

pub struct BrokerSettings {
    pub broker_name: String,
    pub db_prefix: String,
    pub master_password_seed: String,
    pub describe_not_found_grace: Duration,
    pub known_preload_libraries: Vec<String>,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            broker_name: "rds-broker".to_owned(),
            db_prefix: "rdsbroker".to_owned(),
            master_password_seed: String::new(),
            describe_not_found_grace: Duration::from_secs(120),
            known_preload_libraries: DEFAULT_PRELOAD_LIBRARIES
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

pub struct BrokerContext {
    pub catalog: Arc<Catalog>,
    pub provider: Arc<dyn ProviderAdapter>,
    pub sql_engines: Arc<dyn SqlEngineFactory>,
    pub settings: BrokerSettings,
}

impl BrokerContext {
    pub fn new(
        catalog: Arc<Catalog>,
        provider: Arc<dyn ProviderAdapter>,
        sql_engines: Arc<dyn SqlEngineFactory>,
        settings: BrokerSettings,
    ) -> Self {
        Self {
            catalog,
            provider,
            sql_engines,
            settings,
        }
    }

    pub fn rds_instance_identifier(&self, instance_id: &str) -> String {
        format!(
            "{}-{}",
            self.settings.db_prefix,
            instance_id.replace('_', "-")
        )
    }

    pub fn final_snapshot_id(&self, instance_identifier: &str) -> String {
        format!("{instance_identifier}-final-snapshot")
    }

    pub fn param_group_planner(&self) -> ParameterGroupPlanner<'_> {
        ParameterGroupPlanner::new(
            self.settings.db_prefix.clone(),
            self.settings.known_preload_libraries.clone(),
            self.provider.as_ref(),
        )
    }
}

#[derive(Clone, Debug)]
pub struct AsyncOpAccepted {
    pub operation: OperationToken,
}

impl AsyncOpAccepted {
    pub fn token(&self) -> String {
        self.operation.encode()
    }
}

pub(crate) fn admin_uri(engine: Engine, host: &str, port: u16, username: &str, password: &str) -> String {
    let admin_db = match engine {
        Engine::Postgres => "postgres",
        Engine::MySql | Engine::MariaDb => "mysql",
    };
    format!("{}://{username}:{password}@{host}:{port}/{admin_db}", engine.dsn_scheme())
}

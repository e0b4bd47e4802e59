//! Catalog Model. Loaded once from configuration at
//! startup, validated eagerly, and immutable for the process lifetime —
//! mirroring the way `coredb-operator/src/defaults.rs` supplies fixed
//! per-field defaults rather than re-deriving them per request.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::engine::Engine;
use crate::error::BrokerError;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RdsProperties {
    pub instance_class: String,
    pub allocated_storage: i32,
    pub engine: Engine,
    pub engine_version: String,
    pub multi_az: bool,
    pub db_subnet_group_name: String,
    pub vpc_security_group_ids: Vec<String>,
    pub skip_final_snapshot: bool,
    #[serde(default)]
    pub preferred_backup_window: Option<String>,
    #[serde(default)]
    pub preferred_maintenance_window: Option<String>,
    #[serde(default = "default_backup_retention_period")]
    pub backup_retention_period: i32,
}

fn default_backup_retention_period() -> i32 {
    7
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Plan {
    pub id: String,
    pub name: String,
    pub description: String,
    pub rds_properties: RdsProperties,
    #[serde(default)]
    pub allowed_extensions: Vec<String>,
    #[serde(default)]
    pub default_extensions: Vec<String>,
}

impl Plan {
    fn validate(&self) -> Result<(), BrokerError> {
        if !(5..=6144).contains(&self.rds_properties.allocated_storage) {
            return Err(BrokerError::BadConfig(format!(
                "plan {:?}: allocated_storage {} out of range [5, 6144]",
                self.id, self.rds_properties.allocated_storage
            )));
        }
        if !(0..=35).contains(&self.rds_properties.backup_retention_period) {
            return Err(BrokerError::BadConfig(format!(
                "plan {:?}: backup_retention_period {} out of range [0, 35]",
                self.id, self.rds_properties.backup_retention_period
            )));
        }
        if self.rds_properties.engine_version.trim().is_empty() {
            return Err(BrokerError::BadConfig(format!(
                "plan {:?}: engine_version must be set",
                self.id
            )));
        }
        for ext in &self.default_extensions {
            if !self.allowed_extensions.iter().any(|a| a == ext) {
                return Err(BrokerError::BadConfig(format!(
                    "plan {:?}: default extension {ext:?} is not in allowed_extensions",
                    self.id
                )));
            }
        }
        if !self.allowed_extensions.is_empty() && !self.rds_properties.engine.supports_extensions()
        {
            return Err(BrokerError::BadConfig(format!(
                "plan {:?}: engine {:?} does not support extensions",
                self.id, self.rds_properties.engine
            )));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Service {
    pub id: String,
    pub name: String,
    pub description: String,
    pub plans: Vec<Plan>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Catalog {
    services: Vec<Service>,
}

impl Catalog {
    /// Validates every catalog invariant up front so a broken catalog
    /// fails at process startup, never partway through serving a request.
    pub fn load(services: Vec<Service>) -> Result<Self, BrokerError> {
        let mut seen_service_ids = BTreeMap::new();
        for service in &services {
            if seen_service_ids.insert(service.id.clone(), ()).is_some() {
                return Err(BrokerError::BadConfig(format!(
                    "duplicate service id {:?}",
                    service.id
                )));
            }
            let mut seen_plan_ids = BTreeMap::new();
            for plan in &service.plans {
                if seen_plan_ids.insert(plan.id.clone(), ()).is_some() {
                    return Err(BrokerError::BadConfig(format!(
                        "service {:?}: duplicate plan id {:?}",
                        service.id, plan.id
                    )));
                }
                plan.validate()?;
            }
        }
        Ok(Catalog { services })
    }

    pub fn services(&self) -> &[Service] {
        &self.services
    }

    pub fn get(&self, service_id: &str) -> Result<&Service, BrokerError> {
        self.services
            .iter()
            .find(|s| s.id == service_id)
            .ok_or_else(|| BrokerError::NotFound(format!("service {service_id:?}")))
    }

    pub fn plan(&self, service_id: &str, plan_id: &str) -> Result<&Plan, BrokerError> {
        let service = self.get(service_id)?;
        service
            .plans
            .iter()
            .find(|p| p.id == plan_id)
            .ok_or_else(|| BrokerError::NotFound(format!("plan {plan_id:?}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_plan(id: &str) -> Plan {
        Plan {
            id: id.to_owned(),
            name: id.to_owned(),
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
            allowed_extensions: vec!["uuid-ossp".to_owned(), "postgis".to_owned()],
            default_extensions: vec!["uuid-ossp".to_owned()],
        }
    }

    #[test]
    fn loads_a_well_formed_catalog() {
        let catalog = Catalog::load(vec![Service {
            id: "svc-1".to_owned(),
            name: "postgres".to_owned(),
            description: "managed postgres".to_owned(),
            plans: vec![sample_plan("postgres-micro")],
        }])
        .unwrap();
        assert!(catalog.get("svc-1").is_ok());
        assert!(catalog.plan("svc-1", "postgres-micro").is_ok());
    }

    #[test]
    fn rejects_default_extension_not_in_allowed_set() {
        let mut plan = sample_plan("postgres-micro");
        plan.default_extensions.push("pg_cron".to_owned());
        let err = Catalog::load(vec![Service {
            id: "svc-1".to_owned(),
            name: "postgres".to_owned(),
            description: "".to_owned(),
            plans: vec![plan],
        }])
        .unwrap_err();
        assert!(matches!(err, BrokerError::BadConfig(_)));
    }

    #[test]
    fn rejects_storage_out_of_range() {
        let mut plan = sample_plan("postgres-micro");
        plan.rds_properties.allocated_storage = 3;
        let err = Catalog::load(vec![Service {
            id: "svc-1".to_owned(),
            name: "postgres".to_owned(),
            description: "".to_owned(),
            plans: vec![plan],
        }])
        .unwrap_err();
        assert!(matches!(err, BrokerError::BadConfig(_)));
    }

    #[test]
    fn rejects_duplicate_plan_ids() {
        let err = Catalog::load(vec![Service {
            id: "svc-1".to_owned(),
            name: "postgres".to_owned(),
            description: "".to_owned(),
            plans: vec![sample_plan("postgres-micro"), sample_plan("postgres-micro")],
        }])
        .unwrap_err();
        assert!(matches!(err, BrokerError::BadConfig(_)));
    }
}

//! Wire types for the OSBAPI HTTP surface. Kept separate from
//! [`crate::catalog`]'s internal `Service`/`Plan` so that RDS-specific
//! fields (`rds_properties`, `allowed_extensions`) never leak onto the
//! platform-facing catalog response.

use serde::{Deserialize, Serialize};

use crate::catalog::{Catalog, Plan, Service};

#[derive(Debug, Serialize)]
pub struct CatalogResponse {
    pub services: Vec<CatalogService>,
}

#[derive(Debug, Serialize)]
pub struct CatalogService {
    pub id: String,
    pub name: String,
    pub description: String,
    pub bindable: bool,
    pub plan_updateable: bool,
    pub plans: Vec<CatalogPlan>,
}

#[derive(Debug, Serialize)]
pub struct CatalogPlan {
    pub id: String,
    pub name: String,
    pub description: String,
    pub free: bool,
}

impl From<&Plan> for CatalogPlan {
    fn from(plan: &Plan) -> Self {
        Self {
            id: plan.id.clone(),
            name: plan.name.clone(),
            description: plan.description.clone(),
            free: false,
        }
    }
}

impl From<&Service> for CatalogService {
    fn from(service: &Service) -> Self {
        Self {
            id: service.id.clone(),
            name: service.name.clone(),
            description: service.description.clone(),
            bindable: true,
            plan_updateable: true,
            plans: service.plans.iter().map(CatalogPlan::from).collect(),
        }
    }
}

impl From<&Catalog> for CatalogResponse {
    fn from(catalog: &Catalog) -> Self {
        Self {
            services: catalog.services().iter().map(CatalogService::from).collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ProvisionRequestBody {
    pub service_id: String,
    pub plan_id: String,
    #[serde(default)]
    pub organization_guid: Option<String>,
    #[serde(default)]
    pub parameters: Option<ProvisionParameters>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ProvisionParameters {
    #[serde(default)]
    pub restore_from_latest_snapshot_of: Option<String>,
    #[serde(default)]
    pub chargeable_entity: Option<String>,
    #[serde(default)]
    pub skip_final_snapshot: Option<bool>,
}

impl From<ProvisionParameters> for crate::broker::ProvisionParams {
    fn from(params: ProvisionParameters) -> Self {
        Self {
            restore_from_latest_snapshot_of: params.restore_from_latest_snapshot_of,
            chargeable_entity: params.chargeable_entity,
            skip_final_snapshot: params.skip_final_snapshot,
        }
    }
}

impl From<UpdateParameters> for crate::broker::UpdateParams {
    fn from(params: UpdateParameters) -> Self {
        Self {
            reboot: Some(params.reboot),
            skip_final_snapshot: params.skip_final_snapshot,
            enable_extensions: params.enable_extensions,
            disable_extensions: params.disable_extensions,
            apply_at_maintenance_window: Some(params.apply_at_maintenance_window),
            backup_retention_period: params.backup_retention_period,
            preferred_backup_window: params.preferred_backup_window,
            preferred_maintenance_window: params.preferred_maintenance_window,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AsyncOperationResponse {
    pub operation: String,
}

#[derive(Debug, Serialize, Default)]
pub struct EmptyResponse {}

#[derive(Debug, Deserialize)]
pub struct UpdateRequestBody {
    pub service_id: String,
    #[serde(default)]
    pub plan_id: Option<String>,
    #[serde(default)]
    pub parameters: Option<UpdateParameters>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateParameters {
    #[serde(default)]
    pub reboot: bool,
    #[serde(default)]
    pub skip_final_snapshot: Option<bool>,
    #[serde(default)]
    pub enable_extensions: Vec<String>,
    #[serde(default)]
    pub disable_extensions: Vec<String>,
    #[serde(default)]
    pub apply_at_maintenance_window: bool,
    #[serde(default)]
    pub backup_retention_period: Option<i32>,
    #[serde(default)]
    pub preferred_backup_window: Option<String>,
    #[serde(default)]
    pub preferred_maintenance_window: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DeprovisionQuery {
    pub service_id: String,
    pub plan_id: String,
    #[serde(default)]
    pub accepts_incomplete: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct LastOperationQuery {
    pub service_id: Option<String>,
    pub plan_id: Option<String>,
    pub operation: String,
}

#[derive(Debug, Serialize)]
pub struct LastOperationResponseBody {
    pub state: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct BindResponseBody {
    pub credentials: Credentials,
}

#[derive(Debug, Serialize)]
pub struct Credentials {
    pub uri: String,
    pub jdbc_uri: String,
    pub name: String,
    pub username: String,
    pub password: String,
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: &'static str,
    pub description: String,
}

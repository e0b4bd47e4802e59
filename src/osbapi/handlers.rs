use actix_web::{delete, get, patch, put, web, HttpRequest, HttpResponse};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::Deserialize;
use tracing::error;
use uuid::Uuid;

use super::types::*;
use super::AppState;
use crate::broker::{self, ReportedState};
use crate::error::BrokerError;

const API_VERSION_HEADER: &str = "X-Broker-Api-Version";

fn check_auth(req: &HttpRequest, state: &AppState) -> Result<(), HttpResponse> {
    let header = req
        .headers()
        .get(actix_web::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    let Some(header) = header else {
        return Err(unauthorized());
    };
    let Some(encoded) = header.strip_prefix("Basic ") else {
        return Err(unauthorized());
    };
    let Ok(decoded) = STANDARD.decode(encoded) else {
        return Err(unauthorized());
    };
    let Ok(decoded) = String::from_utf8(decoded) else {
        return Err(unauthorized());
    };
    let Some((username, password)) = decoded.split_once(':') else {
        return Err(unauthorized());
    };
    if username == state.username && password == state.password {
        Ok(())
    } else {
        Err(unauthorized())
    }
}

fn unauthorized() -> HttpResponse {
    HttpResponse::Unauthorized().json(ErrorBody {
        error: "Unauthorized",
        description: "invalid or missing basic auth credentials".to_owned(),
    })
}

fn echo_api_version(req: &HttpRequest, mut response: HttpResponse) -> HttpResponse {
    if let Some(version) = req.headers().get(API_VERSION_HEADER) {
        response
            .headers_mut()
            .insert(API_VERSION_HEADER.parse().unwrap(), version.clone());
    }
    response
}

fn map_error(err: BrokerError) -> HttpResponse {
    match err {
        BrokerError::ValidationError(description) => HttpResponse::BadRequest().json(ErrorBody {
            error: "ValidationError",
            description,
        }),
        BrokerError::NotFound(description) => HttpResponse::NotFound().json(ErrorBody {
            error: "NotFound",
            description,
        }),
        BrokerError::AlreadyExists(description) => HttpResponse::Conflict().json(ErrorBody {
            error: "AlreadyExists",
            description,
        }),
        BrokerError::AsyncRequired => HttpResponse::UnprocessableEntity().json(ErrorBody {
            error: "AsyncRequired",
            description: "this operation requires accepts_incomplete=true".to_owned(),
        }),
        BrokerError::Conflict => HttpResponse::UnprocessableEntity().json(ErrorBody {
            error: "ConcurrencyError",
            description: "another operation is already in progress for this instance".to_owned(),
        }),
        BrokerError::ExtensionsUnsupported(exts) => HttpResponse::BadRequest().json(ErrorBody {
            error: "ValidationError",
            description: format!("extensions unsupported on this engine: {exts:?}"),
        }),
        other => {
            let correlation_id = Uuid::new_v4();
            error!(%correlation_id, error = %other, "unhandled broker error");
            HttpResponse::InternalServerError().json(ErrorBody {
                error: "InternalServerError",
                description: format!("internal error, correlation id {correlation_id}"),
            })
        }
    }
}

fn require_accepts_incomplete(accepts_incomplete: Option<bool>) -> Result<(), HttpResponse> {
    if accepts_incomplete.unwrap_or(false) {
        Ok(())
    } else {
        Err(map_error(BrokerError::AsyncRequired))
    }
}

#[derive(Debug, Deserialize)]
struct AcceptsIncompleteQuery {
    #[serde(default)]
    accepts_incomplete: Option<bool>,
}

#[get("/v2/catalog")]
pub async fn catalog(req: HttpRequest, state: web::Data<AppState>) -> HttpResponse {
    if let Err(resp) = check_auth(&req, &state) {
        return resp;
    }
    let body = CatalogResponse::from(state.ctx.catalog.as_ref());
    echo_api_version(&req, HttpResponse::Ok().json(body))
}

#[put("/v2/service_instances/{instance_id}")]
pub async fn provision(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<String>,
    query: web::Query<AcceptsIncompleteQuery>,
    body: web::Json<ProvisionRequestBody>,
) -> HttpResponse {
    if let Err(resp) = check_auth(&req, &state) {
        return resp;
    }
    if let Err(resp) = require_accepts_incomplete(query.accepts_incomplete) {
        return echo_api_version(&req, resp);
    }
    let instance_id = path.into_inner();
    let body = body.into_inner();
    let params: broker::ProvisionParams = body.parameters.unwrap_or_default().into();
    match broker::provision(&state.ctx, &instance_id, &body.service_id, &body.plan_id, params).await {
        Ok(broker::ProvisionOutcome::Accepted(accepted)) => echo_api_version(
            &req,
            HttpResponse::Accepted().json(AsyncOperationResponse {
                operation: accepted.token(),
            }),
        ),
        Ok(broker::ProvisionOutcome::AlreadyProvisioned) => {
            echo_api_version(&req, HttpResponse::Ok().json(EmptyResponse::default()))
        }
        Err(err) => echo_api_version(&req, map_error(err)),
    }
}

#[patch("/v2/service_instances/{instance_id}")]
pub async fn update(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<String>,
    query: web::Query<AcceptsIncompleteQuery>,
    body: web::Json<UpdateRequestBody>,
) -> HttpResponse {
    if let Err(resp) = check_auth(&req, &state) {
        return resp;
    }
    if let Err(resp) = require_accepts_incomplete(query.accepts_incomplete) {
        return echo_api_version(&req, resp);
    }
    let instance_id = path.into_inner();
    let body = body.into_inner();
    let Some(plan_id) = body.plan_id else {
        return echo_api_version(
            &req,
            map_error(BrokerError::ValidationError("plan_id is required".to_owned())),
        );
    };
    let params: broker::UpdateParams = body.parameters.unwrap_or_default().into();
    match broker::update(&state.ctx, &instance_id, &body.service_id, &plan_id, params).await {
        Ok(broker::UpdateOutcome::Accepted(accepted)) => echo_api_version(
            &req,
            HttpResponse::Accepted().json(AsyncOperationResponse {
                operation: accepted.token(),
            }),
        ),
        Ok(broker::UpdateOutcome::CompletedSynchronously) => {
            echo_api_version(&req, HttpResponse::Ok().json(EmptyResponse::default()))
        }
        Err(err) => echo_api_version(&req, map_error(err)),
    }
}

#[delete("/v2/service_instances/{instance_id}")]
pub async fn deprovision(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<String>,
    query: web::Query<DeprovisionQuery>,
) -> HttpResponse {
    if let Err(resp) = check_auth(&req, &state) {
        return resp;
    }
    if let Err(resp) = require_accepts_incomplete(query.accepts_incomplete) {
        return echo_api_version(&req, resp);
    }
    let instance_id = path.into_inner();
    match broker::deprovision(&state.ctx, &instance_id, &query.service_id, &query.plan_id).await {
        Ok(accepted) => echo_api_version(
            &req,
            HttpResponse::Accepted().json(AsyncOperationResponse {
                operation: accepted.token(),
            }),
        ),
        Err(BrokerError::NotFound(_)) => echo_api_version(
            &req,
            HttpResponse::Gone().json(EmptyResponse::default()),
        ),
        Err(err) => echo_api_version(&req, map_error(err)),
    }
}

#[get("/v2/service_instances/{instance_id}/last_operation")]
pub async fn last_operation(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<String>,
    query: web::Query<LastOperationQuery>,
) -> HttpResponse {
    if let Err(resp) = check_auth(&req, &state) {
        return resp;
    }
    let instance_id = path.into_inner();
    let request = broker::LastOperationRequest {
        instance_id,
        service_id: query.service_id.clone(),
        plan_id: query.plan_id.clone(),
        operation: query.operation.clone(),
    };
    match broker::last_operation(&state.ctx, request).await {
        Ok(response) if response.state == ReportedState::Gone => {
            echo_api_version(&req, HttpResponse::Gone().json(EmptyResponse::default()))
        }
        Ok(response) => {
            let state_str = match response.state {
                ReportedState::InProgress => "in progress",
                ReportedState::Succeeded => "succeeded",
                ReportedState::Failed => "failed",
                ReportedState::Gone => unreachable!(),
            };
            echo_api_version(
                &req,
                HttpResponse::Ok().json(LastOperationResponseBody {
                    state: state_str,
                    description: response.description,
                }),
            )
        }
        Err(err) => echo_api_version(&req, map_error(err)),
    }
}

#[put("/v2/service_instances/{instance_id}/service_bindings/{binding_id}")]
pub async fn bind(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<(String, String)>,
) -> HttpResponse {
    if let Err(resp) = check_auth(&req, &state) {
        return resp;
    }
    let (instance_id, binding_id) = path.into_inner();
    match broker::bind(&state.ctx, &instance_id, &binding_id, broker::BindParams::default()).await {
        Ok(response) => echo_api_version(
            &req,
            HttpResponse::Created().json(BindResponseBody {
                credentials: Credentials {
                    uri: response.uri,
                    jdbc_uri: response.jdbc_uri,
                    name: response.name,
                    username: response.username,
                    password: response.password,
                    host: response.host,
                    port: response.port,
                },
            }),
        ),
        Err(err) => echo_api_version(&req, map_error(err)),
    }
}

#[delete("/v2/service_instances/{instance_id}/service_bindings/{binding_id}")]
pub async fn unbind(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<(String, String)>,
) -> HttpResponse {
    if let Err(resp) = check_auth(&req, &state) {
        return resp;
    }
    let (instance_id, binding_id) = path.into_inner();
    match broker::unbind(&state.ctx, &instance_id, &binding_id).await {
        Ok(()) => echo_api_version(&req, HttpResponse::Ok().json(EmptyResponse::default())),
        Err(err) => echo_api_version(&req, map_error(err)),
    }
}

//! HTTP endpoints
//!
//! - `GET /incr?distribution=&field=&N=` - add N (default 1) to a label
//! - `GET /get?distribution=&field=&rate=` - one decayed label
//! - `GET /dist?distribution=&rate=` - the whole decayed distribution
//! - `GET /rate?distribution=&rate=` - store a rate override
//!
//! Bad parameters answer `400` before the store is touched; store failures
//! answer `503`.

use crate::decay::Rate;
use crate::error::{ServiceError, ValidationError};
use crate::service::Service;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

type Params = HashMap<String, String>;

/// Handler error mapped onto a plain-text response
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn from_service(e: ServiceError, store_message: impl FnOnce(&ServiceError) -> String) -> Self {
        match e {
            ServiceError::Validation(v) => v.into(),
            store => ApiError {
                status: StatusCode::SERVICE_UNAVAILABLE,
                message: store_message(&store),
            },
        }
    }
}

impl From<ValidationError> for ApiError {
    fn from(e: ValidationError) -> Self {
        ApiError {
            status: StatusCode::BAD_REQUEST,
            message: e.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, self.message).into_response()
    }
}

fn required<'a>(params: &'a Params, name: &'static str) -> Result<&'a str, ValidationError> {
    match params.get(name).map(String::as_str) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(ValidationError::Missing(name)),
    }
}

fn optional_rate(params: &Params) -> Result<Option<Rate>, ValidationError> {
    match params.get("rate").map(String::as_str) {
        None | Some("") => Ok(None),
        Some(raw) => Rate::parse_param("rate", raw).map(Some),
    }
}

fn parse_n(params: &Params) -> Result<u64, ValidationError> {
    let raw = match params.get("N").map(String::as_str) {
        None | Some("") => return Ok(1),
        Some(raw) => raw,
    };
    let n = raw.parse::<u64>().map_err(|e| ValidationError::Malformed {
        param: "N",
        reason: e.to_string(),
    })?;
    if n > i64::MAX as u64 {
        return Err(ValidationError::Malformed {
            param: "N",
            reason: format!("{} exceeds {}", n, i64::MAX),
        });
    }
    Ok(n)
}

async fn incr(
    State(service): State<Arc<Service>>,
    Query(params): Query<Params>,
) -> Result<&'static str, ApiError> {
    let distribution = required(&params, "distribution")?;
    let field = required(&params, "field")?;
    let n = parse_n(&params)?;

    service
        .increment(distribution, field, n)
        .await
        .map(|()| "OK")
        .map_err(|e| ApiError::from_service(e, |_| "FAIL".to_string()))
}

async fn get_field(
    State(service): State<Arc<Service>>,
    Query(params): Query<Params>,
) -> Result<impl IntoResponse, ApiError> {
    let distribution = required(&params, "distribution")?;
    let field = required(&params, "field")?;
    let rate = optional_rate(&params)?;

    service
        .query_field(distribution, field, rate)
        .await
        .map(Json)
        .map_err(|e| {
            ApiError::from_service(e, |e| format!("Error retrieving field {}: {}", field, e))
        })
}

async fn get_distribution(
    State(service): State<Arc<Service>>,
    Query(params): Query<Params>,
) -> Result<impl IntoResponse, ApiError> {
    let distribution = required(&params, "distribution")?;
    let rate = optional_rate(&params)?;

    service
        .query_distribution(distribution, rate)
        .await
        .map(Json)
        .map_err(|e| {
            ApiError::from_service(e, |e| {
                format!("Error retrieving distribution {}: {}", distribution, e)
            })
        })
}

async fn set_rate(
    State(service): State<Arc<Service>>,
    Query(params): Query<Params>,
) -> Result<&'static str, ApiError> {
    let distribution = required(&params, "distribution")?;
    let rate = optional_rate(&params)?.ok_or(ValidationError::Missing("rate"))?;

    service
        .set_rate(distribution, rate)
        .await
        .map(|()| "OK")
        .map_err(|e| ApiError::from_service(e, |_| "FAIL".to_string()))
}

pub fn router(service: Service) -> Router {
    Router::new()
        .route("/incr", get(incr))
        .route("/get", get(get_field))
        .route("/dist", get(get_distribution))
        .route("/rate", get(set_rate))
        .with_state(Arc::new(service))
}

/// Serve until `shutdown` resolves, then finish in-flight requests
pub async fn serve<F>(listener: TcpListener, service: Service, shutdown: F) -> std::io::Result<()>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "HTTP server listening");
    }
    axum::serve(listener, router(service))
        .with_graceful_shutdown(shutdown)
        .await
}

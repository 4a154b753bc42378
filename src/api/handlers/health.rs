//! Liveness and health endpoints.
//!
//! The healthcheck reflects key-loading state: bulk-loader error counts
//! surface under `checks[id=keys-check]` so operators notice partial loads
//! without trawling logs.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use crate::server::AppState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum HealthStatus {
    #[serde(rename = "UP")]
    Up,
    #[serde(rename = "DOWN")]
    Down,
}

#[derive(Debug, Serialize)]
pub struct HealthCheckData {
    #[serde(rename = "error-count")]
    pub error_count: u32,
}

#[derive(Debug, Serialize)]
pub struct HealthCheck {
    pub id: String,
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checks: Option<Vec<HealthCheck>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<HealthCheckData>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub checks: Vec<HealthCheck>,
}

/// `GET /upcheck`
pub async fn upcheck() -> &'static str {
    "OK"
}

/// `GET /healthcheck`
pub async fn healthcheck(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let report = state.registry.last_load_report();

    let (metadata_errors, proxy_errors, loaded_any) = report
        .as_ref()
        .map(|report| (report.metadata_errors, report.proxy_errors, true))
        .unwrap_or((0, 0, false));

    let keys_status = if loaded_any && metadata_errors == 0 && proxy_errors == 0 {
        HealthStatus::Up
    } else {
        HealthStatus::Down
    };

    let keys_check = HealthCheck {
        id: "keys-check".to_string(),
        status: keys_status,
        checks: Some(vec![
            loader_check("metadata-files-loading", metadata_errors),
            loader_check("proxy-keystores-loading", proxy_errors),
        ]),
        data: None,
    };
    let mut checks = vec![keys_check];

    if let Some(store) = &state.slashing {
        let db_status = match store.ping().await {
            Ok(()) => HealthStatus::Up,
            Err(_) => HealthStatus::Down,
        };
        checks.push(HealthCheck {
            id: "slashing-db-check".to_string(),
            status: db_status,
            checks: None,
            data: None,
        });
    }

    let overall = if checks.iter().all(|check| check.status == HealthStatus::Up) {
        HealthStatus::Up
    } else {
        HealthStatus::Down
    };
    let status_code = if overall == HealthStatus::Up {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status_code,
        Json(HealthResponse {
            status: overall,
            checks,
        }),
    )
}

fn loader_check(id: &str, error_count: u32) -> HealthCheck {
    HealthCheck {
        id: id.to_string(),
        status: if error_count == 0 {
            HealthStatus::Up
        } else {
            HealthStatus::Down
        },
        checks: None,
        data: Some(HealthCheckData { error_count }),
    }
}

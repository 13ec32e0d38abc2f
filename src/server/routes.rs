//! JSON API over a [`LoadBalancer`].
//!
//! | Route | Answer |
//! |-------|--------|
//! | `GET /api/servers` | server summaries (after a fresh poll cycle) |
//! | `GET /api/devices` | device summaries (after a fresh poll cycle) |
//! | `GET /api/profiles` | listener profile ids and names |
//! | `GET /api/decide?profile=<id>&failed=<id,id>` | dispatch decision |
//! | `GET /api/health` | liveness |

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use log::{error, info};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;

use crate::balancer::LoadBalancer;
use crate::cluster::state::{DeviceSummary, ServerSummary};

#[derive(Debug, Deserialize)]
pub struct DecideQuery {
    pub profile: String,
    /// Comma separated device ids the listener already failed on
    #[serde(default)]
    pub failed: Option<String>,
}

impl DecideQuery {
    fn excluded(&self) -> Vec<String> {
        self.failed
            .as_deref()
            .unwrap_or("")
            .split(',')
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .collect()
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct DecideResponse {
    pub decision: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct ProfileEntry {
    pub id: String,
    pub name: String,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

pub fn router(balancer: Arc<LoadBalancer>) -> Router {
    Router::new()
        .route("/api/servers", get(servers_handler))
        .route("/api/devices", get(devices_handler))
        .route("/api/profiles", get(profiles_handler))
        .route("/api/decide", get(decide_handler))
        .route("/api/health", get(health_check))
        .layer(CorsLayer::permissive())
        .with_state(balancer)
}

async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "sdr-balancer"
    }))
}

/// Run a poll cycle so the answer reflects the fleet as of this request.
async fn refresh(balancer: &LoadBalancer) -> Result<(), ApiError> {
    balancer.wake_and_wait_until_worked().await.map_err(|e| {
        error!("❌ Could not refresh cluster state: {}", e);
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ErrorResponse {
                error: e.to_string(),
            }),
        )
    })
}

async fn servers_handler(
    State(balancer): State<Arc<LoadBalancer>>,
) -> Result<Json<Vec<ServerSummary>>, ApiError> {
    refresh(&balancer).await?;
    Ok(Json(balancer.current_servers().await))
}

async fn devices_handler(
    State(balancer): State<Arc<LoadBalancer>>,
) -> Result<Json<Vec<DeviceSummary>>, ApiError> {
    refresh(&balancer).await?;
    Ok(Json(balancer.current_devices().await))
}

async fn profiles_handler(State(balancer): State<Arc<LoadBalancer>>) -> Json<Vec<ProfileEntry>> {
    let profiles = balancer
        .listener_profiles()
        .await
        .into_iter()
        .map(|(id, profile)| ProfileEntry {
            id,
            name: profile.name,
        })
        .collect();
    Json(profiles)
}

async fn decide_handler(
    State(balancer): State<Arc<LoadBalancer>>,
    Query(query): Query<DecideQuery>,
) -> Result<Json<DecideResponse>, ApiError> {
    refresh(&balancer).await?;

    let excluded = query.excluded();
    let response = match balancer.decide(&query.profile, &excluded).await {
        Some(decision) => {
            info!(
                "🎯 Listener for profile '{}' -> {} device '{}' profile '{}' (score {:.1})",
                query.profile,
                decision.target(),
                decision.device_id,
                decision.profile_id,
                decision.score
            );
            DecideResponse {
                decision: true,
                server: Some(decision.target()),
                device: Some(decision.device_id),
                profile: Some(decision.profile_id),
            }
        }
        None => {
            info!("🚫 No capacity for profile '{}'", query.profile);
            DecideResponse {
                decision: false,
                server: None,
                device: None,
                profile: None,
            }
        }
    };

    Ok(Json(response))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failed_list_parsing() {
        let query = DecideQuery {
            profile: "p".to_string(),
            failed: Some("a, b,,c ".to_string()),
        };
        assert_eq!(query.excluded(), vec!["a", "b", "c"]);

        let query = DecideQuery {
            profile: "p".to_string(),
            failed: None,
        };
        assert!(query.excluded().is_empty());
    }

    #[test]
    fn test_no_decision_serializes_flat() {
        let response = DecideResponse {
            decision: false,
            server: None,
            device: None,
            profile: None,
        };
        assert_eq!(
            serde_json::to_value(&response).unwrap(),
            serde_json::json!({"decision": false})
        );
    }
}

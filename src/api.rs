//! HTTP API for the messaging gateway and operations tooling.
//!
//! Inbound intake, on-demand watcher runs, alert triage, and the profile and
//! wellness feeds from the signup and assessment systems. Spawned as a
//! background task in the gateway, same pattern as the scheduler.

use crate::gateway::Gateway;
use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::Json,
    routing::{get, post},
    Router,
};
use chrono::Utc;
use haven_core::{
    clock::to_ms,
    config::ApiConfig,
    error::HavenError,
    message::InboundMessage,
    model::{Consent, EmergencyContact, JourneyPhase, User, WellnessScore},
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{error, info, warn};

type ApiError = (StatusCode, Json<Value>);

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    gateway: Arc<Gateway>,
    api_key: Option<String>,
}

/// `POST /api/users` body. Absent fields keep their stored value.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserProfile {
    id: String,
    first_name: Option<String>,
    phone_number: Option<String>,
    email: Option<String>,
    timezone: Option<String>,
    journey_phase: Option<JourneyPhase>,
    subscribed: Option<bool>,
    consent: Option<Consent>,
    emergency_contact: Option<EmergencyContact>,
}

impl UserProfile {
    fn apply(self, user: &mut User) {
        if self.first_name.is_some() {
            user.first_name = self.first_name;
        }
        if self.phone_number.is_some() {
            user.phone_number = self.phone_number;
        }
        if self.email.is_some() {
            user.email = self.email;
        }
        if self.timezone.is_some() {
            user.timezone = self.timezone;
        }
        if let Some(phase) = self.journey_phase {
            user.journey_phase = phase;
        }
        if let Some(subscribed) = self.subscribed {
            user.subscribed = subscribed;
        }
        if let Some(consent) = self.consent {
            user.consent = consent;
        }
        if self.emergency_contact.is_some() {
            user.emergency_contact = self.emergency_contact;
        }
    }
}

/// `POST /api/wellness` body.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WellnessRequest {
    user_id: String,
    overall_score: f64,
    band: String,
    #[serde(default)]
    pressure_zones: Vec<String>,
    /// Defaults to the time of the request.
    recorded_at: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct AlertsQuery {
    limit: Option<i64>,
}

/// Constant-time string comparison to prevent timing attacks on API token validation.
fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.bytes()
        .zip(b.bytes())
        .fold(0u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}

/// Check bearer token auth. Returns `None` if authorized, `Some(response)` if rejected.
fn check_auth(headers: &HeaderMap, api_key: &Option<String>) -> Option<ApiError> {
    let key = api_key.as_ref()?;

    let Some(header) = headers.get("authorization") else {
        return Some((
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": "missing Authorization header"})),
        ));
    };

    let Ok(value) = header.to_str() else {
        return Some((
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": "invalid Authorization header"})),
        ));
    };

    match value.strip_prefix("Bearer ") {
        Some(token) if constant_time_eq(token, key) => None,
        _ => Some((
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": "invalid token"})),
        )),
    }
}

fn bad_request(message: &str) -> ApiError {
    (StatusCode::BAD_REQUEST, Json(json!({"error": message})))
}

fn internal(context: &str, e: HavenError) -> ApiError {
    error!("api: {context}: {e}");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({"error": format!("{context}: {e}")})),
    )
}

fn parse_body<T>(body: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    body.map(|Json(v)| v)
        .map_err(|e| bad_request(&format!("invalid request: {e}")))
}

/// `GET /api/health`
async fn health(headers: HeaderMap, State(state): State<ApiState>) -> Result<Json<Value>, ApiError> {
    if let Some(err) = check_auth(&headers, &state.api_key) {
        return Err(err);
    }
    Ok(Json(json!({
        "status": "ok",
        "uptime_secs": state.gateway.uptime_secs(),
    })))
}

/// `POST /api/inbound`: intake for one message from the messaging gateway.
async fn inbound(
    headers: HeaderMap,
    State(state): State<ApiState>,
    body: Result<Json<InboundMessage>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    if let Some(err) = check_auth(&headers, &state.api_key) {
        return Err(err);
    }
    let msg = parse_body(body)?;
    if msg.user_id.trim().is_empty() {
        return Err(bad_request("userId must not be empty"));
    }
    if msg.text.trim().is_empty() {
        return Err(bad_request("text must not be empty"));
    }

    let decision = state
        .gateway
        .handle_inbound(&msg, Utc::now())
        .await
        .map_err(|e| internal("intake failed", e))?;
    Ok(Json(json!({
        "agent": decision.agent.as_str(),
        "threadId": decision.thread_id,
    })))
}

/// `POST /api/watchers/engagement`
async fn watch_engagement(
    headers: HeaderMap,
    State(state): State<ApiState>,
) -> Result<Json<Value>, ApiError> {
    if let Some(err) = check_auth(&headers, &state.api_key) {
        return Err(err);
    }
    let summary = state
        .gateway
        .run_engagement_watch(Utc::now())
        .await
        .map_err(|e| internal("engagement watch failed", e))?;
    Ok(Json(json!(summary)))
}

/// `POST /api/watchers/wellness`
async fn watch_wellness(
    headers: HeaderMap,
    State(state): State<ApiState>,
) -> Result<Json<Value>, ApiError> {
    if let Some(err) = check_auth(&headers, &state.api_key) {
        return Err(err);
    }
    let summary = state
        .gateway
        .run_wellness_watch(Utc::now())
        .await
        .map_err(|e| internal("wellness watch failed", e))?;
    Ok(Json(json!(summary)))
}

/// `GET /api/alerts`: open alerts, newest first, plus counts by type.
async fn alerts(
    headers: HeaderMap,
    State(state): State<ApiState>,
    Query(query): Query<AlertsQuery>,
) -> Result<Json<Value>, ApiError> {
    if let Some(err) = check_auth(&headers, &state.api_key) {
        return Err(err);
    }
    let store = state.gateway.store();
    let counts = store
        .alert_counts()
        .await
        .map_err(|e| internal("failed to count alerts", e))?;
    let list = store
        .list_unresolved_alerts(query.limit.unwrap_or(100).clamp(1, 1000))
        .await
        .map_err(|e| internal("failed to list alerts", e))?;

    let counts: serde_json::Map<String, Value> =
        counts.into_iter().map(|(t, n)| (t, json!(n))).collect();
    Ok(Json(json!({
        "counts": counts,
        "alerts": list,
    })))
}

/// `POST /api/alerts/{id}/resolve`
async fn resolve_alert(
    headers: HeaderMap,
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    if let Some(err) = check_auth(&headers, &state.api_key) {
        return Err(err);
    }
    let store = state.gateway.store();
    if store
        .get_alert(&id)
        .await
        .map_err(|e| internal("failed to load alert", e))?
        .is_none()
    {
        return Err((
            StatusCode::NOT_FOUND,
            Json(json!({"error": format!("alert {id} not found")})),
        ));
    }
    let resolved = store
        .resolve_alert(&id, to_ms(Utc::now()))
        .await
        .map_err(|e| internal("failed to resolve alert", e))?;
    if resolved {
        info!("api: alert {id} resolved");
    }
    Ok(Json(json!({
        "id": id,
        "status": if resolved { "resolved" } else { "already_resolved" },
    })))
}

/// `POST /api/users`: create or update a caregiver profile.
async fn upsert_user(
    headers: HeaderMap,
    State(state): State<ApiState>,
    body: Result<Json<UserProfile>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    if let Some(err) = check_auth(&headers, &state.api_key) {
        return Err(err);
    }
    let profile = parse_body(body)?;
    let id = profile.id.trim().to_string();
    if id.is_empty() {
        return Err(bad_request("id must not be empty"));
    }
    if let Some(tz) = profile.timezone.as_deref() {
        if tz.parse::<chrono_tz::Tz>().is_err() {
            warn!("api: user {id} registered with unknown timezone {tz}");
        }
    }

    let store = state.gateway.store();
    let existing = store
        .get_user(&id)
        .await
        .map_err(|e| internal("failed to load user", e))?;
    let created = existing.is_none();
    let mut user = existing.unwrap_or_else(|| User::new(&id));
    profile.apply(&mut user);
    store
        .upsert_user(&user, to_ms(Utc::now()))
        .await
        .map_err(|e| internal("failed to save user", e))?;

    Ok(Json(json!({
        "status": if created { "created" } else { "updated" },
        "user": user,
    })))
}

/// `POST /api/wellness`: append one assessment result.
async fn record_wellness(
    headers: HeaderMap,
    State(state): State<ApiState>,
    body: Result<Json<WellnessRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    if let Some(err) = check_auth(&headers, &state.api_key) {
        return Err(err);
    }
    let request = parse_body(body)?;
    if request.user_id.trim().is_empty() {
        return Err(bad_request("userId must not be empty"));
    }
    if !request.overall_score.is_finite() {
        return Err(bad_request("overallScore must be a number"));
    }

    let score = WellnessScore {
        user_id: request.user_id,
        overall_score: request.overall_score,
        band: request.band,
        pressure_zones: request.pressure_zones,
        recorded_at: request.recorded_at.unwrap_or_else(|| to_ms(Utc::now())),
    };
    let id = state
        .gateway
        .store()
        .record_wellness_score(&score)
        .await
        .map_err(|e| internal("failed to record wellness score", e))?;
    Ok((StatusCode::CREATED, Json(json!({"id": id}))))
}

/// Build the axum router with shared state.
fn build_router(state: ApiState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/inbound", post(inbound))
        .route("/api/watchers/engagement", post(watch_engagement))
        .route("/api/watchers/wellness", post(watch_wellness))
        .route("/api/alerts", get(alerts))
        .route("/api/alerts/{id}/resolve", post(resolve_alert))
        .route("/api/users", post(upsert_user))
        .route("/api/wellness", post(record_wellness))
        .layer(axum::extract::DefaultBodyLimit::max(1024 * 1024)) // 1 MB max request body
        .with_state(state)
}

/// Start the API server. Called from `Gateway::run()`.
pub async fn serve(config: ApiConfig, gateway: Arc<Gateway>) {
    let api_key = if config.api_key.is_empty() {
        None
    } else {
        Some(config.api_key.clone())
    };

    let app = build_router(ApiState { gateway, api_key });
    let addr = format!("{}:{}", config.host, config.port);

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            error!("API server failed to bind to {addr}: {e}");
            return;
        }
    };

    info!("API server listening on {addr}");

    if let Err(e) = axum::serve(listener, app).await {
        error!("API server error: {e}");
    }
}

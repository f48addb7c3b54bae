//! HTTP surface
//!
//! Two endpoints:
//!
//! - `GET /pricing?period=P&hotel=H&room=R`: the rate lookup. Invalid
//!   parameters get a 400 with per-field messages; engine degradation
//!   (quota exhausted, lock contention) gets a 503. Error bodies are
//!   RFC 7807 problem documents and never carry internal detail.
//! - `GET /healthz`: read-only aggregation of store reachability and the
//!   shared counters. Always answers 200; internal failures only flip the
//!   report to "degraded".

use crate::engine::RateCacheEngine;
use crate::quota::QuotaAccountant;
use crate::store::KvStore;
use crate::types::{Hotel, Period, Room, RateQuery};
use axum::extract::{Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;
use tracing::warn;

/// Counter of successfully served pricing requests, shared by all replicas.
pub const HIT_COUNTER_KEY: &str = "hit_count";

pub struct AppState {
    pub engine: Arc<RateCacheEngine>,
    pub store: Arc<dyn KvStore>,
    pub quota: Arc<QuotaAccountant>,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/pricing", get(handle_pricing))
        .route("/healthz", get(handle_healthz))
        .with_state(state)
}

/// Raw query parameters; validation happens against the enumerations so
/// that every bad field gets its own message.
#[derive(Debug, Deserialize)]
pub struct PricingParams {
    pub period: Option<String>,
    pub hotel: Option<String>,
    pub room: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RateResponse {
    pub rate: Option<String>,
}

/// RFC 7807 problem document.
#[derive(Debug, Serialize)]
pub struct ProblemDetails {
    #[serde(rename = "type")]
    pub kind: String,
    pub title: String,
    pub instance: String,
    #[serde(rename = "traceId")]
    pub trace_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<BTreeMap<String, Vec<String>>>,
}

async fn handle_pricing(
    State(state): State<Arc<AppState>>,
    Query(params): Query<PricingParams>,
) -> Response {
    let query = match validate_params(&params) {
        Ok(query) => query,
        Err(errors) => return validation_problem(errors),
    };

    match state.engine.get_rate(&query).await {
        Ok(rate) => {
            if let Err(err) = state.store.incr(HIT_COUNTER_KEY).await {
                warn!(error = %err, "failed to increment hit counter");
            }
            (StatusCode::OK, Json(RateResponse { rate })).into_response()
        }
        Err(err) => {
            warn!(error = %err, period = %query.period, hotel = %query.hotel,
                room = %query.room, "pricing request degraded to 503");
            service_unavailable_problem()
        }
    }
}

pub(crate) fn validate_params(
    params: &PricingParams,
) -> Result<RateQuery, BTreeMap<String, Vec<String>>> {
    let mut errors = BTreeMap::new();
    let period = parse_field::<Period>(params.period.as_deref(), "period", &mut errors);
    let hotel = parse_field::<Hotel>(params.hotel.as_deref(), "hotel", &mut errors);
    let room = parse_field::<Room>(params.room.as_deref(), "room", &mut errors);

    match (period, hotel, room) {
        (Some(period), Some(hotel), Some(room)) => Ok(RateQuery::new(period, hotel, room)),
        _ => Err(errors),
    }
}

fn parse_field<T>(
    raw: Option<&str>,
    field: &str,
    errors: &mut BTreeMap<String, Vec<String>>,
) -> Option<T>
where
    T: FromStr<Err = String>,
{
    // A missing field gets the same "must be one of" message as a bad one.
    match raw.unwrap_or("").parse::<T>() {
        Ok(value) => Some(value),
        Err(message) => {
            errors.entry(field.to_string()).or_default().push(message);
            None
        }
    }
}

fn validation_problem(errors: BTreeMap<String, Vec<String>>) -> Response {
    problem_response(
        StatusCode::BAD_REQUEST,
        ProblemDetails {
            kind: "https://tools.ietf.org/html/rfc7231#section-6.5.1".to_string(),
            title: "One or more validation errors occurred.".to_string(),
            instance: "/pricing".to_string(),
            trace_id: new_trace_id(),
            errors: Some(errors),
        },
    )
}

fn service_unavailable_problem() -> Response {
    problem_response(
        StatusCode::SERVICE_UNAVAILABLE,
        ProblemDetails {
            kind: "https://tools.ietf.org/html/rfc7231#section-6.6.4".to_string(),
            title: "Service Temporarily Unavailable".to_string(),
            instance: "/pricing".to_string(),
            trace_id: new_trace_id(),
            errors: None,
        },
    )
}

fn problem_response(status: StatusCode, problem: ProblemDetails) -> Response {
    (
        status,
        [(header::CONTENT_TYPE, "application/problem+json")],
        Json(problem),
    )
        .into_response()
}

fn new_trace_id() -> String {
    format!("{:032x}", rand::random::<u128>())
}

#[derive(Debug, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub redis: RedisHealth,
    pub metrics: HealthMetrics,
}

#[derive(Debug, Serialize)]
pub struct RedisHealth {
    pub ok: bool,
}

#[derive(Debug, Serialize)]
pub struct HealthMetrics {
    pub quota: i64,
    pub rate_api_calls_used: i64,
    pub rate_api_calls_remaining: i64,
    pub has_quota_remaining: bool,
    pub hit_count: i64,
}

async fn handle_healthz(State(state): State<Arc<AppState>>) -> Json<HealthReport> {
    let redis_ok = state.store.ping().await;
    let mut degraded = !redis_ok;

    let used = match state.quota.count().await {
        Ok(count) => count,
        Err(err) => {
            warn!(error = %err, "health probe could not read the quota counter");
            degraded = true;
            0
        }
    };
    let hit_count = match state.store.get_counter(HIT_COUNTER_KEY).await {
        Ok(count) => count,
        Err(err) => {
            warn!(error = %err, "health probe could not read the hit counter");
            degraded = true;
            0
        }
    };

    let quota = state.quota.limit();
    let remaining = quota - used;
    Json(HealthReport {
        status: if degraded { "degraded" } else { "ok" },
        redis: RedisHealth { ok: redis_ok },
        metrics: HealthMetrics {
            quota,
            rate_api_calls_used: used,
            rate_api_calls_remaining: remaining,
            has_quota_remaining: remaining > 0,
            hit_count,
        },
    })
}

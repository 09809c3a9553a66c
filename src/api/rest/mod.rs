pub mod agents;
pub mod hubs;
pub mod notifications;
pub mod orders;
pub mod ws;

use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use chrono::Utc;
use serde::Serialize;
use tower_http::services::ServeDir;
use uuid::Uuid;

use crate::error::AppError;
use crate::machine::{Actor, OrderEvent, apply_transition, otp};
use crate::models::agent::{AgentStatus, GeoPoint};
use crate::models::notification::NotificationRequest;
use crate::models::order::Order;
use crate::notify;
use crate::state::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(orders::router())
        .merge(hubs::router())
        .merge(agents::router())
        .merge(notifications::router())
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/ws", get(ws::ws_handler))
        .with_state(state)
        .fallback_service(ServeDir::new("static"))
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    orders: usize,
    hubs: usize,
    agents: usize,
    notifications: usize,
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        orders: state.orders.len(),
        hubs: state.hubs.len(),
        agents: state.agents.len(),
        notifications: state.notifications.len(),
    })
}

async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, err).into_response(),
    }
}

/// Runs one state-machine transition end to end: looks the order up, holds
/// its write guard across the conditional update, appends the audit entry
/// in commit order, then (outside the guard) releases any freed agent and
/// fans the notification out. The notification stage is best-effort and can
/// never fail the committed transition.
pub(crate) async fn drive(
    state: &Arc<AppState>,
    order_number: &str,
    event: OrderEvent,
    actor: Actor,
) -> Result<Order, AppError> {
    drive_with(state, order_number, event, actor, None, None).await
}

pub(crate) async fn drive_with(
    state: &Arc<AppState>,
    order_number: &str,
    event: OrderEvent,
    actor: Actor,
    location: Option<GeoPoint>,
    notes: Option<String>,
) -> Result<Order, AppError> {
    let id = state.order_id(order_number)?;
    let label = event.label();

    let (snapshot, request, released_agent) = {
        let mut entry = state
            .orders
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("order {order_number} not found")))?;
        let order = entry.value_mut();

        let mut outcome = match apply_transition(order, &event, &actor, Utc::now()) {
            Ok(outcome) => outcome,
            Err(err) => {
                state
                    .metrics
                    .transitions_total
                    .with_label_values(&[label, "error"])
                    .inc();
                return Err(err);
            }
        };

        if notes.is_some() {
            order.delivery.delivery_notes = notes;
        }
        outcome.tracking.location = location;
        state.tracking.entry(id).or_default().push(outcome.tracking.clone());

        let request = NotificationRequest {
            order_id: id,
            order_number: order.order_number.clone(),
            subject: outcome.subject.clone(),
            body: outcome.tracking.message.clone(),
            audiences: outcome.audiences.clone(),
        };

        (order.clone(), request, outcome.released_agent)
    };

    state
        .metrics
        .transitions_total
        .with_label_values(&[label, "success"])
        .inc();

    if let Some(agent_id) = released_agent {
        set_agent_status(state, agent_id, AgentStatus::Available);
    }

    notify::enqueue(state, request).await;

    Ok(snapshot)
}

/// OTP consumption shares this path whether it arrives from the hub desk
/// or from the delivery agent confirming the hand-off.
pub(crate) async fn commit_otp_verification(
    state: &Arc<AppState>,
    order_number: &str,
    code: &str,
    actor: Actor,
    location: Option<GeoPoint>,
) -> Result<Order, AppError> {
    let id = state.order_id(order_number)?;

    let (snapshot, request, released_agent) = {
        let mut entry = state
            .orders
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("order {order_number} not found")))?;
        let order = entry.value_mut();

        let mut outcome = match otp::verify(order, code, &actor, Utc::now()) {
            Ok(outcome) => outcome,
            Err(err) => {
                state
                    .metrics
                    .transitions_total
                    .with_label_values(&["verify_otp", "error"])
                    .inc();
                return Err(err);
            }
        };

        outcome.tracking.location = location;
        state.tracking.entry(id).or_default().push(outcome.tracking.clone());

        let request = NotificationRequest {
            order_id: id,
            order_number: order.order_number.clone(),
            subject: outcome.subject.clone(),
            body: outcome.tracking.message.clone(),
            audiences: outcome.audiences.clone(),
        };

        (order.clone(), request, outcome.released_agent)
    };

    state
        .metrics
        .transitions_total
        .with_label_values(&["verify_otp", "success"])
        .inc();

    if let Some(agent_id) = released_agent {
        set_agent_status(state, agent_id, AgentStatus::Available);
    }

    notify::enqueue(state, request).await;

    Ok(snapshot)
}

pub(crate) fn set_agent_status(state: &AppState, agent_id: Uuid, status: AgentStatus) {
    if let Some(mut agent) = state.agents.get_mut(&agent_id) {
        agent.status = status;
        agent.updated_at = Utc::now();
    }
}

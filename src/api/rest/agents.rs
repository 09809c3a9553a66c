use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::rest::{commit_otp_verification, drive, drive_with, set_agent_status};
use crate::error::AppError;
use crate::machine::{Actor, OrderEvent};
use crate::models::agent::{AgentStatus, DeliveryAgent, GeoPoint};
use crate::models::order::{Order, OrderStatus, TrackingUpdate};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/agents", post(create_agent).get(list_agents))
        .route("/agents/:id/orders", get(assigned_orders))
        .route("/agents/:id/location", patch(update_location))
        .route("/orders/:order_number/assign", post(assign_agent))
        .route("/orders/:order_number/accept", post(accept_assignment))
        .route("/orders/:order_number/agent-reject", post(reject_assignment))
        .route(
            "/orders/:order_number/delivery-status",
            post(update_delivery_status),
        )
}

#[derive(Deserialize)]
pub struct CreateAgentRequest {
    pub name: String,
    pub phone: String,
    pub district: String,
    pub location: Option<GeoPoint>,
}

async fn create_agent(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateAgentRequest>,
) -> Result<Json<DeliveryAgent>, AppError> {
    if payload.name.trim().is_empty() {
        return Err(AppError::Validation("name cannot be empty".to_string()));
    }
    if payload.phone.trim().is_empty() {
        return Err(AppError::Validation("phone cannot be empty".to_string()));
    }

    let agent = DeliveryAgent {
        id: Uuid::new_v4(),
        name: payload.name,
        phone: payload.phone,
        district: payload.district,
        status: AgentStatus::Available,
        location: payload.location,
        updated_at: Utc::now(),
    };

    state.agents.insert(agent.id, agent.clone());
    Ok(Json(agent))
}

async fn list_agents(State(state): State<Arc<AppState>>) -> Json<Vec<DeliveryAgent>> {
    let agents = state.agents.iter().map(|entry| entry.value().clone()).collect();
    Json(agents)
}

#[derive(Deserialize)]
pub struct AssignedOrdersQuery {
    pub status: Option<OrderStatus>,
    pub page: Option<usize>,
    pub per_page: Option<usize>,
}

#[derive(Serialize)]
struct AssignedOrdersResponse {
    orders: Vec<Order>,
    total: usize,
    page: usize,
    per_page: usize,
}

async fn assigned_orders(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Query(query): Query<AssignedOrdersQuery>,
) -> Result<Json<AssignedOrdersResponse>, AppError> {
    if !state.agents.contains_key(&id) {
        return Err(AppError::NotFound(format!("agent {id} not found")));
    }

    let mut orders: Vec<Order> = state
        .orders
        .iter()
        .filter(|entry| {
            let order = entry.value();
            order.delivery.agent_id == Some(id)
                && query.status.map_or(true, |wanted| order.status == wanted)
        })
        .map(|entry| entry.value().clone())
        .collect();
    orders.sort_by(|a, b| b.delivery.assigned_at.cmp(&a.delivery.assigned_at));

    let total = orders.len();
    let page = query.page.unwrap_or(1).max(1);
    let per_page = query.per_page.unwrap_or(20).clamp(1, 100);
    let orders = orders
        .into_iter()
        .skip((page - 1) * per_page)
        .take(per_page)
        .collect();

    Ok(Json(AssignedOrdersResponse {
        orders,
        total,
        page,
        per_page,
    }))
}

#[derive(Deserialize)]
pub struct AssignRequest {
    pub agent_id: Uuid,
}

async fn assign_agent(
    State(state): State<Arc<AppState>>,
    Path(order_number): Path<String>,
    Json(payload): Json<AssignRequest>,
) -> Result<Json<Order>, AppError> {
    if !state.agents.contains_key(&payload.agent_id) {
        return Err(AppError::NotFound(format!(
            "agent {} not found",
            payload.agent_id
        )));
    }

    let order = drive(
        &state,
        &order_number,
        OrderEvent::Assign {
            agent_id: payload.agent_id,
        },
        Actor::Admin,
    )
    .await?;
    Ok(Json(order))
}

#[derive(Deserialize)]
pub struct AgentActionRequest {
    pub agent_id: Uuid,
    pub reason: Option<String>,
}

async fn accept_assignment(
    State(state): State<Arc<AppState>>,
    Path(order_number): Path<String>,
    Json(payload): Json<AgentActionRequest>,
) -> Result<Json<Order>, AppError> {
    let order = drive(
        &state,
        &order_number,
        OrderEvent::AgentAccept,
        Actor::Agent {
            agent_id: payload.agent_id,
        },
    )
    .await?;

    set_agent_status(&state, payload.agent_id, AgentStatus::Busy);
    Ok(Json(order))
}

async fn reject_assignment(
    State(state): State<Arc<AppState>>,
    Path(order_number): Path<String>,
    Json(payload): Json<AgentActionRequest>,
) -> Result<Json<Order>, AppError> {
    let order = drive(
        &state,
        &order_number,
        OrderEvent::AgentReject {
            reason: payload.reason,
        },
        Actor::Agent {
            agent_id: payload.agent_id,
        },
    )
    .await?;
    Ok(Json(order))
}

#[derive(Deserialize, Clone, Copy, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatusUpdate {
    PickedUp,
    InTransit,
    Delivered,
    Failed,
}

#[derive(Deserialize)]
pub struct DeliveryStatusRequest {
    pub agent_id: Uuid,
    pub status: DeliveryStatusUpdate,
    pub notes: Option<String>,
    pub location: Option<GeoPoint>,
    /// Required for `delivered`: the buyer's pickup code is the proof of
    /// custody transfer.
    pub otp: Option<String>,
}

async fn update_delivery_status(
    State(state): State<Arc<AppState>>,
    Path(order_number): Path<String>,
    Json(payload): Json<DeliveryStatusRequest>,
) -> Result<Json<Order>, AppError> {
    let actor = Actor::Agent {
        agent_id: payload.agent_id,
    };

    let order = match payload.status {
        DeliveryStatusUpdate::PickedUp => {
            drive_with(
                &state,
                &order_number,
                OrderEvent::PickUp,
                actor,
                payload.location,
                payload.notes,
            )
            .await?
        }
        DeliveryStatusUpdate::InTransit => {
            drive_with(
                &state,
                &order_number,
                OrderEvent::StartTransit,
                actor,
                payload.location,
                payload.notes,
            )
            .await?
        }
        DeliveryStatusUpdate::Delivered => {
            let Some(code) = payload.otp.as_deref() else {
                return Err(AppError::Validation(
                    "otp is required to confirm delivery".to_string(),
                ));
            };
            ensure_assigned(&state, &order_number, payload.agent_id)?;
            commit_otp_verification(&state, &order_number, code, actor, payload.location).await?
        }
        DeliveryStatusUpdate::Failed => {
            drive_with(
                &state,
                &order_number,
                OrderEvent::Fail {
                    reason: payload.notes.clone(),
                },
                actor,
                payload.location,
                payload.notes,
            )
            .await?
        }
    };

    Ok(Json(order))
}

/// The delivered path runs through OTP verification, which is data-gated;
/// the agent identity still has to match before it may be attempted.
fn ensure_assigned(state: &AppState, order_number: &str, agent_id: Uuid) -> Result<(), AppError> {
    let id = state.order_id(order_number)?;
    let entry = state
        .orders
        .get(&id)
        .ok_or_else(|| AppError::NotFound(format!("order {order_number} not found")))?;
    match entry.value().delivery.agent_id {
        Some(assigned) if assigned == agent_id => Ok(()),
        _ => Err(AppError::Authorization(format!(
            "order {order_number} is not assigned to this agent"
        ))),
    }
}

#[derive(Deserialize)]
pub struct UpdateLocationRequest {
    pub location: GeoPoint,
}

/// Advisory telemetry: refreshes the agent's position and appends a log
/// entry to every order currently in their custody. Never drives a status
/// transition on its own.
async fn update_location(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateLocationRequest>,
) -> Result<Json<DeliveryAgent>, AppError> {
    let agent = {
        let mut agent = state
            .agents
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("agent {id} not found")))?;
        agent.location = Some(payload.location.clone());
        agent.updated_at = Utc::now();
        agent.clone()
    };

    let in_custody: Vec<(Uuid, OrderStatus, String)> = state
        .orders
        .iter()
        .filter(|entry| {
            let order = entry.value();
            order.delivery.agent_id == Some(id)
                && matches!(order.status, OrderStatus::PickedUp | OrderStatus::InTransit)
        })
        .map(|entry| {
            let order = entry.value();
            (order.id, order.status, order.order_number.clone())
        })
        .collect();

    let now = Utc::now();
    for (order_id, status, order_number) in in_custody {
        state.tracking.entry(order_id).or_default().push(TrackingUpdate {
            status,
            message: format!("agent location update for order {order_number}"),
            timestamp: now,
            location: Some(payload.location.clone()),
        });
    }

    Ok(Json(agent))
}

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::rest::drive;
use crate::error::AppError;
use crate::hubs;
use crate::machine::{Actor, OrderEvent};
use crate::models::hub::Hub;
use crate::models::order::Order;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/hubs", post(create_hub).get(list_hubs))
        .route("/hubs/:id/orders", get(hub_orders))
        .route("/hubs/:id/dispatch", get(hub_dispatch))
        .route("/hubs/:id/capacity", get(hub_capacity))
        .route(
            "/orders/:order_number/arrive-seller-hub",
            post(arrive_seller_hub),
        )
        .route(
            "/orders/:order_number/request-approval",
            post(request_approval),
        )
        .route("/orders/:order_number/approve", post(approve))
        .route("/orders/:order_number/reject", post(reject))
        .route(
            "/orders/:order_number/arrive-customer-hub",
            post(arrive_customer_hub),
        )
        .route("/orders/:order_number/ready", post(mark_ready))
}

#[derive(Deserialize)]
pub struct CreateHubRequest {
    pub name: String,
    pub district: String,
    pub max_capacity: usize,
}

async fn create_hub(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateHubRequest>,
) -> Result<Json<Hub>, AppError> {
    if payload.name.trim().is_empty() || payload.district.trim().is_empty() {
        return Err(AppError::Validation(
            "hub name and district are required".to_string(),
        ));
    }
    if payload.max_capacity == 0 {
        return Err(AppError::Validation("max_capacity must be > 0".to_string()));
    }

    // One hub per district.
    if hubs::resolve_by_district(&state, &payload.district).is_ok() {
        return Err(AppError::StateConflict(format!(
            "district {} already has a hub",
            payload.district
        )));
    }

    let hub = Hub {
        id: Uuid::new_v4(),
        name: payload.name,
        district: payload.district,
        max_capacity: payload.max_capacity,
        created_at: Utc::now(),
    };

    state.hubs.insert(hub.id, hub.clone());
    Ok(Json(hub))
}

async fn list_hubs(State(state): State<Arc<AppState>>) -> Json<Vec<Hub>> {
    let hubs = state.hubs.iter().map(|entry| entry.value().clone()).collect();
    Json(hubs)
}

#[derive(Deserialize)]
pub struct ViewQuery {
    pub since: Option<DateTime<Utc>>,
}

async fn hub_orders(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Query(query): Query<ViewQuery>,
) -> Result<Json<Vec<Order>>, AppError> {
    hubs::get_hub(&state, id)?;
    Ok(Json(hubs::seller_view(&state, id, query.since)))
}

async fn hub_dispatch(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Query(query): Query<ViewQuery>,
) -> Result<Json<Vec<Order>>, AppError> {
    hubs::get_hub(&state, id)?;
    Ok(Json(hubs::dispatch_view(&state, id, query.since)))
}

#[derive(Serialize)]
struct CapacityResponse {
    hub_id: Uuid,
    occupancy: usize,
    max_capacity: usize,
    available: usize,
}

async fn hub_capacity(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<CapacityResponse>, AppError> {
    let hub = hubs::get_hub(&state, id)?;
    let occupancy = hubs::occupancy(&state, id);
    Ok(Json(CapacityResponse {
        hub_id: id,
        occupancy,
        max_capacity: hub.max_capacity,
        available: hub.max_capacity.saturating_sub(occupancy),
    }))
}

#[derive(Deserialize)]
pub struct HubActionRequest {
    pub hub_id: Uuid,
}

fn routed_hubs(state: &AppState, order_number: &str) -> Result<(Uuid, Uuid), AppError> {
    let id = state.order_id(order_number)?;
    let entry = state
        .orders
        .get(&id)
        .ok_or_else(|| AppError::NotFound(format!("order {order_number} not found")))?;
    let order = entry.value();
    Ok((
        order.hub_tracking.seller_hub.id,
        order.hub_tracking.customer_hub.id,
    ))
}

async fn arrive_seller_hub(
    State(state): State<Arc<AppState>>,
    Path(order_number): Path<String>,
    Json(payload): Json<HubActionRequest>,
) -> Result<Json<Order>, AppError> {
    let hub = hubs::get_hub(&state, payload.hub_id)?;
    let (seller_hub_id, _) = routed_hubs(&state, &order_number)?;
    if seller_hub_id != payload.hub_id {
        return Err(AppError::Authorization(format!(
            "order {order_number} is not routed through this hub"
        )));
    }

    // Admission control on the derived count. The per-hub lock is held
    // across check and transition so concurrent arrivals cannot both pass
    // on the same last slot; the occupancy scan still runs before any
    // order guard is taken.
    let admission = state.hub_admission_lock(hub.id);
    let _admitted = admission.lock().await;
    hubs::ensure_capacity(&state, &hub)?;

    let order = drive(
        &state,
        &order_number,
        OrderEvent::ArriveSellerHub,
        Actor::HubManager {
            hub_id: payload.hub_id,
        },
    )
    .await?;
    Ok(Json(order))
}

async fn request_approval(
    State(state): State<Arc<AppState>>,
    Path(order_number): Path<String>,
    Json(payload): Json<HubActionRequest>,
) -> Result<Json<Order>, AppError> {
    hubs::get_hub(&state, payload.hub_id)?;
    let (seller_hub_id, _) = routed_hubs(&state, &order_number)?;
    if seller_hub_id != payload.hub_id {
        return Err(AppError::Authorization(format!(
            "order {order_number} is not routed through this hub"
        )));
    }

    let order = drive(
        &state,
        &order_number,
        OrderEvent::RequestApproval,
        Actor::HubManager {
            hub_id: payload.hub_id,
        },
    )
    .await?;
    Ok(Json(order))
}

async fn approve(
    State(state): State<Arc<AppState>>,
    Path(order_number): Path<String>,
) -> Result<Json<Order>, AppError> {
    let order = drive(&state, &order_number, OrderEvent::AdminApprove, Actor::Admin).await?;
    Ok(Json(order))
}

#[derive(Deserialize, Default)]
pub struct RejectRequest {
    pub reason: Option<String>,
}

async fn reject(
    State(state): State<Arc<AppState>>,
    Path(order_number): Path<String>,
    payload: Option<Json<RejectRequest>>,
) -> Result<Json<Order>, AppError> {
    let reason = payload.and_then(|Json(body)| body.reason);
    let order = drive(
        &state,
        &order_number,
        OrderEvent::AdminReject { reason },
        Actor::Admin,
    )
    .await?;
    Ok(Json(order))
}

async fn arrive_customer_hub(
    State(state): State<Arc<AppState>>,
    Path(order_number): Path<String>,
    Json(payload): Json<HubActionRequest>,
) -> Result<Json<Order>, AppError> {
    let hub = hubs::get_hub(&state, payload.hub_id)?;
    let (_, customer_hub_id) = routed_hubs(&state, &order_number)?;
    if customer_hub_id != payload.hub_id {
        return Err(AppError::Authorization(format!(
            "order {order_number} is not routed through this hub"
        )));
    }

    let admission = state.hub_admission_lock(hub.id);
    let _admitted = admission.lock().await;
    hubs::ensure_capacity(&state, &hub)?;

    let order = drive(
        &state,
        &order_number,
        OrderEvent::ArriveCustomerHub,
        Actor::HubManager {
            hub_id: payload.hub_id,
        },
    )
    .await?;
    Ok(Json(order))
}

async fn mark_ready(
    State(state): State<Arc<AppState>>,
    Path(order_number): Path<String>,
    Json(payload): Json<HubActionRequest>,
) -> Result<Json<Order>, AppError> {
    hubs::get_hub(&state, payload.hub_id)?;
    let (_, customer_hub_id) = routed_hubs(&state, &order_number)?;
    if customer_hub_id != payload.hub_id {
        return Err(AppError::Authorization(format!(
            "order {order_number} is not routed through this hub"
        )));
    }

    let order = drive(
        &state,
        &order_number,
        OrderEvent::MarkReady,
        Actor::HubManager {
            hub_id: payload.hub_id,
        },
    )
    .await?;
    Ok(Json(order))
}

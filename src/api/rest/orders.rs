use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use rand::Rng;
use rand::distributions::Alphanumeric;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::rest::{commit_otp_verification, drive};
use crate::error::AppError;
use crate::hubs;
use crate::machine::{Actor, OrderEvent, otp};
use crate::models::notification::{Audience, NotificationRequest};
use crate::models::order::{
    AdminApproval, BuyerDetails, CustodyLocation, DeliveryInfo, HubRef, HubTracking, Order,
    OrderItem, OrderStatus, PaymentMethod, PaymentStatus, RefundDetails, TrackingUpdate,
    VariantSnapshot,
};
use crate::notify;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/orders", post(create_order))
        .route("/orders/:order_number", get(get_order))
        .route("/orders/:order_number/tracking", get(get_tracking))
        .route("/orders/:order_number/payment", post(record_payment))
        .route("/orders/:order_number/cancel", post(cancel_order))
        .route("/orders/:order_number/otp", post(generate_otp))
        .route("/orders/:order_number/otp/verify", post(verify_otp))
}

#[derive(Deserialize)]
pub struct NewOrderItem {
    pub product_ref: String,
    pub title: String,
    pub weight: Decimal,
    pub price: Decimal,
    pub quantity: u32,
}

#[derive(Deserialize)]
pub struct CreateOrderRequest {
    pub items: Vec<NewOrderItem>,
    pub buyer: BuyerDetails,
    pub payment_method: PaymentMethod,
    /// The catalog is an external collaborator, so checkout hands us the
    /// seller's district directly.
    pub seller_district: String,
}

async fn create_order(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateOrderRequest>,
) -> Result<Json<Order>, AppError> {
    validate_create(&payload)?;

    let seller_hub = hubs::resolve_by_district(&state, &payload.seller_district)?;
    let customer_hub = hubs::resolve_by_district(&state, &payload.buyer.address.district)?;

    let now = Utc::now();
    let items: Vec<OrderItem> = payload
        .items
        .into_iter()
        .map(|item| OrderItem {
            product_ref: item.product_ref,
            title: item.title,
            variant: VariantSnapshot {
                weight: item.weight,
                price: item.price,
            },
            quantity: item.quantity,
        })
        .collect();

    let total_amount: Decimal = items
        .iter()
        .map(|item| item.variant.price * Decimal::from(item.quantity))
        .sum();
    let shipping_charges = state.shipping_flat_rate;
    let final_amount = total_amount + shipping_charges;

    // COD orders are confirmed right away; online orders wait for the
    // gateway result.
    let status = match payload.payment_method {
        PaymentMethod::Cod => OrderStatus::Confirmed,
        PaymentMethod::Online => OrderStatus::Pending,
    };

    let order = Order {
        id: Uuid::new_v4(),
        order_number: generate_order_number(&state, now),
        items,
        buyer: payload.buyer,
        payment_method: payload.payment_method,
        payment_status: PaymentStatus::Pending,
        payment_transaction_id: None,
        total_amount,
        shipping_charges,
        final_amount,
        status,
        hub_tracking: HubTracking {
            seller_hub: HubRef {
                id: seller_hub.id,
                name: seller_hub.name,
                district: seller_hub.district,
                arrived_at: None,
            },
            admin_approval: AdminApproval {
                approved: false,
                at: None,
            },
            customer_hub: HubRef {
                id: customer_hub.id,
                name: customer_hub.name,
                district: customer_hub.district,
                arrived_at: None,
            },
            current_location: CustodyLocation::WithSeller,
            ready_for_pickup: false,
            pickup_otp: None,
            otp_generated_at: None,
            otp_used: false,
            otp_used_at: None,
        },
        delivery: DeliveryInfo::unassigned(),
        refund: RefundDetails::not_applicable(),
        created_at: now,
        updated_at: now,
    };

    state.order_numbers.insert(order.order_number.clone(), order.id);
    state.tracking.insert(
        order.id,
        vec![TrackingUpdate {
            status: order.status,
            message: format!("order {} placed", order.order_number),
            timestamp: now,
            location: None,
        }],
    );
    state.orders.insert(order.id, order.clone());

    state
        .metrics
        .transitions_total
        .with_label_values(&["create", "success"])
        .inc();

    notify::enqueue(
        &state,
        NotificationRequest {
            order_id: order.id,
            order_number: order.order_number.clone(),
            subject: "Order placed".to_string(),
            body: format!("order {} placed", order.order_number),
            audiences: vec![
                Audience::Buyer {
                    email: order.buyer.email.clone(),
                },
                Audience::Admin,
            ],
        },
    )
    .await;

    Ok(Json(order))
}

fn validate_create(payload: &CreateOrderRequest) -> Result<(), AppError> {
    if payload.items.is_empty() {
        return Err(AppError::Validation("order needs at least one item".to_string()));
    }
    for item in &payload.items {
        if item.quantity == 0 {
            return Err(AppError::Validation(format!(
                "item {} has zero quantity",
                item.product_ref
            )));
        }
        if item.price < Decimal::ZERO {
            return Err(AppError::Validation(format!(
                "item {} has a negative price",
                item.product_ref
            )));
        }
    }
    if payload.buyer.name.trim().is_empty() || payload.buyer.email.trim().is_empty() {
        return Err(AppError::Validation(
            "buyer name and email are required".to_string(),
        ));
    }
    if payload.buyer.address.district.trim().is_empty() {
        return Err(AppError::Validation("buyer district is required".to_string()));
    }
    if payload.seller_district.trim().is_empty() {
        return Err(AppError::Validation("seller district is required".to_string()));
    }
    Ok(())
}

/// Generated exactly once per order; re-rolled on the unlikely suffix
/// collision within a day.
fn generate_order_number(state: &AppState, now: DateTime<Utc>) -> String {
    loop {
        let suffix: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(6)
            .map(char::from)
            .collect::<String>()
            .to_uppercase();
        let candidate = format!("ORD-{}-{}", now.format("%Y%m%d"), suffix);
        if !state.order_numbers.contains_key(&candidate) {
            return candidate;
        }
    }
}

async fn get_order(
    State(state): State<Arc<AppState>>,
    Path(order_number): Path<String>,
) -> Result<Json<Order>, AppError> {
    let id = state.order_id(&order_number)?;
    let order = state
        .orders
        .get(&id)
        .ok_or_else(|| AppError::NotFound(format!("order {order_number} not found")))?;
    Ok(Json(order.value().clone()))
}

async fn get_tracking(
    State(state): State<Arc<AppState>>,
    Path(order_number): Path<String>,
) -> Result<Json<Vec<TrackingUpdate>>, AppError> {
    let id = state.order_id(&order_number)?;
    let log = state
        .tracking
        .get(&id)
        .map(|entry| entry.value().clone())
        .unwrap_or_default();
    Ok(Json(log))
}

#[derive(Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GatewayResult {
    Paid,
    Failed,
}

#[derive(Deserialize)]
pub struct RecordPaymentRequest {
    pub result: GatewayResult,
    pub transaction_id: Option<String>,
}

/// The payment gateway itself is a black box; this only records its verdict
/// and, for a pending online order, drives the confirm transition.
async fn record_payment(
    State(state): State<Arc<AppState>>,
    Path(order_number): Path<String>,
    Json(payload): Json<RecordPaymentRequest>,
) -> Result<Json<Order>, AppError> {
    let id = state.order_id(&order_number)?;

    let (needs_confirm, snapshot) = {
        let mut entry = state
            .orders
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("order {order_number} not found")))?;
        let order = entry.value_mut();

        if order.payment_status == PaymentStatus::Paid {
            return Err(AppError::StateConflict(format!(
                "payment for order {order_number} is already recorded"
            )));
        }
        if order.status.is_terminal() {
            return Err(AppError::StateConflict(format!(
                "order {order_number} is closed"
            )));
        }

        match payload.result {
            GatewayResult::Paid => {
                order.payment_status = PaymentStatus::Paid;
                order.payment_transaction_id = payload.transaction_id.clone();
                order.updated_at = Utc::now();
                (order.status == OrderStatus::Pending, order.clone())
            }
            GatewayResult::Failed => {
                order.payment_status = PaymentStatus::Failed;
                order.payment_transaction_id = payload.transaction_id.clone();
                order.updated_at = Utc::now();
                (false, order.clone())
            }
        }
    };

    if needs_confirm {
        let confirmed = drive(&state, &order_number, OrderEvent::Confirm, Actor::System).await?;
        return Ok(Json(confirmed));
    }

    match snapshot.payment_status {
        PaymentStatus::Failed => {
            tracing::warn!(order_number = %order_number, "payment failed at the gateway");
            notify::enqueue(
                &state,
                NotificationRequest {
                    order_id: snapshot.id,
                    order_number: snapshot.order_number.clone(),
                    subject: "Payment failed".to_string(),
                    body: format!("payment for order {} failed", snapshot.order_number),
                    audiences: vec![Audience::Buyer {
                        email: snapshot.buyer.email.clone(),
                    }],
                },
            )
            .await;
        }
        PaymentStatus::Paid => {
            notify::enqueue(
                &state,
                NotificationRequest {
                    order_id: snapshot.id,
                    order_number: snapshot.order_number.clone(),
                    subject: "Payment received".to_string(),
                    body: format!("payment for order {} received", snapshot.order_number),
                    audiences: vec![Audience::Buyer {
                        email: snapshot.buyer.email.clone(),
                    }],
                },
            )
            .await;
        }
        _ => {}
    }

    Ok(Json(snapshot))
}

#[derive(Deserialize, Default)]
pub struct CancelRequest {
    pub reason: Option<String>,
}

async fn cancel_order(
    State(state): State<Arc<AppState>>,
    Path(order_number): Path<String>,
    payload: Option<Json<CancelRequest>>,
) -> Result<Json<Order>, AppError> {
    let reason = payload.and_then(|Json(body)| body.reason);
    let order = drive(
        &state,
        &order_number,
        OrderEvent::Cancel { reason },
        Actor::Buyer,
    )
    .await?;
    Ok(Json(order))
}

#[derive(Serialize)]
struct OtpIssuedResponse {
    order_number: String,
    otp: String,
    generated_at: DateTime<Utc>,
}

async fn generate_otp(
    State(state): State<Arc<AppState>>,
    Path(order_number): Path<String>,
) -> Result<Json<OtpIssuedResponse>, AppError> {
    let id = state.order_id(&order_number)?;
    let now = Utc::now();

    let (code, buyer_email) = {
        let mut entry = state
            .orders
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("order {order_number} not found")))?;
        let order = entry.value_mut();

        let code = match otp::issue(order, now) {
            Ok(code) => code,
            Err(err) => {
                state
                    .metrics
                    .transitions_total
                    .with_label_values(&["generate_otp", "error"])
                    .inc();
                return Err(err);
            }
        };
        (code, order.buyer.email.clone())
    };

    state
        .metrics
        .transitions_total
        .with_label_values(&["generate_otp", "success"])
        .inc();

    // Best-effort email-equivalent carrying the code; the issue itself has
    // already committed.
    notify::enqueue(
        &state,
        NotificationRequest {
            order_id: id,
            order_number: order_number.clone(),
            subject: "Your pickup code".to_string(),
            body: format!("pickup code for order {order_number}: {code}"),
            audiences: vec![Audience::Buyer { email: buyer_email }],
        },
    )
    .await;

    Ok(Json(OtpIssuedResponse {
        order_number,
        otp: code,
        generated_at: now,
    }))
}

#[derive(Deserialize)]
pub struct VerifyOtpRequest {
    pub code: String,
}

async fn verify_otp(
    State(state): State<Arc<AppState>>,
    Path(order_number): Path<String>,
    Json(payload): Json<VerifyOtpRequest>,
) -> Result<Json<Order>, AppError> {
    let order =
        commit_otp_verification(&state, &order_number, &payload.code, Actor::Buyer, None).await?;
    Ok(Json(order))
}

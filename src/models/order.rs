use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::agent::GeoPoint;

/// Canonical order lifecycle vocabulary. There is exactly one status field
/// and one enum; the agent-facing delivery stage is a separate, smaller
/// mirror inside `DeliveryInfo`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Confirmed,
    AtSellerHub,
    AwaitingAdminApproval,
    InTransitToCustomerHub,
    AtCustomerHub,
    ReadyForPickup,
    Assigned,
    Accepted,
    PickedUp,
    InTransit,
    Delivered,
    Cancelled,
    Rejected,
    Failed,
}

impl OrderStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OrderStatus::Delivered
                | OrderStatus::Cancelled
                | OrderStatus::Rejected
                | OrderStatus::Failed
        )
    }

    /// Statuses from which a buyer/admin cancellation is still legal.
    /// Once an agent has picked the order up it is past the cutoff.
    pub fn is_pre_dispatch(self) -> bool {
        matches!(
            self,
            OrderStatus::Pending
                | OrderStatus::Confirmed
                | OrderStatus::AtSellerHub
                | OrderStatus::AwaitingAdminApproval
                | OrderStatus::InTransitToCustomerHub
                | OrderStatus::AtCustomerHub
                | OrderStatus::ReadyForPickup
                | OrderStatus::Assigned
                | OrderStatus::Accepted
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Cod,
    Online,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Failed,
    Refunded,
}

/// High-level custody position, mirrored alongside the fine-grained status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CustodyLocation {
    WithSeller,
    SellerHub,
    InTransitBetweenHubs,
    CustomerHub,
    WithAgent,
    WithBuyer,
}

/// Catalog data is snapshotted at checkout so later edits to the product
/// never rewrite historical orders.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariantSnapshot {
    pub weight: Decimal,
    pub price: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderItem {
    pub product_ref: String,
    pub title: String,
    pub variant: VariantSnapshot,
    pub quantity: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Address {
    pub street: String,
    pub city: String,
    pub district: String,
    pub state: String,
    pub pincode: String,
    pub landmark: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuyerDetails {
    pub name: String,
    pub email: String,
    pub phone: String,
    pub address: Address,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubRef {
    pub id: Uuid,
    pub name: String,
    pub district: String,
    pub arrived_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminApproval {
    pub approved: bool,
    pub at: Option<DateTime<Utc>>,
}

/// Hub leg of the journey plus the pickup-code hand-off state.
/// `pickup_otp` is set only while the order sits at the customer hub and is
/// cleared the moment it is consumed; `otp_used` stays true so a replayed
/// code is rejected even though the value would still match.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubTracking {
    pub seller_hub: HubRef,
    pub admin_approval: AdminApproval,
    pub customer_hub: HubRef,
    pub current_location: CustodyLocation,
    pub ready_for_pickup: bool,
    pub pickup_otp: Option<String>,
    pub otp_generated_at: Option<DateTime<Utc>>,
    pub otp_used: bool,
    pub otp_used_at: Option<DateTime<Utc>>,
}

/// Order <-> agent sub-machine stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStage {
    Unassigned,
    Assigned,
    Accepted,
    PickedUp,
    InTransit,
    Delivered,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryInfo {
    pub stage: DeliveryStage,
    /// Non-null only while an agent holds a live assignment; rejection,
    /// cancellation, and the terminal states clear it.
    pub agent_id: Option<Uuid>,
    pub assigned_at: Option<DateTime<Utc>>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub picked_up_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub delivery_notes: Option<String>,
}

impl DeliveryInfo {
    pub fn unassigned() -> Self {
        Self {
            stage: DeliveryStage::Unassigned,
            agent_id: None,
            assigned_at: None,
            accepted_at: None,
            picked_up_at: None,
            delivered_at: None,
            delivery_notes: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefundStatus {
    NotApplicable,
    Pending,
    Processing,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundDetails {
    pub refund_amount: Option<Decimal>,
    pub refund_status: RefundStatus,
    pub refund_method: Option<String>,
    pub refund_initiated_at: Option<DateTime<Utc>>,
    pub refund_completed_at: Option<DateTime<Utc>>,
    pub refund_transaction_id: Option<String>,
    pub refund_notes: Option<String>,
}

impl RefundDetails {
    pub fn not_applicable() -> Self {
        Self {
            refund_amount: None,
            refund_status: RefundStatus::NotApplicable,
            refund_method: None,
            refund_initiated_at: None,
            refund_completed_at: None,
            refund_transaction_id: None,
            refund_notes: None,
        }
    }
}

/// One audit-trail entry. The per-order log lives in its own arena on
/// `AppState` (indexed by order id) and is strictly append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingUpdate {
    pub status: OrderStatus,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub location: Option<GeoPoint>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    /// Human-readable reference, generated once at creation, never rewritten.
    pub order_number: String,
    pub items: Vec<OrderItem>,
    pub buyer: BuyerDetails,
    pub payment_method: PaymentMethod,
    pub payment_status: PaymentStatus,
    pub payment_transaction_id: Option<String>,
    pub total_amount: Decimal,
    pub shipping_charges: Decimal,
    pub final_amount: Decimal,
    pub status: OrderStatus,
    pub hub_tracking: HubTracking,
    pub delivery: DeliveryInfo,
    pub refund: RefundDetails,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

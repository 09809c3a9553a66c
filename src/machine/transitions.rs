use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::AppError;
use crate::machine::{delivery, refund};
use crate::models::notification::Audience;
use crate::models::order::{
    CustodyLocation, DeliveryStage, Order, OrderStatus, PaymentMethod, PaymentStatus,
    TrackingUpdate,
};

/// Who is asking for the transition. Guards are data-driven; the actor is
/// only consulted where an identity or role check is part of the contract.
#[derive(Debug, Clone)]
pub enum Actor {
    Buyer,
    Admin,
    HubManager { hub_id: Uuid },
    Agent { agent_id: Uuid },
    System,
}

#[derive(Debug, Clone)]
pub enum OrderEvent {
    Confirm,
    ArriveSellerHub,
    RequestApproval,
    AdminApprove,
    AdminReject { reason: Option<String> },
    ArriveCustomerHub,
    MarkReady,
    Assign { agent_id: Uuid },
    AgentAccept,
    AgentReject { reason: Option<String> },
    PickUp,
    StartTransit,
    VerifyOtp,
    Cancel { reason: Option<String> },
    Fail { reason: Option<String> },
}

impl OrderEvent {
    pub fn label(&self) -> &'static str {
        match self {
            OrderEvent::Confirm => "confirm",
            OrderEvent::ArriveSellerHub => "arrive_seller_hub",
            OrderEvent::RequestApproval => "request_approval",
            OrderEvent::AdminApprove => "admin_approve",
            OrderEvent::AdminReject { .. } => "admin_reject",
            OrderEvent::ArriveCustomerHub => "arrive_customer_hub",
            OrderEvent::MarkReady => "mark_ready",
            OrderEvent::Assign { .. } => "assign",
            OrderEvent::AgentAccept => "agent_accept",
            OrderEvent::AgentReject { .. } => "agent_reject",
            OrderEvent::PickUp => "pick_up",
            OrderEvent::StartTransit => "start_transit",
            OrderEvent::VerifyOtp => "verify_otp",
            OrderEvent::Cancel { .. } => "cancel",
            OrderEvent::Fail { .. } => "fail",
        }
    }
}

#[derive(Debug, Clone)]
pub struct TransitionOutcome {
    pub new_status: OrderStatus,
    pub tracking: TrackingUpdate,
    pub audiences: Vec<Audience>,
    pub subject: String,
    /// Agent whose live assignment ended with this transition, so the
    /// caller can return them to the available pool.
    pub released_agent: Option<Uuid>,
}

/// The exhaustive edge table. `None` means the edge does not exist and the
/// request must fail with a state conflict; nothing else in the crate is
/// allowed to write `Order::status`.
pub fn next_status(current: OrderStatus, event: &OrderEvent) -> Option<OrderStatus> {
    use OrderStatus::*;

    match (current, event) {
        (Pending, OrderEvent::Confirm) => Some(Confirmed),
        (Confirmed, OrderEvent::ArriveSellerHub) => Some(AtSellerHub),
        (AtSellerHub, OrderEvent::RequestApproval) => Some(AwaitingAdminApproval),
        (AwaitingAdminApproval, OrderEvent::AdminApprove) => Some(InTransitToCustomerHub),
        (AwaitingAdminApproval, OrderEvent::AdminReject { .. }) => Some(Rejected),
        (InTransitToCustomerHub, OrderEvent::ArriveCustomerHub) => Some(AtCustomerHub),
        (AtCustomerHub, OrderEvent::MarkReady) => Some(ReadyForPickup),
        (ReadyForPickup, OrderEvent::Assign { .. }) => Some(Assigned),
        (Assigned, OrderEvent::AgentAccept) => Some(Accepted),
        (Assigned, OrderEvent::AgentReject { .. }) => Some(ReadyForPickup),
        (Accepted, OrderEvent::PickUp) => Some(PickedUp),
        (PickedUp, OrderEvent::StartTransit) => Some(InTransit),
        (
            AtCustomerHub | ReadyForPickup | Assigned | Accepted | PickedUp | InTransit,
            OrderEvent::VerifyOtp,
        ) => Some(Delivered),
        (current, OrderEvent::Cancel { .. }) if current.is_pre_dispatch() => Some(Cancelled),
        (current, OrderEvent::Fail { .. }) if !current.is_terminal() => Some(Failed),
        _ => None,
    }
}

/// Validates and applies one transition on the aggregate. The caller must
/// hold the order's exclusive write guard for the whole call so the status
/// precondition cannot be invalidated mid-flight; a stale precondition
/// surfaces as `StateConflict`, never as a silent overwrite.
pub fn apply_transition(
    order: &mut Order,
    event: &OrderEvent,
    actor: &Actor,
    now: DateTime<Utc>,
) -> Result<TransitionOutcome, AppError> {
    let Some(new_status) = next_status(order.status, event) else {
        return Err(conflict_for(order, event));
    };

    ensure_actor(order, event, actor)?;

    let mut released_agent = None;
    let (subject, message) = match event {
        OrderEvent::Confirm => (
            "Order confirmed",
            format!("order {} confirmed", order.order_number),
        ),
        OrderEvent::ArriveSellerHub => {
            order.hub_tracking.seller_hub.arrived_at = Some(now);
            order.hub_tracking.current_location = CustodyLocation::SellerHub;
            (
                "Order at seller hub",
                format!(
                    "order {} scanned in at {}",
                    order.order_number, order.hub_tracking.seller_hub.name
                ),
            )
        }
        OrderEvent::RequestApproval => (
            "Awaiting admin approval",
            format!("order {} forwarded for admin approval", order.order_number),
        ),
        OrderEvent::AdminApprove => {
            order.hub_tracking.admin_approval.approved = true;
            order.hub_tracking.admin_approval.at = Some(now);
            order.hub_tracking.current_location = CustodyLocation::InTransitBetweenHubs;
            (
                "Order approved",
                format!(
                    "order {} approved, in transit to {}",
                    order.order_number, order.hub_tracking.customer_hub.name
                ),
            )
        }
        OrderEvent::AdminReject { reason } => {
            // A paid order rejected before dispatch is refunded in full,
            // same as a cancellation.
            refund::trigger_refund(order, reason.clone(), now);
            (
                "Order rejected",
                format!("order {} rejected by admin", order.order_number),
            )
        }
        OrderEvent::ArriveCustomerHub => {
            order.hub_tracking.customer_hub.arrived_at = Some(now);
            order.hub_tracking.current_location = CustodyLocation::CustomerHub;
            (
                "Order at customer hub",
                format!(
                    "order {} arrived at {}",
                    order.order_number, order.hub_tracking.customer_hub.name
                ),
            )
        }
        OrderEvent::MarkReady => {
            order.hub_tracking.ready_for_pickup = true;
            (
                "Ready for pickup",
                format!("order {} is ready for pickup", order.order_number),
            )
        }
        OrderEvent::Assign { agent_id } => {
            delivery::assign(order, *agent_id, now)?;
            (
                "Delivery assigned",
                format!("order {} assigned to a delivery agent", order.order_number),
            )
        }
        OrderEvent::AgentAccept => {
            delivery::accept(order, actor, now)?;
            (
                "Delivery accepted",
                format!("agent accepted delivery of order {}", order.order_number),
            )
        }
        OrderEvent::AgentReject { reason } => {
            released_agent = delivery::reject(order, actor, reason.clone())?;
            order.hub_tracking.ready_for_pickup = true;
            (
                "Delivery rejected",
                format!(
                    "agent rejected order {}; back in the assignable pool",
                    order.order_number
                ),
            )
        }
        OrderEvent::PickUp => {
            delivery::pick_up(order, actor, now)?;
            order.hub_tracking.current_location = CustodyLocation::WithAgent;
            (
                "Out of hub",
                format!("order {} picked up by agent", order.order_number),
            )
        }
        OrderEvent::StartTransit => {
            delivery::start_transit(order, actor)?;
            (
                "Out for delivery",
                format!("order {} is out for delivery", order.order_number),
            )
        }
        OrderEvent::VerifyOtp => {
            // Single-use consumption: the value is cleared but `otp_used`
            // stays true so a replay can never match again.
            order.hub_tracking.pickup_otp = None;
            order.hub_tracking.otp_used = true;
            order.hub_tracking.otp_used_at = Some(now);
            order.hub_tracking.current_location = CustodyLocation::WithBuyer;
            order.delivery.delivered_at = Some(now);
            if order.delivery.agent_id.is_some() {
                order.delivery.stage = DeliveryStage::Delivered;
            }
            released_agent = order.delivery.agent_id.take();
            if order.payment_method == PaymentMethod::Cod
                && order.payment_status == PaymentStatus::Pending
            {
                // COD is collected at the hand-off.
                order.payment_status = PaymentStatus::Paid;
            }
            (
                "Order delivered",
                format!(
                    "order {} delivered, custody transfer confirmed",
                    order.order_number
                ),
            )
        }
        OrderEvent::Cancel { reason } => {
            released_agent = order.delivery.agent_id.take();
            if released_agent.is_some() {
                order.delivery.stage = DeliveryStage::Unassigned;
            }
            // An unused pickup code must not outlive the order.
            order.hub_tracking.pickup_otp = None;
            refund::trigger_refund(order, reason.clone(), now);
            (
                "Order cancelled",
                format!("order {} cancelled", order.order_number),
            )
        }
        OrderEvent::Fail { reason } => {
            released_agent = order.delivery.agent_id.take();
            if released_agent.is_some() {
                order.delivery.stage = DeliveryStage::Failed;
            }
            order.hub_tracking.pickup_otp = None;
            if order.delivery.delivery_notes.is_none() {
                order.delivery.delivery_notes = reason.clone();
            }
            (
                "Delivery failed",
                format!("delivery of order {} failed", order.order_number),
            )
        }
    };

    order.status = new_status;
    order.updated_at = now;

    Ok(TransitionOutcome {
        new_status,
        tracking: TrackingUpdate {
            status: new_status,
            message: message.clone(),
            timestamp: now,
            location: None,
        },
        audiences: audiences_for(order, event, released_agent),
        subject: subject.to_string(),
        released_agent,
    })
}

fn conflict_for(order: &Order, event: &OrderEvent) -> AppError {
    match event {
        OrderEvent::Cancel { .. } if order.status.is_terminal() => AppError::StateConflict(
            format!("order {} is already closed", order.order_number),
        ),
        OrderEvent::Cancel { .. } if !order.status.is_pre_dispatch() => AppError::StateConflict(
            format!("cannot cancel order {}: already shipped", order.order_number),
        ),
        _ => AppError::StateConflict(format!(
            "event {:?} is not legal for order {} in its current state",
            event.label(),
            order.order_number
        )),
    }
}

fn ensure_actor(order: &Order, event: &OrderEvent, actor: &Actor) -> Result<(), AppError> {
    match event {
        OrderEvent::AdminApprove | OrderEvent::AdminReject { .. } => match actor {
            Actor::Admin => Ok(()),
            _ => Err(AppError::Authorization(
                "only an admin may approve or reject orders".to_string(),
            )),
        },
        OrderEvent::AgentAccept
        | OrderEvent::AgentReject { .. }
        | OrderEvent::PickUp
        | OrderEvent::StartTransit => delivery::ensure_acting_agent(order, actor),
        // The any-state fail edge belongs to admin/system; an agent may
        // only fail an order they currently hold the assignment for.
        OrderEvent::Fail { .. } => match actor {
            Actor::Admin | Actor::System => Ok(()),
            Actor::Agent { .. } => delivery::ensure_acting_agent(order, actor),
            _ => Err(AppError::Authorization(
                "only an admin or the assigned agent may fail an order".to_string(),
            )),
        },
        _ => Ok(()),
    }
}

fn audiences_for(
    order: &Order,
    event: &OrderEvent,
    released_agent: Option<Uuid>,
) -> Vec<Audience> {
    let buyer = Audience::Buyer {
        email: order.buyer.email.clone(),
    };
    let seller_hub = Audience::HubManager {
        hub_id: order.hub_tracking.seller_hub.id,
    };
    let customer_hub = Audience::HubManager {
        hub_id: order.hub_tracking.customer_hub.id,
    };
    let agent = order
        .delivery
        .agent_id
        .or(released_agent)
        .map(|agent_id| Audience::Agent { agent_id });

    let mut audiences = match event {
        OrderEvent::Confirm => vec![buyer, Audience::Admin],
        OrderEvent::ArriveSellerHub => vec![buyer, seller_hub, Audience::Admin],
        OrderEvent::RequestApproval => vec![seller_hub, Audience::Admin],
        OrderEvent::AdminApprove => vec![buyer, seller_hub, customer_hub],
        OrderEvent::AdminReject { .. } => vec![buyer, seller_hub],
        OrderEvent::ArriveCustomerHub | OrderEvent::MarkReady => vec![buyer, customer_hub],
        OrderEvent::Assign { .. } => vec![customer_hub],
        OrderEvent::AgentAccept => vec![buyer, customer_hub],
        OrderEvent::AgentReject { .. } => vec![customer_hub, Audience::Admin],
        OrderEvent::PickUp | OrderEvent::StartTransit => vec![buyer],
        OrderEvent::VerifyOtp => vec![buyer, customer_hub, Audience::Admin],
        OrderEvent::Cancel { .. } => vec![buyer, Audience::Admin],
        OrderEvent::Fail { .. } => vec![buyer, customer_hub, Audience::Admin],
    };

    match event {
        // The assigned agent hears about assignment and anything that ends
        // their involvement.
        OrderEvent::Assign { .. }
        | OrderEvent::VerifyOtp
        | OrderEvent::Cancel { .. }
        | OrderEvent::Fail { .. } => {
            if let Some(agent) = agent {
                audiences.push(agent);
            }
        }
        _ => {}
    }

    audiences
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use uuid::Uuid;

    use super::{Actor, OrderEvent, apply_transition, next_status};
    use crate::error::AppError;
    use crate::machine::testutil::sample_order;
    use crate::models::order::{DeliveryStage, OrderStatus, RefundStatus};

    #[test]
    fn happy_path_walks_every_hub_leg() {
        let mut order = sample_order(OrderStatus::Pending);
        let agent_id = Uuid::new_v4();
        let now = Utc::now();

        let steps: Vec<(OrderEvent, Actor, OrderStatus)> = vec![
            (OrderEvent::Confirm, Actor::System, OrderStatus::Confirmed),
            (
                OrderEvent::ArriveSellerHub,
                Actor::HubManager {
                    hub_id: order.hub_tracking.seller_hub.id,
                },
                OrderStatus::AtSellerHub,
            ),
            (
                OrderEvent::RequestApproval,
                Actor::HubManager {
                    hub_id: order.hub_tracking.seller_hub.id,
                },
                OrderStatus::AwaitingAdminApproval,
            ),
            (
                OrderEvent::AdminApprove,
                Actor::Admin,
                OrderStatus::InTransitToCustomerHub,
            ),
            (
                OrderEvent::ArriveCustomerHub,
                Actor::HubManager {
                    hub_id: order.hub_tracking.customer_hub.id,
                },
                OrderStatus::AtCustomerHub,
            ),
            (
                OrderEvent::MarkReady,
                Actor::HubManager {
                    hub_id: order.hub_tracking.customer_hub.id,
                },
                OrderStatus::ReadyForPickup,
            ),
            (
                OrderEvent::Assign { agent_id },
                Actor::HubManager {
                    hub_id: order.hub_tracking.customer_hub.id,
                },
                OrderStatus::Assigned,
            ),
            (
                OrderEvent::AgentAccept,
                Actor::Agent { agent_id },
                OrderStatus::Accepted,
            ),
            (
                OrderEvent::PickUp,
                Actor::Agent { agent_id },
                OrderStatus::PickedUp,
            ),
            (
                OrderEvent::StartTransit,
                Actor::Agent { agent_id },
                OrderStatus::InTransit,
            ),
        ];

        for (event, actor, expected) in steps {
            let outcome = apply_transition(&mut order, &event, &actor, now).unwrap();
            assert_eq!(outcome.new_status, expected);
            assert_eq!(order.status, expected);
            assert_eq!(outcome.tracking.status, expected);
        }

        assert!(order.hub_tracking.seller_hub.arrived_at.is_some());
        assert!(order.hub_tracking.admin_approval.approved);
        assert!(order.hub_tracking.customer_hub.arrived_at.is_some());
        assert_eq!(order.delivery.agent_id, Some(agent_id));
        assert_eq!(order.delivery.stage, DeliveryStage::InTransit);
    }

    #[test]
    fn illegal_edge_is_a_state_conflict() {
        let mut order = sample_order(OrderStatus::Pending);
        let err = apply_transition(
            &mut order,
            &OrderEvent::AdminApprove,
            &Actor::Admin,
            Utc::now(),
        )
        .unwrap_err();
        assert!(matches!(err, AppError::StateConflict(_)));
        assert_eq!(order.status, OrderStatus::Pending);
    }

    #[test]
    fn cancel_past_pickup_is_rejected_with_shipped_message() {
        let mut order = sample_order(OrderStatus::InTransit);
        let err = apply_transition(
            &mut order,
            &OrderEvent::Cancel { reason: None },
            &Actor::Buyer,
            Utc::now(),
        )
        .unwrap_err();

        match err {
            AppError::StateConflict(msg) => assert!(msg.contains("already shipped")),
            other => panic!("expected state conflict, got {other:?}"),
        }
        assert_eq!(order.status, OrderStatus::InTransit);
        assert_eq!(order.refund.refund_status, RefundStatus::NotApplicable);
    }

    #[test]
    fn terminal_states_accept_no_events() {
        for status in [
            OrderStatus::Delivered,
            OrderStatus::Cancelled,
            OrderStatus::Rejected,
            OrderStatus::Failed,
        ] {
            assert_eq!(next_status(status, &OrderEvent::Confirm), None);
            assert_eq!(
                next_status(status, &OrderEvent::Cancel { reason: None }),
                None
            );
            assert_eq!(
                next_status(status, &OrderEvent::Fail { reason: None }),
                None
            );
        }
    }

    #[test]
    fn fail_is_reachable_from_any_active_state() {
        for status in [
            OrderStatus::Pending,
            OrderStatus::AwaitingAdminApproval,
            OrderStatus::AtCustomerHub,
            OrderStatus::InTransit,
        ] {
            assert_eq!(
                next_status(status, &OrderEvent::Fail { reason: None }),
                Some(OrderStatus::Failed)
            );
        }
    }

    #[test]
    fn fail_from_a_stranger_agent_is_an_authorization_error() {
        let mut order = sample_order(OrderStatus::Confirmed);
        let err = apply_transition(
            &mut order,
            &OrderEvent::Fail {
                reason: Some("lost".to_string()),
            },
            &Actor::Agent {
                agent_id: Uuid::new_v4(),
            },
            Utc::now(),
        )
        .unwrap_err();

        assert!(matches!(err, AppError::Authorization(_)));
        assert_eq!(order.status, OrderStatus::Confirmed);

        // The any-state edge stays open to admin and system callers.
        apply_transition(
            &mut order,
            &OrderEvent::Fail { reason: None },
            &Actor::Admin,
            Utc::now(),
        )
        .unwrap();
        assert_eq!(order.status, OrderStatus::Failed);
    }

    #[test]
    fn assigned_agent_may_fail_their_own_delivery() {
        let mut order = sample_order(OrderStatus::PickedUp);
        let agent_id = Uuid::new_v4();
        order.delivery.agent_id = Some(agent_id);
        order.delivery.stage = DeliveryStage::PickedUp;

        apply_transition(
            &mut order,
            &OrderEvent::Fail {
                reason: Some("address unreachable".to_string()),
            },
            &Actor::Agent { agent_id },
            Utc::now(),
        )
        .unwrap();

        assert_eq!(order.status, OrderStatus::Failed);
        assert_eq!(order.delivery.agent_id, None);
        assert_eq!(order.delivery.stage, DeliveryStage::Failed);
    }

    #[test]
    fn terminal_transitions_discard_an_unused_pickup_code() {
        let mut order = sample_order(OrderStatus::ReadyForPickup);
        order.hub_tracking.pickup_otp = Some("123456".to_string());
        apply_transition(
            &mut order,
            &OrderEvent::Cancel { reason: None },
            &Actor::Buyer,
            Utc::now(),
        )
        .unwrap();
        assert_eq!(order.hub_tracking.pickup_otp, None);

        let mut order = sample_order(OrderStatus::InTransit);
        order.hub_tracking.pickup_otp = Some("123456".to_string());
        order.delivery.agent_id = Some(Uuid::new_v4());
        apply_transition(
            &mut order,
            &OrderEvent::Fail { reason: None },
            &Actor::Admin,
            Utc::now(),
        )
        .unwrap();
        assert_eq!(order.hub_tracking.pickup_otp, None);
    }

    #[test]
    fn admin_events_require_the_admin_actor() {
        let mut order = sample_order(OrderStatus::AwaitingAdminApproval);
        let err = apply_transition(
            &mut order,
            &OrderEvent::AdminApprove,
            &Actor::Buyer,
            Utc::now(),
        )
        .unwrap_err();
        assert!(matches!(err, AppError::Authorization(_)));
        assert_eq!(order.status, OrderStatus::AwaitingAdminApproval);
    }

    #[test]
    fn rejection_returns_order_to_assignable_pool() {
        let mut order = sample_order(OrderStatus::ReadyForPickup);
        order.hub_tracking.ready_for_pickup = true;
        let agent_a = Uuid::new_v4();
        let agent_b = Uuid::new_v4();
        let now = Utc::now();

        apply_transition(
            &mut order,
            &OrderEvent::Assign { agent_id: agent_a },
            &Actor::Admin,
            now,
        )
        .unwrap();

        let outcome = apply_transition(
            &mut order,
            &OrderEvent::AgentReject {
                reason: Some("vehicle breakdown".to_string()),
            },
            &Actor::Agent { agent_id: agent_a },
            now,
        )
        .unwrap();

        assert_eq!(order.status, OrderStatus::ReadyForPickup);
        assert_eq!(order.delivery.agent_id, None);
        assert_eq!(order.delivery.stage, DeliveryStage::Unassigned);
        assert_eq!(outcome.released_agent, Some(agent_a));

        // An explicit re-assignment to a different agent succeeds.
        apply_transition(
            &mut order,
            &OrderEvent::Assign { agent_id: agent_b },
            &Actor::Admin,
            now,
        )
        .unwrap();
        assert_eq!(order.delivery.agent_id, Some(agent_b));
    }
}

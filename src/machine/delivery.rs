//! The order <-> agent sub-machine. Only one agent may hold a live
//! assignment at a time, and every agent-driven step checks that the acting
//! identity matches `delivery.agent_id` (a mismatch is an authorization
//! error, not a state conflict).

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::AppError;
use crate::machine::transitions::Actor;
use crate::models::order::{DeliveryStage, Order};

pub fn ensure_acting_agent(order: &Order, actor: &Actor) -> Result<(), AppError> {
    let Actor::Agent { agent_id } = actor else {
        return Err(AppError::Authorization(
            "only the assigned delivery agent may perform this action".to_string(),
        ));
    };

    match order.delivery.agent_id {
        Some(assigned) if assigned == *agent_id => Ok(()),
        Some(_) => Err(AppError::Authorization(format!(
            "order {} is assigned to a different agent",
            order.order_number
        ))),
        None => Err(AppError::Authorization(format!(
            "order {} has no assigned agent",
            order.order_number
        ))),
    }
}

pub fn assign(order: &mut Order, agent_id: Uuid, now: DateTime<Utc>) -> Result<(), AppError> {
    if order.delivery.agent_id.is_some() {
        return Err(AppError::StateConflict(format!(
            "order {} already has an assigned agent",
            order.order_number
        )));
    }

    order.delivery.agent_id = Some(agent_id);
    order.delivery.assigned_at = Some(now);
    order.delivery.stage = DeliveryStage::Assigned;
    Ok(())
}

pub fn accept(order: &mut Order, actor: &Actor, now: DateTime<Utc>) -> Result<(), AppError> {
    ensure_acting_agent(order, actor)?;
    order.delivery.accepted_at = Some(now);
    order.delivery.stage = DeliveryStage::Accepted;
    Ok(())
}

/// Clears the assignment and hands the order back to the assignable pool.
/// Returns the released agent so the caller can flip them back to available.
pub fn reject(
    order: &mut Order,
    actor: &Actor,
    reason: Option<String>,
) -> Result<Option<Uuid>, AppError> {
    ensure_acting_agent(order, actor)?;

    let released = order.delivery.agent_id.take();
    order.delivery.stage = DeliveryStage::Unassigned;
    order.delivery.assigned_at = None;
    order.delivery.accepted_at = None;
    if reason.is_some() {
        order.delivery.delivery_notes = reason;
    }
    Ok(released)
}

pub fn pick_up(order: &mut Order, actor: &Actor, now: DateTime<Utc>) -> Result<(), AppError> {
    ensure_acting_agent(order, actor)?;
    order.delivery.picked_up_at = Some(now);
    order.delivery.stage = DeliveryStage::PickedUp;
    Ok(())
}

pub fn start_transit(order: &mut Order, actor: &Actor) -> Result<(), AppError> {
    ensure_acting_agent(order, actor)?;
    order.delivery.stage = DeliveryStage::InTransit;
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use uuid::Uuid;

    use super::{accept, assign, ensure_acting_agent, reject};
    use crate::error::AppError;
    use crate::machine::testutil::sample_order;
    use crate::machine::transitions::Actor;
    use crate::models::order::{DeliveryStage, OrderStatus};

    #[test]
    fn double_assign_conflicts() {
        let mut order = sample_order(OrderStatus::ReadyForPickup);
        let now = Utc::now();
        assign(&mut order, Uuid::new_v4(), now).unwrap();
        let err = assign(&mut order, Uuid::new_v4(), now).unwrap_err();
        assert!(matches!(err, AppError::StateConflict(_)));
    }

    #[test]
    fn foreign_agent_is_an_authorization_error() {
        let mut order = sample_order(OrderStatus::Assigned);
        let assigned = Uuid::new_v4();
        assign(&mut order, assigned, Utc::now()).unwrap();

        let stranger = Actor::Agent {
            agent_id: Uuid::new_v4(),
        };
        let err = ensure_acting_agent(&order, &stranger).unwrap_err();
        assert!(matches!(err, AppError::Authorization(_)));
    }

    #[test]
    fn accept_stamps_and_advances_stage() {
        let mut order = sample_order(OrderStatus::Assigned);
        let agent_id = Uuid::new_v4();
        assign(&mut order, agent_id, Utc::now()).unwrap();

        accept(&mut order, &Actor::Agent { agent_id }, Utc::now()).unwrap();
        assert_eq!(order.delivery.stage, DeliveryStage::Accepted);
        assert!(order.delivery.accepted_at.is_some());
    }

    #[test]
    fn reject_clears_assignment_fields() {
        let mut order = sample_order(OrderStatus::Assigned);
        let agent_id = Uuid::new_v4();
        assign(&mut order, agent_id, Utc::now()).unwrap();

        let released = reject(
            &mut order,
            &Actor::Agent { agent_id },
            Some("too far".to_string()),
        )
        .unwrap();

        assert_eq!(released, Some(agent_id));
        assert_eq!(order.delivery.agent_id, None);
        assert_eq!(order.delivery.assigned_at, None);
        assert_eq!(order.delivery.stage, DeliveryStage::Unassigned);
        assert_eq!(order.delivery.delivery_notes.as_deref(), Some("too far"));
    }
}

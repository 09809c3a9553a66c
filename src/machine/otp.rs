//! Pickup-code custody transfer. The code is six numeric digits, single
//! use, and deliberately has no expiry: it stays valid until consumed.

use chrono::{DateTime, Utc};
use rand::Rng;

use crate::error::AppError;
use crate::machine::transitions::{Actor, OrderEvent, TransitionOutcome, apply_transition};
use crate::models::order::{Order, OrderStatus};

fn generate_code() -> String {
    let code: u32 = rand::thread_rng().gen_range(0..1_000_000);
    format!("{code:06}")
}

/// Issues the pickup code for an order staged at its customer hub. Exactly
/// one live code may exist per order: a repeat request while the current
/// code is unused is a conflict that echoes the existing code back.
pub fn issue(order: &mut Order, now: DateTime<Utc>) -> Result<String, AppError> {
    if !matches!(
        order.status,
        OrderStatus::AtCustomerHub | OrderStatus::ReadyForPickup
    ) {
        return Err(AppError::StateConflict(format!(
            "order {} is not staged at its customer hub",
            order.order_number
        )));
    }

    if let Some(existing) = &order.hub_tracking.pickup_otp {
        if !order.hub_tracking.otp_used {
            return Err(AppError::DuplicateOtp {
                code: existing.clone(),
            });
        }
    }

    let code = generate_code();
    order.hub_tracking.pickup_otp = Some(code.clone());
    order.hub_tracking.otp_generated_at = Some(now);
    order.hub_tracking.otp_used = false;
    order.hub_tracking.otp_used_at = None;
    order.updated_at = now;

    Ok(code)
}

/// Compares the submitted code and, on a match, atomically consumes it and
/// drives the `VerifyOtp` transition to `Delivered`. A mismatch mutates
/// nothing and is an authentication-style failure, not a state conflict;
/// an already-consumed code is rejected the same way even if the value
/// would still match.
pub fn verify(
    order: &mut Order,
    submitted: &str,
    actor: &Actor,
    now: DateTime<Utc>,
) -> Result<TransitionOutcome, AppError> {
    if order.hub_tracking.otp_used {
        return Err(AppError::InvalidOtp);
    }

    let Some(expected) = &order.hub_tracking.pickup_otp else {
        return Err(AppError::StateConflict(format!(
            "no pickup code has been issued for order {}",
            order.order_number
        )));
    };

    if expected != submitted {
        return Err(AppError::InvalidOtp);
    }

    apply_transition(order, &OrderEvent::VerifyOtp, actor, now)
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::{issue, verify};
    use crate::error::AppError;
    use crate::machine::testutil::sample_order;
    use crate::machine::transitions::Actor;
    use crate::models::order::{OrderStatus, PaymentMethod, PaymentStatus};

    #[test]
    fn issue_produces_six_digits() {
        let mut order = sample_order(OrderStatus::AtCustomerHub);
        let code = issue(&mut order, Utc::now()).unwrap();
        assert_eq!(code.len(), 6);
        assert!(code.chars().all(|c| c.is_ascii_digit()));
        assert!(!order.hub_tracking.otp_used);
        assert_eq!(order.hub_tracking.pickup_otp.as_deref(), Some(code.as_str()));
    }

    #[test]
    fn second_issue_echoes_the_original_code() {
        let mut order = sample_order(OrderStatus::AtCustomerHub);
        let first = issue(&mut order, Utc::now()).unwrap();

        match issue(&mut order, Utc::now()) {
            Err(AppError::DuplicateOtp { code }) => assert_eq!(code, first),
            other => panic!("expected duplicate conflict, got {other:?}"),
        }
        assert_eq!(order.hub_tracking.pickup_otp.as_deref(), Some(first.as_str()));
    }

    #[test]
    fn issue_away_from_customer_hub_conflicts() {
        let mut order = sample_order(OrderStatus::AtSellerHub);
        let err = issue(&mut order, Utc::now()).unwrap_err();
        assert!(matches!(err, AppError::StateConflict(_)));
    }

    #[test]
    fn wrong_code_mutates_nothing() {
        let mut order = sample_order(OrderStatus::AtCustomerHub);
        let code = issue(&mut order, Utc::now()).unwrap();
        let wrong = if code == "000000" { "000001" } else { "000000" };

        let err = verify(&mut order, wrong, &Actor::Buyer, Utc::now()).unwrap_err();
        assert!(matches!(err, AppError::InvalidOtp));
        assert_eq!(order.status, OrderStatus::AtCustomerHub);
        assert!(!order.hub_tracking.otp_used);
        assert!(order.hub_tracking.otp_used_at.is_none());
    }

    #[test]
    fn correct_code_delivers_exactly_once() {
        let mut order = sample_order(OrderStatus::AtCustomerHub);
        let code = issue(&mut order, Utc::now()).unwrap();

        verify(&mut order, &code, &Actor::Buyer, Utc::now()).unwrap();
        assert_eq!(order.status, OrderStatus::Delivered);
        assert!(order.hub_tracking.otp_used);
        assert!(order.hub_tracking.pickup_otp.is_none());

        // Replaying the very same value fails even though it once matched.
        let err = verify(&mut order, &code, &Actor::Buyer, Utc::now()).unwrap_err();
        assert!(matches!(err, AppError::InvalidOtp));
    }

    #[test]
    fn cod_payment_is_collected_at_handoff() {
        let mut order = sample_order(OrderStatus::AtCustomerHub);
        order.payment_method = PaymentMethod::Cod;
        order.payment_status = PaymentStatus::Pending;
        let code = issue(&mut order, Utc::now()).unwrap();

        verify(&mut order, &code, &Actor::Buyer, Utc::now()).unwrap();
        assert_eq!(order.payment_status, PaymentStatus::Paid);
    }
}

//! Refund trigger. Fires inside a successful cancel (or admin rejection)
//! on an order that was already paid. No live gateway reversal is modeled,
//! so the refund advances straight from pending to completed with a
//! synthetic transaction reference.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::order::{Order, PaymentMethod, PaymentStatus, RefundStatus};

pub fn trigger_refund(order: &mut Order, notes: Option<String>, now: DateTime<Utc>) {
    if order.payment_status != PaymentStatus::Paid {
        // Nothing was captured; refund state stays not_applicable.
        order.refund.refund_notes = notes;
        return;
    }

    order.refund.refund_amount = Some(order.final_amount);
    order.refund.refund_status = RefundStatus::Pending;
    order.refund.refund_initiated_at = Some(now);
    order.refund.refund_method = Some(match order.payment_method {
        PaymentMethod::Online => "original_payment_method".to_string(),
        PaymentMethod::Cod => "manual_settlement".to_string(),
    });
    order.refund.refund_notes = notes;

    order.refund.refund_status = RefundStatus::Completed;
    order.refund.refund_completed_at = Some(now);
    order.refund.refund_transaction_id = Some(format!("RF-{}", Uuid::new_v4().simple()));
    order.payment_status = PaymentStatus::Refunded;
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rust_decimal_macros::dec;

    use super::trigger_refund;
    use crate::machine::testutil::sample_order;
    use crate::models::order::{OrderStatus, PaymentStatus, RefundStatus};

    #[test]
    fn paid_order_is_refunded_in_full() {
        let mut order = sample_order(OrderStatus::Confirmed);
        order.payment_status = PaymentStatus::Paid;
        order.final_amount = dec!(430);

        trigger_refund(&mut order, Some("changed my mind".to_string()), Utc::now());

        assert_eq!(order.refund.refund_amount, Some(dec!(430)));
        assert_eq!(order.refund.refund_status, RefundStatus::Completed);
        assert!(order.refund.refund_initiated_at.is_some());
        assert!(order.refund.refund_completed_at.is_some());
        assert!(
            order
                .refund
                .refund_transaction_id
                .as_deref()
                .unwrap()
                .starts_with("RF-")
        );
        assert_eq!(order.payment_status, PaymentStatus::Refunded);
    }

    #[test]
    fn unpaid_order_stays_not_applicable() {
        let mut order = sample_order(OrderStatus::Pending);
        order.payment_status = PaymentStatus::Pending;

        trigger_refund(&mut order, None, Utc::now());

        assert_eq!(order.refund.refund_status, RefundStatus::NotApplicable);
        assert_eq!(order.refund.refund_amount, None);
        assert_eq!(order.payment_status, PaymentStatus::Pending);
    }
}

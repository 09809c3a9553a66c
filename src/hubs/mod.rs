//! Hub routing. Resolves the seller/customer hubs by district at creation,
//! derives per-hub occupancy from the live order set (never an independent
//! counter, so it cannot drift), and backs the two hub-manager views:
//! staged outbound orders awaiting approval vs inbound dispatch stock.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::hub::Hub;
use crate::models::order::{Order, OrderStatus};
use crate::state::AppState;

/// Statuses that count as "staged at the seller hub" for occupancy and the
/// Orders view.
fn staged_as_seller(status: OrderStatus) -> bool {
    matches!(
        status,
        OrderStatus::AtSellerHub | OrderStatus::AwaitingAdminApproval
    )
}

/// Statuses that count as "staged at the customer hub" for occupancy and
/// the Dispatch view. Disjoint from the seller set by construction, so a
/// same-district order never shows up in both views at once.
fn staged_as_customer(status: OrderStatus) -> bool {
    matches!(
        status,
        OrderStatus::AtCustomerHub
            | OrderStatus::ReadyForPickup
            | OrderStatus::Assigned
            | OrderStatus::Accepted
    )
}

pub fn resolve_by_district(state: &AppState, district: &str) -> Result<Hub, AppError> {
    state
        .hubs
        .iter()
        .find(|entry| entry.value().district.eq_ignore_ascii_case(district))
        .map(|entry| entry.value().clone())
        .ok_or_else(|| AppError::NotFound(format!("no hub serves district {district}")))
}

pub fn get_hub(state: &AppState, hub_id: Uuid) -> Result<Hub, AppError> {
    state
        .hubs
        .get(&hub_id)
        .map(|entry| entry.value().clone())
        .ok_or_else(|| AppError::NotFound(format!("hub {hub_id} not found")))
}

/// Derived occupancy: both staging roles combined. Must not be called
/// while holding a write guard on any order entry.
pub fn occupancy(state: &AppState, hub_id: Uuid) -> usize {
    let count = state
        .orders
        .iter()
        .filter(|entry| {
            let order = entry.value();
            (order.hub_tracking.seller_hub.id == hub_id && staged_as_seller(order.status))
                || (order.hub_tracking.customer_hub.id == hub_id
                    && staged_as_customer(order.status))
        })
        .count();

    state
        .metrics
        .hub_occupancy
        .with_label_values(&[&hub_id.to_string()])
        .set(count as f64);

    count
}

pub fn ensure_capacity(state: &AppState, hub: &Hub) -> Result<(), AppError> {
    if occupancy(state, hub.id) >= hub.max_capacity {
        return Err(AppError::StateConflict(format!(
            "hub {} is at capacity ({} orders)",
            hub.name, hub.max_capacity
        )));
    }
    Ok(())
}

/// Orders view: staged here in the seller role, pending the admin gate.
pub fn seller_view(state: &AppState, hub_id: Uuid, since: Option<DateTime<Utc>>) -> Vec<Order> {
    collect(state, |order| {
        order.hub_tracking.seller_hub.id == hub_id
            && staged_as_seller(order.status)
            && after(order.hub_tracking.seller_hub.arrived_at, since)
    })
}

/// Dispatch view: inbound to this hub's district for buyer hand-off.
pub fn dispatch_view(state: &AppState, hub_id: Uuid, since: Option<DateTime<Utc>>) -> Vec<Order> {
    collect(state, |order| {
        order.hub_tracking.customer_hub.id == hub_id
            && staged_as_customer(order.status)
            && after(order.hub_tracking.customer_hub.arrived_at, since)
    })
}

fn after(arrived_at: Option<DateTime<Utc>>, since: Option<DateTime<Utc>>) -> bool {
    match (arrived_at, since) {
        (Some(arrived), Some(cutoff)) => arrived >= cutoff,
        (_, None) => true,
        (None, Some(_)) => false,
    }
}

fn collect(state: &AppState, predicate: impl Fn(&Order) -> bool) -> Vec<Order> {
    let mut orders: Vec<Order> = state
        .orders
        .iter()
        .filter(|entry| predicate(entry.value()))
        .map(|entry| entry.value().clone())
        .collect();
    orders.sort_by_key(|order| order.created_at);
    orders
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::{dispatch_view, occupancy, resolve_by_district, seller_view};
    use crate::machine::testutil::sample_order;
    use crate::models::hub::Hub;
    use crate::models::order::OrderStatus;
    use crate::state::AppState;
    use chrono::Utc;
    use uuid::Uuid;

    fn state_with_hub(district: &str) -> (AppState, Hub) {
        let (state, _rx) = AppState::new(16, 16, Decimal::new(50, 0));
        let hub = Hub {
            id: Uuid::new_v4(),
            name: format!("{district} Hub"),
            district: district.to_string(),
            max_capacity: 10,
            created_at: Utc::now(),
        };
        state.hubs.insert(hub.id, hub.clone());
        (state, hub)
    }

    #[test]
    fn district_resolution_is_case_insensitive() {
        let (state, hub) = state_with_hub("Wayanad");
        let found = resolve_by_district(&state, "wayanad").unwrap();
        assert_eq!(found.id, hub.id);
        assert!(resolve_by_district(&state, "Idukki").is_err());
    }

    #[test]
    fn occupancy_counts_both_roles_and_views_stay_disjoint() {
        let (state, hub) = state_with_hub("Ernakulam");

        // Same hub on both legs of the same order (same-district sale):
        // a staged seller-role order counts once and appears only in the
        // Orders view.
        let mut outbound = sample_order(OrderStatus::AwaitingAdminApproval);
        outbound.hub_tracking.seller_hub.id = hub.id;
        outbound.hub_tracking.seller_hub.arrived_at = Some(Utc::now());
        outbound.hub_tracking.customer_hub.id = hub.id;
        state.orders.insert(outbound.id, outbound);

        let mut inbound = sample_order(OrderStatus::AtCustomerHub);
        inbound.hub_tracking.customer_hub.id = hub.id;
        inbound.hub_tracking.customer_hub.arrived_at = Some(Utc::now());
        state.orders.insert(inbound.id, inbound);

        assert_eq!(occupancy(&state, hub.id), 2);

        let orders = seller_view(&state, hub.id, None);
        let dispatch = dispatch_view(&state, hub.id, None);
        assert_eq!(orders.len(), 1);
        assert_eq!(dispatch.len(), 1);
        assert_ne!(orders[0].id, dispatch[0].id);
    }

    #[test]
    fn since_filter_uses_the_arrival_stamp() {
        let (state, hub) = state_with_hub("Kollam");
        let mut order = sample_order(OrderStatus::AtCustomerHub);
        order.hub_tracking.customer_hub.id = hub.id;
        order.hub_tracking.customer_hub.arrived_at =
            Some(Utc::now() - chrono::Duration::days(3));
        state.orders.insert(order.id, order);

        let cutoff = Utc::now() - chrono::Duration::days(1);
        assert!(dispatch_view(&state, hub.id, Some(cutoff)).is_empty());
        assert_eq!(dispatch_view(&state, hub.id, None).len(), 1);
    }
}

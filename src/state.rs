use std::sync::Arc;

use dashmap::DashMap;
use rust_decimal::Decimal;
use tokio::sync::{Mutex, broadcast, mpsc};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::agent::DeliveryAgent;
use crate::models::hub::Hub;
use crate::models::notification::{Notification, NotificationRequest};
use crate::models::order::{Order, TrackingUpdate};
use crate::notify::{EmailLogChannel, NotificationChannel};
use crate::observability::metrics::Metrics;

pub struct AppState {
    /// Order aggregates, keyed by internal id. A transition holds the
    /// entry's write guard for its whole check-then-mutate span, which is
    /// what makes every status update an atomic conditional update.
    pub orders: DashMap<Uuid, Order>,
    /// External reference -> internal id.
    pub order_numbers: DashMap<String, Uuid>,
    pub hubs: DashMap<Uuid, Hub>,
    /// One admission lock per hub. Arrivals hold it across the occupancy
    /// check and the transition so a hub with one free slot admits exactly
    /// one of two racing orders.
    pub hub_admission: DashMap<Uuid, Arc<Mutex<()>>>,
    pub agents: DashMap<Uuid, DeliveryAgent>,
    /// Append-only audit logs, one arena entry per order.
    pub tracking: DashMap<Uuid, Vec<TrackingUpdate>>,
    pub notifications: DashMap<Uuid, Notification>,
    pub outbox_tx: mpsc::Sender<NotificationRequest>,
    pub notification_events_tx: broadcast::Sender<Notification>,
    pub channel: Arc<dyn NotificationChannel>,
    pub shipping_flat_rate: Decimal,
    pub metrics: Metrics,
}

impl AppState {
    pub fn new(
        outbox_size: usize,
        event_buffer_size: usize,
        shipping_flat_rate: Decimal,
    ) -> (Self, mpsc::Receiver<NotificationRequest>) {
        let (outbox_tx, outbox_rx) = mpsc::channel(outbox_size);
        let (notification_events_tx, _unused_rx) = broadcast::channel(event_buffer_size);

        (
            Self {
                orders: DashMap::new(),
                order_numbers: DashMap::new(),
                hubs: DashMap::new(),
                hub_admission: DashMap::new(),
                agents: DashMap::new(),
                tracking: DashMap::new(),
                notifications: DashMap::new(),
                outbox_tx,
                notification_events_tx,
                channel: Arc::new(EmailLogChannel),
                shipping_flat_rate,
                metrics: Metrics::new(),
            },
            outbox_rx,
        )
    }

    pub fn hub_admission_lock(&self, hub_id: Uuid) -> Arc<Mutex<()>> {
        self.hub_admission
            .entry(hub_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    pub fn order_id(&self, order_number: &str) -> Result<Uuid, AppError> {
        self.order_numbers
            .get(order_number)
            .map(|entry| *entry.value())
            .ok_or_else(|| AppError::NotFound(format!("order {order_number} not found")))
    }
}

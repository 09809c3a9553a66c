//! Notification fan-out. Transitions push a request onto the outbox
//! channel and move on; the dispatcher task writes one durable record per
//! audience, mirrors it onto the live event stream, and attempts one
//! best-effort external send. A failed send is logged and counted, never
//! propagated back to the transition that caused it.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::models::notification::{Notification, NotificationRequest};
use crate::state::AppState;

/// External send boundary (email-equivalent). The production impl just
/// logs; tests swap in failing channels to prove sends are non-fatal.
pub trait NotificationChannel: Send + Sync {
    fn deliver(&self, notification: &Notification) -> Result<(), String>;
}

pub struct EmailLogChannel;

impl NotificationChannel for EmailLogChannel {
    fn deliver(&self, notification: &Notification) -> Result<(), String> {
        info!(
            recipient = %notification.recipient,
            order_number = %notification.order_number,
            subject = %notification.subject,
            "notification sent"
        );
        Ok(())
    }
}

/// Best-effort enqueue. Callers have already committed their transition,
/// so a full or closed outbox is logged and dropped rather than surfaced.
pub async fn enqueue(state: &AppState, request: NotificationRequest) {
    match state.outbox_tx.send(request).await {
        Ok(()) => {
            state.metrics.notifications_in_outbox.inc();
        }
        Err(err) => {
            warn!(error = %err, "notification outbox send failed");
            state
                .metrics
                .notifications_total
                .with_label_values(&["dropped"])
                .inc();
        }
    }
}

pub async fn run_notification_dispatcher(
    state: Arc<AppState>,
    mut outbox_rx: mpsc::Receiver<NotificationRequest>,
) {
    info!("notification dispatcher started");

    while let Some(request) = outbox_rx.recv().await {
        state.metrics.notifications_in_outbox.dec();

        for audience in &request.audiences {
            let notification = Notification {
                id: Uuid::new_v4(),
                role: audience.role(),
                recipient: audience.recipient_key(),
                order_id: request.order_id,
                order_number: request.order_number.clone(),
                subject: request.subject.clone(),
                body: request.body.clone(),
                read: false,
                created_at: Utc::now(),
            };

            state
                .notifications
                .insert(notification.id, notification.clone());
            let _ = state.notification_events_tx.send(notification.clone());

            let start = Instant::now();
            match state.channel.deliver(&notification) {
                Ok(()) => {
                    record_send(&state, "success", start.elapsed().as_secs_f64());
                }
                Err(err) => {
                    warn!(
                        error = %err,
                        recipient = %notification.recipient,
                        order_number = %notification.order_number,
                        "external notification send failed"
                    );
                    record_send(&state, "error", start.elapsed().as_secs_f64());
                }
            }
        }
    }

    warn!("notification dispatcher stopped: outbox channel closed");
}

fn record_send(state: &AppState, outcome: &str, elapsed: f64) {
    state
        .metrics
        .notification_send_seconds
        .with_label_values(&[outcome])
        .observe(elapsed);
    state
        .metrics
        .notifications_total
        .with_label_values(&[outcome])
        .inc();
}

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::models::notification::{Notification, RecipientRole};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/notifications", get(list_notifications))
}

#[derive(Deserialize)]
pub struct NotificationsQuery {
    pub role: Option<RecipientRole>,
    pub recipient: Option<String>,
}

#[derive(Serialize)]
struct NotificationsResponse {
    notifications: Vec<Notification>,
    unread_count: usize,
}

async fn list_notifications(
    State(state): State<Arc<AppState>>,
    Query(query): Query<NotificationsQuery>,
) -> Result<Json<NotificationsResponse>, AppError> {
    if query.role.is_none() && query.recipient.is_none() {
        return Err(AppError::Validation(
            "a role or recipient filter is required".to_string(),
        ));
    }

    let mut notifications: Vec<Notification> = state
        .notifications
        .iter()
        .filter(|entry| {
            let notification = entry.value();
            query.role.map_or(true, |role| notification.role == role)
                && query
                    .recipient
                    .as_deref()
                    .map_or(true, |recipient| notification.recipient == recipient)
        })
        .map(|entry| entry.value().clone())
        .collect();
    notifications.sort_by(|a, b| b.created_at.cmp(&a.created_at));

    let unread_count = notifications.iter().filter(|n| !n.read).count();

    Ok(Json(NotificationsResponse {
        notifications,
        unread_count,
    }))
}

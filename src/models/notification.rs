use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Who a notification is addressed to. Carries enough identity to derive
/// the durable recipient key without another lookup.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "role")]
pub enum Audience {
    Buyer { email: String },
    HubManager { hub_id: Uuid },
    Admin,
    Agent { agent_id: Uuid },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecipientRole {
    Buyer,
    HubManager,
    Admin,
    Agent,
}

impl Audience {
    pub fn role(&self) -> RecipientRole {
        match self {
            Audience::Buyer { .. } => RecipientRole::Buyer,
            Audience::HubManager { .. } => RecipientRole::HubManager,
            Audience::Admin => RecipientRole::Admin,
            Audience::Agent { .. } => RecipientRole::Agent,
        }
    }

    pub fn recipient_key(&self) -> String {
        match self {
            Audience::Buyer { email } => email.clone(),
            Audience::HubManager { hub_id } => hub_id.to_string(),
            Audience::Admin => "admin".to_string(),
            Audience::Agent { agent_id } => agent_id.to_string(),
        }
    }
}

/// Durable per-recipient record. Duplicates from a redriven request are
/// tolerated; the underlying transition is what carries idempotency.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub role: RecipientRole,
    pub recipient: String,
    pub order_id: Uuid,
    pub order_number: String,
    pub subject: String,
    pub body: String,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

/// One fan-out unit pushed onto the outbox channel per accepted transition
/// (and per OTP issue/consume).
#[derive(Debug, Clone)]
pub struct NotificationRequest {
    pub order_id: Uuid,
    pub order_number: String,
    pub subject: String,
    pub body: String,
    pub audiences: Vec<Audience>,
}

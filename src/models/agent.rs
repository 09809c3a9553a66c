use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Available,
    Busy,
    Offline,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryAgent {
    pub id: Uuid,
    pub name: String,
    pub phone: String,
    pub district: String,
    pub status: AgentStatus,
    pub location: Option<GeoPoint>,
    pub updated_at: DateTime<Utc>,
}

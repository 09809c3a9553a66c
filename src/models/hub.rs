use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A regional staging facility. Every district is served by exactly one hub.
/// Occupancy is always derived from the live order set, never stored here,
/// so the counter cannot drift from reality.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hub {
    pub id: Uuid,
    pub name: String,
    pub district: String,
    pub max_capacity: usize,
    pub created_at: DateTime<Utc>,
}

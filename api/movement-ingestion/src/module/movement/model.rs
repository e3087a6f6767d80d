use super::schema::CreateMovementResponse;
use chrono::{DateTime, Utc};
use ledger_events::models::{AttachmentRef, GeoPoint, Movement, MovementType};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Validated request content. Its canonical hash identifies the payload for
/// idempotency, so it holds no server-assigned fields.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NormalizedMovement {
    pub producer_id: String,
    pub commodity_id: String,
    pub movement_type: MovementType,
    pub quantity: Decimal,
    pub unit: String,
    pub occurred_at: DateTime<Utc>,
    pub geo: Option<GeoPoint>,
    pub attachments: Vec<AttachmentRef>,
}

impl NormalizedMovement {
    pub fn into_movement(self, movement_id: String, recorded_at: i64) -> Movement {
        Movement {
            movement_id,
            producer_id: self.producer_id,
            commodity_id: self.commodity_id,
            movement_type: self.movement_type,
            quantity: self.quantity,
            unit: self.unit,
            occurred_at: self.occurred_at,
            geo: self.geo,
            attachments: self.attachments,
            recorded_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    pub key: String,
    pub request_hash: String,
    pub movement_id: String,
    pub response: CreateMovementResponse,
    pub created_at: i64,
}

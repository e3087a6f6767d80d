use crate::canonical::partition_for;
use crate::errors::BusError;
use crate::models::{
    AuditResult, CertificationStatus, CertificationTier, Evidence, Movement,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const MOVEMENT_RECORDED_TOPIC: &str = "movement.recorded";
pub const AUDIT_COMPLETED_TOPIC: &str = "auditoria.completed";
pub const TIER_CHANGED_TOPIC: &str = "selo.alterado";

/// Wire form of every event. `partition_key` is the producer id, which is
/// also the ordering key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventEnvelope {
    pub event_id: String,
    pub topic: String,
    pub partition_key: String,
    pub occurred_at: i64,
    pub payload: Value,
}

impl EventEnvelope {
    pub fn wrap<T: Serialize>(
        topic: &str,
        event_id: impl Into<String>,
        partition_key: impl Into<String>,
        occurred_at: i64,
        payload: &T,
    ) -> Result<Self, BusError> {
        Ok(Self {
            event_id: event_id.into(),
            topic: topic.to_string(),
            partition_key: partition_key.into(),
            occurred_at,
            payload: serde_json::to_value(payload)?,
        })
    }

    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, BusError> {
        serde_json::from_value(self.payload.clone()).map_err(|e| {
            BusError::Codec(format!(
                "event {} on {} has malformed payload: {e}",
                self.event_id, self.topic
            ))
        })
    }

    pub fn partition(&self, partitions: u32) -> u32 {
        partition_for(&self.partition_key, partitions)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MovementRecorded {
    pub movement: Movement,
}

impl MovementRecorded {
    pub fn envelope(&self) -> Result<EventEnvelope, BusError> {
        EventEnvelope::wrap(
            MOVEMENT_RECORDED_TOPIC,
            self.movement.movement_id.clone(),
            self.movement.producer_id.clone(),
            self.movement.recorded_at,
            self,
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditCompleted {
    pub audit_id: String,
    pub movement_id: String,
    pub producer_id: String,
    pub result: AuditResult,
    #[serde(default)]
    pub rule_set_version: u64,
    pub evidence: Vec<Evidence>,
    /// 0 for the engine's verdict, 1 once a reviewer has acted.
    #[serde(default)]
    pub revision: u32,
    pub processed_at: i64,
    pub reviewer_id: Option<String>,
    pub reviewed_at: Option<i64>,
}

impl AuditCompleted {
    pub fn event_id(&self) -> String {
        format!("{}:{}", self.audit_id, self.revision)
    }

    pub fn envelope(&self, occurred_at: i64) -> Result<EventEnvelope, BusError> {
        EventEnvelope::wrap(
            AUDIT_COMPLETED_TOPIC,
            self.event_id(),
            self.producer_id.clone(),
            occurred_at,
            self,
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TierChanged {
    pub change_id: String,
    pub producer_id: String,
    pub previous_tier: CertificationTier,
    pub new_tier: CertificationTier,
    pub score: u32,
    pub status: CertificationStatus,
    pub reason: String,
    pub changed_at: i64,
}

impl TierChanged {
    pub fn envelope(&self) -> Result<EventEnvelope, BusError> {
        EventEnvelope::wrap(
            TIER_CHANGED_TOPIC,
            self.change_id.clone(),
            self.producer_id.clone(),
            self.changed_at,
            self,
        )
    }
}

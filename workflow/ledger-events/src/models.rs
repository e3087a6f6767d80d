use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MovementType {
    Production,
    Processing,
    Transport,
    Storage,
    Entry,
    Exit,
}

impl MovementType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Production => "PRODUCTION",
            Self::Processing => "PROCESSING",
            Self::Transport => "TRANSPORT",
            Self::Storage => "STORAGE",
            Self::Entry => "ENTRY",
            Self::Exit => "EXIT",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "PRODUCTION" => Some(Self::Production),
            "PROCESSING" => Some(Self::Processing),
            "TRANSPORT" => Some(Self::Transport),
            "STORAGE" => Some(Self::Storage),
            "ENTRY" => Some(Self::Entry),
            "EXIT" => Some(Self::Exit),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lon.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lon)
    }
}

/// Reference to an object held by the external attachment store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AttachmentRef {
    pub kind: String,
    pub url: String,
    pub content_hash: String,
}

/// Immutable record of one unit of commodity activity reported by a producer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Movement {
    pub movement_id: String,
    pub producer_id: String,
    pub commodity_id: String,
    pub movement_type: MovementType,
    pub quantity: Decimal,
    pub unit: String,
    pub occurred_at: DateTime<Utc>,
    pub geo: Option<GeoPoint>,
    pub attachments: Vec<AttachmentRef>,
    pub recorded_at: i64,
}

impl Movement {
    pub fn has_attachment_kind(&self, kind: &str) -> bool {
        self.attachments
            .iter()
            .any(|a| a.kind.eq_ignore_ascii_case(kind))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditResult {
    Approved,
    Rejected,
    NeedsReview,
}

impl AuditResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approved => "APPROVED",
            Self::Rejected => "REJECTED",
            Self::NeedsReview => "NEEDS_REVIEW",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::NeedsReview)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Evidence {
    pub rule_id: String,
    pub detail: String,
}

#[derive(
    Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CertificationTier {
    #[default]
    None,
    Bronze,
    Silver,
    Gold,
    Diamond,
}

impl CertificationTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "NONE",
            Self::Bronze => "BRONZE",
            Self::Silver => "SILVER",
            Self::Gold => "GOLD",
            Self::Diamond => "DIAMOND",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CertificationStatus {
    Active,
    Suspended,
    Revoked,
}

impl CertificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::Suspended => "SUSPENDED",
            Self::Revoked => "REVOKED",
        }
    }
}

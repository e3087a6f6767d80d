use crate::config::environment::AppConfig;
use crate::module::movement::error::AppError;
use crate::module::movement::model::NormalizedMovement;
use crate::module::movement::schema::{AttachmentInput, CreateMovementRequest};
use chrono::{DateTime, Utc};
use ledger_events::models::{AttachmentRef, GeoPoint, MovementType};
use rust_decimal::Decimal;

pub fn validate_create_request(
    req: &CreateMovementRequest,
    config: &AppConfig,
) -> Result<NormalizedMovement, AppError> {
    let producer_id = req.producer_id.trim();
    if producer_id.is_empty() {
        return Err(AppError::bad_request(
            "INVALID_PRODUCER_ID",
            "producer_id is required",
        ));
    }
    let commodity_id = req.commodity_id.trim();
    if commodity_id.is_empty() {
        return Err(AppError::bad_request(
            "INVALID_COMMODITY_ID",
            "commodity_id is required",
        ));
    }

    let movement_type = MovementType::parse(&req.movement_type).ok_or_else(|| {
        AppError::bad_request(
            "INVALID_MOVEMENT_TYPE",
            format!("unknown movement type: {}", req.movement_type),
        )
    })?;
    if !config.movement_types.is_empty() && !config.movement_types.contains(&movement_type) {
        return Err(AppError::bad_request(
            "INVALID_MOVEMENT_TYPE",
            format!(
                "movement type {} is not accepted by this deployment",
                movement_type.as_str()
            ),
        ));
    }

    if req.quantity <= Decimal::ZERO {
        return Err(AppError::bad_request(
            "INVALID_QUANTITY",
            "quantity must be greater than zero",
        ));
    }
    let unit = req.unit.trim();
    if unit.is_empty() {
        return Err(AppError::bad_request("INVALID_UNIT", "unit is required"));
    }

    let occurred_at = DateTime::parse_from_rfc3339(req.timestamp.trim())
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| {
            AppError::bad_request("INVALID_TIMESTAMP", format!("timestamp is not RFC 3339: {e}"))
        })?;

    let geo = match &req.geo {
        Some(g) => {
            let point = GeoPoint {
                lat: g.lat,
                lon: g.lon,
            };
            if !point.is_valid() {
                return Err(AppError::bad_request(
                    "INVALID_GEOLOCATION",
                    "lat must be within [-90, 90] and lon within [-180, 180]",
                ));
            }
            Some(point)
        }
        None => None,
    };

    let inputs = req.attachments.as_deref().unwrap_or_default();
    if inputs.len() > config.attachment_max_count {
        return Err(AppError::bad_request(
            "TOO_MANY_ATTACHMENTS",
            format!(
                "{} attachments exceed the limit of {}",
                inputs.len(),
                config.attachment_max_count
            ),
        ));
    }
    let attachments = inputs
        .iter()
        .map(|a| validate_attachment(a, config))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(NormalizedMovement {
        producer_id: producer_id.to_string(),
        commodity_id: commodity_id.to_string(),
        movement_type,
        quantity: req.quantity.normalize(),
        unit: unit.to_string(),
        occurred_at,
        geo,
        attachments,
    })
}

fn validate_attachment(
    input: &AttachmentInput,
    config: &AppConfig,
) -> Result<AttachmentRef, AppError> {
    let kind = input.kind.trim();
    if kind.is_empty() {
        return Err(AppError::bad_request(
            "INVALID_ATTACHMENT_TYPE",
            "attachment type is required",
        ));
    }
    if !config.attachment_allowed_types.is_empty()
        && !config
            .attachment_allowed_types
            .iter()
            .any(|t| t.eq_ignore_ascii_case(kind))
    {
        return Err(AppError::bad_request(
            "INVALID_ATTACHMENT_TYPE",
            format!("attachment type {kind} is not allowed"),
        ));
    }

    let url = input.url.trim();
    let has_scheme = ["http://", "https://"]
        .iter()
        .any(|scheme| url.len() > scheme.len() && url.starts_with(scheme));
    if !has_scheme {
        return Err(AppError::bad_request(
            "INVALID_ATTACHMENT_URL",
            format!("attachment url must be http(s): {url}"),
        ));
    }

    let content_hash = input.content_hash.trim().to_ascii_lowercase();
    if content_hash.len() != 64 || !content_hash.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(AppError::bad_request(
            "INVALID_ATTACHMENT_HASH",
            "attachment content hash must be a hex SHA-256 digest",
        ));
    }

    Ok(AttachmentRef {
        kind: kind.to_string(),
        url: url.to_string(),
        content_hash,
    })
}

pub fn validate_idempotency_key(raw: &str) -> Result<String, AppError> {
    let key = raw.trim();
    if key.is_empty() || key.len() > 128 {
        return Err(AppError::bad_request(
            "INVALID_IDEMPOTENCY_KEY",
            "idempotency key must be 1 to 128 characters",
        ));
    }
    if !key
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == ':' || c == '.')
    {
        return Err(AppError::bad_request(
            "INVALID_IDEMPOTENCY_KEY",
            "idempotency key contains invalid characters",
        ));
    }
    Ok(key.to_string())
}

use crate::models::{DecodedEvent, GATE_ATTRIBUTE, ProductEvent, PushEnvelope};
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("push message has no data payload")]
    MissingPayload,
    #[error("payload is not valid base64")]
    Base64,
    #[error("payload is not valid JSON: {0}")]
    Json(String),
}

/// Unwrap the push envelope and parse the embedded notification.
///
/// Pure transform: semantically unexpected but well-formed payloads are the
/// validator's concern, never an error here.
pub fn decode_envelope(envelope: &PushEnvelope) -> Result<DecodedEvent, DecodeError> {
    let data = envelope
        .message
        .as_ref()
        .and_then(|message| message.data.as_deref())
        .map(str::trim)
        .filter(|data| !data.is_empty())
        .ok_or(DecodeError::MissingPayload)?;

    let bytes = BASE64.decode(data).map_err(|_| DecodeError::Base64)?;
    let text =
        String::from_utf8(bytes).map_err(|_| DecodeError::Json("payload is not utf-8".into()))?;
    serde_json::from_str::<DecodedEvent>(text.trim())
        .map_err(|err| DecodeError::Json(err.to_string()))
}

/// What the receiver should do with a decoded event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventDisposition {
    /// Not a product event; acknowledge and stop.
    Ignore,
    /// Product event with the gate attribute present but disabled;
    /// acknowledge and stop.
    Skip,
    /// Product event with a permanent payload defect; respond 400 and stop.
    Reject(&'static str),
    /// All required fields present and the gate enabled; run the pipeline.
    Proceed(ProductEvent),
}

pub fn evaluate(event: &DecodedEvent) -> EventDisposition {
    let type_id = event
        .resource
        .as_ref()
        .and_then(|resource| resource.type_id.as_deref());
    if type_id != Some("product") {
        return EventDisposition::Ignore;
    }

    let Some(projection) = event.product_projection.as_ref() else {
        return EventDisposition::Reject("missing_product_projection");
    };

    let Some(product_id) = non_empty(projection.id.as_deref()) else {
        return EventDisposition::Reject("missing_product_id");
    };

    let Some(name) = projection.name.as_ref().and_then(localized_name) else {
        return EventDisposition::Reject("missing_product_name");
    };

    let Some(product_type_id) = non_empty(
        projection
            .product_type
            .as_ref()
            .and_then(|reference| reference.id.as_deref()),
    ) else {
        return EventDisposition::Reject("missing_product_type");
    };

    let variant = projection.master_variant.clone().unwrap_or_default();

    let Some(image_url) = variant
        .images
        .first()
        .and_then(|image| non_empty(image.url.as_deref()))
    else {
        return EventDisposition::Reject("missing_image_url");
    };

    if variant.attributes.is_empty() {
        return EventDisposition::Reject("missing_attributes");
    }

    let Some(gate) = variant
        .attributes
        .iter()
        .find(|attribute| attribute.name == GATE_ATTRIBUTE)
    else {
        return EventDisposition::Reject("missing_gate_attribute");
    };

    if !gate_enabled(&gate.value) {
        return EventDisposition::Skip;
    }

    EventDisposition::Proceed(ProductEvent {
        product_id,
        product_type_id,
        image_url,
        name,
    })
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

fn localized_name(names: &BTreeMap<String, String>) -> Option<String> {
    names
        .get("en")
        .or_else(|| names.values().next())
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
}

fn gate_enabled(value: &Value) -> bool {
    match value {
        Value::Bool(flag) => *flag,
        Value::String(text) => text.trim().eq_ignore_ascii_case("true"),
        _ => false,
    }
}

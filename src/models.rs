use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Attribute that opts a product into automatic description generation.
pub const GATE_ATTRIBUTE: &str = "generateDescription";

/// Locales every persisted description must be translated into, in order.
pub const LOCALES: [&str; 3] = ["en-GB", "en-US", "de-DE"];

/// Outer push-delivery wrapper as sent by the message bus.
#[derive(Debug, Clone, Deserialize)]
pub struct PushEnvelope {
    #[serde(default)]
    pub message: Option<PushMessage>,
    #[serde(default)]
    #[allow(dead_code)]
    pub subscription: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushMessage {
    /// Base64-encoded notification payload.
    #[serde(default)]
    pub data: Option<String>,
    #[serde(default)]
    pub message_id: Option<String>,
    #[serde(default)]
    #[allow(dead_code)]
    pub publish_time: Option<String>,
}

/// Parsed notification payload. Every field is optional on purpose:
/// the validator treats absence as data, not as a parse failure.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecodedEvent {
    #[serde(rename = "type", default)]
    pub notification_type: Option<String>,
    #[serde(default)]
    pub resource: Option<ResourceReference>,
    #[serde(default)]
    pub product_projection: Option<ProductProjection>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceReference {
    #[serde(default)]
    pub type_id: Option<String>,
    #[serde(default)]
    pub id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductProjection {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub product_type: Option<ResourceReference>,
    #[serde(default)]
    pub master_variant: Option<ProductVariant>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductVariant {
    #[serde(default)]
    pub images: Vec<ProductImage>,
    #[serde(default)]
    pub attributes: Vec<ProductAttribute>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProductImage {
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProductAttribute {
    pub name: String,
    #[serde(default)]
    pub value: Value,
}

/// Everything the pipeline needs from a validated product-created event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductEvent {
    pub product_id: String,
    pub product_type_id: String,
    pub image_url: String,
    pub name: String,
}

/// Output of the image-analysis collaborator. Immutable once returned.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ImageData {
    pub labels: Vec<String>,
    pub objects: Vec<String>,
    pub colors: Vec<String>,
    pub detected_text: String,
    pub web_entities: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PipelineReport {
    pub product_id: String,
    pub category: String,
    pub stages: Vec<StageReport>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StageReport {
    pub name: String,
    pub elapsed_ms: u128,
    pub timestamp: DateTime<Utc>,
    pub output: Value,
}

impl StageReport {
    pub fn new(name: &str, elapsed_ms: u128, output: Value) -> Self {
        Self {
            name: name.to_string(),
            elapsed_ms,
            timestamp: Utc::now(),
            output,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

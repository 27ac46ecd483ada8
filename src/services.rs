//! Collaborator seams for the pipeline.
//!
//! The long-lived external clients are injected behind these traits so the
//! pipeline never touches an ambient singleton and tests can substitute
//! in-memory fakes per call.

use crate::models::ImageData;
use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("{0}")]
    Failed(String),
}

/// Maps an opaque product-type id to its semantic category key.
#[async_trait]
pub trait CategorySource: Send + Sync {
    async fn category_key(&self, product_type_id: &str) -> Result<String, ServiceError>;
}

/// Analyzes a product image and returns the extracted signals.
#[async_trait]
pub trait ImageAnalyzer: Send + Sync {
    async fn analyze(&self, image_url: &str) -> Result<ImageData, ServiceError>;
}

/// Produces text for a prompt. Used for both description generation and
/// per-locale translation; a null or empty completion is an error, never an
/// empty success.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, ServiceError>;
}

/// Key-value store for versioned description records, upsert-by-key.
#[async_trait]
pub trait DescriptionStore: Send + Sync {
    async fn upsert(&self, key: &str, value: &Value) -> Result<(), ServiceError>;

    #[allow(dead_code)]
    async fn fetch(&self, key: &str) -> Result<Option<Value>, ServiceError>;
}

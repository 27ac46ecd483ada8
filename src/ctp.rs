//! Commerce-platform client: OAuth token, product-type lookup, and the
//! custom-object store the pipeline persists into.

use crate::http::build_client;
use crate::services::{CategorySource, DescriptionStore, ServiceError};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{Value, json};
use std::env;
use thiserror::Error;
use urlencoding::encode;

pub static CTP_API_URL: Lazy<String> = Lazy::new(|| {
    env::var("CTP_API_URL")
        .unwrap_or_else(|_| "https://api.europe-west1.gcp.commercetools.com".to_string())
});

pub static CTP_AUTH_URL: Lazy<String> = Lazy::new(|| {
    env::var("CTP_AUTH_URL")
        .unwrap_or_else(|_| "https://auth.europe-west1.gcp.commercetools.com".to_string())
});

pub static CTP_PROJECT_KEY: Lazy<String> =
    Lazy::new(|| env::var("CTP_PROJECT_KEY").unwrap_or_default());

pub static CTP_CLIENT_ID: Lazy<String> =
    Lazy::new(|| env::var("CTP_CLIENT_ID").unwrap_or_default());

pub static CTP_CLIENT_SECRET: Lazy<String> =
    Lazy::new(|| env::var("CTP_CLIENT_SECRET").unwrap_or_default());

/// Container holding one description record per product id.
pub static CUSTOM_OBJECT_CONTAINER: Lazy<String> = Lazy::new(|| {
    env::var("CTP_CUSTOM_OBJECT_CONTAINER").unwrap_or_else(|_| "productDescriptions".to_string())
});

#[derive(Debug, Error)]
pub enum CtpError {
    #[error("missing commerce platform credentials in env")]
    MissingCredentials,
    #[error("request failed: {0}")]
    Request(String),
    #[error("invalid response: {0}")]
    Deserialize(String),
    #[error("product type `{0}` has no key")]
    ProductTypeNotFound(String),
}

#[derive(Clone)]
pub struct CtpClient {
    http: Client,
}

impl CtpClient {
    pub fn new() -> Self {
        Self {
            http: build_client(),
        }
    }

    async fn access_token(&self) -> Result<String, CtpError> {
        if CTP_CLIENT_ID.is_empty() || CTP_CLIENT_SECRET.is_empty() {
            return Err(CtpError::MissingCredentials);
        }
        let url = format!("{}/oauth/token", CTP_AUTH_URL.trim_end_matches('/'));
        let params = [("grant_type", "client_credentials")];
        let response = self
            .http
            .post(url)
            .basic_auth(CTP_CLIENT_ID.as_str(), Some(CTP_CLIENT_SECRET.as_str()))
            .form(&params)
            .send()
            .await
            .map_err(|err| CtpError::Request(err.to_string()))?;

        if !response.status().is_success() {
            return Err(CtpError::Request(format!("HTTP {}", response.status())));
        }

        let payload: TokenResponse = response
            .json()
            .await
            .map_err(|err| CtpError::Deserialize(err.to_string()))?;
        Ok(payload.access_token)
    }

    /// Looks up the semantic key of a product type.
    pub async fn product_type_key(&self, product_type_id: &str) -> Result<String, CtpError> {
        let token = self.access_token().await?;
        let url = format!(
            "{}/{}/product-types/{}",
            CTP_API_URL.trim_end_matches('/'),
            *CTP_PROJECT_KEY,
            encode(product_type_id),
        );
        let response = self
            .http
            .get(url)
            .bearer_auth(&token)
            .send()
            .await
            .map_err(|err| CtpError::Request(err.to_string()))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(CtpError::ProductTypeNotFound(product_type_id.to_string()));
        }
        if !response.status().is_success() {
            return Err(CtpError::Request(format!("HTTP {}", response.status())));
        }

        let payload: ProductTypeResponse = response
            .json()
            .await
            .map_err(|err| CtpError::Deserialize(err.to_string()))?;

        payload
            .key
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| CtpError::ProductTypeNotFound(product_type_id.to_string()))
    }

    /// Creates or overwrites a custom object; the platform treats a POST to
    /// an existing container/key pair as an in-place overwrite.
    pub async fn upsert_custom_object(
        &self,
        container: &str,
        key: &str,
        value: &Value,
    ) -> Result<u64, CtpError> {
        let token = self.access_token().await?;
        let url = format!(
            "{}/{}/custom-objects",
            CTP_API_URL.trim_end_matches('/'),
            *CTP_PROJECT_KEY,
        );
        let body = json!({
            "container": container,
            "key": key,
            "value": value,
        });
        let response = self
            .http
            .post(url)
            .bearer_auth(&token)
            .json(&body)
            .send()
            .await
            .map_err(|err| CtpError::Request(err.to_string()))?;

        if !response.status().is_success() {
            return Err(CtpError::Request(format!("HTTP {}", response.status())));
        }

        let payload: CustomObjectResponse = response
            .json()
            .await
            .map_err(|err| CtpError::Deserialize(err.to_string()))?;
        Ok(payload.version)
    }

    pub async fn get_custom_object(
        &self,
        container: &str,
        key: &str,
    ) -> Result<Option<Value>, CtpError> {
        let token = self.access_token().await?;
        let url = format!(
            "{}/{}/custom-objects/{}/{}",
            CTP_API_URL.trim_end_matches('/'),
            *CTP_PROJECT_KEY,
            encode(container),
            encode(key),
        );
        let response = self
            .http
            .get(url)
            .bearer_auth(&token)
            .send()
            .await
            .map_err(|err| CtpError::Request(err.to_string()))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(CtpError::Request(format!("HTTP {}", response.status())));
        }

        let payload: CustomObjectResponse = response
            .json()
            .await
            .map_err(|err| CtpError::Deserialize(err.to_string()))?;
        Ok(Some(payload.value))
    }
}

#[async_trait]
impl CategorySource for CtpClient {
    async fn category_key(&self, product_type_id: &str) -> Result<String, ServiceError> {
        self.product_type_key(product_type_id)
            .await
            .map_err(|err| match err {
                CtpError::ProductTypeNotFound(_) => ServiceError::NotFound(err.to_string()),
                other => ServiceError::Failed(other.to_string()),
            })
    }
}

#[async_trait]
impl DescriptionStore for CtpClient {
    async fn upsert(&self, key: &str, value: &Value) -> Result<(), ServiceError> {
        self.upsert_custom_object(&CUSTOM_OBJECT_CONTAINER, key, value)
            .await
            .map(|_| ())
            .map_err(|err| ServiceError::Failed(err.to_string()))
    }

    async fn fetch(&self, key: &str) -> Result<Option<Value>, ServiceError> {
        self.get_custom_object(&CUSTOM_OBJECT_CONTAINER, key)
            .await
            .map_err(|err| ServiceError::Failed(err.to_string()))
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Deserialize)]
struct ProductTypeResponse {
    #[serde(default)]
    key: Option<String>,
}

#[derive(Deserialize)]
struct CustomObjectResponse {
    version: u64,
    #[serde(default)]
    value: Value,
}

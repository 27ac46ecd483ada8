use crate::http::build_client;
use crate::models::ImageData;
use crate::services::{ImageAnalyzer, ServiceError};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Clone)]
pub struct VisionConfig {
    pub endpoint: String,
    pub api_key: Option<String>,
    pub max_results: u32,
}

impl VisionConfig {
    pub fn from_env() -> Self {
        Self {
            endpoint: std::env::var("VISION_API_URL")
                .unwrap_or_else(|_| "https://vision.googleapis.com".into()),
            api_key: std::env::var("VISION_API_KEY").ok(),
            max_results: std::env::var("VISION_MAX_RESULTS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(10),
        }
    }
}

#[derive(Debug, Error)]
pub enum VisionError {
    #[error("missing vision api key")]
    MissingApiKey,
    #[error("http error: {0}")]
    Http(String),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("annotation failed: {0}")]
    Annotation(String),
}

pub struct VisionClient {
    http: Client,
    config: VisionConfig,
}

impl VisionClient {
    pub fn new(config: VisionConfig) -> Self {
        Self {
            http: build_client(),
            config,
        }
    }

    pub async fn analyze_image(&self, image_url: &str) -> Result<ImageData, VisionError> {
        let key = self
            .config
            .api_key
            .as_deref()
            .ok_or(VisionError::MissingApiKey)?;

        let max_results = self.config.max_results;
        let body = json!({
            "requests": [{
                "image": { "source": { "imageUri": image_url } },
                "features": [
                    { "type": "LABEL_DETECTION", "maxResults": max_results },
                    { "type": "OBJECT_LOCALIZATION", "maxResults": max_results },
                    { "type": "IMAGE_PROPERTIES", "maxResults": max_results },
                    { "type": "TEXT_DETECTION", "maxResults": 1 },
                    { "type": "WEB_DETECTION", "maxResults": max_results },
                ],
            }],
        });

        let url = format!(
            "{}/v1/images:annotate?key={key}",
            self.config.endpoint.trim_end_matches('/')
        );
        let response = self
            .http
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(|err| VisionError::Http(err.to_string()))?;

        if !response.status().is_success() {
            return Err(VisionError::Http(format!("HTTP {}", response.status())));
        }

        let payload: AnnotateResponse = response
            .json()
            .await
            .map_err(|err| VisionError::InvalidResponse(err.to_string()))?;

        let result = payload
            .responses
            .into_iter()
            .next()
            .ok_or_else(|| VisionError::InvalidResponse("empty annotate response".into()))?;

        if let Some(status) = result.error {
            return Err(VisionError::Annotation(status.message));
        }

        Ok(image_data_from(result))
    }
}

#[async_trait]
impl ImageAnalyzer for VisionClient {
    async fn analyze(&self, image_url: &str) -> Result<ImageData, ServiceError> {
        self.analyze_image(image_url)
            .await
            .map_err(|err| ServiceError::Failed(err.to_string()))
    }
}

fn image_data_from(result: AnnotateResult) -> ImageData {
    let labels = result
        .label_annotations
        .into_iter()
        .map(|entity| entity.description)
        .filter(|value| !value.is_empty())
        .collect();

    let objects = result
        .localized_object_annotations
        .into_iter()
        .map(|object| object.name)
        .filter(|value| !value.is_empty())
        .collect();

    let colors = result
        .image_properties_annotation
        .and_then(|props| props.dominant_colors)
        .map(|dominant| {
            dominant
                .colors
                .into_iter()
                .filter_map(|info| info.color)
                .map(|rgb| {
                    format!(
                        "rgb({}, {}, {})",
                        rgb.red.unwrap_or(0.0).round() as u32,
                        rgb.green.unwrap_or(0.0).round() as u32,
                        rgb.blue.unwrap_or(0.0).round() as u32,
                    )
                })
                .collect()
        })
        .unwrap_or_default();

    // The first text annotation carries the full detected block; the rest
    // repeat it word by word.
    let detected_text = result
        .text_annotations
        .into_iter()
        .next()
        .map(|entity| entity.description)
        .unwrap_or_default();

    let web_entities = result
        .web_detection
        .map(|web| {
            web.web_entities
                .into_iter()
                .filter_map(|entity| entity.description)
                .filter(|value| !value.is_empty())
                .collect()
        })
        .unwrap_or_default();

    ImageData {
        labels,
        objects,
        colors,
        detected_text,
        web_entities,
    }
}

#[derive(Debug, Deserialize)]
struct AnnotateResponse {
    #[serde(default)]
    responses: Vec<AnnotateResult>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnnotateResult {
    #[serde(default)]
    label_annotations: Vec<EntityAnnotation>,
    #[serde(default)]
    localized_object_annotations: Vec<LocalizedObject>,
    #[serde(default)]
    image_properties_annotation: Option<ImageProperties>,
    #[serde(default)]
    text_annotations: Vec<EntityAnnotation>,
    #[serde(default)]
    web_detection: Option<WebDetection>,
    #[serde(default)]
    error: Option<RpcStatus>,
}

#[derive(Debug, Default, Deserialize)]
struct EntityAnnotation {
    #[serde(default)]
    description: String,
}

#[derive(Debug, Default, Deserialize)]
struct LocalizedObject {
    #[serde(default)]
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ImageProperties {
    #[serde(default)]
    dominant_colors: Option<DominantColors>,
}

#[derive(Debug, Deserialize)]
struct DominantColors {
    #[serde(default)]
    colors: Vec<ColorInfo>,
}

#[derive(Debug, Deserialize)]
struct ColorInfo {
    #[serde(default)]
    color: Option<RgbColor>,
}

#[derive(Debug, Deserialize)]
struct RgbColor {
    #[serde(default)]
    red: Option<f32>,
    #[serde(default)]
    green: Option<f32>,
    #[serde(default)]
    blue: Option<f32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WebDetection {
    #[serde(default)]
    web_entities: Vec<WebEntity>,
}

#[derive(Debug, Deserialize)]
struct WebEntity {
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RpcStatus {
    #[serde(default)]
    message: String,
}

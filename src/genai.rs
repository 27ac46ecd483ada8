use crate::http::build_client;
use crate::services::{ServiceError, TextGenerator};
use async_trait::async_trait;
use eyre::Result;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone)]
pub struct GenAiConfig {
    pub endpoint: String,
    pub api_key: Option<String>,
    pub model: String,
}

impl GenAiConfig {
    pub fn from_env() -> Self {
        Self {
            endpoint: std::env::var("GENAI_API_URL")
                .unwrap_or_else(|_| "https://generativelanguage.googleapis.com".into()),
            api_key: std::env::var("GENAI_API_KEY").ok(),
            model: std::env::var("GENAI_MODEL").unwrap_or_else(|_| "gemini-1.5-flash".into()),
        }
    }
}

#[derive(Debug, Error)]
pub enum GenAiError {
    #[error("missing genai api key")]
    MissingApiKey,
    #[error("http error: {0}")]
    Http(String),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

pub struct GenAiClient {
    http: Client,
    config: GenAiConfig,
}

impl GenAiClient {
    pub fn new(config: GenAiConfig) -> Self {
        Self {
            http: build_client(),
            config,
        }
    }

    pub async fn generate_content(&self, prompt: &str) -> Result<String, GenAiError> {
        let key = self
            .config
            .api_key
            .as_deref()
            .ok_or(GenAiError::MissingApiKey)?;

        let body = GenerateRequest {
            contents: vec![Content {
                parts: vec![Part {
                    text: prompt.to_string(),
                }],
            }],
        };

        let url = format!(
            "{}/v1beta/models/{}:generateContent?key={key}",
            self.config.endpoint.trim_end_matches('/'),
            self.config.model,
        );

        let response = self
            .http
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(|err| GenAiError::Http(err.to_string()))?;

        if !response.status().is_success() {
            return Err(GenAiError::Http(format!("HTTP {}", response.status())));
        }

        let payload: GenerateResponse = response
            .json()
            .await
            .map_err(|err| GenAiError::InvalidResponse(err.to_string()))?;

        // A null or empty candidate is a failure, never an empty success.
        let text = payload
            .candidates
            .into_iter()
            .flat_map(|candidate| candidate.content.parts)
            .map(|part| part.text)
            .collect::<Vec<_>>()
            .join("");

        if text.trim().is_empty() {
            return Err(GenAiError::InvalidResponse("empty completion".into()));
        }

        Ok(text.trim().to_string())
    }
}

#[async_trait]
impl TextGenerator for GenAiClient {
    async fn generate(&self, prompt: &str) -> Result<String, ServiceError> {
        self.generate_content(prompt)
            .await
            .map_err(|err| ServiceError::Failed(err.to_string()))
    }
}

#[derive(Debug, Serialize)]
struct GenerateRequest {
    contents: Vec<Content>,
}

#[derive(Debug, Serialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
struct Part {
    text: String,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: CandidateContent,
}

#[derive(Debug, Default, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: String,
}

use crate::ctp::CtpClient;
use crate::genai::{GenAiClient, GenAiConfig};
use crate::models::{LOCALES, PipelineReport, ProductEvent, StageReport};
use crate::prompts::{self, ProductCategory};
use crate::services::{CategorySource, DescriptionStore, ImageAnalyzer, TextGenerator};
use crate::vision::{VisionClient, VisionConfig};
use chrono::Utc;
use serde_json::{Value, json};
use std::{collections::BTreeMap, future::Future, sync::Arc, time::Instant};
use thiserror::Error;

/// Ordered external-service orchestration for one accepted product event.
///
/// Every stage blocks on its predecessor; a failure at any stage aborts the
/// rest and surfaces as a single typed error carrying the stage name and
/// product id. Nothing here retries.
#[derive(Clone)]
pub struct Pipeline {
    categories: Arc<dyn CategorySource>,
    analyzer: Arc<dyn ImageAnalyzer>,
    generator: Arc<dyn TextGenerator>,
    store: Arc<dyn DescriptionStore>,
}

impl Pipeline {
    pub fn new(
        categories: Arc<dyn CategorySource>,
        analyzer: Arc<dyn ImageAnalyzer>,
        generator: Arc<dyn TextGenerator>,
        store: Arc<dyn DescriptionStore>,
    ) -> Self {
        Self {
            categories,
            analyzer,
            generator,
            store,
        }
    }

    /// Long-lived clients built from the environment, shared across events.
    pub fn from_env() -> Self {
        let ctp = Arc::new(CtpClient::new());
        Self::new(
            ctp.clone(),
            Arc::new(VisionClient::new(VisionConfig::from_env())),
            Arc::new(GenAiClient::new(GenAiConfig::from_env())),
            ctp,
        )
    }

    pub async fn run(&self, event: ProductEvent) -> Result<PipelineReport, PipelineError> {
        let product_id = event.product_id.clone();
        let mut stages = Vec::new();

        let category_key = self
            .capture_stage("resolve_category", &mut stages, async {
                let key = self
                    .categories
                    .category_key(&event.product_type_id)
                    .await
                    .map_err(|err| {
                        PipelineError::new(
                            "resolve_category",
                            &product_id,
                            PipelineErrorKind::CategoryLookup,
                            err.to_string(),
                        )
                    })?;
                Ok(StageOutcome::new(
                    key.clone(),
                    json!({
                        "product_type_id": event.product_type_id,
                        "category": key,
                    }),
                ))
            })
            .await?;

        let image = self
            .capture_stage("analyze_image", &mut stages, async {
                let image = self
                    .analyzer
                    .analyze(&event.image_url)
                    .await
                    .map_err(|err| {
                        PipelineError::new(
                            "analyze_image",
                            &product_id,
                            PipelineErrorKind::Service,
                            err.to_string(),
                        )
                    })?;
                let output = json!({
                    "labels": image.labels.len(),
                    "objects": image.objects.len(),
                    "colors": image.colors.len(),
                    "has_text": !image.detected_text.is_empty(),
                    "web_entities": image.web_entities.len(),
                });
                Ok(StageOutcome::new(image, output))
            })
            .await?;

        let description = self
            .capture_stage("generate_description", &mut stages, async {
                // The closed template set is the coverage contract; an
                // unknown key fails before the generator is ever called.
                let category = ProductCategory::from_key(&category_key).ok_or_else(|| {
                    PipelineError::new(
                        "generate_description",
                        &product_id,
                        PipelineErrorKind::UnsupportedCategory,
                        format!("no description template for category `{category_key}`"),
                    )
                })?;
                let prompt = prompts::description_prompt(category, &event.name, &image);
                let text = self.generator.generate(&prompt).await.map_err(|err| {
                    PipelineError::new(
                        "generate_description",
                        &product_id,
                        PipelineErrorKind::Service,
                        err.to_string(),
                    )
                })?;
                if text.trim().is_empty() {
                    return Err(PipelineError::new(
                        "generate_description",
                        &product_id,
                        PipelineErrorKind::Service,
                        "generator returned empty text".into(),
                    ));
                }
                let output = json!({
                    "category": category.key(),
                    "chars": text.len(),
                });
                Ok(StageOutcome::new(text, output))
            })
            .await?;

        // Phase 1: record the accepted event before translation so a crash
        // mid-pipeline leaves an inspectable draft. Redelivery overwrites it.
        self.capture_stage("persist_draft", &mut stages, async {
            let value = record_value(&event, &category_key, &description, None);
            self.store
                .upsert(&product_id, &value)
                .await
                .map_err(|err| {
                    PipelineError::new(
                        "persist_draft",
                        &product_id,
                        PipelineErrorKind::Persistence,
                        err.to_string(),
                    )
                })?;
            Ok(StageOutcome::new((), json!({ "phase": "draft" })))
        })
        .await?;

        let translations = self
            .capture_stage("translate", &mut stages, async {
                let mut translations = BTreeMap::new();
                for locale in LOCALES {
                    let prompt = prompts::translation_prompt(locale, &description);
                    let text = self.generator.generate(&prompt).await.map_err(|err| {
                        PipelineError::new(
                            "translate",
                            &product_id,
                            PipelineErrorKind::Service,
                            format!("{locale}: {err}"),
                        )
                    })?;
                    if text.trim().is_empty() {
                        return Err(PipelineError::new(
                            "translate",
                            &product_id,
                            PipelineErrorKind::Service,
                            format!("{locale}: empty translation"),
                        ));
                    }
                    translations.insert(locale.to_string(), text);
                }
                Ok(StageOutcome::new(
                    translations,
                    json!({ "locales": LOCALES }),
                ))
            })
            .await?;

        // Phase 2: same key, translation set merged in.
        self.capture_stage("persist_translations", &mut stages, async {
            let value = record_value(&event, &category_key, &description, Some(&translations));
            self.store
                .upsert(&product_id, &value)
                .await
                .map_err(|err| {
                    PipelineError::new(
                        "persist_translations",
                        &product_id,
                        PipelineErrorKind::Persistence,
                        err.to_string(),
                    )
                })?;
            Ok(StageOutcome::new(
                (),
                json!({ "phase": "translations", "locales": LOCALES }),
            ))
        })
        .await?;

        Ok(PipelineReport {
            product_id,
            category: category_key,
            stages,
        })
    }

    async fn capture_stage<T, Fut>(
        &self,
        name: &'static str,
        stages: &mut Vec<StageReport>,
        fut: Fut,
    ) -> Result<T, PipelineError>
    where
        Fut: Future<Output = Result<StageOutcome<T>, PipelineError>>,
    {
        let started = Instant::now();
        let outcome = fut.await?;
        let elapsed_ms = started.elapsed().as_millis();
        crate::metrics::stage_elapsed(name, elapsed_ms);
        stages.push(StageReport::new(name, elapsed_ms, outcome.output));
        Ok(outcome.value)
    }
}

fn record_value(
    event: &ProductEvent,
    category: &str,
    description: &str,
    translations: Option<&BTreeMap<String, String>>,
) -> Value {
    let mut value = json!({
        "productName": event.name,
        "imageUrl": event.image_url,
        "productType": category,
        "description": description,
        "generatedAt": Utc::now(),
    });
    if let Some(translations) = translations {
        value["translations"] = json!(translations);
    }
    value
}

#[derive(Debug, Error)]
#[error("stage `{stage}` failed for product {product_id}: {message}")]
pub struct PipelineError {
    stage: &'static str,
    product_id: String,
    message: String,
    kind: PipelineErrorKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineErrorKind {
    /// Category resolution failed; no description strategy can be selected.
    CategoryLookup,
    /// Category key outside the closed template set; a coverage gap, not a
    /// runtime fault.
    UnsupportedCategory,
    /// External-service failure (analysis, generation, translation).
    Service,
    /// Write failure at either persistence phase.
    Persistence,
}

impl PipelineError {
    fn new(
        stage: &'static str,
        product_id: &str,
        kind: PipelineErrorKind,
        message: String,
    ) -> Self {
        Self {
            stage,
            product_id: product_id.to_string(),
            message,
            kind,
        }
    }

    pub fn stage(&self) -> &'static str {
        self.stage
    }

    pub fn kind(&self) -> PipelineErrorKind {
        self.kind
    }

    pub fn detail(&self) -> &str {
        &self.message
    }

    pub fn product_id(&self) -> &str {
        &self.product_id
    }
}

#[derive(Debug)]
pub struct StageOutcome<T> {
    pub value: T,
    pub output: Value,
}

impl<T> StageOutcome<T> {
    fn new(value: T, output: Value) -> Self {
        Self { value, output }
    }
}

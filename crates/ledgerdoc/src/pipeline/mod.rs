//! Pipeline orchestration.
//!
//! Drives one document through extraction, analysis, semantic validation,
//! route classification, and payload building, accumulating non-fatal errors
//! along the way, then gates the assembled artifact through the schema
//! validator. Stages degrade individually; only the final contract check can
//! fail a run.

pub mod error;
pub mod output;

use std::sync::Arc;

use serde_json::json;
use tracing::{info_span, Instrument};

use crate::ai::{CompletionBackend, HttpCompletionClient};
use crate::analyzer::route::RouteClassifier;
use crate::analyzer::semantic::SemanticValidator;
use crate::analyzer::structured::PayloadBuilder;
use crate::analyzer::{AnalysisResult, Analyzer};
use crate::config::{Config, TenantContext};
use crate::extractor::{ExtractionResult, Extractor, HttpTextRecognizer, TextRecognizer};
use crate::schema::OutputValidator;

pub use error::SchemaViolation;
pub use output::{Extraction, PipelineOutput, SourceDescriptor};

pub struct Pipeline {
    extractor: Extractor,
    analyzer: Analyzer,
    semantic: SemanticValidator,
    router: RouteClassifier,
    builder: PayloadBuilder,
    tenant: TenantContext,
    validator: OutputValidator,
}

impl Pipeline {
    /// Production constructor — wires the network-backed capabilities the
    /// configuration provides, leaving absent ones in degraded mode.
    pub fn from_config(config: &Config) -> Result<Self, SchemaViolation> {
        let recognizer = config
            .recognizer
            .clone()
            .map(|c| Arc::new(HttpTextRecognizer::new(c)) as Arc<dyn TextRecognizer>);
        let completion = config
            .completion
            .clone()
            .map(|c| Arc::new(HttpCompletionClient::new(c)) as Arc<dyn CompletionBackend>);

        Self::new(recognizer, completion, config.tenant.clone())
    }

    /// Constructor with explicit capability backends.
    pub fn new(
        recognizer: Option<Arc<dyn TextRecognizer>>,
        completion: Option<Arc<dyn CompletionBackend>>,
        tenant: TenantContext,
    ) -> Result<Self, SchemaViolation> {
        Ok(Self {
            extractor: Extractor::new(recognizer),
            analyzer: Analyzer::new(completion.clone()),
            semantic: SemanticValidator::new(completion.clone()),
            router: RouteClassifier::new(completion.clone()),
            builder: PayloadBuilder::new(completion),
            tenant,
            validator: OutputValidator::new()?,
        })
    }

    pub fn tenant(&self) -> &TenantContext {
        &self.tenant
    }

    /// Stage 1: text extraction. Never fails.
    pub async fn extract(&self, bytes: &[u8], source: &SourceDescriptor) -> ExtractionResult {
        self.extractor
            .extract(bytes, &source.filename, &source.mime_type)
            .instrument(info_span!("extract", sha256 = %source.sha256))
            .await
    }

    /// Stage 2: classification + field extraction. Never fails.
    pub async fn analyze(&self, text: &str) -> AnalysisResult {
        self.analyzer
            .analyze(text)
            .instrument(info_span!("analyze"))
            .await
    }

    /// Stage 3: semantic validation, route classification, payload building,
    /// and the final schema gate. The only fallible stage.
    pub async fn validate_and_assemble(
        &self,
        source: SourceDescriptor,
        extraction: ExtractionResult,
        analysis: AnalysisResult,
    ) -> Result<PipelineOutput, SchemaViolation> {
        let span = info_span!("validate_and_assemble", sha256 = %source.sha256);
        async {
            let mut out = PipelineOutput::base(source.clone(), &self.tenant.company_id);

            out.extraction = Extraction {
                method: extraction.method.as_str().to_string(),
                text: extraction.text.clone(),
                pages: extraction.pages.clone(),
            };
            out.errors.extend(extraction.errors.iter().cloned());

            out.classification = analysis.classification;
            out.fields = analysis.fields;
            out.errors.extend(analysis.errors);

            let ocr_json = json!({
                "method": extraction.method.as_str(),
                "text": &extraction.text,
                "pages": &extraction.pages,
            });
            let document_meta = json!({
                "fileName": &source.filename,
                "mimeType": &source.mime_type,
                "sha256": &source.sha256,
            });

            let semantic = self
                .semantic
                .validate(&ocr_json, &document_meta, &extraction.text)
                .await;
            out.semantic_validation = semantic.validation;
            out.errors.extend(semantic.errors);

            let route = self
                .router
                .classify(&ocr_json, &source, &extraction.text)
                .await;
            out.route_classification = route.classification;
            out.errors.extend(route.errors);

            // Advisory: a skip-routed document still completes the run so the
            // final artifact is auditable, but consumers must not act on it.
            if out.route_classification.is_skip() {
                out.errors.push("route_skip_requested".to_string());
            }

            let structured = self
                .builder
                .build(
                    &out.semantic_validation,
                    &self.tenant,
                    &source.filename,
                    out.artifacts.original_url.as_deref(),
                    &source.sha256,
                )
                .await;
            out.persistence_payload = structured.payload;
            out.errors.extend(structured.errors);

            out.timestamps.processed_at = output::now_iso();

            self.validator.validate(&out)?;
            Ok(out)
        }
        .instrument(span)
        .await
    }

    /// Runs the full pipeline for a single document.
    pub async fn run(
        &self,
        source: SourceDescriptor,
        bytes: &[u8],
    ) -> Result<PipelineOutput, SchemaViolation> {
        let span = info_span!("pipeline", sha256 = %source.sha256, filename = %source.filename);
        async {
            let extraction = self.extract(bytes, &source).await;
            let analysis = self.analyze(&extraction.text).await;
            self.validate_and_assemble(source, extraction, analysis).await
        }
        .instrument(span)
        .await
    }
}

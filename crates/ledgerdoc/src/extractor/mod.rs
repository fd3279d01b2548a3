//! Document text extraction.
//!
//! Converts raw file bytes into plain text (plus optional page structure)
//! using the configured text-recognition capability, with a deterministic
//! fallback when none is configured. Extraction never fails the pipeline:
//! unsupported or unreadable input yields empty text with a tagged error so
//! downstream stages can continue in degraded mode.

pub mod recognizer;

use std::path::Path;
use std::sync::Arc;

use log::warn;
use serde_json::Value;

pub use recognizer::{
    HttpTextRecognizer, Recognition, RecognizerError, StaticTextRecognizer, TextRecognizer,
};

/// How the text was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionMethod {
    DocumentIntelligence,
    Fallback,
}

impl ExtractionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExtractionMethod::DocumentIntelligence => "document_intelligence",
            ExtractionMethod::Fallback => "fallback",
        }
    }
}

/// Structured extraction result. `errors` carries non-fatal diagnostics.
#[derive(Debug, Clone)]
pub struct ExtractionResult {
    pub method: ExtractionMethod,
    pub text: String,
    pub pages: Option<Value>,
    pub errors: Vec<String>,
}

impl ExtractionResult {
    fn fallback(text: String, errors: Vec<String>) -> Self {
        Self {
            method: ExtractionMethod::Fallback,
            text,
            pages: None,
            errors,
        }
    }
}

/// Detects the MIME type from a file path, defaulting to octet-stream.
pub fn detect_mime_type(path: &Path) -> String {
    mime_guess::from_path(path)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}

fn is_text_like_mime(mime_type: &str) -> bool {
    mime_type.starts_with("text/") || mime_type == "application/json"
}

fn extension_of(filename: &str) -> String {
    Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase)
        .unwrap_or_default()
}

pub struct Extractor {
    recognizer: Option<Arc<dyn TextRecognizer>>,
}

impl Extractor {
    pub fn new(recognizer: Option<Arc<dyn TextRecognizer>>) -> Self {
        Self { recognizer }
    }

    /// Extracts text from `bytes`. Always returns a structured result.
    pub async fn extract(&self, bytes: &[u8], filename: &str, mime_type: &str) -> ExtractionResult {
        if let Some(recognizer) = &self.recognizer {
            return match recognizer.recognize(bytes, mime_type).await {
                Ok(recognition) => ExtractionResult {
                    method: ExtractionMethod::DocumentIntelligence,
                    text: recognition.text,
                    pages: recognition.pages,
                    errors: Vec::new(),
                },
                Err(e) => {
                    warn!("text recognition failed for '{}': {}", filename, e);
                    ExtractionResult::fallback(
                        String::new(),
                        vec![format!("document_intelligence_error: {}", e)],
                    )
                }
            };
        }

        if is_text_like_mime(mime_type) {
            return ExtractionResult::fallback(
                String::from_utf8_lossy(bytes).into_owned(),
                vec!["document_intelligence_not_configured".to_string()],
            );
        }

        match extension_of(filename).as_str() {
            "pdf" => ExtractionResult::fallback(
                String::new(),
                vec![
                    "needs_document_intelligence_configured: local_pdf_extraction_not_available"
                        .to_string(),
                ],
            ),
            "png" | "jpg" | "jpeg" | "webp" => ExtractionResult::fallback(
                String::new(),
                vec!["needs_document_intelligence_configured: image_ocr_unavailable".to_string()],
            ),
            "docx" | "xlsx" => ExtractionResult::fallback(
                String::new(),
                vec!["unsupported_fallback_format".to_string()],
            ),
            _ => ExtractionResult::fallback(
                String::new(),
                vec!["unsupported_file_type".to_string()],
            ),
        }
    }
}

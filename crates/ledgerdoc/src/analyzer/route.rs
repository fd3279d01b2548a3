//! Route classification.
//!
//! Decides the downstream processing route for a document and raises security
//! flags before any persistence is attempted. Security-flag detection always
//! runs over the combined filename + text signal, independent of AI
//! availability.

use std::sync::Arc;
use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

use crate::ai::coerce;
use crate::ai::CompletionBackend;
use crate::pipeline::output::{RouteClassification, RouteDocType, SecurityFlag, SourceDescriptor};

const PROMPT_TEMPLATE: &str = "\
Você decide a rota de processamento de um documento financeiro.
Rotas permitidas: BANK_STATEMENT, INVOICE, BOLETO, RECEIPT, CONTRACT, OTHER, REJECT.
Responda apenas JSON válido no formato:
{\"doc_type\":enum,\"confidence\":0..1,\"reasons\":[string],\"route\":string,\"security_flags\":[\"PII_DETECTED\"|\"SUSPECTED_CREDENTIALS\"|\"NONE\"]}

OCR:
{{ocr_json}}

Arquivo:
{{file_meta}}";

/// Signals that mark a document as irrelevant (cover pages, ads, placeholder
/// text).
const REJECT_SIGNALS: &[&str] = &["capa", "cover", "publicidade", "anúncio", "lorem ipsum"];

/// Ordered route candidates; first match wins.
const ROUTE_RULES: &[(RouteDocType, &str, &[&str], f64)] = &[
    (
        RouteDocType::BankStatement,
        "extract_bank_statement",
        &["extrato", "saldo", "lançamento", "saldo anterior", "saldo final"],
        0.72,
    ),
    (
        RouteDocType::Boleto,
        "extract_boleto",
        &["linha digitável", "boleto", "vencimento"],
        0.72,
    ),
    (
        RouteDocType::Invoice,
        "extract_invoice",
        &["nota fiscal", "nfe", "danfe", "fatura"],
        0.68,
    ),
    (
        RouteDocType::Receipt,
        "extract_receipt",
        &["recibo", "comprovante"],
        0.66,
    ),
    (
        RouteDocType::Contract,
        "extract_contract",
        &["contrato", "cláusula", "assinatura"],
        0.64,
    ),
];

fn pattern_matches(cell: &'static OnceLock<Option<Regex>>, pattern: &str, text: &str) -> bool {
    cell.get_or_init(|| Regex::new(pattern).ok())
        .as_ref()
        .map(|re| re.is_match(text))
        .unwrap_or(false)
}

/// Scans the combined signal for credential and PII language. Never returns
/// an empty list: absence of both signals yields exactly `[NONE]`.
pub fn security_flags(combined: &str) -> Vec<SecurityFlag> {
    static CREDENTIALS: OnceLock<Option<Regex>> = OnceLock::new();
    static PII: OnceLock<Option<Regex>> = OnceLock::new();

    let lower = combined.to_lowercase();
    let mut flags = Vec::new();

    if pattern_matches(
        &CREDENTIALS,
        r"senha|password|private key|chave privada|seed phrase",
        &lower,
    ) {
        flags.push(SecurityFlag::SuspectedCredentials);
    }
    if pattern_matches(
        &PII,
        r"cpf|cnpj|rg\b|cart[aã]o|n[uú]mero do cart[aã]o",
        &lower,
    ) {
        flags.push(SecurityFlag::PiiDetected);
    }

    if flags.is_empty() {
        flags.push(SecurityFlag::None);
    }
    flags
}

/// Deterministic route classification over filename + text.
pub fn fallback_route_classification(text: &str, file_name: &str) -> RouteClassification {
    let combined = format!("{} {}", file_name.to_lowercase(), text.to_lowercase());

    let is_blank_like = combined.trim().chars().count() < 20;
    if is_blank_like || REJECT_SIGNALS.iter().any(|signal| combined.contains(signal)) {
        return RouteClassification {
            doc_type: RouteDocType::Reject,
            confidence: 0.9,
            reasons: vec!["Documento irrelevante ou sem conteúdo financeiro útil".to_string()],
            route: "skip".to_string(),
            security_flags: security_flags(&combined),
        };
    }

    let found = ROUTE_RULES
        .iter()
        .find(|(_, _, terms, _)| terms.iter().any(|term| combined.contains(term)));

    match found {
        Some((doc_type, route, _, confidence)) => RouteClassification {
            doc_type: *doc_type,
            confidence: *confidence,
            reasons: vec!["Classificação por heurística de termos-chave".to_string()],
            route: route.to_string(),
            security_flags: security_flags(&combined),
        },
        None => RouteClassification {
            doc_type: RouteDocType::Other,
            confidence: 0.4,
            reasons: vec!["Sem evidência suficiente para tipo específico".to_string()],
            route: "extract_other".to_string(),
            security_flags: security_flags(&combined),
        },
    }
}

/// Coerces an AI response against the closed enums, substituting `fallback`
/// values wholesale for anything unparseable or invalid.
pub fn coerce_route_classification(
    value: &Value,
    fallback: RouteClassification,
) -> RouteClassification {
    if !value.is_object() {
        return fallback;
    }

    let doc_type = coerce::str_field(value, "doc_type")
        .and_then(|raw| RouteDocType::from_exact(&raw))
        .unwrap_or(fallback.doc_type);

    let security: Vec<SecurityFlag> = match value.get("security_flags").and_then(Value::as_array) {
        Some(items) => items
            .iter()
            .filter_map(Value::as_str)
            .filter_map(SecurityFlag::from_exact)
            .collect(),
        None => fallback.security_flags.clone(),
    };

    RouteClassification {
        doc_type,
        confidence: coerce::confidence_field(value, "confidence", fallback.confidence),
        reasons: coerce::str_array_field(value, "reasons").unwrap_or(fallback.reasons),
        route: coerce::non_empty_str_field(value, "route").unwrap_or(fallback.route),
        security_flags: if security.is_empty() {
            vec![SecurityFlag::None]
        } else {
            security
        },
    }
}

#[derive(Debug, Clone)]
pub struct RouteOutcome {
    pub classification: RouteClassification,
    pub errors: Vec<String>,
}

pub struct RouteClassifier {
    backend: Option<Arc<dyn CompletionBackend>>,
}

impl RouteClassifier {
    pub fn new(backend: Option<Arc<dyn CompletionBackend>>) -> Self {
        Self { backend }
    }

    pub async fn classify(
        &self,
        ocr_json: &Value,
        source: &SourceDescriptor,
        extraction_text: &str,
    ) -> RouteOutcome {
        let fallback = fallback_route_classification(extraction_text, &source.filename);

        let backend = match &self.backend {
            Some(backend) => backend,
            None => {
                return RouteOutcome {
                    classification: fallback,
                    errors: vec!["ai_not_configured_route_classification".to_string()],
                };
            }
        };

        let file_meta = serde_json::json!({
            "fileName": source.filename,
            "mimeType": source.mime_type,
            "sizeBytes": source.size_bytes,
            "sha256": source.sha256,
        });
        let prompt = PROMPT_TEMPLATE
            .replace("{{ocr_json}}", &ocr_json.to_string())
            .replace("{{file_meta}}", &file_meta.to_string());

        match backend.complete("Retorne apenas JSON válido.", &prompt).await {
            Ok(content) => match serde_json::from_str::<Value>(&content) {
                Ok(parsed) => RouteOutcome {
                    classification: coerce_route_classification(&parsed, fallback),
                    errors: Vec::new(),
                },
                Err(e) => RouteOutcome {
                    classification: fallback,
                    errors: vec![format!("route_classification_exception: {}", e)],
                },
            },
            Err(e) => RouteOutcome {
                classification: fallback,
                errors: vec![format!("route_classification_error: {}", e)],
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::StaticCompletionBackend;
    use serde_json::json;

    fn source(filename: &str) -> SourceDescriptor {
        SourceDescriptor {
            path: format!("/tmp/{}", filename),
            filename: filename.to_string(),
            mime_type: "text/plain".to_string(),
            size_bytes: 100,
            sha256: "c".repeat(64),
        }
    }

    #[test]
    fn test_security_flags_never_empty() {
        assert_eq!(security_flags("texto inofensivo sobre jardinagem qualquer"), vec![SecurityFlag::None]);
    }

    #[test]
    fn test_security_flags_detect_credentials_and_pii() {
        let flags = security_flags("minha senha é 1234 e meu CPF 000.000.000-00");
        assert_eq!(
            flags,
            vec![SecurityFlag::SuspectedCredentials, SecurityFlag::PiiDetected]
        );
    }

    #[test]
    fn test_short_signal_rejects() {
        let result = fallback_route_classification("", "a.txt");
        assert_eq!(result.doc_type, RouteDocType::Reject);
        assert_eq!(result.route, "skip");
        assert_eq!(result.confidence, 0.9);
    }

    #[test]
    fn test_cover_page_filename_rejects() {
        let result =
            fallback_route_classification("conteúdo longo o suficiente para não ser vazio", "capa_relatorio.pdf");
        assert_eq!(result.doc_type, RouteDocType::Reject);
        assert_eq!(result.route, "skip");
    }

    #[test]
    fn test_bank_statement_terms_route() {
        let result = fallback_route_classification(
            "extrato com saldo anterior e saldo final do período",
            "documento.pdf",
        );
        assert_eq!(result.doc_type, RouteDocType::BankStatement);
        assert_eq!(result.route, "extract_bank_statement");
        assert_eq!(result.confidence, 0.72);
    }

    #[test]
    fn test_no_match_is_other_route() {
        let result = fallback_route_classification(
            "relatório genérico sem termos conhecidos de documentos",
            "relatorio.pdf",
        );
        assert_eq!(result.doc_type, RouteDocType::Other);
        assert_eq!(result.route, "extract_other");
        assert_eq!(result.confidence, 0.4);
    }

    #[test]
    fn test_coerce_invalid_doc_type_keeps_fallback() {
        let fallback = fallback_route_classification("extrato saldo anterior em conta", "f.pdf");
        let coerced = coerce_route_classification(
            &json!({"doc_type": "SOMETHING_ELSE", "confidence": 0.99}),
            fallback.clone(),
        );
        assert_eq!(coerced.doc_type, fallback.doc_type);
        assert_eq!(coerced.confidence, 0.99);
    }

    #[test]
    fn test_coerce_empty_security_flags_become_none() {
        let fallback = fallback_route_classification("extrato saldo anterior em conta", "f.pdf");
        let coerced = coerce_route_classification(
            &json!({"doc_type": "INVOICE", "security_flags": ["WHATEVER"]}),
            fallback,
        );
        assert_eq!(coerced.security_flags, vec![SecurityFlag::None]);
    }

    #[test]
    fn test_coerce_non_object_substitutes_fallback_wholesale() {
        let fallback = fallback_route_classification("boleto vencimento amanhã cedo", "b.pdf");
        let coerced = coerce_route_classification(&json!(null), fallback.clone());
        assert_eq!(coerced.doc_type, fallback.doc_type);
        assert_eq!(coerced.route, fallback.route);
    }

    #[tokio::test]
    async fn test_missing_backend_uses_fallback_with_tag() {
        let classifier = RouteClassifier::new(None);
        let outcome = classifier
            .classify(&json!({}), &source("recibo.txt"), "recibo de pagamento integral")
            .await;
        assert_eq!(outcome.classification.doc_type, RouteDocType::Receipt);
        assert_eq!(
            outcome.errors,
            vec!["ai_not_configured_route_classification".to_string()]
        );
    }

    #[tokio::test]
    async fn test_backend_route_is_validated_against_enum() {
        let backend = StaticCompletionBackend::new(
            r#"{"doc_type": "CONTRACT", "confidence": 0.85, "reasons": ["cláusulas"], "route": "extract_contract", "security_flags": ["NONE"]}"#,
        );
        let classifier = RouteClassifier::new(Some(Arc::new(backend)));
        let outcome = classifier
            .classify(&json!({}), &source("contrato.pdf"), "contrato com cláusula de rescisão")
            .await;
        assert_eq!(outcome.classification.doc_type, RouteDocType::Contract);
        assert_eq!(outcome.classification.confidence, 0.85);
        assert!(outcome.errors.is_empty());
    }
}

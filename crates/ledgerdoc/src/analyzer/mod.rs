//! Document classification and field extraction.
//!
//! The analyzer asks the completion capability to classify the extracted text
//! and pull out structured fields. Empty input short-circuits without any
//! network call, and every failure path degrades to a keyword heuristic —
//! the pipeline never fails because the AI service is unavailable.

pub mod route;
pub mod semantic;
pub mod structured;

use std::sync::Arc;

use log::debug;
use serde_json::Value;

use crate::ai::coerce;
use crate::ai::CompletionBackend;
use crate::pipeline::output::{Classification, DocumentType, ExtractedFields};

/// Input text is truncated to this many characters before it is sent out.
const MAX_ANALYSIS_CHARS: usize = 60_000;

const SYSTEM_PROMPT: &str = "\
Você classifica e extrai dados de documentos financeiros brasileiros.
Regras obrigatórias:
1) Responda apenas JSON válido, sem markdown.
2) Não invente dados. Se não constar no texto, use null.
3) documentType deve ser exatamente um enum permitido.
4) Datas em YYYY-MM-DD quando possível.
5) currency sempre BRL.
6) totalAmount deve ser numérico ou null.
Enum permitido: EXTRATO_BANCARIO, RECIBO, CCB, FATURA_CARTAO, FATURA_TELEFONE, NFE, BOLETO, COMPROVANTE_PAGAMENTO, OUTRO.
Retorne no formato: {classification:{documentType,confidence,summary,tags},fields:{issuerName,issuerId,customerName,customerId,documentNumber,bankName,accountLast4,issueDate,dueDate,periodStart,periodEnd,totalAmount,currency,barcode,pixKey,nfAccessKey}}";

/// Keyword heuristic used whenever the completion capability is missing or
/// misbehaves. First matching rule wins.
const FALLBACK_RULES: &[(DocumentType, &[&str], f64)] = &[
    (DocumentType::Nfe, &["nota fiscal", "chave de acesso", "danfe"], 0.7),
    (DocumentType::Boleto, &["linha digitável", "boleto", "vencimento"], 0.7),
    (DocumentType::FaturaCartao, &["fatura", "cartão", "limite total"], 0.68),
    (DocumentType::FaturaTelefone, &["telefone", "operadora", "plano"], 0.66),
    (DocumentType::ExtratoBancario, &["extrato", "saldo anterior", "saldo final"], 0.7),
    (DocumentType::ComprovantePagamento, &["comprovante", "transação", "pix"], 0.65),
    (DocumentType::Ccb, &["cédula de crédito bancário", "ccb"], 0.72),
    (DocumentType::Recibo, &["recibo", "recebi de"], 0.62),
];

#[derive(Debug, Clone)]
pub struct AnalysisResult {
    pub classification: Classification,
    pub fields: ExtractedFields,
    pub errors: Vec<String>,
}

pub struct Analyzer {
    backend: Option<Arc<dyn CompletionBackend>>,
}

impl Analyzer {
    pub fn new(backend: Option<Arc<dyn CompletionBackend>>) -> Self {
        Self { backend }
    }

    /// Classifies `text` and extracts fields. Never returns an error; all
    /// degradation is expressed through the result's `errors` list.
    pub async fn analyze(&self, text: &str) -> AnalysisResult {
        if text.trim().is_empty() {
            return AnalysisResult {
                classification: Classification {
                    document_type: DocumentType::Outro,
                    confidence: 0.0,
                    summary: "Sem texto extraído para análise".to_string(),
                    tags: Vec::new(),
                },
                fields: ExtractedFields::default(),
                errors: vec!["no_extracted_text".to_string()],
            };
        }

        let backend = match &self.backend {
            Some(backend) => backend,
            None => {
                return AnalysisResult {
                    classification: fallback_classification(text),
                    fields: ExtractedFields::default(),
                    errors: vec!["ai_not_configured".to_string()],
                };
            }
        };

        match backend.complete(SYSTEM_PROMPT, truncate_chars(text, MAX_ANALYSIS_CHARS)).await {
            Ok(content) => match serde_json::from_str::<Value>(&content) {
                Ok(parsed) => {
                    debug!("analysis response parsed");
                    AnalysisResult {
                        classification: coerce_classification(&parsed),
                        fields: coerce_fields(parsed.get("fields")),
                        errors: Vec::new(),
                    }
                }
                Err(e) => AnalysisResult {
                    classification: fallback_classification(text),
                    fields: ExtractedFields::default(),
                    errors: vec![format!("ai_exception: {}", e)],
                },
            },
            Err(e) => AnalysisResult {
                classification: fallback_classification(text),
                fields: ExtractedFields::default(),
                errors: vec![format!("ai_error: {}", e)],
            },
        }
    }
}

/// Truncates at a char boundary without allocating.
fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Deterministic keyword classification over the fixed rule table.
pub fn fallback_classification(text: &str) -> Classification {
    let lower = text.to_lowercase();

    let found = FALLBACK_RULES
        .iter()
        .find(|(_, terms, _)| terms.iter().any(|term| lower.contains(term)));

    let (document_type, confidence, tags) = match found {
        Some((doc_type, terms, confidence)) => {
            let tags: Vec<String> = terms
                .iter()
                .filter(|term| lower.contains(*term))
                .take(5)
                .map(|term| term.to_string())
                .collect();
            (*doc_type, *confidence, tags)
        }
        None => (DocumentType::Outro, 0.3, Vec::new()),
    };

    let summary: String = text.chars().take(180).collect();
    Classification {
        document_type,
        confidence,
        summary: if summary.is_empty() {
            "Sem conteúdo textual para classificação".to_string()
        } else {
            summary
        },
        tags,
    }
}

fn coerce_classification(parsed: &Value) -> Classification {
    let section = parsed.get("classification").cloned().unwrap_or(Value::Null);

    let document_type = coerce::str_field(&section, "documentType")
        .map(|raw| DocumentType::from_raw(&raw))
        .unwrap_or(DocumentType::Outro);

    let tags = coerce::str_array_field(&section, "tags")
        .unwrap_or_default()
        .into_iter()
        .take(10)
        .collect();

    Classification {
        document_type,
        confidence: coerce::confidence_field(&section, "confidence", 0.5),
        summary: coerce::str_field(&section, "summary")
            .unwrap_or_else(|| "Classificação realizada".to_string()),
        tags,
    }
}

fn coerce_fields(section: Option<&Value>) -> ExtractedFields {
    let section = section.cloned().unwrap_or(Value::Null);
    let date = |key: &str| {
        section
            .get(key)
            .and_then(|v| coerce::normalize_date(v))
    };

    ExtractedFields {
        issuer_name: coerce::str_field(&section, "issuerName"),
        issuer_id: coerce::str_field(&section, "issuerId"),
        customer_name: coerce::str_field(&section, "customerName"),
        customer_id: coerce::str_field(&section, "customerId"),
        document_number: coerce::str_field(&section, "documentNumber"),
        bank_name: coerce::str_field(&section, "bankName"),
        account_last4: coerce::str_field(&section, "accountLast4"),
        issue_date: date("issueDate"),
        due_date: date("dueDate"),
        period_start: date("periodStart"),
        period_end: date("periodEnd"),
        total_amount: section.get("totalAmount").and_then(coerce::normalize_amount),
        currency: "BRL".to_string(),
        barcode: coerce::str_field(&section, "barcode"),
        pix_key: coerce::str_field(&section, "pixKey"),
        nf_access_key: coerce::str_field(&section, "nfAccessKey"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::StaticCompletionBackend;

    fn with_response(response: &str) -> Analyzer {
        Analyzer::new(Some(Arc::new(StaticCompletionBackend::new(response))))
    }

    #[tokio::test]
    async fn test_empty_text_short_circuits_without_backend_call() {
        // A backend that would panic if called is the proof no call happens.
        struct Panicking;
        #[async_trait::async_trait]
        impl crate::ai::CompletionBackend for Panicking {
            async fn complete(
                &self,
                _: &str,
                _: &str,
            ) -> Result<String, crate::ai::CompletionError> {
                panic!("complete() must not be called for empty text");
            }
        }

        let analyzer = Analyzer::new(Some(Arc::new(Panicking)));
        let result = analyzer.analyze("   ").await;
        assert_eq!(result.classification.document_type, DocumentType::Outro);
        assert_eq!(result.classification.confidence, 0.0);
        assert!(result.errors.contains(&"no_extracted_text".to_string()));
    }

    #[tokio::test]
    async fn test_missing_backend_uses_fallback() {
        let analyzer = Analyzer::new(None);
        let result = analyzer
            .analyze("extrato com saldo anterior e saldo final")
            .await;
        assert_eq!(
            result.classification.document_type,
            DocumentType::ExtratoBancario
        );
        assert_eq!(result.classification.confidence, 0.7);
        assert_eq!(result.errors, vec!["ai_not_configured".to_string()]);
    }

    #[test]
    fn test_fallback_rule_order_first_match_wins() {
        // Matches both the NFE and FATURA_CARTAO rules; NFE comes first.
        let result = fallback_classification("nota fiscal referente à fatura");
        assert_eq!(result.document_type, DocumentType::Nfe);
    }

    #[test]
    fn test_fallback_no_match_is_low_confidence_outro() {
        let result = fallback_classification("texto irrelevante qualquer");
        assert_eq!(result.document_type, DocumentType::Outro);
        assert_eq!(result.confidence, 0.3);
        assert!(result.tags.is_empty());
    }

    #[test]
    fn test_fallback_tags_are_matched_terms() {
        let result = fallback_classification("boleto com vencimento em abril");
        assert_eq!(result.document_type, DocumentType::Boleto);
        assert_eq!(result.tags, vec!["boleto".to_string(), "vencimento".to_string()]);
    }

    #[tokio::test]
    async fn test_ai_response_is_coerced_field_by_field() {
        let analyzer = with_response(
            r#"{
                "classification": {
                    "documentType": "nfe",
                    "confidence": 2.5,
                    "summary": "Nota fiscal",
                    "tags": ["nfe", 42, "danfe"]
                },
                "fields": {
                    "issuerName": "Fornecedor SA",
                    "issuerId": 123,
                    "issueDate": "15/03/2026",
                    "dueDate": "not a date",
                    "totalAmount": "1.234,56",
                    "accountLast4": "4821"
                }
            }"#,
        );
        let result = analyzer.analyze("qualquer texto").await;
        assert_eq!(result.classification.document_type, DocumentType::Nfe);
        assert_eq!(result.classification.confidence, 1.0);
        assert_eq!(result.classification.tags, vec!["nfe", "danfe"]);
        assert_eq!(result.fields.issuer_name, Some("Fornecedor SA".to_string()));
        assert_eq!(result.fields.issuer_id, None);
        assert_eq!(result.fields.issue_date, Some("2026-03-15".to_string()));
        assert_eq!(result.fields.due_date, None);
        assert_eq!(result.fields.total_amount, Some(1234.56));
        assert_eq!(result.fields.currency, "BRL");
        assert!(result.errors.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_document_type_coerces_to_outro() {
        let analyzer = with_response(
            r#"{"classification": {"documentType": "INVOICE", "confidence": 0.9}}"#,
        );
        let result = analyzer.analyze("texto").await;
        assert_eq!(result.classification.document_type, DocumentType::Outro);
        assert_eq!(result.classification.summary, "Classificação realizada");
    }

    #[tokio::test]
    async fn test_missing_confidence_defaults_to_half() {
        let analyzer = with_response(r#"{"classification": {"documentType": "RECIBO"}}"#);
        let result = analyzer.analyze("texto").await;
        assert_eq!(result.classification.confidence, 0.5);
    }

    #[tokio::test]
    async fn test_unparseable_response_falls_back_with_tag() {
        let analyzer = with_response("not json at all");
        let result = analyzer.analyze("recibo de pagamento, recebi de João").await;
        assert_eq!(result.classification.document_type, DocumentType::Recibo);
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].starts_with("ai_exception: "));
    }

    #[tokio::test]
    async fn test_tags_capped_at_ten() {
        let tags: Vec<String> = (0..15).map(|i| format!("\"t{}\"", i)).collect();
        let analyzer = with_response(&format!(
            r#"{{"classification": {{"documentType": "NFE", "tags": [{}]}}}}"#,
            tags.join(",")
        ));
        let result = analyzer.analyze("texto").await;
        assert_eq!(result.classification.tags.len(), 10);
    }

    #[test]
    fn test_truncate_chars_respects_boundaries() {
        assert_eq!(truncate_chars("ação", 2), "aç");
        assert_eq!(truncate_chars("abc", 10), "abc");
    }
}

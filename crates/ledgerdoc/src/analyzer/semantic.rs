//! Semantic validation of OCR-derived structure.
//!
//! Cross-checks the raw OCR structure against the extracted text, normalizes
//! bank-statement-shaped data (balances, dated transaction lines), and
//! decides whether a human must review the result. The fallback path never
//! auto-approves: a document the system could not semantically validate with
//! AI always carries `needs_human_review = true`.

use std::sync::Arc;

use serde_json::Value;

use crate::ai::coerce;
use crate::ai::CompletionBackend;
use crate::pipeline::output::{
    NormalizedStatement, NormalizedTransaction, SemanticValidation, TransactionKind,
    ValidationIssue,
};

const PROMPT_TEMPLATE: &str = "\
Você valida dados financeiros extraídos por OCR.
Compare a estrutura OCR com os metadados do documento e normalize lançamentos
bancários (datas YYYY-MM-DD, valores numéricos, tipo CREDIT ou DEBIT).
Responda apenas JSON válido no formato:
{\"is_valid\":bool,\"confidence_overall\":0..1,\"normalized\":{\"bank_name\",\"account_last4\",\"currency\",\"period_start\",\"period_end\",\"opening_balance\",\"closing_balance\",\"transactions\":[{\"date\",\"description\",\"amount\",\"type\",\"category_guess\",\"confidence\"}]},\"issues\":[{\"code\",\"message\"}],\"needs_human_review\":bool}

OCR:
{{ocr_json}}

Metadados:
{{document_meta}}";

#[derive(Debug, Clone)]
pub struct SemanticOutcome {
    pub validation: SemanticValidation,
    pub errors: Vec<String>,
}

pub struct SemanticValidator {
    backend: Option<Arc<dyn CompletionBackend>>,
}

impl SemanticValidator {
    pub fn new(backend: Option<Arc<dyn CompletionBackend>>) -> Self {
        Self { backend }
    }

    pub async fn validate(
        &self,
        ocr_json: &Value,
        document_meta: &Value,
        extraction_text: &str,
    ) -> SemanticOutcome {
        let backend = match &self.backend {
            Some(backend) => backend,
            None => {
                return SemanticOutcome {
                    validation: fallback_validation(extraction_text, !ocr_json.is_null()),
                    errors: vec!["ai_not_configured_semantic_validation".to_string()],
                };
            }
        };

        let prompt = PROMPT_TEMPLATE
            .replace("{{ocr_json}}", &ocr_json.to_string())
            .replace("{{document_meta}}", &document_meta.to_string());

        match backend.complete("Retorne apenas JSON válido.", &prompt).await {
            Ok(content) => match serde_json::from_str::<Value>(&content) {
                Ok(parsed) => SemanticOutcome {
                    validation: coerce_semantic_validation(&parsed),
                    errors: Vec::new(),
                },
                Err(e) => SemanticOutcome {
                    validation: fallback_validation(extraction_text, !ocr_json.is_null()),
                    errors: vec![format!("semantic_validation_exception: {}", e)],
                },
            },
            Err(e) => SemanticOutcome {
                validation: fallback_validation(extraction_text, !ocr_json.is_null()),
                errors: vec![format!("semantic_validation_error: {}", e)],
            },
        }
    }
}

/// Degraded-mode validation. Valid only when there is text at all, at a
/// fixed low confidence, and always flagged for human review.
pub fn fallback_validation(extraction_text: &str, has_ocr_structure: bool) -> SemanticValidation {
    let has_text = !extraction_text.trim().is_empty();

    let mut issues = Vec::new();
    if !has_text {
        issues.push(ValidationIssue::new("MISSING_FIELD", "Texto OCR ausente"));
    }
    issues.push(ValidationIssue::new(
        "SEMANTIC_FALLBACK",
        "Validação semântica executada em modo fallback",
    ));
    if !has_ocr_structure {
        issues.push(ValidationIssue::new("MISSING_FIELD", "ocr_json ausente"));
    }

    SemanticValidation {
        is_valid: has_text,
        confidence_overall: if has_text { 0.45 } else { 0.0 },
        normalized: NormalizedStatement::empty(),
        issues,
        needs_human_review: true,
    }
}

/// Field-by-field coercion of the AI response. Malformed transaction entries
/// are dropped silently; unlabeled issues default to `UNKNOWN_ISSUE`.
pub fn coerce_semantic_validation(value: &Value) -> SemanticValidation {
    if !value.is_object() {
        return fallback_validation("", false);
    }

    let normalized = value.get("normalized").cloned().unwrap_or(Value::Null);

    let transactions: Vec<NormalizedTransaction> = normalized
        .get("transactions")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter(|item| item.is_object())
                .map(|item| NormalizedTransaction {
                    date: coerce::str_field(item, "date").unwrap_or_default(),
                    description: coerce::str_field(item, "description").unwrap_or_default(),
                    amount: coerce::f64_field(item, "amount").unwrap_or(0.0),
                    kind: if coerce::str_field(item, "type").as_deref() == Some("CREDIT") {
                        TransactionKind::Credit
                    } else {
                        TransactionKind::Debit
                    },
                    category_guess: coerce::str_field(item, "category_guess"),
                    confidence: coerce::confidence_field(item, "confidence", 0.0),
                })
                .filter(|tx| !tx.date.is_empty() && !tx.description.is_empty())
                .collect()
        })
        .unwrap_or_default();

    let issues: Vec<ValidationIssue> = value
        .get("issues")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter(|item| item.is_object())
                .map(|item| ValidationIssue {
                    code: coerce::str_field(item, "code")
                        .unwrap_or_else(|| "UNKNOWN_ISSUE".to_string()),
                    message: coerce::str_field(item, "message"),
                })
                .collect()
        })
        .unwrap_or_default();

    SemanticValidation {
        is_valid: coerce::bool_field(value, "is_valid"),
        confidence_overall: coerce::confidence_field(value, "confidence_overall", 0.0),
        normalized: NormalizedStatement {
            bank_name: coerce::str_field(&normalized, "bank_name"),
            account_last4: coerce::str_field(&normalized, "account_last4"),
            currency: coerce::str_field(&normalized, "currency")
                .unwrap_or_else(|| "BRL".to_string()),
            period_start: coerce::str_field(&normalized, "period_start"),
            period_end: coerce::str_field(&normalized, "period_end"),
            opening_balance: coerce::f64_field(&normalized, "opening_balance"),
            closing_balance: coerce::f64_field(&normalized, "closing_balance"),
            transactions,
        },
        issues,
        needs_human_review: coerce::bool_field(value, "needs_human_review"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::StaticCompletionBackend;
    use serde_json::json;

    #[test]
    fn test_fallback_with_text_is_valid_at_low_confidence() {
        let result = fallback_validation("saldo anterior 100", true);
        assert!(result.is_valid);
        assert_eq!(result.confidence_overall, 0.45);
        assert!(result.needs_human_review);
        assert_eq!(result.issues.len(), 1);
        assert_eq!(result.issues[0].code, "SEMANTIC_FALLBACK");
    }

    #[test]
    fn test_fallback_without_text_is_invalid() {
        let result = fallback_validation("  ", false);
        assert!(!result.is_valid);
        assert_eq!(result.confidence_overall, 0.0);
        assert!(result.needs_human_review);
        let codes: Vec<&str> = result.issues.iter().map(|i| i.code.as_str()).collect();
        assert_eq!(codes, vec!["MISSING_FIELD", "SEMANTIC_FALLBACK", "MISSING_FIELD"]);
    }

    #[test]
    fn test_coerce_drops_partial_transactions() {
        let value = json!({
            "is_valid": true,
            "confidence_overall": 0.9,
            "normalized": {
                "transactions": [
                    {"date": "2026-01-02", "description": "PIX recebido", "amount": 10.0, "type": "CREDIT"},
                    {"date": "", "description": "sem data", "amount": 5.0},
                    {"date": "2026-01-03", "amount": 5.0},
                    "not an object"
                ]
            },
            "issues": [],
            "needs_human_review": false
        });
        let result = coerce_semantic_validation(&value);
        assert_eq!(result.normalized.transactions.len(), 1);
        assert_eq!(result.normalized.transactions[0].description, "PIX recebido");
        assert_eq!(result.normalized.transactions[0].kind, TransactionKind::Credit);
    }

    #[test]
    fn test_coerce_type_defaults_to_debit() {
        let value = json!({
            "normalized": {
                "transactions": [
                    {"date": "2026-01-02", "description": "tarifa", "amount": 3.5, "type": "credit"},
                    {"date": "2026-01-02", "description": "sem tipo", "amount": 1.0}
                ]
            }
        });
        let result = coerce_semantic_validation(&value);
        assert_eq!(result.normalized.transactions[0].kind, TransactionKind::Debit);
        assert_eq!(result.normalized.transactions[1].kind, TransactionKind::Debit);
    }

    #[test]
    fn test_coerce_clamps_transaction_confidence() {
        let value = json!({
            "normalized": {
                "transactions": [
                    {"date": "2026-01-02", "description": "a", "amount": 1.0, "confidence": 7.0},
                    {"date": "2026-01-02", "description": "b", "amount": 1.0, "confidence": "alta"}
                ]
            }
        });
        let result = coerce_semantic_validation(&value);
        assert_eq!(result.normalized.transactions[0].confidence, 1.0);
        assert_eq!(result.normalized.transactions[1].confidence, 0.0);
    }

    #[test]
    fn test_coerce_unlabeled_issue_defaults() {
        let value = json!({
            "issues": [{"message": "algo estranho"}, {"code": "BALANCE_MISMATCH"}]
        });
        let result = coerce_semantic_validation(&value);
        assert_eq!(result.issues[0].code, "UNKNOWN_ISSUE");
        assert_eq!(result.issues[1].code, "BALANCE_MISMATCH");
    }

    #[test]
    fn test_coerce_non_object_uses_fallback() {
        let result = coerce_semantic_validation(&json!("nonsense"));
        assert!(!result.is_valid);
        assert!(result.needs_human_review);
    }

    #[tokio::test]
    async fn test_missing_backend_always_needs_review() {
        let validator = SemanticValidator::new(None);
        let outcome = validator
            .validate(&json!({"text": "x"}), &json!({}), "algum texto")
            .await;
        assert!(outcome.validation.needs_human_review);
        assert_eq!(
            outcome.errors,
            vec!["ai_not_configured_semantic_validation".to_string()]
        );
    }

    #[tokio::test]
    async fn test_backend_response_is_coerced() {
        let backend = StaticCompletionBackend::new(
            r#"{"is_valid": true, "confidence_overall": 0.8, "normalized": {"bank_name": "Banco X", "transactions": []}, "issues": [], "needs_human_review": false}"#,
        );
        let validator = SemanticValidator::new(Some(Arc::new(backend)));
        let outcome = validator.validate(&json!({}), &json!({}), "texto").await;
        assert!(outcome.validation.is_valid);
        assert_eq!(outcome.validation.confidence_overall, 0.8);
        assert_eq!(
            outcome.validation.normalized.bank_name,
            Some("Banco X".to_string())
        );
        assert!(!outcome.validation.needs_human_review);
        assert!(outcome.errors.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_json_from_backend_falls_back() {
        let backend = StaticCompletionBackend::new("{broken");
        let validator = SemanticValidator::new(Some(Arc::new(backend)));
        let outcome = validator.validate(&json!({}), &json!({}), "texto").await;
        assert!(outcome.validation.needs_human_review);
        assert_eq!(outcome.validation.confidence_overall, 0.45);
        assert!(outcome.errors[0].starts_with("semantic_validation_exception: "));
    }
}

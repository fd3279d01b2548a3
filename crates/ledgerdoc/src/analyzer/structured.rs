//! Structured persistence payload builder.
//!
//! Maps the semantic validator's normalized statement into a tenant-scoped
//! payload (accounts + ledger transactions + document metadata). Amount signs
//! are normalized here regardless of what upstream produced: DEBIT is always
//! negative, CREDIT always positive.

use std::collections::HashSet;
use std::sync::Arc;

use serde_json::Value;

use crate::ai::coerce;
use crate::ai::CompletionBackend;
use crate::config::TenantContext;
use crate::pipeline::output::{
    DocumentSummary, LedgerAccount, LedgerTransaction, SemanticValidation, StructuredPayload,
    TransactionKind,
};

const PROMPT_TEMPLATE: &str = "\
Você monta o payload estruturado de persistência para um documento financeiro validado.
Responda apenas JSON válido no formato:
{\"companyId\":string,\"accounts\":[{\"externalRef\",\"bankName\",\"last4\",\"currency\"}],\"transactions\":[{\"accountRef\",\"date\",\"description\",\"amount\",\"type\",\"category\",\"sourceDocId\"}],\"document\":{\"source\",\"originalFilename\",\"period_start\",\"period_end\",\"closing_balance\",\"issues\",\"accuracyScore\"}}

Documento validado:
{{validated_doc}}

Contexto do tenant:
{{tenant_context}}";

/// Fixed substring rules mapping free-text category guesses onto the ledger
/// category set. First matching rule wins.
pub fn normalize_category(raw: Option<&str>) -> String {
    let v = raw.unwrap_or_default().to_uppercase();
    if v.contains("RECEITA") {
        "RECEITAS".to_string()
    } else if v.contains("DESPESA") {
        "DESPESAS".to_string()
    } else if v.contains("TARIFA") {
        "TARIFAS".to_string()
    } else if v.contains("IMPOST") {
        "IMPOSTOS".to_string()
    } else if v.contains("TRANSFER") {
        "TRANSFERENCIAS".to_string()
    } else {
        "OUTROS".to_string()
    }
}

fn signed_amount(kind: TransactionKind, amount: f64) -> f64 {
    match kind {
        TransactionKind::Debit => -amount.abs(),
        TransactionKind::Credit => amount.abs(),
    }
}

/// Deterministic projection of the already-normalized statement. This path
/// cannot fail: an empty validator result yields a payload with zero
/// transactions and the tenant's company id.
pub fn fallback_payload(
    validated: &SemanticValidation,
    tenant: &TenantContext,
    original_filename: &str,
    source_uri: Option<&str>,
    source_doc_id: &str,
) -> StructuredPayload {
    let normalized = &validated.normalized;
    let currency = if normalized.currency.is_empty() {
        tenant.currency_default.clone()
    } else {
        normalized.currency.clone()
    };

    let bank_name = normalized.bank_name.clone().unwrap_or_default();
    let last4 = normalized.account_last4.clone().unwrap_or_default();
    let external_ref = format!(
        "{}_{}",
        if bank_name.is_empty() { "bank" } else { &bank_name },
        if last4.is_empty() { "0000" } else { &last4 }
    );

    let transactions: Vec<LedgerTransaction> = normalized
        .transactions
        .iter()
        .map(|tx| LedgerTransaction {
            account_ref: external_ref.clone(),
            date: tx.date.clone(),
            description: tx.description.clone(),
            amount: signed_amount(tx.kind, tx.amount),
            kind: tx.kind,
            category: normalize_category(tx.category_guess.as_deref()),
            source_doc_id: source_doc_id.to_string(),
        })
        .collect();

    StructuredPayload {
        company_id: tenant.company_id.clone(),
        accounts: vec![LedgerAccount {
            external_ref,
            bank_name: normalized.bank_name.clone(),
            last4: normalized.account_last4.clone(),
            currency,
        }],
        transactions,
        document: DocumentSummary {
            source: source_uri.unwrap_or_default().to_string(),
            original_filename: original_filename.to_string(),
            period_start: normalized.period_start.clone(),
            period_end: normalized.period_end.clone(),
            closing_balance: normalized.closing_balance,
            issues: validated.issues.iter().map(|i| i.code.clone()).collect(),
            accuracy_score: Some(validated.confidence_overall),
        },
    }
}

/// Coerces an AI-produced payload, anchoring every reference back to known
/// accounts and re-normalizing signs and categories.
pub fn coerce_payload(value: &Value, fallback: StructuredPayload) -> StructuredPayload {
    if !value.is_object() {
        return fallback;
    }

    let default_ref = fallback
        .accounts
        .first()
        .map(|a| a.external_ref.clone())
        .unwrap_or_else(|| "bank_0000".to_string());

    let accounts: Vec<LedgerAccount> = match value.get("accounts").and_then(Value::as_array) {
        Some(items) => items
            .iter()
            .filter(|item| item.is_object())
            .map(|item| LedgerAccount {
                external_ref: coerce::non_empty_str_field(item, "externalRef")
                    .unwrap_or_else(|| default_ref.clone()),
                bank_name: coerce::str_field(item, "bankName"),
                last4: coerce::str_field(item, "last4"),
                currency: coerce::str_field(item, "currency")
                    .unwrap_or_else(|| "BRL".to_string()),
            })
            .collect(),
        None => fallback.accounts.clone(),
    };

    let accounts = if accounts.is_empty() {
        fallback.accounts.clone()
    } else {
        accounts
    };

    let known_refs: HashSet<&str> = accounts.iter().map(|a| a.external_ref.as_str()).collect();
    let anchor_ref = accounts
        .first()
        .map(|a| a.external_ref.clone())
        .unwrap_or(default_ref);

    let transactions: Vec<LedgerTransaction> =
        match value.get("transactions").and_then(Value::as_array) {
            Some(items) => items
                .iter()
                .filter(|item| item.is_object())
                .map(|item| {
                    let kind = if coerce::str_field(item, "type").as_deref() == Some("CREDIT") {
                        TransactionKind::Credit
                    } else {
                        TransactionKind::Debit
                    };
                    let raw_amount = coerce::f64_field(item, "amount").unwrap_or(0.0);
                    let account_ref = coerce::str_field(item, "accountRef")
                        .filter(|r| known_refs.contains(r.as_str()))
                        .unwrap_or_else(|| anchor_ref.clone());
                    LedgerTransaction {
                        account_ref,
                        date: coerce::str_field(item, "date").unwrap_or_default(),
                        description: coerce::str_field(item, "description").unwrap_or_default(),
                        amount: signed_amount(kind, raw_amount),
                        kind,
                        category: normalize_category(
                            coerce::str_field(item, "category").as_deref(),
                        ),
                        source_doc_id: coerce::str_field(item, "sourceDocId")
                            .unwrap_or_else(|| fallback.document.original_filename.clone()),
                    }
                })
                .filter(|tx| !tx.date.is_empty() && !tx.description.is_empty())
                .collect(),
            None => fallback.transactions.clone(),
        };

    let document = value.get("document").cloned().unwrap_or(Value::Null);

    StructuredPayload {
        company_id: coerce::non_empty_str_field(value, "companyId")
            .unwrap_or_else(|| fallback.company_id.clone()),
        accounts,
        transactions,
        document: DocumentSummary {
            source: coerce::str_field(&document, "source").unwrap_or(fallback.document.source),
            original_filename: coerce::str_field(&document, "originalFilename")
                .unwrap_or(fallback.document.original_filename),
            period_start: coerce::str_field(&document, "period_start")
                .or(fallback.document.period_start),
            period_end: coerce::str_field(&document, "period_end")
                .or(fallback.document.period_end),
            closing_balance: coerce::f64_field(&document, "closing_balance")
                .or(fallback.document.closing_balance),
            issues: coerce::str_array_field(&document, "issues")
                .unwrap_or(fallback.document.issues),
            accuracy_score: coerce::f64_field(&document, "accuracyScore")
                .map(coerce::clamp01)
                .or(fallback.document.accuracy_score),
        },
    }
}

#[derive(Debug, Clone)]
pub struct PayloadOutcome {
    pub payload: StructuredPayload,
    pub errors: Vec<String>,
}

pub struct PayloadBuilder {
    backend: Option<Arc<dyn CompletionBackend>>,
}

impl PayloadBuilder {
    pub fn new(backend: Option<Arc<dyn CompletionBackend>>) -> Self {
        Self { backend }
    }

    pub async fn build(
        &self,
        validated: &SemanticValidation,
        tenant: &TenantContext,
        original_filename: &str,
        source_uri: Option<&str>,
        source_doc_id: &str,
    ) -> PayloadOutcome {
        let fallback = fallback_payload(
            validated,
            tenant,
            original_filename,
            source_uri,
            source_doc_id,
        );

        let backend = match &self.backend {
            Some(backend) => backend,
            None => {
                return PayloadOutcome {
                    payload: fallback,
                    errors: vec!["ai_not_configured_structured_payload".to_string()],
                };
            }
        };

        let tenant_context = serde_json::json!({
            "companyId": tenant.company_id,
            "timezone": tenant.timezone,
            "currency_default": tenant.currency_default,
        });
        let validated_json = match serde_json::to_value(validated) {
            Ok(v) => v,
            Err(e) => {
                return PayloadOutcome {
                    payload: fallback,
                    errors: vec![format!("structured_payload_exception: {}", e)],
                };
            }
        };
        let prompt = PROMPT_TEMPLATE
            .replace("{{validated_doc}}", &validated_json.to_string())
            .replace("{{tenant_context}}", &tenant_context.to_string());

        match backend.complete("Retorne apenas JSON válido.", &prompt).await {
            Ok(content) => match serde_json::from_str::<Value>(&content) {
                Ok(parsed) => PayloadOutcome {
                    payload: coerce_payload(&parsed, fallback),
                    errors: Vec::new(),
                },
                Err(e) => PayloadOutcome {
                    payload: fallback,
                    errors: vec![format!("structured_payload_exception: {}", e)],
                },
            },
            Err(e) => PayloadOutcome {
                payload: fallback,
                errors: vec![format!("structured_payload_error: {}", e)],
            },
        }
    }
}

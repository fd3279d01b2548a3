//! The pipeline output data model.
//!
//! One `PipelineOutput` is produced per pipeline run. It is assembled
//! permissively (every upstream stage coerces untrusted data into these
//! types) and then checked strictly by the schema validator before it may
//! leave the pipeline.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Closed set of document classifications. Unrecognized values coerce to
/// `Outro`, never to a parse error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DocumentType {
    ExtratoBancario,
    Recibo,
    Ccb,
    FaturaCartao,
    FaturaTelefone,
    Nfe,
    Boleto,
    ComprovantePagamento,
    Outro,
}

impl DocumentType {
    pub const ALL: [DocumentType; 9] = [
        DocumentType::ExtratoBancario,
        DocumentType::Recibo,
        DocumentType::Ccb,
        DocumentType::FaturaCartao,
        DocumentType::FaturaTelefone,
        DocumentType::Nfe,
        DocumentType::Boleto,
        DocumentType::ComprovantePagamento,
        DocumentType::Outro,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentType::ExtratoBancario => "EXTRATO_BANCARIO",
            DocumentType::Recibo => "RECIBO",
            DocumentType::Ccb => "CCB",
            DocumentType::FaturaCartao => "FATURA_CARTAO",
            DocumentType::FaturaTelefone => "FATURA_TELEFONE",
            DocumentType::Nfe => "NFE",
            DocumentType::Boleto => "BOLETO",
            DocumentType::ComprovantePagamento => "COMPROVANTE_PAGAMENTO",
            DocumentType::Outro => "OUTRO",
        }
    }

    /// Permissive parse: trims, uppercases, and coerces anything outside the
    /// enum to `Outro`.
    pub fn from_raw(value: &str) -> Self {
        let normalized = value.trim().to_uppercase();
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == normalized)
            .unwrap_or(DocumentType::Outro)
    }
}

/// Downstream processing route decided by the route classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RouteDocType {
    BankStatement,
    Invoice,
    Boleto,
    Receipt,
    Contract,
    Other,
    Reject,
}

impl RouteDocType {
    pub const ALL: [RouteDocType; 7] = [
        RouteDocType::BankStatement,
        RouteDocType::Invoice,
        RouteDocType::Boleto,
        RouteDocType::Receipt,
        RouteDocType::Contract,
        RouteDocType::Other,
        RouteDocType::Reject,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RouteDocType::BankStatement => "BANK_STATEMENT",
            RouteDocType::Invoice => "INVOICE",
            RouteDocType::Boleto => "BOLETO",
            RouteDocType::Receipt => "RECEIPT",
            RouteDocType::Contract => "CONTRACT",
            RouteDocType::Other => "OTHER",
            RouteDocType::Reject => "REJECT",
        }
    }

    /// Strict membership check used when coercing AI output. Returns `None`
    /// (caller substitutes its fallback) instead of inventing a value.
    pub fn from_exact(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SecurityFlag {
    PiiDetected,
    SuspectedCredentials,
    None,
}

impl SecurityFlag {
    pub fn from_exact(value: &str) -> Option<Self> {
        match value {
            "PII_DETECTED" => Some(SecurityFlag::PiiDetected),
            "SUSPECTED_CREDENTIALS" => Some(SecurityFlag::SuspectedCredentials),
            "NONE" => Some(SecurityFlag::None),
            _ => Option::None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionKind {
    Credit,
    Debit,
}

/// File identity: path, name, detected MIME type, size, and the SHA-256
/// content hash that doubles as the artifact id.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceDescriptor {
    pub path: String,
    pub filename: String,
    pub mime_type: String,
    pub size_bytes: u64,
    pub sha256: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Extraction {
    pub method: String,
    pub text: String,
    pub pages: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Classification {
    pub document_type: DocumentType,
    pub confidence: f64,
    pub summary: String,
    pub tags: Vec<String>,
}

/// Fields extracted from the document. Everything is nullable — the analyzer
/// must never invent data — except the fixed tenant currency.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedFields {
    pub issuer_name: Option<String>,
    pub issuer_id: Option<String>,
    pub customer_name: Option<String>,
    pub customer_id: Option<String>,
    pub document_number: Option<String>,
    pub bank_name: Option<String>,
    pub account_last4: Option<String>,
    pub issue_date: Option<String>,
    pub due_date: Option<String>,
    pub period_start: Option<String>,
    pub period_end: Option<String>,
    pub total_amount: Option<f64>,
    pub currency: String,
    pub barcode: Option<String>,
    pub pix_key: Option<String>,
    pub nf_access_key: Option<String>,
}

impl Default for ExtractedFields {
    fn default() -> Self {
        Self {
            issuer_name: None,
            issuer_id: None,
            customer_name: None,
            customer_id: None,
            document_number: None,
            bank_name: None,
            account_last4: None,
            issue_date: None,
            due_date: None,
            period_start: None,
            period_end: None,
            total_amount: None,
            currency: "BRL".to_string(),
            barcode: None,
            pix_key: None,
            nf_access_key: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedTransaction {
    pub date: String,
    pub description: String,
    pub amount: f64,
    #[serde(rename = "type")]
    pub kind: TransactionKind,
    pub category_guess: Option<String>,
    pub confidence: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedStatement {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bank_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account_last4: Option<String>,
    pub currency: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub period_start: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub period_end: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub opening_balance: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub closing_balance: Option<f64>,
    pub transactions: Vec<NormalizedTransaction>,
}

impl NormalizedStatement {
    pub fn empty() -> Self {
        Self {
            bank_name: None,
            account_last4: None,
            currency: "BRL".to_string(),
            period_start: None,
            period_end: None,
            opening_balance: None,
            closing_balance: None,
            transactions: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ValidationIssue {
    pub fn new(code: &str, message: &str) -> Self {
        Self {
            code: code.to_string(),
            message: Some(message.to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SemanticValidation {
    pub is_valid: bool,
    pub confidence_overall: f64,
    pub normalized: NormalizedStatement,
    pub issues: Vec<ValidationIssue>,
    pub needs_human_review: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteClassification {
    pub doc_type: RouteDocType,
    pub confidence: f64,
    pub reasons: Vec<String>,
    pub route: String,
    pub security_flags: Vec<SecurityFlag>,
}

impl RouteClassification {
    pub fn is_skip(&self) -> bool {
        self.doc_type == RouteDocType::Reject || self.route == "skip"
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerAccount {
    pub external_ref: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bank_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last4: Option<String>,
    pub currency: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerTransaction {
    pub account_ref: String,
    pub date: String,
    pub description: String,
    pub amount: f64,
    #[serde(rename = "type")]
    pub kind: TransactionKind,
    pub category: String,
    pub source_doc_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentSummary {
    pub source: String,
    #[serde(rename = "originalFilename")]
    pub original_filename: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub period_start: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub period_end: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub closing_balance: Option<f64>,
    #[serde(default)]
    pub issues: Vec<String>,
    #[serde(rename = "accuracyScore", skip_serializing_if = "Option::is_none")]
    pub accuracy_score: Option<f64>,
}

/// Tenant-scoped persistence payload: accounts + ledger line items + document
/// metadata, ready for ledger import.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StructuredPayload {
    pub company_id: String,
    pub accounts: Vec<LedgerAccount>,
    pub transactions: Vec<LedgerTransaction>,
    pub document: DocumentSummary,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactRefs {
    pub json_url: Option<String>,
    pub original_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Timestamps {
    #[serde(rename = "processedAt")]
    pub processed_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineOutput {
    pub id: String,
    pub source: SourceDescriptor,
    pub extraction: Extraction,
    pub classification: Classification,
    pub fields: ExtractedFields,
    #[serde(rename = "semanticValidation")]
    pub semantic_validation: SemanticValidation,
    #[serde(rename = "routeClassification")]
    pub route_classification: RouteClassification,
    #[serde(rename = "persistencePayload")]
    pub persistence_payload: StructuredPayload,
    pub artifacts: ArtifactRefs,
    pub errors: Vec<String>,
    pub timestamps: Timestamps,
}

/// RFC3339 UTC timestamp with millisecond precision and `Z` suffix, the one
/// format the output schema accepts.
pub fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

impl PipelineOutput {
    /// A complete, schema-valid baseline for the given source. Every stage
    /// overwrites its own section; untouched sections stay at these safe
    /// defaults so a fully degraded run still produces a valid artifact.
    pub fn base(source: SourceDescriptor, company_id: &str) -> Self {
        let filename = source.filename.clone();
        Self {
            id: source.sha256.clone(),
            source,
            extraction: Extraction {
                method: "fallback".to_string(),
                text: String::new(),
                pages: None,
            },
            classification: Classification {
                document_type: DocumentType::Outro,
                confidence: 0.0,
                summary: String::new(),
                tags: Vec::new(),
            },
            fields: ExtractedFields::default(),
            semantic_validation: SemanticValidation {
                is_valid: false,
                confidence_overall: 0.0,
                normalized: NormalizedStatement::empty(),
                issues: Vec::new(),
                needs_human_review: true,
            },
            route_classification: RouteClassification {
                doc_type: RouteDocType::Other,
                confidence: 0.0,
                reasons: Vec::new(),
                route: "extract_other".to_string(),
                security_flags: vec![SecurityFlag::None],
            },
            persistence_payload: StructuredPayload {
                company_id: company_id.to_string(),
                accounts: Vec::new(),
                transactions: Vec::new(),
                document: DocumentSummary {
                    source: String::new(),
                    original_filename: filename,
                    period_start: None,
                    period_end: None,
                    closing_balance: None,
                    issues: Vec::new(),
                    accuracy_score: None,
                },
            },
            artifacts: ArtifactRefs::default(),
            errors: Vec::new(),
            timestamps: Timestamps {
                processed_at: now_iso(),
            },
        }
    }
}

//! End-to-end pipeline scenarios over the batch ingestion path.

use std::path::Path;
use std::sync::Arc;

use ledgerdoc::ai::StaticCompletionBackend;
use ledgerdoc::config::TenantContext;
use ledgerdoc::hash::sha256_hex;
use ledgerdoc::ingest::{self, IngestOptions};
use ledgerdoc::{Pipeline, SourceDescriptor};

fn offline_pipeline() -> Arc<Pipeline> {
    Arc::new(Pipeline::new(None, None, TenantContext::default()).unwrap())
}

fn ingest_options(input: &Path, output: &Path) -> IngestOptions {
    IngestOptions {
        input: input.to_path_buf(),
        output: output.to_path_buf(),
        quiet: true,
        ..Default::default()
    }
}

fn source_for(bytes: &[u8], filename: &str) -> SourceDescriptor {
    SourceDescriptor {
        path: format!("./input/{}", filename),
        filename: filename.to_string(),
        mime_type: "text/plain".to_string(),
        size_bytes: bytes.len() as u64,
        sha256: sha256_hex(bytes),
    }
}

#[tokio::test]
async fn bank_statement_without_ai_yields_schema_valid_degraded_artifact() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("input");
    let output = dir.path().join("output");
    std::fs::create_dir_all(&input).unwrap();

    let content = "extrato da conta corrente\nsaldo anterior 1.000,00\nsaldo final 850,00\n";
    std::fs::write(input.join("extrato_jan.txt"), content).unwrap();

    let summary = ingest::run(offline_pipeline(), None, ingest_options(&input, &output))
        .await
        .unwrap();
    assert_eq!(summary.success, 1);

    let artifact: serde_json::Value =
        serde_json::from_slice(&std::fs::read(&summary.outputs[0]).unwrap()).unwrap();

    assert_eq!(artifact["classification"]["documentType"], "EXTRATO_BANCARIO");
    assert_eq!(artifact["classification"]["confidence"], 0.7);
    assert_eq!(artifact["semanticValidation"]["needs_human_review"], true);
    assert_eq!(
        artifact["routeClassification"]["route"],
        "extract_bank_statement"
    );
    assert_eq!(artifact["routeClassification"]["doc_type"], "BANK_STATEMENT");
    assert_eq!(artifact["fields"]["currency"], "BRL");
    assert_eq!(artifact["id"], artifact["source"]["sha256"]);
    assert_eq!(
        artifact["source"]["sha256"].as_str().unwrap(),
        sha256_hex(content.as_bytes())
    );
}

#[tokio::test]
async fn cover_page_is_rejected_with_skip_route_but_still_produces_artifact() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("input");
    let output = dir.path().join("output");
    std::fs::create_dir_all(&input).unwrap();

    std::fs::write(input.join("capa.txt"), "").unwrap();

    let summary = ingest::run(offline_pipeline(), None, ingest_options(&input, &output))
        .await
        .unwrap();
    assert_eq!(summary.success, 1);

    let artifact: serde_json::Value =
        serde_json::from_slice(&std::fs::read(&summary.outputs[0]).unwrap()).unwrap();

    assert_eq!(artifact["routeClassification"]["doc_type"], "REJECT");
    assert_eq!(artifact["routeClassification"]["route"], "skip");
    assert_eq!(artifact["routeClassification"]["confidence"], 0.9);

    let errors: Vec<&str> = artifact["errors"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|e| e.as_str())
        .collect();
    assert!(errors.contains(&"route_skip_requested"));
    // The pipeline still ran to completion and produced a full payload block.
    assert!(artifact["persistencePayload"]["companyId"].is_string());
}

#[tokio::test]
async fn reprocessing_identical_bytes_yields_identical_ids() {
    let pipeline = offline_pipeline();
    let bytes = b"comprovante de pagamento via pix".as_slice();

    let first = pipeline
        .run(source_for(bytes, "a.txt"), bytes)
        .await
        .unwrap();
    let second = pipeline
        .run(source_for(bytes, "b.txt"), bytes)
        .await
        .unwrap();

    assert_eq!(first.id, second.id);
    assert_eq!(first.source.sha256, second.source.sha256);
}

#[tokio::test]
async fn hostile_ai_response_is_coerced_into_a_valid_artifact() {
    // One static response feeds all four AI-backed stages; every stage picks
    // its own keys and must clamp or discard what is out of contract.
    let response = serde_json::json!({
        "classification": {
            "documentType": "extrato_bancario",
            "confidence": 42.0,
            "summary": "Extrato mensal",
            "tags": ["extrato", 3, null]
        },
        "fields": {
            "bankName": "Banco Alfa",
            "accountLast4": "4821",
            "issueDate": "31/01/2026",
            "totalAmount": "850,00"
        },
        "is_valid": true,
        "confidence_overall": -3.0,
        "normalized": {
            "bank_name": "Banco Alfa",
            "account_last4": "4821",
            "currency": "BRL",
            "transactions": [
                {"date": "2026-01-10", "description": "PIX recebido", "amount": -200.0, "type": "CREDIT", "confidence": 9.9},
                {"date": "", "description": "inválida", "amount": 1.0}
            ]
        },
        "issues": [{"message": "sem código"}],
        "needs_human_review": false,
        "doc_type": "BANK_STATEMENT",
        "confidence": 7.5,
        "reasons": ["termos de extrato"],
        "route": "extract_bank_statement",
        "security_flags": [],
        "companyId": "  ",
        "accounts": [{"externalRef": "Banco Alfa_4821", "currency": "BRL"}],
        "transactions": [
            {"accountRef": "conta-fantasma", "date": "2026-01-10", "description": "PIX recebido", "amount": -200.0, "type": "CREDIT"}
        ],
        "document": {"accuracyScore": 3.0}
    })
    .to_string();

    let backend = Arc::new(StaticCompletionBackend::new(response));
    let pipeline = Pipeline::new(None, Some(backend), TenantContext::default()).unwrap();

    let bytes = b"extrato saldo anterior saldo final".as_slice();
    let output = pipeline
        .run(source_for(bytes, "extrato.txt"), bytes)
        .await
        .unwrap();

    // Classification clamped and filtered.
    assert_eq!(output.classification.confidence, 1.0);
    assert_eq!(output.classification.tags, vec!["extrato"]);
    assert_eq!(output.fields.issue_date.as_deref(), Some("2026-01-31"));
    assert_eq!(output.fields.total_amount, Some(850.0));

    // Semantic validation clamped; malformed transaction dropped; issue
    // labeled with the default code.
    assert_eq!(output.semantic_validation.confidence_overall, 0.0);
    assert_eq!(output.semantic_validation.normalized.transactions.len(), 1);
    assert_eq!(output.semantic_validation.issues[0].code, "UNKNOWN_ISSUE");

    // Route confidence clamped and empty security flags replaced.
    assert_eq!(output.route_classification.confidence, 1.0);
    assert_eq!(output.route_classification.security_flags.len(), 1);

    // Payload anchored to known accounts, CREDIT forced positive, blank
    // company id replaced by the tenant's.
    let tx = &output.persistence_payload.transactions[0];
    assert_eq!(tx.account_ref, "Banco Alfa_4821");
    assert!(tx.amount > 0.0);
    assert_eq!(output.persistence_payload.company_id, "unknown-company");
    assert_eq!(
        output.persistence_payload.document.accuracy_score,
        Some(1.0)
    );
}

#[tokio::test]
async fn credential_language_raises_security_flag_end_to_end() {
    let pipeline = offline_pipeline();
    let bytes =
        "documento interno: senha do internet banking e numero do cartao anexos".as_bytes();
    let output = pipeline
        .run(source_for(bytes, "credenciais.txt"), bytes)
        .await
        .unwrap();

    let flags: Vec<String> = output
        .route_classification
        .security_flags
        .iter()
        .map(|f| serde_json::to_string(f).unwrap().trim_matches('"').to_string())
        .collect();
    assert!(flags.contains(&"SUSPECTED_CREDENTIALS".to_string()));
}

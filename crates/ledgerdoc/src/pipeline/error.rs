use thiserror::Error;

/// Violation of the final output contract.
///
/// This is the only error the pipeline raises. It indicates a defect in one
/// of the upstream coercion stages, not a legitimate external-data problem,
/// so it propagates instead of being caught and retried.
#[derive(Debug, Error)]
pub enum SchemaViolation {
    #[error("embedded output schema is invalid: {0}")]
    InvalidSchema(String),

    #[error("pipeline output violates contract: {0}")]
    Contract(String),

    #[error("failed to serialize pipeline output: {0}")]
    Serialize(#[from] serde_json::Error),
}

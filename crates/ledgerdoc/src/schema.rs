//! Final contract check over the complete pipeline output.
//!
//! This is the only stage permitted to hard-fail the pipeline: a violation
//! here means an upstream coercion function let an invalid value through,
//! which is an internal defect rather than bad external data.

use crate::pipeline::output::PipelineOutput;
use crate::pipeline::SchemaViolation;

const OUTPUT_SCHEMA: &str = include_str!("../schema/pipeline-output-v1.json");

pub struct OutputValidator {
    compiled: jsonschema::Validator,
}

impl OutputValidator {
    pub fn new() -> Result<Self, SchemaViolation> {
        let schema: serde_json::Value = serde_json::from_str(OUTPUT_SCHEMA)
            .map_err(|e| SchemaViolation::InvalidSchema(e.to_string()))?;

        let compiled = jsonschema::validator_for(&schema)
            .map_err(|e| SchemaViolation::InvalidSchema(e.to_string()))?;

        Ok(Self { compiled })
    }

    /// Validates the serialized output against the embedded schema.
    pub fn validate(&self, output: &PipelineOutput) -> Result<(), SchemaViolation> {
        let value = serde_json::to_value(output)?;

        let mut errors = self.compiled.iter_errors(&value).peekable();
        if errors.peek().is_some() {
            let messages: Vec<String> = errors
                .map(|e| format!("{} at {}", e, e.instance_path()))
                .collect();
            return Err(SchemaViolation::Contract(messages.join("; ")));
        }

        Ok(())
    }
}

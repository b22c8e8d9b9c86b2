use async_trait::async_trait;
use serde_json::Value;

use crate::error::AppError;
use crate::pipeline::{PipelineContext, PipelineStage};

/// Normalizes raw candidate info into the profile used by the matching
/// prompts. Null and empty-string fields are dropped so the prompts only
/// carry information the candidate actually provided.
pub struct CandidateProfileStage;

fn normalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let cleaned: serde_json::Map<String, Value> = map
                .iter()
                .filter(|(_, v)| !is_empty(v))
                .map(|(k, v)| (k.clone(), normalize(v)))
                .collect();
            Value::Object(cleaned)
        }
        Value::Array(items) => Value::Array(
            items
                .iter()
                .filter(|v| !is_empty(v))
                .map(normalize)
                .collect(),
        ),
        other => other.clone(),
    }
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

#[async_trait]
impl PipelineStage for CandidateProfileStage {
    fn name(&self) -> &'static str {
        "CandidateProfile"
    }

    fn description(&self) -> &'static str {
        "Normalizes raw candidate info into a profile"
    }

    fn can_skip(&self, ctx: &PipelineContext) -> bool {
        matches!(&ctx.candidate_profile, Some(Value::Object(map)) if !map.is_empty())
    }

    fn validate(&self, ctx: &PipelineContext) -> Result<(), AppError> {
        match &ctx.candidate_info {
            Value::Object(map) if !map.is_empty() => Ok(()),
            Value::Object(_) => Err(AppError::Validation(
                "Candidate information cannot be empty".into(),
            )),
            _ => Err(AppError::Validation(
                "Candidate information must be an object".into(),
            )),
        }
    }

    async fn execute(&self, ctx: &mut PipelineContext) -> Result<(), AppError> {
        let profile = normalize(&ctx.candidate_info);
        match &profile {
            Value::Object(map) if !map.is_empty() => {
                tracing::info!(fields = map.len(), "Candidate profile processed");
                ctx.candidate_profile = Some(profile);
                Ok(())
            }
            _ => Err(AppError::Validation(
                "Candidate information contained no usable fields".into(),
            )),
        }
    }

    async fn on_error(&self, error: &AppError, ctx: &mut PipelineContext) {
        tracing::error!(
            error = %error,
            user_id = %ctx.user_id,
            field_count = ctx.candidate_info.as_object().map_or(0, |m| m.len()),
            "Candidate profile processing failed"
        );
    }
}

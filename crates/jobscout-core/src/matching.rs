//! Prompt assembly and response handling for the two inference calls.
//!
//! The shortlist call sees every newly-discovered link plus the CV and
//! candidate profile; the deep-analysis call sees a batch of shortlisted
//! postings with their full page content. Both calls are schema-
//! constrained, and responses are validated against the same schema
//! before parsing so a malformed model reply surfaces as an inference
//! error instead of a silent partial parse.

use serde_json::{Value, json};

use crate::error::AppError;
use crate::organization::{AnalysisResult, MatchedJob, PostingLink};

pub const SYSTEM_ROLE: &str = "You are an experienced technical recruiter assisting a software \
engineer with their job search. You evaluate postings strictly against the candidate's CV and \
stated preferences, and you respond only with JSON matching the requested schema.";

pub const FIRST_SELECTION_TASK: &str = "From the list of scraped career-page links below, select \
the postings that are plausibly relevant to the candidate. Judge only by title and surrounding \
context; when in doubt, include the posting. Exclude links that are clearly not job postings.";

pub const JOB_POST_DEEP_DIVE: &str = "For each job posting below, produce a detailed suitability \
analysis: concrete reasons the role fits, points the candidate should weigh before applying, \
skills the role would stretch, and an overall 0-100 suitability score. Score 0 only when the \
role is clearly unsuitable.";

/// A shortlisted posting paired with its fetched page content, ready for
/// deep analysis.
#[derive(Debug, Clone)]
pub struct JobForAnalysis {
    pub title: String,
    pub url: String,
    pub content: String,
}

/// Response schema for the shortlist call.
pub fn initial_match_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "recommendedPositions": {
                "type": "array",
                "description": "Job postings that are a potential good fit for the candidate based on an initial screening.",
                "items": {
                    "type": "object",
                    "properties": {
                        "title": {"type": "string", "description": "The title of the job position."},
                        "url": {"type": "string", "description": "The direct URL to the job posting."}
                    },
                    "required": ["title", "url"]
                }
            }
        },
        "required": ["recommendedPositions"]
    })
}

/// Response schema for the batch deep-analysis call.
pub fn deep_analysis_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "analysisResults": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "title": {"type": "string"},
                        "url": {"type": "string"},
                        "goodFitReasons": {
                            "type": "array",
                            "description": "Reasons this job is a strong match for the candidate.",
                            "items": {"type": "string"}
                        },
                        "considerationPoints": {
                            "type": "array",
                            "description": "Concerns or risks the candidate should consider.",
                            "items": {"type": "string"}
                        },
                        "stretchGoals": {
                            "type": "array",
                            "description": "Skills the candidate would grow into in this role.",
                            "items": {"type": "string"}
                        },
                        "suitabilityScore": {
                            "type": "integer",
                            "description": "Overall suitability from 0 to 100.",
                            "minimum": 0,
                            "maximum": 100
                        },
                        "location": {"type": "string"},
                        "techStack": {"type": "array", "items": {"type": "string"}},
                        "salary": {"type": "string"},
                        "experienceLevel": {"type": "string"},
                        "languageRequirements": {"type": "array", "items": {"type": "string"}},
                        "visaSponsorshipOffered": {"type": "boolean"},
                        "relocationAssistanceOffered": {"type": "boolean"}
                    },
                    "required": [
                        "title",
                        "url",
                        "goodFitReasons",
                        "considerationPoints",
                        "stretchGoals",
                        "suitabilityScore"
                    ]
                }
            }
        },
        "required": ["analysisResults"]
    })
}

/// Render a candidate-info JSON value as nested XML-ish tags.
///
/// The inference prompts delimit structured sections with tags; keys are
/// stripped to alphanumerics to keep the markup well formed.
pub fn profile_to_xml(value: &Value) -> String {
    fn render(value: &Value, parent_tag: Option<&str>) -> String {
        match value {
            Value::Null => String::new(),
            Value::Array(items) => items
                .iter()
                .map(|item| render(item, parent_tag))
                .collect::<Vec<_>>()
                .join(""),
            Value::Object(map) => map
                .iter()
                .map(|(key, val)| {
                    let tag: String = key.chars().filter(char::is_ascii_alphanumeric).collect();
                    render(val, Some(&tag))
                })
                .collect::<Vec<_>>()
                .join(""),
            scalar => {
                let tag = parent_tag
                    .filter(|t| !t.is_empty())
                    .unwrap_or("value");
                let text = match scalar {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                format!("<{tag}>{text}</{tag}>")
            }
        }
    }
    render(value, None)
}

/// Prompt for the shortlist call over all newly-seen links.
pub fn build_initial_match_prompt(
    links: &[PostingLink],
    cv_content: &str,
    candidate_profile: &Value,
) -> String {
    let mut prompt = format!(
        "{SYSTEM_ROLE}\n{FIRST_SELECTION_TASK}\n\
         Analyze these job postings based on the candidate's profile and the following CV content.\n\
         <CandidateProfile>{}</CandidateProfile>\n\
         <CVContent>{cv_content}</CVContent>\n\
         Links to analyze:",
        profile_to_xml(candidate_profile)
    );
    for link in links {
        prompt.push_str(&format!(
            "\nTitle: {}\nURL: {}\nContext: {}",
            link.text, link.url, link.context
        ));
    }
    prompt
}

/// Prompt for one deep-analysis batch.
pub fn build_deep_analysis_prompt(
    batch: &[JobForAnalysis],
    cv_content: &str,
    candidate_profile: &Value,
) -> String {
    let jobs = batch
        .iter()
        .map(|job| {
            format!(
                "<Job><Title>{}</Title><URL>{}</URL><Content>{}</Content></Job>",
                job.title, job.url, job.content
            )
        })
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "{SYSTEM_ROLE}\n{JOB_POST_DEEP_DIVE}\n\
         <CandidateProfile>{}</CandidateProfile>\n\
         <CVContent>{cv_content}</CVContent>\n\
         <JobsToAnalyze>\n{jobs}\n</JobsToAnalyze>",
        profile_to_xml(candidate_profile)
    )
}

/// Check a model response against the schema it was asked to follow.
pub fn validate_response(schema: &Value, response: &Value) -> Result<(), AppError> {
    let validator = jsonschema::validator_for(schema).map_err(|e| AppError::Inference {
        message: format!("Invalid response schema: {e}"),
        status_code: 0,
        retryable: false,
    })?;
    if let Err(error) = validator.validate(response) {
        return Err(AppError::Inference {
            message: format!("Model response does not match schema: {error}"),
            status_code: 200,
            retryable: false,
        });
    }
    Ok(())
}

/// Parse a validated shortlist response into matched jobs.
pub fn parse_initial_match_response(response: &Value) -> Result<Vec<MatchedJob>, AppError> {
    validate_response(&initial_match_schema(), response)?;
    let positions = response
        .get("recommendedPositions")
        .cloned()
        .unwrap_or(Value::Array(vec![]));
    Ok(serde_json::from_value(positions)?)
}

/// Parse a validated deep-analysis response into per-job results.
pub fn parse_deep_analysis_response(response: &Value) -> Result<Vec<AnalysisResult>, AppError> {
    validate_response(&deep_analysis_schema(), response)?;
    let results = response
        .get("analysisResults")
        .cloned()
        .unwrap_or(Value::Array(vec![]));
    Ok(serde_json::from_value(results)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profile_xml_nests_objects_and_strips_tag_punctuation() {
        let profile = json!({
            "skills": {"primary-language": "Rust", "years": 4},
            "locations": ["Berlin", "Remote"]
        });
        let xml = profile_to_xml(&profile);
        assert!(xml.contains("<primarylanguage>Rust</primarylanguage>"));
        assert!(xml.contains("<years>4</years>"));
        assert!(xml.contains("<locations>Berlin</locations>"));
        assert!(xml.contains("<locations>Remote</locations>"));
    }

    #[test]
    fn initial_match_prompt_lists_every_link() {
        let links = vec![
            PostingLink::new("https://a.example/1", "Backend Engineer").with_context("Engineering"),
            PostingLink::new("https://a.example/2", "Data Engineer"),
        ];
        let prompt = build_initial_match_prompt(&links, "cv text", &json!({"name": "Sam"}));
        assert!(prompt.contains("Backend Engineer"));
        assert!(prompt.contains("https://a.example/2"));
        assert!(prompt.contains("<CVContent>cv text</CVContent>"));
        assert!(prompt.contains("<name>Sam</name>"));
    }

    #[test]
    fn parse_initial_match_accepts_valid_response() {
        let response = json!({
            "recommendedPositions": [
                {"title": "Backend Engineer", "url": "https://a.example/1"}
            ]
        });
        let jobs = parse_initial_match_response(&response).unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].url, "https://a.example/1");
    }

    #[test]
    fn parse_initial_match_rejects_missing_field() {
        let response = json!({"recommendedPositions": [{"title": "no url"}]});
        let err = parse_initial_match_response(&response).unwrap_err();
        assert!(matches!(err, AppError::Inference { .. }));
    }

    #[test]
    fn parse_deep_analysis_accepts_optional_fields() {
        let response = json!({
            "analysisResults": [{
                "title": "Rust Engineer",
                "url": "https://a.example/1",
                "goodFitReasons": ["systems experience"],
                "considerationPoints": [],
                "stretchGoals": ["distributed consensus"],
                "suitabilityScore": 72,
                "techStack": ["Rust", "Postgres"],
                "visaSponsorshipOffered": true
            }]
        });
        let results = parse_deep_analysis_response(&response).unwrap();
        assert_eq!(results[0].suitability_score, 72);
        assert_eq!(results[0].tech_stack.as_deref(), Some(&["Rust".to_string(), "Postgres".to_string()][..]));
        assert_eq!(results[0].visa_sponsorship_offered, Some(true));
    }

    #[test]
    fn parse_deep_analysis_rejects_out_of_range_score() {
        let response = json!({
            "analysisResults": [{
                "title": "t",
                "url": "u",
                "goodFitReasons": [],
                "considerationPoints": [],
                "stretchGoals": [],
                "suitabilityScore": 150
            }]
        });
        assert!(parse_deep_analysis_response(&response).is_err());
    }

    #[test]
    fn deep_analysis_prompt_embeds_batch_content() {
        let batch = vec![JobForAnalysis {
            title: "Platform Engineer".into(),
            url: "https://a.example/3".into(),
            content: "We run a large Rust codebase.".into(),
        }];
        let prompt = build_deep_analysis_prompt(&batch, "cv", &json!({}));
        assert!(prompt.contains("<Title>Platform Engineer</Title>"));
        assert!(prompt.contains("large Rust codebase"));
    }
}

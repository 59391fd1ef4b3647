use serde::{Deserialize, Serialize};
use serde_json::Value;
use validator::Validate;

use super::errors::GradingError;

pub(crate) const ERROR_TYPES: [&str; 10] = [
    "grammar",
    "vocabulary",
    "structure",
    "content",
    "coherence",
    "spelling",
    "punctuation",
    "style",
    "clarity",
    "other",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub(crate) struct DimensionScores {
    #[validate(range(min = 0.0, max = 20.0, message = "grammar must be within 0..20"))]
    pub(crate) grammar: f64,
    #[validate(range(min = 0.0, max = 20.0, message = "vocabulary must be within 0..20"))]
    pub(crate) vocabulary: f64,
    #[validate(range(min = 0.0, max = 20.0, message = "structure must be within 0..20"))]
    pub(crate) structure: f64,
    #[validate(range(min = 0.0, max = 20.0, message = "content must be within 0..20"))]
    pub(crate) content: f64,
    #[validate(range(min = 0.0, max = 20.0, message = "coherence must be within 0..20"))]
    pub(crate) coherence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(range(min = 0.0, max = 20.0, message = "handwritingClarity must be within 0..20"))]
    pub(crate) handwriting_clarity: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub(crate) struct EssayError {
    #[serde(rename = "type")]
    pub(crate) kind: String,
    pub(crate) message: String,
    pub(crate) original: String,
    pub(crate) suggestion: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(range(min = 0, message = "startIndex must be non-negative"))]
    pub(crate) start_index: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(range(min = 0, message = "endIndex must be non-negative"))]
    pub(crate) end_index: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Suggestions {
    pub(crate) low: Vec<String>,
    pub(crate) mid: Vec<String>,
    pub(crate) high: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) rewrite: Option<String>,
    pub(crate) sample_essay: String,
}

/// Structured feedback stored in `submissions.grading_json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GradingResult {
    #[validate(range(min = 0.0, max = 100.0, message = "totalScore must be within 0..100"))]
    pub(crate) total_score: f64,
    #[validate(nested)]
    pub(crate) dimension_scores: DimensionScores,
    #[validate(nested)]
    pub(crate) errors: Vec<EssayError>,
    pub(crate) suggestions: Suggestions,
    #[validate(length(max = 300, message = "summary must be at most 300 characters"))]
    pub(crate) summary: String,
    #[validate(length(max = 8, message = "nextSteps must contain at most 8 items"))]
    pub(crate) next_steps: Vec<String>,
}

/// Checks a parsed model reply against the result shape.
pub(crate) fn validate_result(value: Value) -> Result<GradingResult, GradingError> {
    let result: GradingResult = serde_json::from_value(value)
        .map_err(|err| GradingError::schema_invalid(format!("Schema validation failed: {err}")))?;
    result
        .validate()
        .map_err(|err| GradingError::schema_invalid(format!("Schema validation failed: {err}")))?;

    if let Some(unknown) =
        result.errors.iter().find(|error| !ERROR_TYPES.contains(&error.kind.as_str()))
    {
        return Err(GradingError::schema_invalid(format!(
            "Schema validation failed: unknown error type `{}`",
            unknown.kind
        )));
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::validate_result;
    use crate::services::grading::errors::GradingErrorCode;
    use crate::test_support;

    #[test]
    fn accepts_well_formed_result() {
        let result = validate_result(test_support::grading_result_json()).expect("valid");

        assert_eq!(result.total_score, 72.0);
        assert_eq!(result.errors[0].kind, "grammar");
        assert_eq!(result.suggestions.rewrite, None);
    }

    #[test]
    fn rejects_dimension_out_of_range() {
        let mut value = test_support::grading_result_json();
        value["dimensionScores"]["grammar"] = json!(25);

        let err = validate_result(value).expect_err("out of range");

        assert_eq!(err.code, GradingErrorCode::SchemaInvalid);
        assert!(err.message.contains("grammar"));
    }

    #[test]
    fn rejects_unknown_error_type() {
        let mut value = test_support::grading_result_json();
        value["errors"][0]["type"] = json!("tone");

        let err = validate_result(value).expect_err("unknown type");

        assert!(err.message.contains("tone"));
    }

    #[test]
    fn rejects_missing_fields() {
        let mut value = test_support::grading_result_json();
        value.as_object_mut().expect("object").remove("suggestions");

        let err = validate_result(value).expect_err("missing field");

        assert_eq!(err.code, GradingErrorCode::SchemaInvalid);
        assert!(err.message.contains("suggestions"));
    }

    #[test]
    fn rejects_long_summary_and_too_many_steps() {
        let mut value = test_support::grading_result_json();
        value["summary"] = json!("x".repeat(301));
        assert!(validate_result(value).is_err());

        let mut value = test_support::grading_result_json();
        value["nextSteps"] = json!(vec!["practice"; 9]);
        assert!(validate_result(value).is_err());
    }

    #[test]
    fn rejects_negative_indexes() {
        let mut value = test_support::grading_result_json();
        value["errors"][0]["startIndex"] = json!(-1);

        assert!(validate_result(value).is_err());
    }
}

//! Session pipeline orchestration
//!
//! Public entry points for turning session JSON into features and validation
//! results. The stages are: parse → extract features → attach → validate.

use crate::config::ValidationConfig;
use crate::error::TraceError;
use crate::features::FeatureExtractor;
use crate::types::{DatasetReport, FeatureVector, Session, ValidationResult};
use crate::validation::{DatasetValidator, SessionValidator};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use tracing::debug;

const NON_FINITE_TOKENS: [&str; 3] = ["NaN", "Infinity", "-Infinity"];

/// Quote the bare `NaN`, `Infinity` and `-Infinity` tokens that Python's
/// `json.dump` writes, so the document parses as JSON. String contents are
/// left alone.
pub fn quote_non_finite(json: &str) -> Cow<'_, str> {
    if !json.contains("NaN") && !json.contains("Infinity") {
        return Cow::Borrowed(json);
    }

    let mut out = String::with_capacity(json.len() + 8);
    let mut in_string = false;
    let mut escaped = false;
    let mut rest = json;

    while let Some(c) = rest.chars().next() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
        } else if c == '"' {
            in_string = true;
        } else if let Some(token) = NON_FINITE_TOKENS.iter().find(|t| rest.starts_with(**t)) {
            out.push('"');
            out.push_str(token);
            out.push('"');
            rest = &rest[token.len()..];
            continue;
        }

        out.push(c);
        rest = &rest[c.len_utf8()..];
    }

    Cow::Owned(out)
}

/// Parse a session JSON document
pub fn parse_session(json: &str) -> Result<Session, TraceError> {
    serde_json::from_str(&quote_non_finite(json))
        .map_err(|e| TraceError::ParseError(format!("Failed to parse session: {}", e)))
}

/// Parse a JSON array of sessions
pub fn parse_sessions(json: &str) -> Result<Vec<Session>, TraceError> {
    serde_json::from_str(&quote_non_finite(json))
        .map_err(|e| TraceError::ParseError(format!("Failed to parse sessions: {}", e)))
}

/// Convert session JSON to feature JSON (stateless, one-shot).
///
/// # Example
/// ```ignore
/// let features_json = session_to_features(session_json)?;
/// ```
pub fn session_to_features(session_json: &str) -> Result<String, TraceError> {
    let session = parse_session(session_json)?;
    let features = FeatureExtractor::extract(&session);
    Ok(serde_json::to_string(&features)?)
}

/// Validate a JSON array of sessions and return the dataset report as JSON
pub fn validate_dataset_json(sessions_json: &str) -> Result<String, TraceError> {
    let sessions = parse_sessions(sessions_json)?;
    let report = DatasetValidator::default().validate_all(&sessions);
    Ok(serde_json::to_string(&report)?)
}

/// A session with freshly extracted features and its validation verdict
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedSession {
    /// The session record with `features` replaced by the extracted values
    pub session: Session,
    pub features: FeatureVector,
    pub validation: ValidationResult,
}

/// Processor that extracts, attaches, and validates in one pass
#[derive(Debug, Clone, Default)]
pub struct SessionProcessor {
    validator: SessionValidator,
}

impl SessionProcessor {
    /// Create a processor with default validation thresholds
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a processor with custom validation thresholds
    pub fn with_validation(config: ValidationConfig) -> Self {
        Self {
            validator: SessionValidator::new(config),
        }
    }

    /// Process a parsed session
    pub fn process_session(&self, mut session: Session) -> ProcessedSession {
        let features = FeatureExtractor::extract(&session);
        session.attach_features(&features);
        let validation = self.validator.validate(&session);

        debug!(
            session_id = %session.session_id,
            valid = validation.valid,
            issues = validation.issues.len(),
            "session processed"
        );

        ProcessedSession {
            session,
            features,
            validation,
        }
    }

    /// Process a session JSON document
    pub fn process(&self, session_json: &str) -> Result<ProcessedSession, TraceError> {
        let session = parse_session(session_json)?;
        Ok(self.process_session(session))
    }

    /// Validate a batch of stored sessions as they are, without re-extracting
    pub fn validate_dataset(&self, sessions: &[Session]) -> DatasetReport {
        DatasetValidator::new(self.validator.config().clone()).validate_all(sessions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FeatureValue;
    use pretty_assertions::assert_eq;

    fn sample_session_json() -> &'static str {
        r#"{
            "sessionId": "sess-123",
            "studentId": "stu-1",
            "problemId": "loops-1",
            "schoolId": "north",
            "startTime": 0,
            "endTime": 2000,
            "stateHistory": ["A", "B", "C"],
            "events": [
                {"time": 0, "action": "init", "responseType": "X", "ast": "A"},
                {"time": 1000, "action": "moveOutput x", "responseType": "X", "ast": "B"},
                {"time": 1500, "action": "check", "responseType": "HINT_REQUEST", "ast": "B",
                 "feedback": "check the order of statements"},
                {"time": 2000, "action": "moveOutput y", "responseType": "X", "ast": "C"}
            ]
        }"#
    }

    #[test]
    fn test_session_to_features_stateless() {
        let json = session_to_features(sample_session_json()).unwrap();
        let features: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(features["totalTime"], 2000);
        assert_eq!(features["manipulationCount"], 2);
        assert_eq!(features["feedbackCount"], 1);
        assert_eq!(features["uniqueStates"], 3);
        assert_eq!(features["successRate"], 1.0);
        assert_eq!(features["incorrectPositionErrors"], 1);
        assert_eq!(features["incorrectIndentErrors"], 0);
    }

    #[test]
    fn test_processor_attaches_features_before_validating() {
        let processed = SessionProcessor::new().process(sample_session_json()).unwrap();

        let stored = processed.session.features.as_ref().unwrap();
        assert_eq!(stored.len(), 14);
        assert_eq!(stored.get("uniqueStates"), Some(&FeatureValue::Number(3.0)));

        // Four events is below the minimum; features and history are fine
        assert_eq!(
            processed.validation.issues,
            vec!["Too few events: 4 (minimum 5)"]
        );
    }

    #[test]
    fn test_processor_with_relaxed_thresholds() {
        let processor = SessionProcessor::with_validation(ValidationConfig {
            min_events: 2,
            ..Default::default()
        });
        let processed = processor.process(sample_session_json()).unwrap();
        assert!(processed.validation.valid);
    }

    #[test]
    fn test_invalid_json() {
        let result = session_to_features("not valid json");
        assert!(matches!(result, Err(TraceError::ParseError(_))));
    }

    #[test]
    fn test_validate_dataset_json_empty() {
        let json = validate_dataset_json("[]").unwrap();
        let report: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(report["total"], 0);
        assert_eq!(report["passRate"], 0.0);
        assert_eq!(report["commonIssues"], serde_json::json!([]));
    }

    #[test]
    fn test_validate_dataset_json_counts() {
        let json = format!("[{}]", sample_session_json());
        let report: DatasetReport =
            serde_json::from_str(&validate_dataset_json(&json).unwrap()).unwrap();

        assert_eq!(report.total, 1);
        assert_eq!(report.invalid, 1);
        assert!(report.common_issues.iter().any(|c| c.issue == "Missing feature: totalTime"));
    }

    fn stored_session(id: &str, features: &str) -> String {
        format!(
            r#"{{"sessionId": "{id}", "stateHistory": [],
                "events": [{{"time": 0, "action": "init"}}, {{"time": 1, "action": "init"}},
                           {{"time": 2, "action": "init"}}, {{"time": 3, "action": "init"}},
                           {{"time": 4, "action": "init"}}],
                "features": {features}}}"#
        )
    }

    const REQUIRED: &str = r#""totalTime": 1, "manipulationCount": 0, "feedbackCount": 0,
        "uniqueStates": 0, "successRate": 0, "consecutiveFailures": 0"#;

    #[test]
    fn test_non_numeric_feature_does_not_fail_the_report() {
        let json = format!(
            "[{}, {}]",
            stored_session("s1", &format!(r#"{{{REQUIRED}, "note": "abc"}}"#)),
            stored_session("s2", &format!("{{{REQUIRED}}}")),
        );
        let report: DatasetReport =
            serde_json::from_str(&validate_dataset_json(&json).unwrap()).unwrap();

        assert_eq!(report.total, 2);
        assert_eq!(report.valid, 2);
        assert_eq!(report.invalid_sessions, Some(vec![]));
    }

    #[test]
    fn test_bare_non_finite_tokens_become_issues() {
        let json = format!(
            "[{}]",
            stored_session(
                "s1",
                r#"{"totalTime": 1, "manipulationCount": 0, "feedbackCount": 0,
                    "uniqueStates": 0, "successRate": NaN, "consecutiveFailures": 0,
                    "stateChangeRate": -Infinity}"#
            ),
        );
        let report: DatasetReport =
            serde_json::from_str(&validate_dataset_json(&json).unwrap()).unwrap();

        assert_eq!(report.invalid, 1);
        let issues = &report.invalid_sessions.unwrap()[0].issues;
        assert_eq!(
            issues,
            &vec![
                "Invalid value for stateChangeRate: -inf".to_string(),
                "Invalid value for successRate: nan".to_string(),
            ]
        );
    }

    #[test]
    fn test_quote_non_finite_leaves_strings_alone() {
        assert_eq!(quote_non_finite(r#"{"a": 1}"#), Cow::Borrowed(r#"{"a": 1}"#));
        assert_eq!(
            quote_non_finite(r#"{"a": NaN, "b": [Infinity, -Infinity], "c": "NaN \" Infinity"}"#),
            r#"{"a": "NaN", "b": ["Infinity", "-Infinity"], "c": "NaN \" Infinity"}"#
        );
    }
}

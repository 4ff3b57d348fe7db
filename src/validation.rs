//! Session and dataset validation
//!
//! Validation describes bad data; it never rejects the call. Every rule is
//! evaluated and each problem becomes one issue string.

use crate::config::ValidationConfig;
use crate::types::{
    DatasetReport, FeatureValue, InvalidSessionSummary, IssueCount, Session, ValidationResult,
};
use std::collections::HashMap;
use tracing::info;

/// Per-session validator
#[derive(Debug, Clone, Default)]
pub struct SessionValidator {
    config: ValidationConfig,
}

impl SessionValidator {
    pub fn new(config: ValidationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ValidationConfig {
        &self.config
    }

    /// Validate a stored session record
    pub fn validate(&self, session: &Session) -> ValidationResult {
        let mut issues = Vec::new();

        self.check_event_count(session, &mut issues);
        self.check_required_features(session, &mut issues);
        check_feature_values(session, &mut issues);

        if session.state_history.is_none() {
            issues.push("Missing stateHistory".to_string());
        }

        ValidationResult::from_issues(issues)
    }

    fn check_event_count(&self, session: &Session, issues: &mut Vec<String>) {
        let count = session.events.len();
        if count < self.config.min_events {
            issues.push(format!(
                "Too few events: {} (minimum {})",
                count, self.config.min_events
            ));
        } else if count > self.config.max_events {
            issues.push(format!(
                "Too many events: {} (maximum {}, possible error)",
                count, self.config.max_events
            ));
        }
    }

    fn check_required_features(&self, session: &Session, issues: &mut Vec<String>) {
        for name in &self.config.required_features {
            let present = session
                .features
                .as_ref()
                .is_some_and(|features| features.contains_key(name));
            if !present {
                issues.push(format!("Missing feature: {}", name));
            }
        }
    }
}

/// Flag null and non-finite stored feature values. Non-numeric values are
/// not checked.
fn check_feature_values(session: &Session, issues: &mut Vec<String>) {
    let Some(features) = &session.features else {
        return;
    };

    for (name, value) in features {
        match value {
            FeatureValue::Null => issues.push(format!("Null feature: {}", name)),
            FeatureValue::Number(v) if !v.is_finite() => {
                issues.push(format!("Invalid value for {}: {}", name, non_finite_label(*v)))
            }
            FeatureValue::Number(_) | FeatureValue::Other(_) => {}
        }
    }
}

/// Lower-case rendering of a non-finite value (`nan`, `inf`, `-inf`)
fn non_finite_label(v: f64) -> &'static str {
    if v.is_nan() {
        "nan"
    } else if v > 0.0 {
        "inf"
    } else {
        "-inf"
    }
}

/// Corpus-level validator
#[derive(Debug, Clone, Default)]
pub struct DatasetValidator {
    session_validator: SessionValidator,
}

impl DatasetValidator {
    pub fn new(config: ValidationConfig) -> Self {
        Self {
            session_validator: SessionValidator::new(config),
        }
    }

    /// Validate every session and summarize the results
    pub fn validate_all(&self, sessions: &[Session]) -> DatasetReport {
        if sessions.is_empty() {
            return DatasetReport::empty();
        }

        let config = self.session_validator.config();
        let mut valid = 0usize;
        let mut tally = IssueTally::default();
        let mut invalid_sessions = Vec::new();

        for session in sessions {
            let result = self.session_validator.validate(session);
            if result.valid {
                valid += 1;
                continue;
            }

            for issue in &result.issues {
                tally.record(issue);
            }
            if invalid_sessions.len() < config.invalid_sample_limit {
                invalid_sessions.push(InvalidSessionSummary {
                    session_id: session.session_id.clone(),
                    issues: result.issues,
                });
            }
        }

        let total = sessions.len();
        let report = DatasetReport {
            total,
            valid,
            invalid: total - valid,
            pass_rate: valid as f64 / total as f64,
            common_issues: tally.most_common(config.top_issues),
            invalid_sessions: Some(invalid_sessions),
        };

        info!(
            total = report.total,
            valid = report.valid,
            pass_rate = report.pass_rate,
            "dataset validated"
        );

        report
    }
}

/// Issue frequency counter that remembers first-seen order
#[derive(Debug, Default)]
struct IssueTally {
    counts: Vec<IssueCount>,
    index: HashMap<String, usize>,
}

impl IssueTally {
    fn record(&mut self, issue: &str) {
        match self.index.get(issue) {
            Some(&idx) => self.counts[idx].count += 1,
            None => {
                self.index.insert(issue.to_string(), self.counts.len());
                self.counts.push(IssueCount {
                    issue: issue.to_string(),
                    count: 1,
                });
            }
        }
    }

    /// The `n` most frequent issues; ties keep first-seen order
    fn most_common(mut self, n: usize) -> Vec<IssueCount> {
        // sort_by is stable
        self.counts.sort_by(|a, b| b.count.cmp(&a.count));
        self.counts.truncate(n);
        self.counts
    }
}

/// Validate one session with the default thresholds
pub fn validate_session(session: &Session) -> ValidationResult {
    SessionValidator::default().validate(session)
}

/// Validate a dataset with the default thresholds
pub fn validate_dataset(sessions: &[Session]) -> DatasetReport {
    DatasetValidator::default().validate_all(sessions)
}

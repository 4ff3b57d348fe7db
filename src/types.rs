//! Session and feature types
//!
//! This module defines the event log records produced by the tutor, the fixed
//! behavioral feature vector derived from them, and the validation outputs.
//! JSON field names follow the tutor's camelCase session schema.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Response type string that marks a hint request
pub const HINT_REQUEST: &str = "HINT_REQUEST";

/// Canonical feature names, in matrix column order
pub const FEATURE_NAMES: [&str; 14] = [
    "totalTime",
    "timeToFirstFeedback",
    "avgTimeBetweenActions",
    "manipulationCount",
    "feedbackCount",
    "manipulationToFeedbackRatio",
    "uniqueStates",
    "stateChangeRate",
    "stateRevisits",
    "maxVisitsToState",
    "successRate",
    "consecutiveFailures",
    "incorrectPositionErrors",
    "incorrectIndentErrors",
];

/// Stored feature map as it appears on a persisted session record
pub type StoredFeatures = BTreeMap<String, FeatureValue>;

/// One value of a stored feature map.
///
/// Records written by other producers may carry `null`, non-finite numbers
/// (as the strings `"NaN"`, `"Infinity"`, `"-Infinity"`), or values that are
/// not numbers at all. None of these make a record unreadable.
#[derive(Debug, Clone, PartialEq)]
pub enum FeatureValue {
    Number(f64),
    Null,
    /// Any other JSON value, kept verbatim
    Other(Value),
}

impl FeatureValue {
    /// Numeric value, including non-finite ones
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FeatureValue::Number(v) => Some(*v),
            _ => None,
        }
    }

    fn from_json(value: Value) -> Self {
        match value {
            Value::Null => FeatureValue::Null,
            Value::Number(n) => match n.as_f64() {
                Some(v) => FeatureValue::Number(v),
                None => FeatureValue::Other(Value::Number(n)),
            },
            Value::String(s) => match s.as_str() {
                "NaN" => FeatureValue::Number(f64::NAN),
                "Infinity" => FeatureValue::Number(f64::INFINITY),
                "-Infinity" => FeatureValue::Number(f64::NEG_INFINITY),
                _ => FeatureValue::Other(Value::String(s)),
            },
            other => FeatureValue::Other(other),
        }
    }
}

impl From<f64> for FeatureValue {
    fn from(value: f64) -> Self {
        FeatureValue::Number(value)
    }
}

impl Serialize for FeatureValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            FeatureValue::Number(v) if v.is_nan() => serializer.serialize_str("NaN"),
            FeatureValue::Number(v) if v.is_infinite() => {
                serializer.serialize_str(if *v > 0.0 { "Infinity" } else { "-Infinity" })
            }
            FeatureValue::Number(v) => serializer.serialize_f64(*v),
            FeatureValue::Null => serializer.serialize_unit(),
            FeatureValue::Other(value) => value.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for FeatureValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Value::deserialize(deserializer).map(FeatureValue::from_json)
    }
}

/// Response classification of an event
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ResponseType {
    /// The student asked for a hint
    HintRequest,
    /// Any other response tag, kept verbatim
    Other(String),
    /// No tag recorded
    #[default]
    Unspecified,
}

impl ResponseType {
    pub fn is_hint(&self) -> bool {
        matches!(self, ResponseType::HintRequest)
    }
}

impl From<String> for ResponseType {
    fn from(value: String) -> Self {
        if value == HINT_REQUEST {
            ResponseType::HintRequest
        } else if value.is_empty() {
            ResponseType::Unspecified
        } else {
            ResponseType::Other(value)
        }
    }
}

impl From<ResponseType> for String {
    fn from(value: ResponseType) -> Self {
        match value {
            ResponseType::HintRequest => HINT_REQUEST.to_string(),
            ResponseType::Other(tag) => tag,
            ResponseType::Unspecified => String::new(),
        }
    }
}

/// A single recorded student action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "Map<String, Value>")]
pub struct Event {
    /// Timestamp in milliseconds
    pub time: i64,
    /// Free-text action label (`moveOutput`, `X-Hint.Widget`, ...)
    pub action: String,
    /// Response classification
    pub response_type: ResponseType,
    /// Program state snapshot after the action
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ast: Option<String>,
    /// Feedback text shown to the student
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feedback: Option<String>,
    /// Producer-specific metadata (hint payloads and the like)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    /// Keys not interpreted here (`output`, ...), written back unchanged
    #[serde(flatten)]
    pub extra: Map<String, Value>,
    /// The record exactly as it was read, when it came from JSON
    #[serde(skip)]
    pub source: Option<Map<String, Value>>,
}

/// Wire layout of an event record, with the accepted key aliases
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventFields {
    time: i64,
    #[serde(alias = "type")]
    action: String,
    #[serde(default, alias = "response_type")]
    response_type: ResponseType,
    #[serde(default)]
    ast: Option<String>,
    #[serde(default)]
    feedback: Option<String>,
    #[serde(default)]
    metadata: Option<Value>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

impl TryFrom<Map<String, Value>> for Event {
    type Error = serde_json::Error;

    fn try_from(record: Map<String, Value>) -> Result<Self, Self::Error> {
        let fields: EventFields = serde_json::from_value(Value::Object(record.clone()))?;
        Ok(Self {
            time: fields.time,
            action: fields.action,
            response_type: fields.response_type,
            ast: fields.ast,
            feedback: fields.feedback,
            metadata: fields.metadata,
            extra: fields.extra,
            source: Some(record),
        })
    }
}

impl Event {
    /// Create an event with no state snapshot or feedback
    pub fn new(time: i64, action: impl Into<String>, response_type: ResponseType) -> Self {
        Self {
            time,
            action: action.into(),
            response_type,
            ast: None,
            feedback: None,
            metadata: None,
            extra: Map::new(),
            source: None,
        }
    }

    pub fn with_ast(mut self, ast: impl Into<String>) -> Self {
        self.ast = Some(ast.into());
        self
    }

    pub fn with_feedback(mut self, feedback: impl Into<String>) -> Self {
        self.feedback = Some(feedback.into());
        self
    }

    pub fn is_hint(&self) -> bool {
        self.response_type.is_hint()
    }

    /// Observable program state, if any. Empty snapshots count as no state.
    pub fn state(&self) -> Option<&str> {
        self.ast.as_deref().filter(|s| !s.is_empty())
    }

    /// Feedback text, if any. Empty text counts as no feedback.
    pub fn feedback_text(&self) -> Option<&str> {
        self.feedback.as_deref().filter(|s| !s.is_empty())
    }
}

/// A recorded tutoring session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    /// Unique session identifier
    #[serde(alias = "session_id")]
    pub session_id: String,
    /// Anonymous student identifier
    #[serde(default, alias = "student_id")]
    pub student_id: String,
    /// Problem identifier
    #[serde(default, alias = "problem_id", alias = "problem_name")]
    pub problem_id: String,
    /// School the session was recorded at
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub school_id: Option<String>,
    /// Session start bound in milliseconds
    #[serde(default, alias = "start_time", skip_serializing_if = "Option::is_none")]
    pub start_time: Option<i64>,
    /// Session end bound in milliseconds
    #[serde(default, alias = "end_time", skip_serializing_if = "Option::is_none")]
    pub end_time: Option<i64>,
    /// Events in order of occurrence
    pub events: Vec<Event>,
    /// Features stored alongside the session
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub features: Option<StoredFeatures>,
    /// Program state history. `Some(Value::Null)` means the field was present.
    #[serde(
        default,
        deserialize_with = "deserialize_present",
        skip_serializing_if = "Option::is_none"
    )]
    pub state_history: Option<serde_json::Value>,
    /// When the record was last written
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub saved_at: Option<String>,
}

/// Deserialize a field so that an explicit `null` is distinguishable from absence.
fn deserialize_present<'de, D>(deserializer: D) -> Result<Option<serde_json::Value>, D::Error>
where
    D: Deserializer<'de>,
{
    serde_json::Value::deserialize(deserializer).map(Some)
}

impl Session {
    /// Create an empty session with the given identity
    pub fn new(
        session_id: impl Into<String>,
        student_id: impl Into<String>,
        problem_id: impl Into<String>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            student_id: student_id.into(),
            problem_id: problem_id.into(),
            school_id: None,
            start_time: None,
            end_time: None,
            events: Vec::new(),
            features: None,
            state_history: None,
            saved_at: None,
        }
    }

    /// Session bounds, falling back to the earliest and latest event times
    pub fn bounds(&self) -> (i64, i64) {
        let first = self.events.iter().map(|e| e.time).min().unwrap_or(0);
        let last = self.events.iter().map(|e| e.time).max().unwrap_or(0);
        (self.start_time.unwrap_or(first), self.end_time.unwrap_or(last))
    }

    /// Store a feature vector on the record, replacing any previous features
    pub fn attach_features(&mut self, features: &FeatureVector) {
        self.features = Some(features.to_stored());
    }
}

/// Counts and rates derived directly from the event log.
///
/// This is the first phase of extraction; ratios that depend on these values
/// live only on [`FeatureVector`].
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PrimaryFeatures {
    pub total_time: i64,
    pub time_to_first_feedback: i64,
    pub avg_time_between_actions: f64,
    pub manipulation_count: u32,
    pub feedback_count: u32,
    pub unique_states: u32,
    pub state_revisits: u32,
    pub max_visits_to_state: u32,
    pub success_rate: f64,
    pub consecutive_failures: u32,
    pub incorrect_position_errors: u32,
    pub incorrect_indent_errors: u32,
}

/// The fixed 14-feature behavioral vector for one session
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureVector {
    // Time-based
    /// Session duration (end bound - start bound)
    pub total_time: i64,
    /// Time from the first event to the first hint request (0 when none)
    pub time_to_first_feedback: i64,
    /// Mean delta between consecutive events
    pub avg_time_between_actions: f64,

    // Action patterns
    /// Events whose action looks like a block manipulation
    pub manipulation_count: u32,
    /// Hint requests
    pub feedback_count: u32,
    /// manipulation_count / max(1, feedback_count)
    pub manipulation_to_feedback_ratio: f64,

    // State exploration
    /// Distinct program states observed
    pub unique_states: u32,
    /// unique_states / max(1, event count)
    pub state_change_rate: f64,
    /// Distinct states seen more than once
    pub state_revisits: u32,
    /// Highest visit count of any single state
    pub max_visits_to_state: u32,

    // Success patterns
    /// Fraction of hints followed by a state change
    pub success_rate: f64,
    /// Longest run of actions without progress
    pub consecutive_failures: u32,

    // Error patterns
    /// Hints whose feedback points at ordering
    pub incorrect_position_errors: u32,
    /// Hints whose feedback points at indentation
    pub incorrect_indent_errors: u32,
}

impl FeatureVector {
    /// The all-zero vector returned for sessions too short to measure
    pub fn zeros() -> Self {
        Self::default()
    }

    /// Compute derived ratios from the primary features
    pub fn from_primary(primary: PrimaryFeatures, event_count: usize) -> Self {
        let manipulation_to_feedback_ratio =
            primary.manipulation_count as f64 / primary.feedback_count.max(1) as f64;
        let state_change_rate = primary.unique_states as f64 / event_count.max(1) as f64;

        Self {
            total_time: primary.total_time,
            time_to_first_feedback: primary.time_to_first_feedback,
            avg_time_between_actions: primary.avg_time_between_actions,
            manipulation_count: primary.manipulation_count,
            feedback_count: primary.feedback_count,
            manipulation_to_feedback_ratio,
            unique_states: primary.unique_states,
            state_change_rate,
            state_revisits: primary.state_revisits,
            max_visits_to_state: primary.max_visits_to_state,
            success_rate: primary.success_rate,
            consecutive_failures: primary.consecutive_failures,
            incorrect_position_errors: primary.incorrect_position_errors,
            incorrect_indent_errors: primary.incorrect_indent_errors,
        }
    }

    /// Feature values in [`FEATURE_NAMES`] order
    pub fn values(&self) -> [f64; 14] {
        [
            self.total_time as f64,
            self.time_to_first_feedback as f64,
            self.avg_time_between_actions,
            self.manipulation_count as f64,
            self.feedback_count as f64,
            self.manipulation_to_feedback_ratio,
            self.unique_states as f64,
            self.state_change_rate,
            self.state_revisits as f64,
            self.max_visits_to_state as f64,
            self.success_rate,
            self.consecutive_failures as f64,
            self.incorrect_position_errors as f64,
            self.incorrect_indent_errors as f64,
        ]
    }

    /// Look up a feature by its camelCase name
    pub fn get(&self, name: &str) -> Option<f64> {
        FEATURE_NAMES
            .iter()
            .position(|n| *n == name)
            .map(|idx| self.values()[idx])
    }

    /// Convert to the stored map representation
    pub fn to_stored(&self) -> StoredFeatures {
        FEATURE_NAMES
            .iter()
            .zip(self.values())
            .map(|(name, value)| (name.to_string(), FeatureValue::Number(value)))
            .collect()
    }

    /// True when every field is a finite number
    pub fn is_finite(&self) -> bool {
        self.values().iter().all(|v| v.is_finite())
    }
}

/// Anything that can answer "what is the value of feature X?"
///
/// Alignment accepts feature sets from fresh extraction and from stored
/// records alike through this trait.
pub trait FeatureSource {
    /// Value of the named feature; `None` when missing or null
    fn feature(&self, name: &str) -> Option<f64>;
}

impl FeatureSource for FeatureVector {
    fn feature(&self, name: &str) -> Option<f64> {
        self.get(name)
    }
}

impl FeatureSource for StoredFeatures {
    fn feature(&self, name: &str) -> Option<f64> {
        self.get(name).and_then(FeatureValue::as_f64)
    }
}

impl FeatureSource for BTreeMap<String, f64> {
    fn feature(&self, name: &str) -> Option<f64> {
        self.get(name).copied()
    }
}

impl FeatureSource for std::collections::HashMap<String, f64> {
    fn feature(&self, name: &str) -> Option<f64> {
        self.get(name).copied()
    }
}

/// Outcome of validating one session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    /// True exactly when `issues` is empty
    pub valid: bool,
    /// Human-readable issue descriptions, in rule order
    pub issues: Vec<String>,
}

impl ValidationResult {
    pub fn from_issues(issues: Vec<String>) -> Self {
        Self {
            valid: issues.is_empty(),
            issues,
        }
    }
}

/// Frequency of one issue string across a dataset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueCount {
    pub issue: String,
    pub count: usize,
}

/// Summary of an invalid session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvalidSessionSummary {
    pub session_id: String,
    pub issues: Vec<String>,
}

/// Corpus-level validation statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetReport {
    pub total: usize,
    pub valid: usize,
    pub invalid: usize,
    /// valid / total, 0 for an empty dataset
    pub pass_rate: f64,
    /// Most frequent issues, highest count first
    pub common_issues: Vec<IssueCount>,
    /// Leading sample of invalid sessions, in input order. Absent only for
    /// an empty dataset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invalid_sessions: Option<Vec<InvalidSessionSummary>>,
}

impl DatasetReport {
    pub fn empty() -> Self {
        Self {
            total: 0,
            valid: 0,
            invalid: 0,
            pass_rate: 0.0,
            common_issues: Vec::new(),
            invalid_sessions: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_response_type_serialization() {
        let hint: ResponseType = serde_json::from_str("\"HINT_REQUEST\"").unwrap();
        assert_eq!(hint, ResponseType::HintRequest);
        assert!(hint.is_hint());

        let other: ResponseType = serde_json::from_str("\"ATTEMPT\"").unwrap();
        assert_eq!(other, ResponseType::Other("ATTEMPT".to_string()));
        assert_eq!(serde_json::to_string(&other).unwrap(), "\"ATTEMPT\"");
    }

    #[test]
    fn test_event_deserialization_with_aliases() {
        let json = r#"{"time": 1500, "type": "moveOutput", "response_type": "HINT_REQUEST", "ast": "B"}"#;
        let event: Event = serde_json::from_str(json).unwrap();
        assert_eq!(event.action, "moveOutput");
        assert!(event.is_hint());
        assert_eq!(event.state(), Some("B"));
        assert!(event.feedback.is_none());
    }

    #[test]
    fn test_empty_ast_is_no_state() {
        let event = Event::new(0, "init", ResponseType::Unspecified).with_ast("");
        assert_eq!(event.state(), None);
    }

    #[test]
    fn test_session_state_history_presence() {
        let with_null = r#"{"sessionId": "s1", "events": [], "stateHistory": null}"#;
        let session: Session = serde_json::from_str(with_null).unwrap();
        assert_eq!(session.state_history, Some(serde_json::Value::Null));

        let without = r#"{"sessionId": "s2", "events": []}"#;
        let session: Session = serde_json::from_str(without).unwrap();
        assert!(session.state_history.is_none());
    }

    #[test]
    fn test_session_without_events_is_rejected() {
        let json = r#"{"sessionId": "s1"}"#;
        assert!(serde_json::from_str::<Session>(json).is_err());
    }

    #[test]
    fn test_bounds_fall_back_to_event_times() {
        let mut session = Session::new("s", "student", "p");
        session.events = vec![
            Event::new(300, "a", ResponseType::Unspecified),
            Event::new(100, "b", ResponseType::Unspecified),
        ];
        assert_eq!(session.bounds(), (100, 300));

        session.start_time = Some(0);
        assert_eq!(session.bounds(), (0, 300));
    }

    #[test]
    fn test_feature_vector_serializes_all_fourteen_keys() {
        let value = serde_json::to_value(FeatureVector::zeros()).unwrap();
        let object = value.as_object().unwrap();
        assert_eq!(object.len(), FEATURE_NAMES.len());
        for name in FEATURE_NAMES {
            assert!(object.contains_key(name), "missing {name}");
        }
    }

    #[test]
    fn test_derived_ratios_floor_denominators() {
        let primary = PrimaryFeatures {
            manipulation_count: 7,
            feedback_count: 0,
            unique_states: 3,
            ..Default::default()
        };
        let features = FeatureVector::from_primary(primary, 0);
        assert_eq!(features.manipulation_to_feedback_ratio, 7.0);
        assert_eq!(features.state_change_rate, 3.0);
        assert!(features.is_finite());
    }

    #[test]
    fn test_stored_features_round_trip_through_source() {
        let features = FeatureVector {
            unique_states: 4,
            success_rate: 0.5,
            ..Default::default()
        };
        let stored = features.to_stored();
        assert_eq!(stored.len(), 14);
        assert_eq!(stored.feature("uniqueStates"), Some(4.0));
        assert_eq!(stored.feature("successRate"), Some(0.5));
        assert_eq!(stored.feature("unknown"), None);
    }

    #[test]
    fn test_stored_features_accept_any_json_value() {
        let json = r#"{"a": 1.5, "b": null, "c": "NaN", "d": "-Infinity", "e": "abc", "f": true}"#;
        let stored: StoredFeatures = serde_json::from_str(json).unwrap();

        assert_eq!(stored["a"], FeatureValue::Number(1.5));
        assert_eq!(stored["b"], FeatureValue::Null);
        assert!(stored["c"].as_f64().unwrap().is_nan());
        assert_eq!(stored["d"], FeatureValue::Number(f64::NEG_INFINITY));
        assert_eq!(stored["e"], FeatureValue::Other(serde_json::json!("abc")));
        assert_eq!(stored["f"], FeatureValue::Other(serde_json::json!(true)));

        assert_eq!(stored.feature("e"), None);
        assert_eq!(stored.feature("b"), None);
    }

    #[test]
    fn test_non_finite_features_survive_a_write() {
        let mut stored = StoredFeatures::new();
        stored.insert("x".to_string(), FeatureValue::Number(f64::INFINITY));
        stored.insert("y".to_string(), FeatureValue::Number(f64::NAN));

        let json = serde_json::to_string(&stored).unwrap();
        assert_eq!(json, r#"{"x":"Infinity","y":"NaN"}"#);

        let reread: StoredFeatures = serde_json::from_str(&json).unwrap();
        assert_eq!(reread["x"], FeatureValue::Number(f64::INFINITY));
        assert!(reread["y"].as_f64().unwrap().is_nan());
    }

    #[test]
    fn test_event_keeps_unknown_keys_and_source_record() {
        let json = r#"{"time": 0, "type": "moveOutput", "output": "def f():\n  pass"}"#;
        let event: Event = serde_json::from_str(json).unwrap();

        assert_eq!(event.action, "moveOutput");
        assert_eq!(event.extra.get("output"), Some(&serde_json::json!("def f():\n  pass")));

        let source = event.source.as_ref().unwrap();
        assert!(source.contains_key("type"));
        assert!(!source.contains_key("action"));

        let written = serde_json::to_value(&event).unwrap();
        assert_eq!(written["action"], "moveOutput");
        assert_eq!(written["output"], "def f():\n  pass");
    }

    #[test]
    fn test_event_without_time_is_rejected() {
        assert!(serde_json::from_str::<Event>(r#"{"action": "init"}"#).is_err());
    }

    #[test]
    fn test_validation_result_biconditional() {
        assert!(ValidationResult::from_issues(vec![]).valid);
        assert!(!ValidationResult::from_issues(vec!["x".to_string()]).valid);
    }
}

//! ProgSnap2 export
//!
//! Writes sessions as a ProgSnap2 `MainTable.csv` with the essential columns.

use crate::error::TraceError;
use crate::types::Session;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use serde_json::Value;

/// Column order of the exported main table
pub const PROGSNAP2_COLUMNS: [&str; 9] = [
    "EventType",
    "SessionID",
    "Order",
    "SubjectID",
    "ProblemID",
    "CodeStateID",
    "Timestamp",
    "EventData",
    "X-HintData",
];

/// Prefix of tutor hint actions
const HINT_ACTION_PREFIX: &str = "X-Hint.";

#[derive(Debug, Serialize)]
struct MainTableRow<'a> {
    #[serde(rename = "EventType")]
    event_type: &'static str,
    #[serde(rename = "SessionID")]
    session_id: &'a str,
    #[serde(rename = "Order")]
    order: usize,
    #[serde(rename = "SubjectID")]
    subject_id: &'a str,
    #[serde(rename = "ProblemID")]
    problem_id: &'a str,
    #[serde(rename = "CodeStateID")]
    code_state_id: &'a str,
    #[serde(rename = "Timestamp")]
    timestamp: String,
    #[serde(rename = "EventData")]
    event_data: String,
    #[serde(rename = "X-HintData")]
    hint_data: String,
}

/// Map a tutor action to its ProgSnap2 event type
pub fn map_event_type(action: &str) -> &'static str {
    match action {
        "init" => "Session.Start",
        "moveOutput" | "addOutput" | "removeOutput" | "moveInput" | "toggle" => "File.Edit",
        "feedback" => "Run.Program",
        "X-Hint.Widget" => "X-Hint.Widget",
        "X-Hint.Socratic" => "X-Hint.Socratic",
        "problem_solved" => "Session.End",
        _ => "X-Unknown",
    }
}

/// Render a millisecond timestamp as UTC ISO-8601
fn format_timestamp(time_ms: i64) -> Result<String, TraceError> {
    DateTime::<Utc>::from_timestamp_millis(time_ms)
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Millis, true))
        .ok_or_else(|| TraceError::ExportError(format!("Timestamp out of range: {}", time_ms)))
}

/// Export sessions as a ProgSnap2 main table CSV document
pub fn export_progsnap2(sessions: &[Session]) -> Result<String, TraceError> {
    // Header is written by hand so an empty export still has one
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());
    writer.write_record(PROGSNAP2_COLUMNS)?;

    for session in sessions {
        for (order, event) in session.events.iter().enumerate() {
            let hint_data = if event.action.starts_with(HINT_ACTION_PREFIX) {
                event
                    .metadata
                    .as_ref()
                    .and_then(|m| m.get("X-HintData"))
                    .map(serde_json::to_string)
                    .transpose()?
                    .unwrap_or_default()
            } else {
                String::new()
            };

            let code_state_id = event
                .extra
                .get("output")
                .and_then(Value::as_str)
                .or(event.ast.as_deref())
                .unwrap_or("");
            // Parsed events carry the record they were read from
            let event_data = match &event.source {
                Some(record) => serde_json::to_string(record)?,
                None => serde_json::to_string(event)?,
            };

            writer.serialize(MainTableRow {
                event_type: map_event_type(&event.action),
                session_id: &session.session_id,
                order,
                subject_id: &session.student_id,
                problem_id: &session.problem_id,
                code_state_id,
                timestamp: format_timestamp(event.time)?,
                event_data,
                hint_data,
            })?;
        }
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| TraceError::ExportError(e.to_string()))?;
    String::from_utf8(bytes).map_err(|e| TraceError::ExportError(e.to_string()))
}

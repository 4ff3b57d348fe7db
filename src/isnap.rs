//! iSNAP dataset adapter
//!
//! Reads the tab-separated transaction export of the iSNAP dataset (PSLC
//! DataShop) and groups it into sessions the feature extractor understands.

use crate::error::TraceError;
use crate::types::{Event, ResponseType, Session};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::{debug, info};

/// One transaction row of the DataShop export
#[derive(Debug, Clone, Deserialize)]
struct IsnapRow {
    #[serde(rename = "Session Id")]
    session_id: String,
    #[serde(rename = "Anon Student Id", default)]
    student_id: Option<String>,
    #[serde(rename = "Problem Name", default)]
    problem_name: Option<String>,
    #[serde(rename = "Time")]
    time: String,
    #[serde(rename = "Action", default)]
    action: Option<String>,
    #[serde(rename = "Student Response Type", default)]
    response_type: Option<String>,
    #[serde(rename = "CF (AST)", default)]
    ast: Option<String>,
    #[serde(rename = "Feedback Text", default)]
    feedback: Option<String>,
}

/// Loader for iSNAP transaction exports
pub struct IsnapLoader;

impl IsnapLoader {
    /// Load and group a TSV export from disk
    pub fn load_path(path: impl AsRef<Path>) -> Result<Vec<Session>, TraceError> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let sessions = Self::load(file)?;
        info!(path = %path.display(), sessions = sessions.len(), "loaded iSNAP sessions");
        Ok(sessions)
    }

    /// Parse a TSV export and group its rows into sessions.
    ///
    /// Sessions come out in ascending session id order; each session's events
    /// are sorted by time and its bounds are the earliest and latest row time.
    pub fn load<R: Read>(reader: R) -> Result<Vec<Session>, TraceError> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .flexible(true)
            .from_reader(reader);

        let mut groups: BTreeMap<String, Vec<IsnapRow>> = BTreeMap::new();
        for (line, record) in csv_reader.deserialize::<IsnapRow>().enumerate() {
            let row = record?;
            if row.session_id.is_empty() {
                debug!(line = line + 2, "skipping row without session id");
                continue;
            }
            groups.entry(row.session_id.clone()).or_default().push(row);
        }

        groups
            .into_iter()
            .map(|(session_id, rows)| rows_to_session(session_id, rows))
            .collect()
    }
}

fn rows_to_session(session_id: String, rows: Vec<IsnapRow>) -> Result<Session, TraceError> {
    let mut events = rows
        .iter()
        .map(|row| {
            Ok(Event {
                time: parse_time(&row.time)?,
                action: row.action.clone().unwrap_or_default(),
                response_type: row
                    .response_type
                    .clone()
                    .map(ResponseType::from)
                    .unwrap_or_default(),
                ast: row.ast.clone(),
                feedback: row.feedback.clone(),
                metadata: None,
                extra: Default::default(),
                source: None,
            })
        })
        .collect::<Result<Vec<Event>, TraceError>>()?;
    events.sort_by_key(|e| e.time);

    let first = rows.first();
    let mut session = Session::new(
        session_id,
        first.and_then(|r| r.student_id.clone()).unwrap_or_default(),
        first.and_then(|r| r.problem_name.clone()).unwrap_or_default(),
    );
    session.start_time = events.first().map(|e| e.time);
    session.end_time = events.last().map(|e| e.time);
    session.events = events;

    Ok(session)
}

/// Parse a `Time` cell. Whole numbers may be written with a fractional part.
fn parse_time(raw: &str) -> Result<i64, TraceError> {
    let trimmed = raw.trim();
    if let Ok(value) = trimmed.parse::<i64>() {
        return Ok(value);
    }
    trimmed
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .map(|v| v.trunc() as i64)
        .ok_or_else(|| TraceError::ParseError(format!("Invalid Time value: {:?}", raw)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::FeatureExtractor;
    use pretty_assertions::assert_eq;

    const HEADER: &str = "Row\tSession Id\tAnon Student Id\tProblem Name\tTime\tAction\tSelection\tStep Name\tStudent Response Type\tCF (AST)\tFeedback Text";

    fn tsv(rows: &[&str]) -> String {
        let mut out = String::from(HEADER);
        for row in rows {
            out.push('\n');
            out.push_str(row);
        }
        out.push('\n');
        out
    }

    #[test]
    fn test_groups_and_sorts_sessions() {
        let data = tsv(&[
            "1\tsess-b\tstu-2\tpolygonMaker\t300\tblock.moved\t\tstep\tATTEMPT\tAST2\t",
            "2\tsess-a\tstu-1\tpolygonMaker\t200\tblock.added\t\tstep\tATTEMPT\tAST1\t",
            "3\tsess-a\tstu-1\tpolygonMaker\t100\tinit\t\tstep\tATTEMPT\tAST0\t",
            "4\tsess-a\tstu-1\tpolygonMaker\t250\thint\t\tstep\tHINT_REQUEST\tAST1\tWrong order here",
        ]);

        let sessions = IsnapLoader::load(data.as_bytes()).unwrap();
        assert_eq!(sessions.len(), 2);

        let a = &sessions[0];
        assert_eq!(a.session_id, "sess-a");
        assert_eq!(a.student_id, "stu-1");
        assert_eq!(a.problem_id, "polygonMaker");
        assert_eq!(a.start_time, Some(100));
        assert_eq!(a.end_time, Some(250));
        let times: Vec<i64> = a.events.iter().map(|e| e.time).collect();
        assert_eq!(times, vec![100, 200, 250]);
        assert!(a.events[2].is_hint());
        assert_eq!(a.events[2].feedback.as_deref(), Some("Wrong order here"));

        assert_eq!(sessions[1].session_id, "sess-b");
        assert_eq!(sessions[1].events.len(), 1);
    }

    #[test]
    fn test_empty_cells_become_absent() {
        let data = tsv(&["1\ts\tstu\tp\t10\tclick\t\t\tATTEMPT\t\t"]);
        let sessions = IsnapLoader::load(data.as_bytes()).unwrap();
        let event = &sessions[0].events[0];
        assert!(event.ast.is_none());
        assert!(event.feedback.is_none());
    }

    #[test]
    fn test_loaded_sessions_feed_extraction() {
        let data = tsv(&[
            "1\ts\tstu\tp\t0\tinit\t\t\tATTEMPT\tA\t",
            "2\ts\tstu\tp\t1000\tblock.moved\t\t\tATTEMPT\tB\t",
            "3\ts\tstu\tp\t1500\thint\t\t\tHINT_REQUEST\tB\tcheck the order",
            "4\ts\tstu\tp\t2000\tblock.moved\t\t\tATTEMPT\tC\t",
        ]);
        let sessions = IsnapLoader::load(data.as_bytes()).unwrap();
        let features = FeatureExtractor::extract(&sessions[0]);

        assert_eq!(features.total_time, 2000);
        assert_eq!(features.manipulation_count, 2);
        assert_eq!(features.success_rate, 1.0);
        assert_eq!(features.incorrect_position_errors, 1);
    }

    #[test]
    fn test_invalid_time_is_parse_error() {
        let data = tsv(&["1\ts\tstu\tp\tyesterday\tinit\t\t\tATTEMPT\t\t"]);
        let result = IsnapLoader::load(data.as_bytes());
        assert!(matches!(result, Err(TraceError::ParseError(_))));
    }

    #[test]
    fn test_parse_time_accepts_fractional_notation() {
        assert_eq!(parse_time("1500").unwrap(), 1500);
        assert_eq!(parse_time("1500.0").unwrap(), 1500);
        assert!(parse_time("").is_err());
    }
}

//! JSON session directory
//!
//! The tutor backend keeps one `<sessionId>.json` file per session in a flat
//! directory. This is a reader and writer for that layout, nothing more.

use crate::error::TraceError;
use crate::pipeline::quote_non_finite;
use crate::types::Session;
use chrono::{SecondsFormat, Utc};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Directory of per-session JSON files
#[derive(Debug, Clone)]
pub struct SessionStore {
    dir: PathBuf,
}

impl SessionStore {
    /// Open a session directory, creating it when missing
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, TraceError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path a session is stored at
    pub fn path_for(&self, session_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", session_id))
    }

    /// Write a session, stamping `savedAt` with the current UTC time
    pub fn save(&self, session: &Session) -> Result<PathBuf, TraceError> {
        if session.session_id.is_empty()
            || session.session_id.contains(['/', '\\'])
            || session.session_id.starts_with('.')
        {
            return Err(TraceError::InvalidSessionId(format!(
                "{:?} cannot be used as a file name",
                session.session_id
            )));
        }

        let mut record = session.clone();
        record.saved_at = Some(Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true));

        let path = self.path_for(&record.session_id);
        fs::write(&path, serde_json::to_string_pretty(&record)?)?;
        debug!(path = %path.display(), "session saved");
        Ok(path)
    }

    /// Load one session by id
    pub fn load(&self, session_id: &str) -> Result<Session, TraceError> {
        read_session(&self.path_for(session_id))
    }

    /// Load every `*.json` session in file name order, optionally keeping only
    /// sessions recorded at `school`
    pub fn load_all(&self, school: Option<&str>) -> Result<Vec<Session>, TraceError> {
        let mut paths: Vec<PathBuf> = fs::read_dir(&self.dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_file() && path.extension().is_some_and(|ext| ext == "json"))
            .collect();
        paths.sort();

        let mut sessions = Vec::with_capacity(paths.len());
        for path in paths {
            let session = read_session(&path)?;
            if let Some(school) = school {
                if session.school_id.as_deref() != Some(school) {
                    continue;
                }
            }
            sessions.push(session);
        }

        info!(dir = %self.dir.display(), sessions = sessions.len(), "loaded sessions");
        Ok(sessions)
    }
}

/// Read a single session file
pub fn read_session(path: &Path) -> Result<Session, TraceError> {
    let contents = fs::read_to_string(path)?;
    serde_json::from_str(&quote_non_finite(&contents)).map_err(|e| {
        TraceError::ParseError(format!("Failed to parse {}: {}", path.display(), e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Event, FeatureValue, ResponseType};
    use pretty_assertions::assert_eq;

    fn session(id: &str, school: Option<&str>) -> Session {
        let mut session = Session::new(id, "student", "problem");
        session.school_id = school.map(str::to_string);
        session.events = vec![Event::new(0, "init", ResponseType::Unspecified)];
        session
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::open(dir.path()).unwrap();

        let path = store.save(&session("abc", None)).unwrap();
        assert_eq!(path, dir.path().join("abc.json"));

        let loaded = store.load("abc").unwrap();
        assert_eq!(loaded.session_id, "abc");
        assert_eq!(loaded.events.len(), 1);
        assert!(loaded.saved_at.is_some());
    }

    #[test]
    fn test_load_all_sorts_skips_and_filters() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::open(dir.path()).unwrap();

        store.save(&session("b", Some("north"))).unwrap();
        store.save(&session("a", Some("south"))).unwrap();
        store.save(&session("c", Some("north"))).unwrap();
        fs::write(dir.path().join("notes.txt"), "not a session").unwrap();

        let all: Vec<String> = store
            .load_all(None)
            .unwrap()
            .into_iter()
            .map(|s| s.session_id)
            .collect();
        assert_eq!(all, vec!["a", "b", "c"]);

        let north: Vec<String> = store
            .load_all(Some("north"))
            .unwrap()
            .into_iter()
            .map(|s| s.session_id)
            .collect();
        assert_eq!(north, vec!["b", "c"]);
    }

    #[test]
    fn test_malformed_file_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::open(dir.path()).unwrap();
        fs::write(dir.path().join("broken.json"), r#"{"sessionId": "broken"}"#).unwrap();

        let result = store.load_all(None);
        assert!(matches!(result, Err(TraceError::ParseError(_))));
    }

    #[test]
    fn test_unsafe_session_id_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::open(dir.path()).unwrap();
        let result = store.save(&session("../escape", None));
        assert!(matches!(result, Err(TraceError::InvalidSessionId(_))));
        assert!(!dir.path().join("../escape.json").exists());
    }

    #[test]
    fn test_python_written_file_loads_with_odd_features() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::open(dir.path()).unwrap();
        fs::write(
            dir.path().join("py.json"),
            r#"{"sessionId": "py", "events": [{"time": 0, "type": "init"}],
                "features": {"totalTime": NaN, "successRate": Infinity, "note": "abc", "gap": null}}"#,
        )
        .unwrap();

        let sessions = store.load_all(None).unwrap();
        assert_eq!(sessions.len(), 1);

        let features = sessions[0].features.as_ref().unwrap();
        assert!(features["totalTime"].as_f64().unwrap().is_nan());
        assert_eq!(features["successRate"], FeatureValue::Number(f64::INFINITY));
        assert_eq!(features["note"], FeatureValue::Other(serde_json::json!("abc")));
        assert_eq!(features["gap"], FeatureValue::Null);
    }
}

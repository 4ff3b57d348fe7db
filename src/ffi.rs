//! FFI bindings for Parsons Trace
//!
//! C-compatible entry points for the tutor backend and analysis notebooks.
//! All functions take null-terminated C strings and return allocated strings
//! that must be freed by the caller using `parsons_free_string`.

use std::cell::RefCell;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::ptr;

use crate::pipeline::{session_to_features, validate_dataset_json, SessionProcessor};

thread_local! {
    static LAST_ERROR: RefCell<Option<CString>> = const { RefCell::new(None) };
}

fn set_last_error(msg: &str) {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = CString::new(msg).ok();
    });
}

fn clear_last_error() {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = None;
    });
}

unsafe fn cstr_to_string(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    CStr::from_ptr(ptr).to_str().ok().map(|s| s.to_string())
}

/// Caller must free the result with `parsons_free_string`
fn string_to_cstr(s: &str) -> *mut c_char {
    match CString::new(s) {
        Ok(cstr) => cstr.into_raw(),
        Err(_) => ptr::null_mut(),
    }
}

/// Run a JSON-in, JSON-out operation, recording failures in `LAST_ERROR`
unsafe fn json_call<F>(json: *const c_char, op: F) -> *mut c_char
where
    F: FnOnce(&str) -> Result<String, crate::error::TraceError>,
{
    clear_last_error();

    let json_str = match cstr_to_string(json) {
        Some(s) => s,
        None => {
            set_last_error("Invalid JSON string pointer");
            return ptr::null_mut();
        }
    };

    match op(&json_str) {
        Ok(result) => string_to_cstr(&result),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

/// Extract the feature vector from a session JSON document.
///
/// # Safety
/// - `json` must be a valid null-terminated C string.
/// - Returns a newly allocated string that must be freed with `parsons_free_string`.
/// - Returns NULL on error; call `parsons_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn parsons_extract_features(json: *const c_char) -> *mut c_char {
    json_call(json, session_to_features)
}

/// Extract features, attach them to the session, and validate it.
///
/// Returns `{"session": ..., "features": ..., "validation": ...}`.
///
/// # Safety
/// - `json` must be a valid null-terminated C string.
/// - Returns a newly allocated string that must be freed with `parsons_free_string`.
/// - Returns NULL on error; call `parsons_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn parsons_process_session(json: *const c_char) -> *mut c_char {
    json_call(json, |s| {
        let processed = SessionProcessor::new().process(s)?;
        Ok(serde_json::to_string(&processed)?)
    })
}

/// Validate a JSON array of stored sessions and return the dataset report.
///
/// # Safety
/// - `json` must be a valid null-terminated C string.
/// - Returns a newly allocated string that must be freed with `parsons_free_string`.
/// - Returns NULL on error; call `parsons_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn parsons_validate_dataset(json: *const c_char) -> *mut c_char {
    json_call(json, validate_dataset_json)
}

/// Free a string returned by this library.
///
/// # Safety
/// - `ptr` must be a pointer returned by a `parsons_*` function, or NULL.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn parsons_free_string(ptr: *mut c_char) {
    if !ptr.is_null() {
        drop(CString::from_raw(ptr));
    }
}

/// Get the last error message.
///
/// # Safety
/// - The returned pointer is valid until the next `parsons_*` call on this thread.
/// - Do NOT free the returned pointer.
/// - Returns NULL if the last call succeeded.
#[no_mangle]
pub unsafe extern "C" fn parsons_last_error() -> *const c_char {
    LAST_ERROR.with(|e| match &*e.borrow() {
        Some(cstr) => cstr.as_ptr(),
        None => ptr::null(),
    })
}

/// Get the library version.
///
/// # Safety
/// - Returns a pointer to a static string. Do NOT free.
#[no_mangle]
pub unsafe extern "C" fn parsons_version() -> *const c_char {
    static VERSION: &[u8] = concat!(env!("CARGO_PKG_VERSION"), "\0").as_bytes();
    VERSION.as_ptr() as *const c_char
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_session_json() -> CString {
        CString::new(
            r#"{
                "sessionId": "ffi-1",
                "studentId": "stu",
                "problemId": "prob",
                "events": [
                    {"time": 0, "action": "init", "ast": "A"},
                    {"time": 500, "action": "addOutput", "ast": "B"},
                    {"time": 900, "action": "moveOutput", "ast": "C"}
                ]
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn test_ffi_extract_features() {
        let json = sample_session_json();

        unsafe {
            let result = parsons_extract_features(json.as_ptr());
            assert!(!result.is_null());
            assert!(parsons_last_error().is_null());

            let result_str = CStr::from_ptr(result).to_str().unwrap();
            let features: serde_json::Value = serde_json::from_str(result_str).unwrap();
            assert_eq!(features["totalTime"], 900);
            assert_eq!(features["manipulationCount"], 2);

            parsons_free_string(result);
        }
    }

    #[test]
    fn test_ffi_process_session() {
        let json = sample_session_json();

        unsafe {
            let result = parsons_process_session(json.as_ptr());
            assert!(!result.is_null());

            let result_str = CStr::from_ptr(result).to_str().unwrap();
            let processed: serde_json::Value = serde_json::from_str(result_str).unwrap();
            assert_eq!(processed["validation"]["valid"], false);
            assert_eq!(processed["session"]["features"]["uniqueStates"], 3.0);

            parsons_free_string(result);
        }
    }

    #[test]
    fn test_ffi_validate_dataset() {
        let json = CString::new("[]").unwrap();

        unsafe {
            let result = parsons_validate_dataset(json.as_ptr());
            assert!(!result.is_null());

            let result_str = CStr::from_ptr(result).to_str().unwrap();
            assert!(result_str.contains("\"passRate\":0.0"));

            parsons_free_string(result);
        }
    }

    #[test]
    fn test_ffi_error_handling() {
        unsafe {
            let invalid_json = CString::new("not json").unwrap();
            let result = parsons_extract_features(invalid_json.as_ptr());
            assert!(result.is_null());

            let error = parsons_last_error();
            assert!(!error.is_null());
            let error_str = CStr::from_ptr(error).to_str().unwrap();
            assert!(!error_str.is_empty());

            let result = parsons_validate_dataset(ptr::null());
            assert!(result.is_null());
            let error_str = CStr::from_ptr(parsons_last_error()).to_str().unwrap();
            assert_eq!(error_str, "Invalid JSON string pointer");
        }
    }

    #[test]
    fn test_ffi_version() {
        unsafe {
            let version = parsons_version();
            assert!(!version.is_null());
            let version_str = CStr::from_ptr(version).to_str().unwrap();
            assert_eq!(version_str, env!("CARGO_PKG_VERSION"));
        }
    }
}

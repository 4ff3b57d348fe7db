//! Parsons Trace - behavioral analytics for Parsons problem sessions
//!
//! Turns the event logs recorded by a Parsons tutor into a fixed 14-feature
//! behavioral vector, checks session and dataset quality, and aligns feature
//! sets from different tutors onto a common scale for transfer experiments.
//!
//! ## Modules
//!
//! - **Features**: Event log → `FeatureVector` ([`FeatureExtractor`])
//! - **Validation**: Per-session rules and dataset reports
//! - **Alignment**: Joint min-max scaling of two feature sets
//! - **Data sources**: iSNAP DataShop exports, JSON session stores, ProgSnap2 export
//! - **Experiment**: Struggle labels and the transfer-learning data split

pub mod alignment;
pub mod config;
pub mod error;
pub mod experiment;
pub mod features;
pub mod isnap;
pub mod pipeline;
pub mod progsnap2;
pub mod store;
pub mod types;
pub mod validation;

// FFI bindings for C interop (always available for cdylib/staticlib builds)
pub mod ffi;

pub use alignment::{align_features, check_alignment, AlignmentReport, FeatureMatrix, MinMaxScaler};
pub use config::{ExperimentConfig, TraceConfig, ValidationConfig};
pub use error::TraceError;
pub use experiment::{struggle_labels, TransferDataset};
pub use features::FeatureExtractor;
pub use isnap::IsnapLoader;
pub use pipeline::{session_to_features, validate_dataset_json, ProcessedSession, SessionProcessor};
pub use progsnap2::export_progsnap2;
pub use store::SessionStore;
pub use types::{
    DatasetReport, Event, FeatureSource, FeatureVector, ResponseType, Session, ValidationResult,
    FEATURE_NAMES,
};
pub use validation::{validate_dataset, validate_session, DatasetValidator, SessionValidator};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

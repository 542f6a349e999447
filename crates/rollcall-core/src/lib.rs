//! rollcall-core — Attendance matching engine.
//!
//! Domain types, Euclidean gallery matching, per-session attendance
//! tracking, and the ONNX face detection/encoding pipeline that turns
//! camera frames and enrollment stills into descriptors.

pub mod detector;
pub mod encoder;
pub mod matcher;
pub mod pipeline;
pub mod tracker;
pub mod types;

pub use matcher::{EuclideanMatcher, Matcher};
pub use pipeline::FacePipeline;
pub use tracker::{AttendanceMark, SessionTracker};
pub use types::{
    BoundingBox, Descriptor, EnrolledPerson, Gallery, LabeledDescriptors, MatchResult,
    ReferenceImage, ViewAngle,
};

/// Default system-wide model directory.
pub fn default_model_dir() -> std::path::PathBuf {
    std::path::PathBuf::from("/usr/share/rollcall/models")
}

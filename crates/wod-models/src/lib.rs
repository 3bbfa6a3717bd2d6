//! Shared data models for the WOD analysis backend.
//!
//! This crate provides Serde-serializable types for:
//! - Analysis results and their terminal status
//! - Queue-assigned task identifiers
//! - Path-safe sanitising of client-supplied identifiers

pub mod analysis;
pub mod task;
pub mod utils;

// Re-export common types
pub use analysis::{AnalysisResult, AnalysisStatus, NewAnalysisResult, ParseStatusError};
pub use task::TaskId;
pub use utils::{sanitize_filename, sanitize_path_component};

//! Gemini client for exercise video analysis.
//!
//! The [`AnalysisService`] trait is the seam between the worker and the
//! remote service: [`GeminiClient`] speaks the REST API, and [`Analyzer`]
//! drives one video through upload, processing and generation on top of any
//! implementation.

pub mod analyzer;
pub mod client;
pub mod config;
pub mod error;
pub mod service;
pub mod types;

pub use analyzer::{AnalysisReport, Analyzer, Stage};
pub use client::{GeminiClient, GeminiFactory};
pub use config::GeminiConfig;
pub use error::{GeminiError, GeminiResult};
pub use service::{AnalysisService, ServiceFactory};
pub use types::{FileState, GenerateContentRequest, GenerateContentResponse, RemoteFile};

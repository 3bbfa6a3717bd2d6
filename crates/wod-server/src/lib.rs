//! Single-process deployment of the API and the analysis worker.

pub mod supervisor;

pub use supervisor::{ServerConfig, Supervisor};

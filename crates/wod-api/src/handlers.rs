//! Request handlers.

pub mod analysis;
pub mod health;
pub mod upload;

pub use analysis::*;
pub use health::*;
pub use upload::*;

pub mod config;
pub mod error;
pub mod types;

pub use config::{ParleyConfig, RetrievalFailurePolicy};
pub use error::{ParleyError, Result};
pub use types::*;

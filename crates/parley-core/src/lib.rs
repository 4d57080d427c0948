pub mod config;
pub mod error;
pub mod language;
pub mod sanitize;
pub mod types;

pub use config::ParleyConfig;
pub use error::{ParleyError, Result};
pub use language::classify;
pub use sanitize::clean_text;
pub use types::*;

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::AppConfig;
pub use error::{ProviderError, RagError, Result};
pub use types::*;

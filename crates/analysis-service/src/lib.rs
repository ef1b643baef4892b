pub mod analysis;
pub mod api;
pub mod config;
pub mod derivation;
pub mod error;
pub mod inference;
pub mod prompt;
pub mod state;
pub mod store;
pub mod video;

pub use config::AnalysisServiceConfig;
pub use error::ApiError;
pub use state::AnalysisServiceState;
pub use store::{DataStore, MemoryDataStore};

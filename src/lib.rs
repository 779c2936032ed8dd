//! Claims review desk: CSV ingestion of insurance claims into SQLite plus
//! the storage operations behind the review screens.

pub mod claims;
pub mod config;
pub mod db;
mod error;
pub mod ingest;
mod logging;
pub mod migrate;
pub mod model;
pub mod time;
pub mod users;

pub use error::{AppError, AppResult};
pub use logging::init_logging;

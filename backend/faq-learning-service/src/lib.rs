pub mod config;
pub mod db;
pub mod error;
pub mod extractors;
pub mod jobs;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod repository;
pub mod routes;
pub mod services;
pub mod state;

pub use error::{AppError, AppResult};
pub use state::AppState;

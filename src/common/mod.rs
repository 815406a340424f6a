pub mod api;
pub mod logger;
pub mod models;
pub mod progress;

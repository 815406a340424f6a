pub mod client;
pub mod engine;
pub mod error;
pub mod models;

pub use client::VaultClient;
pub use engine::JobEngine;
pub use error::ApiError;

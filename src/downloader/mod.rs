pub mod fetcher;
pub mod mapping;
pub mod orchestrator;

pub use fetcher::{ArtifactFetcher, FetchOutcome};
pub use mapping::{DownloadMapping, DownloadMappings, MappingReservation};
pub use orchestrator::DownloadOrchestrator;

pub mod addressing;
pub mod config;
pub mod error;
pub mod input;
pub mod models;
pub mod staleness;
pub mod store;

pub use addressing::{META_FILE_NAME, ShardLayout, SidecarField, encode_identifier, path_for};
pub use config::FulltextConfig;
pub use error::{ExitCode, FulltextError, Result};
pub use input::read_links_file;
pub use models::*;
pub use staleness::{CheckOutcome, StalenessEngine};
pub use store::{ArtifactStore, WriteOutcome};

#![warn(missing_docs)]
//! PortraitViz - four AI camera angles from one portrait.
//!
//! Upload a portrait, and Gemini reimagines it as a medium shot, an extreme
//! close-up, a left profile and a right profile. The four generations run
//! concurrently and fail independently; whatever succeeds can be bundled with
//! the original into a zip.
//!
//! # Quick Start
//!
//! ```no_run
//! use portraitviz::{
//!     archive, read_upload, BatchOrchestrator, Credential, GeminiClient, Session,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> portraitviz::Result<()> {
//!     let mut session = Session::new(Some(Credential::new("my-api-key")));
//!     let orchestrator = BatchOrchestrator::new(Arc::new(GeminiClient::builder().build()));
//!
//!     let ticket = session.begin_batch(read_upload("me.jpg").await?)?;
//!     let outcome = ticket.run(&orchestrator).await?;
//!     session.complete(ticket.id, outcome);
//!
//!     if let Some(advisory) = session.advisory() {
//!         eprintln!("{advisory}");
//!     }
//!     archive::save_archive(&session.export_archive()?, archive::ARCHIVE_FILE_NAME)?;
//!     Ok(())
//! }
//! ```
//!
//! # Features
//!
//! - `cli` (default): the `portraitviz` command-line interface

pub mod archive;
pub mod batch;
pub mod config;
pub mod credential;
mod error;
pub mod image;
pub mod session;

// Re-export error types at crate root
pub use error::{PortraitVizError, Result};

pub use batch::{
    BatchOrchestrator, BatchOutcome, BatchResult, GenerationSlot, SlotState, SLOT_COUNT,
};
pub use config::Config;
pub use credential::{Credential, CredentialStore, FileCredentialStore, MemoryCredentialStore};
pub use image::providers::{GeminiClient, GeminiClientBuilder, GeminiModel};
pub use image::{
    read_upload, EncodedImage, GeneratedImage, GenerationMetadata, ImageFormat, ImageGenerator,
    SourceImage,
};
pub use session::{BatchTicket, Session};

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::batch::{BatchOrchestrator, BatchOutcome, BatchResult, SlotState};
    pub use crate::credential::{Credential, CredentialStore};
    pub use crate::error::{PortraitVizError, Result};
    pub use crate::image::providers::GeminiClient;
    pub use crate::image::{read_upload, GeneratedImage, ImageGenerator, SourceImage};
    pub use crate::session::Session;
}

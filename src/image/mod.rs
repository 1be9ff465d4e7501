//! Image types, transport encoding and the generation client.

pub mod codec;
mod provider;
pub mod providers;
mod types;

pub use codec::read_upload;
pub use provider::ImageGenerator;
pub use types::{EncodedImage, GeneratedImage, GenerationMetadata, ImageFormat, SourceImage};

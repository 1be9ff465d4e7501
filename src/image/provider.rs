//! Generator trait used by the batch orchestrator.

use crate::credential::Credential;
use crate::error::Result;
use crate::image::types::EncodedImage;
use async_trait::async_trait;

/// A remote model that turns one image plus an instruction into a new image.
#[async_trait]
pub trait ImageGenerator: Send + Sync {
    /// Performs exactly one generation call.
    ///
    /// Implementations must fail with
    /// [`MissingCredential`](crate::PortraitVizError::MissingCredential) before
    /// any network attempt when `credential` is empty, and with
    /// [`InvalidCredential`](crate::PortraitVizError::InvalidCredential) when the
    /// service rejects the key.
    async fn generate(
        &self,
        credential: &Credential,
        image: &EncodedImage,
        instruction: &str,
        temperature: f32,
    ) -> Result<EncodedImage>;

    /// Model identifier, for logs and metadata.
    fn model(&self) -> &str;
}

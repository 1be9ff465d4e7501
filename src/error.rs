//! Error types for portrait generation.

/// Substring the Gemini API puts in the message of a rejected API key.
pub(crate) const INVALID_KEY_MARKER: &str = "API key not valid";

/// Maximum length of a remote error message kept in an error value.
const MAX_ERROR_MESSAGE_LEN: usize = 500;

/// Errors that can occur while generating or exporting portraits.
#[derive(Debug, thiserror::Error)]
pub enum PortraitVizError {
    /// No API key is available, so no call was attempted.
    #[error("missing API key: set one with `portraitviz key set`")]
    MissingCredential,

    /// The remote service rejected the API key.
    #[error("invalid API key: {0}")]
    InvalidCredential(String),

    /// The model answered without an image, optionally with explanatory text.
    #[error("no image returned{}", .0.as_deref().map(|t| format!(": {t}")).unwrap_or_default())]
    NoImageReturned(Option<String>),

    /// Content was blocked by safety filters.
    #[error("content blocked: {0}")]
    ContentBlocked(String),

    /// Building or writing the zip archive failed.
    #[error("failed to build archive: {0}")]
    ArchiveBuild(String),

    /// The uploaded file is not a readable image.
    #[error("invalid upload: {0}")]
    InvalidUpload(String),

    /// API returned an error response.
    #[error("API error: {status} - {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Sanitized error message from the response body.
        message: String,
    },

    /// Network or HTTP error.
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Failed to decode base64 data.
    #[error("failed to decode: {0}")]
    Decode(String),

    /// Configuration file could not be used.
    #[error("config error: {0}")]
    Config(String),

    /// I/O error (e.g., reading the credential file).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PortraitVizError {
    /// Returns true if the remote service rejected the API key.
    pub fn is_credential_error(&self) -> bool {
        matches!(self, Self::InvalidCredential(_))
    }

    /// Returns true if the user has to (re-)enter an API key before retrying.
    pub fn requires_credential(&self) -> bool {
        matches!(self, Self::MissingCredential | Self::InvalidCredential(_))
    }
}

/// Result type alias for portrait generation operations.
pub type Result<T> = std::result::Result<T, PortraitVizError>;

/// Reduces a remote error body to a short, single-line message.
///
/// Google APIs wrap failures as `{"error": {"message": ...}}`; when the body has
/// that shape only the message is kept.
pub(crate) fn sanitize_error_message(body: &str) -> String {
    let message = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(str::to_string))
        .unwrap_or_else(|| body.to_string());

    let collapsed = message.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() > MAX_ERROR_MESSAGE_LEN {
        let truncated: String = collapsed.chars().take(MAX_ERROR_MESSAGE_LEN).collect();
        format!("{truncated}...")
    } else {
        collapsed
    }
}

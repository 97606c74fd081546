use std::fmt;

use thiserror::Error;

/// Errors raised while building the process-wide configuration.
///
/// These are fatal: a binary that cannot build its configuration must stop
/// before serving any analysis.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The credential variable is missing or blank.
    #[error("missing credential: set {0} in the environment or in a .env file")]
    MissingCredential(&'static str),
    /// A variable is present but could not be parsed.
    #[error("invalid value for {name}: {value:?}")]
    InvalidValue { name: &'static str, value: String },
}

/// Why a single upload was excluded from the batch.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The bytes are not a PNG or JPEG image, or are corrupt.
    #[error("failed to decode image: {0}")]
    Image(#[from] image::ImageError),
    /// The upload could not be read at all.
    #[error("failed to read upload: {0}")]
    Io(#[from] std::io::Error),
}

/// Coarse cause of a failed provider call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProviderErrorKind {
    /// The account ran out of quota.
    Quota,
    /// The configured model does not exist or is not served.
    ModelNotFound,
    /// The credential was rejected.
    Authentication,
    /// The provider refused the request as malformed.
    InvalidRequest,
    /// Generic provider-side fault.
    Api,
    /// The request never reached the provider or the connection broke.
    Transport,
    /// Anything else, including responses that could not be parsed.
    Unexpected,
}

impl ProviderErrorKind {
    /// Stable snake_case name, embedded in failure messages.
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderErrorKind::Quota => "quota_exceeded",
            ProviderErrorKind::ModelNotFound => "model_not_found",
            ProviderErrorKind::Authentication => "authentication",
            ProviderErrorKind::InvalidRequest => "invalid_request",
            ProviderErrorKind::Api => "api_error",
            ProviderErrorKind::Transport => "transport",
            ProviderErrorKind::Unexpected => "unexpected",
        }
    }
}

impl fmt::Display for ProviderErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned by an [`InferenceProvider`](crate::InferenceProvider).
#[derive(Debug, Error)]
#[error("{kind}: {message}")]
pub struct ProviderError {
    kind: ProviderErrorKind,
    message: String,
    status: Option<u16>,
}

impl ProviderError {
    /// Creates an error without an HTTP status.
    pub fn new(kind: ProviderErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status: None,
        }
    }

    /// Attaches the HTTP status the provider answered with.
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    /// The cause used for retry classification.
    pub fn kind(&self) -> ProviderErrorKind {
        self.kind
    }

    /// Provider-supplied or transport description.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// HTTP status, when the provider answered at all.
    pub fn status(&self) -> Option<u16> {
        self.status
    }
}

// Error types for the xperi framework

use crate::HttpStatus;
use thiserror::Error;

/// Rule broken by a multipart upload.
///
/// The numeric codes are stable and exposed to error callbacks through
/// [`UploadErrorKind::code`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadErrorKind {
    MaxFileSize,
    AllowExtensions,
    MaxFields,
}

impl UploadErrorKind {
    pub fn code(&self) -> u8 {
        match self {
            UploadErrorKind::MaxFileSize => 1,
            UploadErrorKind::AllowExtensions => 2,
            UploadErrorKind::MaxFields => 3,
        }
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("Route '{url}' and method '{method}' not found")]
    RouteNotFound { url: String, method: String },

    /// Application error carrying the status the client should see.
    #[error("{message}")]
    Status { code: u16, message: String },

    #[error("Handler panicked: {0}")]
    Panic(String),

    #[error("Invalid JSON: {0}")]
    InvalidJson(String),

    #[error("Invalid XML: {0}")]
    InvalidXml(String),

    #[error("Invalid multipart body: {0}")]
    Multipart(String),

    #[error("Upload rejected ({}): {message}", .kind.code())]
    Upload {
        kind: UploadErrorKind,
        message: String,
    },

    #[error("Payload Too Large: {0}")]
    PayloadTooLarge(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Request timed out after {0} ms")]
    Timeout(u64),

    #[error("Hyper error: {0}")]
    Hyper(#[from] hyper::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Custom(Box<dyn std::error::Error + Send + Sync + 'static>),
}

impl Error {
    /// Application error with an explicit status, e.g. `Error::status(401, "no token")`.
    pub fn status(code: u16, message: impl Into<String>) -> Self {
        Error::Status {
            code,
            message: message.into(),
        }
    }

    pub fn upload(kind: UploadErrorKind, message: impl Into<String>) -> Self {
        Error::Upload {
            kind,
            message: message.into(),
        }
    }

    /// Wrap any error type so it can travel through the error callback.
    pub fn custom<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Error::Custom(Box::new(err))
    }

    /// Recover a wrapped custom error.
    pub fn downcast_ref<E>(&self) -> Option<&E>
    where
        E: std::error::Error + 'static,
    {
        match self {
            Error::Custom(inner) => inner.downcast_ref::<E>(),
            _ => None,
        }
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> u16 {
        match self {
            Error::RouteNotFound { .. } => HttpStatus::NotFound.code(),
            Error::Status { code, .. } => *code,
            Error::InvalidJson(_)
            | Error::InvalidXml(_)
            | Error::Multipart(_)
            | Error::Hyper(_) => HttpStatus::BadRequest.code(),
            Error::Upload { kind, .. } => match kind {
                UploadErrorKind::MaxFileSize => HttpStatus::PayloadTooLarge.code(),
                UploadErrorKind::AllowExtensions => HttpStatus::UnsupportedMediaType.code(),
                UploadErrorKind::MaxFields => HttpStatus::UnprocessableEntity.code(),
            },
            Error::PayloadTooLarge(_) => HttpStatus::PayloadTooLarge.code(),
            Error::Timeout(_) => HttpStatus::GatewayTimeout.code(),
            Error::Panic(_)
            | Error::Serialization(_)
            | Error::Io(_)
            | Error::Custom(_) => HttpStatus::InternalServerError.code(),
        }
    }

    /// Check if this is a client error (4xx)
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status_code())
    }

    /// Check if this is a server error (5xx)
    pub fn is_server_error(&self) -> bool {
        (500..600).contains(&self.status_code())
    }

    /// True when the transport aborted the dispatch.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Error::Timeout(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

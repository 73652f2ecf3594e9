use std::borrow::Cow;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use tracing::{debug, error};

/// All possible error kinds.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed or incomplete configuration.
    Config,
    /// Errors encountered while connecting to a device.
    Connection,
    /// Errors encountered while loading a device trust root.
    TlsTrust,
    /// The device rejected the configured credentials.
    Auth,
    /// Unknown device, alias or record, or a disallowed operation.
    NotFound,
    /// Malformed request body.
    BadRequest,
    /// The device reported an operation failure.
    Device,
    /// Errors encountered while exchanging sentences with a device.
    Protocol,
    /// Errors encountered while running the HTTP server.
    Server,
}

impl ErrorKind {
    pub(crate) const fn description(self) -> &'static str {
        match self {
            Self::Config => "Config",
            Self::Connection => "Connection",
            Self::TlsTrust => "TLS Trust",
            Self::Auth => "Auth",
            Self::NotFound => "Not Found",
            Self::BadRequest => "Bad Request",
            Self::Device => "Device",
            Self::Protocol => "Protocol",
            Self::Server => "Server",
        }
    }

    /// Returns the HTTP status reported to the caller for this kind.
    #[must_use]
    pub const fn status_code(self) -> StatusCode {
        match self {
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::BadRequest => StatusCode::BAD_REQUEST,
            Self::Config
            | Self::Connection
            | Self::TlsTrust
            | Self::Auth
            | Self::Device
            | Self::Protocol
            | Self::Server => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.description().fmt(f)
    }
}

/// Bridge error.
#[derive(PartialEq)]
pub struct Error {
    kind: ErrorKind,
    description: Cow<'static, str>,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.format(f)
    }
}

impl std::fmt::Debug for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.format(f)
    }
}

impl Error {
    /// Creates an [`Error`] from an [`ErrorKind`] and a description.
    #[inline]
    pub fn new(kind: ErrorKind, description: impl Into<Cow<'static, str>>) -> Self {
        let description = description.into();
        // Caller mistakes are not bridge failures.
        if kind.status_code().is_client_error() {
            debug!("{}", description.as_ref());
        } else {
            error!("{}", description.as_ref());
        }
        Self { kind, description }
    }

    // Wraps a failure already logged where it was raised.
    pub(crate) const fn converted(kind: ErrorKind, description: String) -> Self {
        Self {
            kind,
            description: Cow::Owned(description),
        }
    }

    /// Returns the [`ErrorKind`].
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the error description.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    fn format(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.description)
    }
}

impl From<ros_proto::error::Error> for Error {
    fn from(e: ros_proto::error::Error) -> Self {
        use ros_proto::error::ErrorKind as ProtoKind;

        let kind = match e.kind() {
            ProtoKind::Io => ErrorKind::Connection,
            ProtoKind::Protocol => ErrorKind::Protocol,
            ProtoKind::Trap | ProtoKind::Fatal => ErrorKind::Device,
        };
        Self::converted(kind, e.description().to_owned())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(e: serde_yaml::Error) -> Self {
        Self::new(ErrorKind::Config, e.to_string())
    }
}

impl std::error::Error for Error {}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        (self.kind.status_code(), self.description.into_owned()).into_response()
    }
}

/// A specialized [`Result`] type for [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

use axum::{
    extract::Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};

use indexmap::IndexMap;

use ros_proto::Reply;

use crate::error::{Error, ErrorKind, Result};

/// The attributes of a device item.
pub type Record = IndexMap<String, String>;

/// The HTTP-level result of an operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// All items, sent with `200 OK`.
    Records(Vec<Record>),
    /// A single item, sent with the given status.
    Record(Record, StatusCode),
    /// No matching item, `404 Not Found` without body.
    NotFound,
    /// The operation completed, `204 No Content`.
    NoContent,
}

impl Outcome {
    /// Returns the HTTP status of this outcome.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::Records(_) => StatusCode::OK,
            Self::Record(_, status) => *status,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::NoContent => StatusCode::NO_CONTENT,
        }
    }
}

impl IntoResponse for Outcome {
    fn into_response(self) -> Response {
        match self {
            Self::Records(records) => (StatusCode::OK, Json(records)).into_response(),
            Self::Record(record, status) => (status, Json(record)).into_response(),
            Self::NotFound => StatusCode::NOT_FOUND.into_response(),
            Self::NoContent => StatusCode::NO_CONTENT.into_response(),
        }
    }
}

/// Interprets the reply to a listing.
///
/// Every record is returned, even when there are none.
#[must_use]
pub fn records(reply: Reply) -> Outcome {
    Outcome::Records(reply.re.into_iter().map(|re| re.attributes).collect())
}

/// Interprets the reply to a lookup by identifier.
///
/// The first record is returned with `status`.
#[must_use]
pub fn record(reply: Reply, status: StatusCode) -> Outcome {
    reply
        .re
        .into_iter()
        .next()
        .map_or(Outcome::NotFound, |re| Outcome::Record(re.attributes, status))
}

/// Interprets the reply to a removal.
///
/// # Errors
///
/// Returns an [`ErrorKind::Device`] error carrying the terminal word when it
/// does not report success.
pub fn removed(reply: &Reply) -> Result<Outcome> {
    if reply.done.is_done() {
        Ok(Outcome::NoContent)
    } else {
        Err(Error::new(ErrorKind::Device, reply.done.word.clone()))
    }
}

/// Returns the identifier of a created item.
///
/// # Errors
///
/// Returns an [`ErrorKind::Device`] error when the device does not return
/// any identifier.
pub fn created_id(reply: &Reply) -> Result<String> {
    reply.ret().map(str::to_owned).ok_or_else(|| {
        Error::new(
            ErrorKind::Device,
            "device did not return the identifier of the created item",
        )
    })
}

/// Returns the identifier of an updated item.
///
/// The device may not return any identifier for an update, in which case
/// the requested one is kept.
#[must_use]
pub fn updated_id(reply: &Reply, requested: String) -> String {
    reply.ret().map_or(requested, str::to_owned)
}

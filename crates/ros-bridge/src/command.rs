use indexmap::IndexMap;

use serde_json::Value;

use crate::config::Alias;
use crate::error::{Error, ErrorKind, Result};

/// Attributes of a created or updated item, in payload order.
pub type Body = IndexMap<String, String>;

fn slash_end(s: &str) -> &str {
    if s.len() > 1 && s.ends_with('/') {
        &s[..s.len() - 1]
    } else {
        s
    }
}

/// The kind of operation requested on an alias.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// Lists all items.
    List,
    /// Reads a single item.
    Get,
    /// Creates an item.
    Create,
    /// Updates an item.
    Update,
    /// Deletes an item.
    Delete,
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Self::List => "list",
            Self::Get => "get",
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
        .fmt(f)
    }
}

impl Operation {
    /// Whether the alias allows this operation.
    ///
    /// Listing and reading are always allowed.
    #[must_use]
    pub fn allowed_by(self, alias: &Alias) -> bool {
        match self {
            Self::List | Self::Get => true,
            Self::Create => alias.can_create(),
            Self::Update => alias.can_update(),
            Self::Delete => alias.can_delete(),
        }
    }
}

/// An operation along with its data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    /// Lists all items.
    List,
    /// Reads the item with the given identifier.
    Get {
        /// Item identifier.
        id: String,
    },
    /// Creates an item with the given attributes.
    Create {
        /// Item attributes.
        body: Body,
    },
    /// Updates the item with the given identifier.
    Update {
        /// Item identifier.
        id: String,
        /// Attributes to change.
        body: Body,
    },
    /// Deletes the item with the given identifier.
    Delete {
        /// Item identifier.
        id: String,
    },
}

impl Intent {
    /// Returns the [`Operation`] of this intent.
    #[must_use]
    pub const fn operation(&self) -> Operation {
        match self {
            Self::List => Operation::List,
            Self::Get { .. } => Operation::Get,
            Self::Create { .. } => Operation::Create,
            Self::Update { .. } => Operation::Update,
            Self::Delete { .. } => Operation::Delete,
        }
    }

    /// Translates this intent into the [`Command`] for the given path.
    #[must_use]
    pub fn command(&self, path: &str) -> Command {
        match self {
            Self::List => Command::new(path, "print"),
            Self::Get { id } => Command::new(path, "print").id(id),
            Self::Create { body } => Command::new(path, "add").attributes(body),
            Self::Update { id, body } => Command::new(path, "set").id(id).attributes(body),
            Self::Delete { id } => Command::new(path, "remove").id(id),
        }
    }
}

/// A command sentence sent to a device.
///
/// The first word is the command path, followed by an optional identifier
/// query and by attribute words.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command(Vec<String>);

impl Command {
    /// Creates a [`Command`] running `action` on `path`.
    #[must_use]
    pub fn new(path: &str, action: &str) -> Self {
        Self(vec![format!("{}/{action}", slash_end(path))])
    }

    /// Restricts the command to the item with the given identifier.
    #[must_use]
    pub fn id(mut self, id: &str) -> Self {
        self.0.push(format!("?.id={id}"));
        self
    }

    /// Appends an attribute word for each entry of `body`.
    #[must_use]
    pub fn attributes(mut self, body: &Body) -> Self {
        self.0
            .extend(body.iter().map(|(key, value)| format!("={key}={value}")));
        self
    }

    /// Returns the command words.
    #[must_use]
    pub fn words(&self) -> &[String] {
        &self.0
    }

    /// Returns the command path, the first word.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.0[0]
    }
}

impl IntoIterator for Command {
    type Item = String;
    type IntoIter = std::vec::IntoIter<String>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// Parses a request payload into a [`Body`].
///
/// The payload must be a JSON object whose values are all strings.
///
/// # Errors
///
/// Returns an [`ErrorKind::BadRequest`] error otherwise.
pub fn parse_body(payload: &[u8]) -> Result<Body> {
    let object: IndexMap<String, Value> = serde_json::from_slice(payload).map_err(|e| {
        Error::new(
            ErrorKind::BadRequest,
            format!("request body must be a JSON object: {e}"),
        )
    })?;

    object
        .into_iter()
        .map(|(key, value)| match value {
            Value::String(value) => Ok((key, value)),
            other => Err(Error::new(
                ErrorKind::BadRequest,
                format!("value of `{key}` must be a string, found `{other}`"),
            )),
        })
        .collect()
}

//! `ros-proto` is an asynchronous client for the RouterOS device management
//! API.
//!
//! The protocol exchanges sentences over a stream transport, either plain
//! TCP or TLS. A sentence is a sequence of words, each prefixed by its
//! length encoded on one to five bytes, and terminated by an empty word.
//!
//! A client sends a command sentence made of a command path followed by
//! attribute words (`=key=value`) and query words (`?key=value`). The device
//! answers with zero or more `!re` sentences, one per record, and closes the
//! reply with a `!done` sentence. Failures are reported with a `!trap`
//! sentence preceding `!done`, while unrecoverable conditions are reported
//! with `!fatal`.
//!
//! The crate does not open connections: the caller connects the transport
//! and hands it over to a [`client::Client`].

#![deny(unsafe_code)]
#![deny(missing_docs)]

/// The device management client.
pub mod client;
/// Word and sentence framing.
pub mod codec;
/// Error management.
pub mod error;
/// Reply sentences.
pub mod sentence;

pub use client::Client;
pub use sentence::{Reply, Sentence};

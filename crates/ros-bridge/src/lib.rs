//! `ros-bridge` exposes the configuration trees of RouterOS devices as
//! generic REST resources.
//!
//! The bridge is driven by a declarative configuration listing devices and
//! aliases. An alias names a path of the device configuration tree, such as
//! `/ip/firewall/address-list`, and states whether items under that path can
//! be created, updated or deleted. Listing and reading items is always
//! allowed.
//!
//! Every request opens its own authenticated session with the target device,
//! translates the requested operation into a command sentence, interprets the
//! device reply into JSON and closes the session. Sessions are never shared
//! nor reused, and failures are never retried.
//!
//! Requests naming an unknown device, an unknown alias or an operation the
//! alias does not allow are answered with `404 Not Found` before any device
//! is contacted.

#![deny(unsafe_code)]
#![deny(missing_docs)]

/// Translation of operations into device command sentences.
pub mod command;
/// Bridge configuration.
pub mod config;
/// Request resolution, execution and routing.
pub mod dispatcher;
/// Error management.
pub mod error;
/// The OpenAPI document of the REST interface.
pub mod openapi;
/// Interpretation of device replies into HTTP outcomes.
pub mod outcome;
/// The bridge HTTP server.
pub mod server;
/// Device sessions.
pub mod session;

mod tls;

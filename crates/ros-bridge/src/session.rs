use std::future::Future;

use futures_util::future::BoxFuture;

use rustls::pki_types::ServerName;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::time;

use tracing::debug;

use ros_proto::{Client, Reply};
use ros_proto::error::ErrorKind as ProtoKind;

use crate::command::Command;
use crate::config::Device;
use crate::error::{Error, ErrorKind, Result};
use crate::tls::device_connector;

/// Default port of the plain device API.
pub const PLAIN_PORT: u16 = 8728;

/// Default port of the TLS device API.
pub const TLS_PORT: u16 = 8729;

/// An authenticated connection to a single device.
pub trait Session: Send + 'static {
    /// Runs a command, waiting for its complete reply.
    fn run(&mut self, command: Command) -> impl Future<Output = Result<Reply>> + Send;

    /// Closes the session and its transport.
    fn close(self) -> impl Future<Output = ()> + Send;
}

/// Opens [`Session`]s with devices.
pub trait Connector: Clone + Send + Sync + 'static {
    /// The session type.
    type Session: Session;

    /// Connects and authenticates to a device.
    fn connect(&self, device: &Device) -> impl Future<Output = Result<Self::Session>> + Send;
}

/// Runs `f` within a session with `device`.
///
/// The session is closed once `f` completes, whatever its result.
///
/// # Errors
///
/// Returns the connection error, or the error returned by `f`.
pub async fn with_session<C, T, F>(connector: &C, device: &Device, f: F) -> Result<T>
where
    C: Connector,
    T: Send,
    F: for<'s> FnOnce(&'s mut C::Session) -> BoxFuture<'s, Result<T>> + Send,
{
    let mut session = connector.connect(device).await?;
    let result = f(&mut session).await;
    session.close().await;
    result
}

trait Transport: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T> Transport for T where T: AsyncRead + AsyncWrite + Unpin + Send {}

/// A [`Session`] over a plain or TLS connection.
pub struct DeviceSession {
    client: Client<Box<dyn Transport>>,
    device: String,
}

impl std::fmt::Debug for DeviceSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceSession")
            .field("device", &self.device)
            .finish_non_exhaustive()
    }
}

impl Session for DeviceSession {
    async fn run(&mut self, command: Command) -> Result<Reply> {
        debug!("Running `{}` on device `{}`", command.path(), self.device);
        Ok(self.client.run(command).await?)
    }

    async fn close(self) {
        if let Err(e) = self.client.close().await {
            debug!("Closing the session with device `{}` failed: {e}", self.device);
        }
    }
}

/// Connects to devices over TCP, with TLS when the device configures it.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

impl TcpConnector {
    /// Creates a [`TcpConnector`].
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

fn connection_error(description: String) -> Error {
    Error::new(ErrorKind::Connection, description)
}

impl Connector for TcpConnector {
    type Session = DeviceSession;

    async fn connect(&self, device: &Device) -> Result<DeviceSession> {
        let (host, port) = split_address(&device.address)?;

        // The trust root is loaded before dialing.
        let tls = match &device.tls {
            Some(tls) => Some(device_connector(tls).await?),
            None => None,
        };
        let port = port.unwrap_or(if tls.is_some() { TLS_PORT } else { PLAIN_PORT });

        debug!("Connecting to device `{}` at {host}:{port}", device.name);

        let open = async {
            let stream = TcpStream::connect((host, port)).await.map_err(|e| {
                connection_error(format!("cannot connect to device '{}': {e}", device.name))
            })?;

            let transport: Box<dyn Transport> = match tls {
                Some(tls) => {
                    let server_name = ServerName::try_from(host.to_owned()).map_err(|e| {
                        connection_error(format!("invalid device host `{host}`: {e}"))
                    })?;
                    let stream = tls.connect(server_name, stream).await.map_err(|e| {
                        connection_error(format!(
                            "TLS handshake with device '{}' failed: {e}",
                            device.name
                        ))
                    })?;
                    Box::new(stream)
                }
                None => Box::new(stream),
            };

            let mut client = Client::new(transport);
            client
                .login(&device.username, &device.password)
                .await
                .map_err(|e| match e.kind() {
                    ProtoKind::Trap | ProtoKind::Fatal => Error::converted(
                        ErrorKind::Auth,
                        format!("device '{}' rejected login: {}", device.name, e.description()),
                    ),
                    _ => Error::from(e),
                })?;
            Ok::<_, Error>(client)
        };

        // Dial, handshake and login share the device timeout.
        let client = time::timeout(device.timeout(), open)
            .await
            .map_err(|_| {
                connection_error(format!(
                    "timed out connecting to device '{}' after {:?}",
                    device.name,
                    device.timeout()
                ))
            })??;

        debug!("Logged in to device `{}`", device.name);

        Ok(DeviceSession {
            client,
            device: device.name.clone(),
        })
    }
}

/// Splits a device address into host and optional port.
///
/// Accepted forms are `host`, `host:port`, `[v6]`, `[v6]:port` and a bare
/// IPv6 literal.
///
/// # Errors
///
/// Returns an [`ErrorKind::Connection`] error when the address is malformed.
pub fn split_address(address: &str) -> Result<(&str, Option<u16>)> {
    let invalid = || connection_error(format!("invalid device address `{address}`"));

    let (host, port) = if let Some(rest) = address.strip_prefix('[') {
        let (host, rest) = rest.split_once(']').ok_or_else(invalid)?;
        match rest {
            "" => (host, None),
            _ => (host, Some(rest.strip_prefix(':').ok_or_else(invalid)?)),
        }
    } else {
        match address.split_once(':') {
            // More than one colon is a bare IPv6 literal.
            Some((host, port)) if !port.contains(':') => (host, Some(port)),
            _ => (address, None),
        }
    };

    if host.is_empty() {
        return Err(invalid());
    }

    let port = port
        .map(|port| port.parse::<u16>().map_err(|_| invalid()))
        .transpose()?;

    Ok((host, port))
}

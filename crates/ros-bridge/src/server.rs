use std::future::Future;

use axum::Router;
use axum::http::{HeaderValue, Method, StatusCode, header};

use tokio::net::TcpListener;

use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use tracing::{info, warn};

use crate::config::{Config, CorsConfig};
use crate::dispatcher::{self, Bridge};
use crate::error::{Error, ErrorKind, Result};
use crate::session::{Connector, TcpConnector};
use crate::tls::{TlsListener, server_acceptor};

// Origin allowing every caller.
const ANY_ORIGIN: &str = "*";

fn server_error(description: String) -> Error {
    Error::new(ErrorKind::Server, description)
}

/// Builds the CORS layer of the HTTP endpoint.
#[must_use]
pub fn cors_layer(cors: &CorsConfig) -> CorsLayer {
    let origins = cors.allowed_origins();

    let allow_origin = if origins.iter().any(|origin| origin == ANY_ORIGIN) {
        AllowOrigin::from(Any)
    } else {
        let origins = origins.iter().filter_map(|origin| {
            origin
                .parse::<HeaderValue>()
                .inspect_err(|_| warn!("Skipping invalid CORS origin `{origin}`"))
                .ok()
        });
        AllowOrigin::list(origins)
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
        ])
        .allow_headers([header::CONTENT_TYPE])
        .max_age(cors.max_age())
}

/// The bridge HTTP server.
#[derive(Debug)]
pub struct Server<C = TcpConnector> {
    // Normalized configuration.
    config: Config,
    // Device connector.
    connector: C,
}

impl Server {
    /// Creates a [`Server`] from a normalized [`Config`].
    #[must_use]
    pub const fn new(config: Config) -> Self {
        Self {
            config,
            connector: TcpConnector::new(),
        }
    }
}

impl<C> Server<C>
where
    C: Connector,
{
    /// Sets the connector used to reach devices.
    #[must_use]
    pub fn connector<D>(self, connector: D) -> Server<D>
    where
        D: Connector,
    {
        Server {
            config: self.config,
            connector,
        }
    }

    /// Transforms the server into a [`GracefulShutdownServer`].
    ///
    /// The [`Future`] passed as input manages the graceful shutdown of
    /// the server.
    #[must_use]
    #[inline]
    pub fn with_graceful_shutdown<F>(self, signal: F) -> GracefulShutdownServer<C, F>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        GracefulShutdownServer {
            server: self,
            signal,
        }
    }

    /// Runs the server.
    ///
    /// # Errors
    ///
    /// Returns an error if the server fails to start.
    pub async fn run(self) -> Result<()> {
        self.with_graceful_shutdown(std::future::pending())
            .run()
            .await
    }

    fn router(self) -> Router {
        let cors = cors_layer(&self.config.server.cors());
        let timeout = self.config.server.request_timeout();

        // A request outliving the timeout drops its device session.
        dispatcher::router(Bridge::new(self.config, self.connector))
            .layer(TimeoutLayer::with_status_code(
                StatusCode::GATEWAY_TIMEOUT,
                timeout,
            ))
            .layer(TraceLayer::new_for_http())
            .layer(cors)
    }
}

/// A server with graceful shutdown.
///
/// Aside from the graceful shutdown functionality, it behaves the same as
/// [`Server`].
#[derive(Debug)]
pub struct GracefulShutdownServer<C, F> {
    // Server.
    server: Server<C>,
    // Graceful shutdown signal.
    signal: F,
}

impl<C, F> GracefulShutdownServer<C, F>
where
    C: Connector,
    F: Future<Output = ()> + Send + 'static,
{
    /// Runs the server with graceful shutdown.
    ///
    /// # Errors
    ///
    /// Returns an error if the server fails to start or stops abnormally.
    pub async fn run(self) -> Result<()> {
        let address = self.server.config.server.listen_address().to_owned();
        let tls = self.server.config.server.http_tls_config.clone();

        // TLS material is loaded before binding.
        let acceptor = match &tls {
            Some(tls) => Some(server_acceptor(tls).await?),
            None => None,
        };

        let router = self.server.router();

        let listener = TcpListener::bind(&address)
            .await
            .map_err(|e| server_error(format!("cannot listen on {address}: {e}")))?;

        info!("Server route: [GET, \"{}\"]", dispatcher::OPENAPI_PATH);
        info!("Server routes under \"{}\"", dispatcher::API_BASE);

        let served = match acceptor {
            Some(acceptor) => {
                info!("Bridge reachable at this HTTPS address: {address}");
                axum::serve(TlsListener::new(listener, acceptor), router)
                    .with_graceful_shutdown(self.signal)
                    .await
            }
            None => {
                info!("Bridge reachable at this HTTP address: {address}");
                axum::serve(listener, router)
                    .with_graceful_shutdown(self.signal)
                    .await
            }
        };

        served.map_err(|e| server_error(format!("server stopped: {e}")))?;

        info!("Server stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use axum::body::Body;
    use axum::http::{Method, Request, StatusCode, header};

    use ros_proto::Reply;

    use tokio::net::TcpListener;

    use tower::ServiceExt;

    use crate::command::Command;
    use crate::config::{Config, CorsConfig, Device, TlsConfig};
    use crate::error::{ErrorKind, Result};
    use crate::session::{Connector, Session};

    use super::{Server, cors_layer};

    // Opens sessions whose commands never complete.
    #[derive(Debug, Clone, Default)]
    struct StalledConnector {
        dropped: Arc<AtomicUsize>,
    }

    #[derive(Debug)]
    struct StalledSession(Arc<AtomicUsize>);

    impl Drop for StalledSession {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl Session for StalledSession {
        async fn run(&mut self, _command: Command) -> Result<Reply> {
            std::future::pending().await
        }

        async fn close(self) {}
    }

    impl Connector for StalledConnector {
        type Session = StalledSession;

        async fn connect(&self, _device: &Device) -> Result<StalledSession> {
            Ok(StalledSession(self.dropped.clone()))
        }
    }

    const CONFIG: &str = r"
server:
  cors:
    allowed_origins: [https://console.lan]
Aliases:
  packages:
    path: /system/package
Devices:
  router:
    address: 10.0.0.1
    username: admin
    password: secret
";

    async fn preflight(origin: &str) -> axum::response::Response {
        let router = Server::new(Config::from_yaml(CONFIG).unwrap()).router();
        let request = Request::builder()
            .method(Method::OPTIONS)
            .uri("/api/v1/devices")
            .header(header::ORIGIN, origin)
            .header(header::ACCESS_CONTROL_REQUEST_METHOD, "PATCH")
            .body(Body::empty())
            .unwrap();

        router.oneshot(request).await.unwrap()
    }

    #[tokio::test]
    async fn allowed_origin() {
        let response = preflight("https://console.lan").await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
            "https://console.lan"
        );
        assert_eq!(response.headers()[header::ACCESS_CONTROL_MAX_AGE], "1200");
    }

    #[tokio::test]
    async fn foreign_origin() {
        let response = preflight("https://elsewhere.lan").await;

        assert!(
            !response
                .headers()
                .contains_key(header::ACCESS_CONTROL_ALLOW_ORIGIN)
        );
    }

    #[test]
    fn wildcard_origin() {
        let cors = CorsConfig {
            allowed_origins: Some(vec!["*".into()]),
            max_age: Some(60),
        };

        // Building the layer must not panic.
        let _layer = cors_layer(&cors);
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_device() {
        let connector = StalledConnector::default();
        let router = Server::new(Config::from_yaml(CONFIG).unwrap())
            .connector(connector.clone())
            .router();
        let request = Request::builder()
            .uri("/api/v1/devices/router/packages")
            .body(Body::empty())
            .unwrap();

        let response = router.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(connector.dropped.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unusable_listen_address() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();

        let mut config = Config::from_yaml(CONFIG).unwrap();
        config.server.http_listen_address = Some(address.to_string());

        let error = Server::new(config).run().await.unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Server);
    }

    #[tokio::test]
    async fn missing_tls_material() {
        let mut config = Config::from_yaml(CONFIG).unwrap();
        config.server.http_tls_config = Some(TlsConfig {
            cert_file: "/nonexistent/cert.pem".into(),
            key_file: "/nonexistent/key.pem".into(),
            ..TlsConfig::default()
        });

        let error = Server::new(config).run().await.unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Server);
    }
}

use std::sync::Arc;

use axum::{
    Router,
    body::Bytes,
    extract::{Json, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};

use futures_util::FutureExt;

use tracing::debug;

use crate::command::{Intent, Operation, parse_body};
use crate::config::{Alias, Config, Device};
use crate::error::{Error, ErrorKind, Result};
use crate::openapi;
use crate::outcome::{self, Outcome};
use crate::session::{Connector, Session, with_session};

/// Base path of the REST interface.
pub const API_BASE: &str = "/api/v1";

/// Path of the OpenAPI document.
pub const OPENAPI_PATH: &str = "/spec/openapi.v1.json";

/// A device and alias pair targeted by a request.
#[derive(Debug, Clone, Copy)]
pub struct Target<'a> {
    /// Device receiving the command.
    pub device: &'a Device,
    /// Alias providing the device path.
    pub alias: &'a Alias,
}

/// Shared state of the request handlers.
#[derive(Debug, Clone)]
pub struct Bridge<C> {
    config: Arc<Config>,
    // Devices with masked passwords, as exposed to callers.
    devices: Arc<[Device]>,
    connector: C,
}

impl<C> Bridge<C>
where
    C: Connector,
{
    /// Creates a [`Bridge`] over a normalized [`Config`].
    #[must_use]
    pub fn new(config: Config, connector: C) -> Self {
        let devices = config.devices.values().map(Device::redacted).collect();
        Self {
            config: Arc::new(config),
            devices,
            connector,
        }
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Resolves the target of an operation.
    ///
    /// # Errors
    ///
    /// Returns an [`ErrorKind::NotFound`] error when the device or the alias
    /// is unknown, or when the alias does not allow `operation`.
    pub fn resolve(&self, device: &str, alias: &str, operation: Operation) -> Result<Target<'_>> {
        let device = self
            .config
            .devices
            .get(device)
            .ok_or_else(|| Error::new(ErrorKind::NotFound, format!("no such device: {device}")))?;

        let alias = self
            .config
            .aliases
            .get(alias)
            .ok_or_else(|| Error::new(ErrorKind::NotFound, format!("no such alias: {alias}")))?;

        if !operation.allowed_by(alias) {
            return Err(Error::new(
                ErrorKind::NotFound,
                format!("operation not allowed: {operation} on {}", alias.name),
            ));
        }

        Ok(Target { device, alias })
    }

    /// Runs an intent on a resolved target, within a dedicated session.
    ///
    /// # Errors
    ///
    /// Returns an error when the session cannot be opened, or when the
    /// device fails the command.
    pub async fn run(&self, target: Target<'_>, intent: Intent) -> Result<Outcome> {
        debug!(
            "Running {} on `{}` of device `{}`",
            intent.operation(),
            target.alias.name,
            target.device.name
        );

        let path = target.alias.path.clone();
        with_session(&self.connector, target.device, move |session| {
            execute(session, path, intent).boxed()
        })
        .await
    }

    /// Resolves the target of an intent and runs it.
    ///
    /// # Errors
    ///
    /// Returns the resolution error or the execution error.
    pub async fn dispatch(&self, device: &str, alias: &str, intent: Intent) -> Result<Outcome> {
        let target = self.resolve(device, alias, intent.operation())?;
        self.run(target, intent).await
    }
}

async fn execute<S>(session: &mut S, path: String, intent: Intent) -> Result<Outcome>
where
    S: Session,
{
    let reply = session.run(intent.command(&path)).await?;

    match intent {
        Intent::List => Ok(outcome::records(reply)),
        Intent::Get { .. } => Ok(outcome::record(reply, StatusCode::OK)),
        Intent::Create { .. } => {
            let id = outcome::created_id(&reply)?;
            fetch(session, &path, id, StatusCode::CREATED).await
        }
        Intent::Update { id, .. } => {
            let id = outcome::updated_id(&reply, id);
            fetch(session, &path, id, StatusCode::ACCEPTED).await
        }
        Intent::Delete { .. } => outcome::removed(&reply),
    }
}

// Reads back an item after a change.
async fn fetch<S>(session: &mut S, path: &str, id: String, status: StatusCode) -> Result<Outcome>
where
    S: Session,
{
    let reply = session.run(Intent::Get { id }.command(path)).await?;
    Ok(outcome::record(reply, status))
}

async fn devices<C>(State(bridge): State<Bridge<C>>) -> Response
where
    C: Connector,
{
    Json(&*bridge.devices).into_response()
}

async fn aliases<C>(State(bridge): State<Bridge<C>>) -> Response
where
    C: Connector,
{
    Json(&bridge.config.aliases).into_response()
}

async fn list<C>(
    State(bridge): State<Bridge<C>>,
    Path((device, alias)): Path<(String, String)>,
) -> Result<Outcome>
where
    C: Connector,
{
    bridge.dispatch(&device, &alias, Intent::List).await
}

async fn create<C>(
    State(bridge): State<Bridge<C>>,
    Path((device, alias)): Path<(String, String)>,
    payload: Bytes,
) -> Result<Outcome>
where
    C: Connector,
{
    let target = bridge.resolve(&device, &alias, Operation::Create)?;
    let body = parse_body(&payload)?;
    bridge.run(target, Intent::Create { body }).await
}

async fn read<C>(
    State(bridge): State<Bridge<C>>,
    Path((device, alias, id)): Path<(String, String, String)>,
) -> Result<Outcome>
where
    C: Connector,
{
    bridge.dispatch(&device, &alias, Intent::Get { id }).await
}

async fn update<C>(
    State(bridge): State<Bridge<C>>,
    Path((device, alias, id)): Path<(String, String, String)>,
    payload: Bytes,
) -> Result<Outcome>
where
    C: Connector,
{
    let target = bridge.resolve(&device, &alias, Operation::Update)?;
    let body = parse_body(&payload)?;
    bridge.run(target, Intent::Update { id, body }).await
}

async fn remove<C>(
    State(bridge): State<Bridge<C>>,
    Path((device, alias, id)): Path<(String, String, String)>,
) -> Result<Outcome>
where
    C: Connector,
{
    bridge.dispatch(&device, &alias, Intent::Delete { id }).await
}

/// Builds the REST router of a [`Bridge`].
pub fn router<C>(bridge: Bridge<C>) -> Router
where
    C: Connector,
{
    Router::new()
        .route(&format!("{API_BASE}/devices"), get(devices::<C>))
        .route(&format!("{API_BASE}/aliases"), get(aliases::<C>))
        .route(
            &format!("{API_BASE}/devices/{{device}}/{{alias}}"),
            get(list::<C>).post(create::<C>),
        )
        .route(
            &format!("{API_BASE}/devices/{{device}}/{{alias}}/{{id}}"),
            get(read::<C>).patch(update::<C>).delete(remove::<C>),
        )
        .route(OPENAPI_PATH, get(openapi::document))
        .with_state(bridge)
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use axum::body::{Body, to_bytes};
    use axum::http::{Method, Request, StatusCode};
    use axum::response::Response;

    use serde_json::{Value, json};

    use tower::ServiceExt;

    use ros_proto::{Reply, Sentence};

    use crate::command::{Command, Intent};
    use crate::config::{Config, Device};
    use crate::error::{Error, ErrorKind, Result};
    use crate::outcome::Outcome;
    use crate::session::{Connector, Session};

    use super::{Bridge, router};

    const CONFIG: &str = r"
Aliases:
  packages:
    path: /system/package
  addresses:
    path: /ip/firewall/address-list
    create: true
    update: true
    delete: true
Devices:
  router:
    address: 10.0.0.1
    username: admin
    password: secret
";

    #[derive(Debug, Default)]
    struct Script {
        connects: AtomicUsize,
        closes: AtomicUsize,
        failure: Option<ErrorKind>,
        replies: Mutex<VecDeque<Result<Reply>>>,
        commands: Mutex<Vec<Vec<String>>>,
    }

    // Connector replaying scripted replies.
    #[derive(Debug, Clone, Default)]
    struct MockConnector(Arc<Script>);

    #[derive(Debug)]
    struct MockSession(Arc<Script>);

    impl Session for MockSession {
        async fn run(&mut self, command: Command) -> Result<Reply> {
            self.0.commands.lock().unwrap().push(command.words().to_vec());
            self.0
                .replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(Error::new(ErrorKind::Protocol, "unexpected command")))
        }

        async fn close(self) {
            self.0.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl Connector for MockConnector {
        type Session = MockSession;

        async fn connect(&self, _device: &Device) -> Result<MockSession> {
            self.0.connects.fetch_add(1, Ordering::SeqCst);
            match self.0.failure {
                Some(kind) => Err(Error::new(kind, "scripted failure")),
                None => Ok(MockSession(self.0.clone())),
            }
        }
    }

    impl MockConnector {
        fn replying(replies: Vec<Result<Reply>>) -> Self {
            Self(Arc::new(Script {
                replies: Mutex::new(replies.into()),
                ..Script::default()
            }))
        }

        fn failing(kind: ErrorKind) -> Self {
            Self(Arc::new(Script {
                failure: Some(kind),
                ..Script::default()
            }))
        }

        fn connects(&self) -> usize {
            self.0.connects.load(Ordering::SeqCst)
        }

        fn closes(&self) -> usize {
            self.0.closes.load(Ordering::SeqCst)
        }

        fn commands(&self) -> Vec<Vec<String>> {
            self.0.commands.lock().unwrap().clone()
        }
    }

    fn reply(re: &[&[&str]], done: &[&str]) -> Result<Reply> {
        Ok(Reply {
            re: re.iter().map(|words| Sentence::parse(*words)).collect(),
            done: Sentence::parse(done),
        })
    }

    fn bridge(connector: &MockConnector) -> Bridge<MockConnector> {
        Bridge::new(Config::from_yaml(CONFIG).unwrap(), connector.clone())
    }

    async fn request(
        connector: &MockConnector,
        method: Method,
        uri: &str,
        body: Option<&str>,
    ) -> Response {
        let body = body.map_or_else(Body::empty, |body| Body::from(body.to_owned()));
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(body)
            .unwrap();

        router(bridge(connector)).oneshot(request).await.unwrap()
    }

    async fn text(response: Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    async fn json(response: Response) -> Value {
        serde_json::from_str(&text(response).await).unwrap()
    }

    #[tokio::test]
    async fn list_two_records() {
        let connector = MockConnector::replying(vec![reply(
            &[
                &["!re", "=.id=*1", "=name=routeros"],
                &["!re", "=.id=*2", "=name=wireless"],
            ],
            &["!done"],
        )]);

        let response = request(&connector, Method::GET, "/api/v1/devices/router/packages", None).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            json(response).await,
            json!([
                {".id": "*1", "name": "routeros"},
                {".id": "*2", "name": "wireless"},
            ])
        );
        assert_eq!(connector.commands(), [["/system/package/print"]]);
        assert_eq!(connector.closes(), 1);
    }

    #[tokio::test]
    async fn get_unknown_id() {
        let connector = MockConnector::replying(vec![reply(&[], &["!done"])]);

        let response = request(
            &connector,
            Method::GET,
            "/api/v1/devices/router/packages/*99",
            None,
        )
        .await;

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(text(response).await, "");
        assert_eq!(
            connector.commands(),
            [vec!["/system/package/print", "?.id=*99"]]
        );
    }

    #[tokio::test]
    async fn disallowed_operations() {
        let connector = MockConnector::default();

        for (method, uri, body) in [
            (Method::POST, "/api/v1/devices/router/packages", Some("{}")),
            (Method::PATCH, "/api/v1/devices/router/packages/*1", Some("{}")),
            (Method::DELETE, "/api/v1/devices/router/packages/*1", None),
        ] {
            let response = request(&connector, method.clone(), uri, body).await;
            assert_eq!(response.status(), StatusCode::NOT_FOUND, "{method}");
        }

        assert_eq!(connector.connects(), 0);
    }

    #[tokio::test]
    async fn unknown_names() {
        let connector = MockConnector::default();

        let response = request(&connector, Method::GET, "/api/v1/devices/dev9/packages", None).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(text(response).await, "no such device: dev9");

        let response = request(&connector, Method::GET, "/api/v1/devices/router/routes", None).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(text(response).await, "no such alias: routes");

        assert_eq!(connector.connects(), 0);
    }

    #[tokio::test]
    async fn create_reads_back() {
        let connector = MockConnector::replying(vec![
            reply(&[], &["!done", "=ret=*2B"]),
            reply(
                &[&["!re", "=.id=*2B", "=list=blocked", "=address=10.0.0.9"]],
                &["!done"],
            ),
        ]);

        let response = request(
            &connector,
            Method::POST,
            "/api/v1/devices/router/addresses",
            Some(r#"{"list": "blocked", "address": "10.0.0.9"}"#),
        )
        .await;

        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(
            json(response).await,
            json!({".id": "*2B", "list": "blocked", "address": "10.0.0.9"})
        );
        assert_eq!(
            connector.commands(),
            [
                vec![
                    "/ip/firewall/address-list/add",
                    "=list=blocked",
                    "=address=10.0.0.9"
                ],
                vec!["/ip/firewall/address-list/print", "?.id=*2B"],
            ]
        );
        assert_eq!(connector.connects(), 1);
        assert_eq!(connector.closes(), 1);
    }

    #[tokio::test]
    async fn update_keeps_requested_id() {
        let connector = MockConnector::replying(vec![
            reply(&[], &["!done"]),
            reply(&[&["!re", "=.id=*7", "=comment=edge"]], &["!done"]),
        ]);

        let response = request(
            &connector,
            Method::PATCH,
            "/api/v1/devices/router/addresses/*7",
            Some(r#"{"comment": "edge"}"#),
        )
        .await;

        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert_eq!(
            connector.commands()[1],
            ["/ip/firewall/address-list/print", "?.id=*7"]
        );
    }

    #[tokio::test]
    async fn delete_outcomes() {
        let connector = MockConnector::replying(vec![
            reply(&[], &["!done"]),
            Err(Error::new(ErrorKind::Device, "no such item")),
        ]);

        let response = request(
            &connector,
            Method::DELETE,
            "/api/v1/devices/router/addresses/*7",
            None,
        )
        .await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = request(
            &connector,
            Method::DELETE,
            "/api/v1/devices/router/addresses/*8",
            None,
        )
        .await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(text(response).await, "no such item");

        assert_eq!(connector.closes(), 2);
    }

    #[tokio::test]
    async fn malformed_body() {
        let connector = MockConnector::default();

        let response = request(
            &connector,
            Method::POST,
            "/api/v1/devices/router/addresses",
            Some(r#"{"disabled": true}"#),
        )
        .await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(connector.connects(), 0);
    }

    #[tokio::test]
    async fn session_failures() {
        for kind in [ErrorKind::TlsTrust, ErrorKind::Connection, ErrorKind::Auth] {
            let connector = MockConnector::failing(kind);

            let response =
                request(&connector, Method::GET, "/api/v1/devices/router/packages", None).await;

            assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR, "{kind}");
            assert_eq!(text(response).await, "scripted failure");
        }
    }

    #[tokio::test]
    async fn redacted_devices() {
        let connector = MockConnector::default();

        let response = request(&connector, Method::GET, "/api/v1/devices", None).await;

        assert_eq!(response.status(), StatusCode::OK);
        let devices = json(response).await;
        assert_eq!(devices[0]["name"], "router");
        assert_eq!(devices[0]["password"], "*********");
    }

    #[tokio::test]
    async fn configured_aliases() {
        let connector = MockConnector::default();

        let response = request(&connector, Method::GET, "/api/v1/aliases", None).await;

        assert_eq!(response.status(), StatusCode::OK);
        let aliases = json(response).await;
        assert_eq!(aliases["addresses"]["path"], "/ip/firewall/address-list");
        assert_eq!(aliases["packages"]["create"], false);
    }

    #[tokio::test]
    async fn dispatch_outcome() {
        let connector = MockConnector::replying(vec![reply(&[], &["!done"])]);

        let outcome = bridge(&connector)
            .dispatch("router", "packages", Intent::List)
            .await
            .unwrap();

        assert_eq!(outcome, Outcome::Records(Vec::new()));
    }
}

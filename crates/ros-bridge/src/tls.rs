use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use axum::serve::Listener;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{CryptoProvider, ring, verify_tls12_signature, verify_tls13_signature};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::server::WebPkiClientVerifier;
use rustls::server::danger::{ClientCertVerified, ClientCertVerifier};
use rustls::{
    ClientConfig, DigitallySignedStruct, DistinguishedName, RootCertStore, SignatureScheme,
};

use tokio::net::{TcpListener, TcpStream};

use tokio_rustls::{TlsAcceptor, TlsConnector};

use tracing::{debug, warn};

use crate::config::{ClientAuth, DeviceTls, TlsConfig};
use crate::error::{Error, ErrorKind, Result};

// Upper bound of a TLS handshake with an HTTP client.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

// Pause after a failed accept, usually caused by file descriptor exhaustion.
const ACCEPT_ERROR_PAUSE: Duration = Duration::from_secs(1);

fn provider() -> Arc<CryptoProvider> {
    Arc::new(ring::default_provider())
}

fn trust_error(description: String) -> Error {
    Error::new(ErrorKind::TlsTrust, description)
}

fn server_error(description: String) -> Error {
    Error::new(ErrorKind::Server, description)
}

fn parse_certificates(pem: &[u8]) -> io::Result<Vec<CertificateDer<'static>>> {
    rustls_pemfile::certs(&mut &pem[..]).collect()
}

// Loads every certificate of a PEM file into a root store.
async fn load_roots(path: &str, error: fn(String) -> Error) -> Result<RootCertStore> {
    let pem = tokio::fs::read(path)
        .await
        .map_err(|e| error(format!("cannot read trust root {path}: {e}")))?;

    let certificates = parse_certificates(&pem)
        .map_err(|e| error(format!("cannot parse trust root {path}: {e}")))?;
    if certificates.is_empty() {
        return Err(error(format!("no certificate found in trust root {path}")));
    }

    let mut roots = RootCertStore::empty();
    for certificate in certificates {
        roots.add(certificate).map_err(|e| {
            error(format!(
                "failed to append root CA certificate from {path}: {e}"
            ))
        })?;
    }
    Ok(roots)
}

// System trust roots, loaded on first use.
static NATIVE_ROOTS: LazyLock<RootCertStore> = LazyLock::new(load_native_roots);

fn native_roots() -> &'static RootCertStore {
    &NATIVE_ROOTS
}

fn load_native_roots() -> RootCertStore {
    let native = rustls_native_certs::load_native_certs();
    for error in &native.errors {
        debug!("Skipping system certificate: {error}");
    }

    let mut roots = RootCertStore::empty();
    let (added, ignored) = roots.add_parsable_certificates(native.certs);
    debug!("Loaded {added} system certificates, ignored {ignored}");
    roots
}

/// Builds the TLS connector for a device.
///
/// The trust root, when configured, is loaded even if verification is
/// skipped, so a broken trust root is always reported. System roots are
/// only consulted when verification is on and no trust root is given.
pub(crate) async fn device_connector(tls: &DeviceTls) -> Result<TlsConnector> {
    let roots = match tls.ca.as_deref() {
        Some(path) => Some(load_roots(path, trust_error).await?),
        None => None,
    };

    let provider = provider();
    let builder = ClientConfig::builder_with_provider(provider.clone())
        .with_safe_default_protocol_versions()
        .map_err(|e| Error::new(ErrorKind::Connection, e.to_string()))?;

    let config = if tls.skip_verify {
        warn!("Device certificate verification is disabled");
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(SkipServerVerification(provider)))
            .with_no_client_auth()
    } else {
        let roots = roots.unwrap_or_else(|| native_roots().clone());
        builder.with_root_certificates(roots).with_no_client_auth()
    };

    Ok(TlsConnector::from(Arc::new(config)))
}

// Accepts any device certificate while still checking handshake signatures.
#[derive(Debug)]
struct SkipServerVerification(Arc<CryptoProvider>);

impl ServerCertVerifier for SkipServerVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}

// Accepts any client certificate, checking only handshake signatures.
#[derive(Debug)]
struct AnyClientCert {
    provider: Arc<CryptoProvider>,
    mandatory: bool,
}

impl ClientCertVerifier for AnyClientCert {
    fn client_auth_mandatory(&self) -> bool {
        self.mandatory
    }

    fn root_hint_subjects(&self) -> &[DistinguishedName] {
        &[]
    }

    fn verify_client_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _now: UnixTime,
    ) -> std::result::Result<ClientCertVerified, rustls::Error> {
        Ok(ClientCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

/// Builds the TLS acceptor of the HTTP endpoint.
pub(crate) async fn server_acceptor(tls: &TlsConfig) -> Result<TlsAcceptor> {
    let cert_pem = tokio::fs::read(&tls.cert_file)
        .await
        .map_err(|e| server_error(format!("cannot read {}: {e}", tls.cert_file)))?;
    let certificates = parse_certificates(&cert_pem)
        .map_err(|e| server_error(format!("cannot parse {}: {e}", tls.cert_file)))?;

    let key_pem = tokio::fs::read(&tls.key_file)
        .await
        .map_err(|e| server_error(format!("cannot read {}: {e}", tls.key_file)))?;
    let key: PrivateKeyDer<'static> = rustls_pemfile::private_key(&mut &key_pem[..])
        .map_err(|e| server_error(format!("cannot parse {}: {e}", tls.key_file)))?
        .ok_or_else(|| server_error(format!("no private key found in {}", tls.key_file)))?;

    let provider = provider();
    let builder = rustls::ServerConfig::builder_with_provider(provider.clone())
        .with_safe_default_protocol_versions()
        .map_err(|e| server_error(e.to_string()))?;

    let builder = match (tls.client_auth, tls.client_ca_file.as_deref()) {
        (ClientAuth::NoClientCert, _) => builder.with_no_client_auth(),
        (ClientAuth::RequestClientCert | ClientAuth::RequireAnyClientCert, _) => {
            builder.with_client_cert_verifier(Arc::new(AnyClientCert {
                provider,
                mandatory: tls.client_auth == ClientAuth::RequireAnyClientCert,
            }))
        }
        (client_auth, Some(path)) => {
            let roots = load_roots(path, server_error).await?;
            let verifier = WebPkiClientVerifier::builder_with_provider(Arc::new(roots), provider);
            let verifier = if client_auth == ClientAuth::VerifyClientCertIfGiven {
                verifier.allow_unauthenticated()
            } else {
                verifier
            };
            builder.with_client_cert_verifier(
                verifier.build().map_err(|e| server_error(e.to_string()))?,
            )
        }
        (client_auth, None) => {
            return Err(server_error(format!(
                "client_auth_type {client_auth:?} requires client_ca_file"
            )));
        }
    };

    let config = builder
        .with_single_cert(certificates, key)
        .map_err(|e| server_error(e.to_string()))?;

    Ok(TlsAcceptor::from(Arc::new(config)))
}

/// A listener accepting TLS connections for the HTTP endpoint.
pub(crate) struct TlsListener {
    listener: TcpListener,
    acceptor: TlsAcceptor,
}

impl TlsListener {
    pub(crate) const fn new(listener: TcpListener, acceptor: TlsAcceptor) -> Self {
        Self { listener, acceptor }
    }
}

impl Listener for TlsListener {
    type Io = tokio_rustls::server::TlsStream<TcpStream>;
    type Addr = SocketAddr;

    async fn accept(&mut self) -> (Self::Io, Self::Addr) {
        loop {
            let (stream, address) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!("Failed to accept a connection: {e}");
                    tokio::time::sleep(ACCEPT_ERROR_PAUSE).await;
                    continue;
                }
            };

            match tokio::time::timeout(HANDSHAKE_TIMEOUT, self.acceptor.accept(stream)).await {
                Ok(Ok(stream)) => return (stream, address),
                Ok(Err(e)) => debug!("TLS handshake with {address} failed: {e}"),
                Err(_) => debug!("TLS handshake with {address} timed out"),
            }
        }
    }

    fn local_addr(&self) -> io::Result<Self::Addr> {
        self.listener.local_addr()
    }
}

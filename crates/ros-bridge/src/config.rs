use std::path::Path;
use std::time::Duration;

use indexmap::IndexMap;

use serde::{Deserialize, Serialize};

use tracing::{debug, info};

use crate::error::{Error, ErrorKind, Result};

// Default HTTP listen address.
//
// The bridge is reachable from any network interface.
const DEFAULT_LISTEN_ADDRESS: &str = "0.0.0.0:22003";

// Default CORS origin.
//
// Clients most likely come from a different origin than the bridge address,
// so every origin is allowed unless configured otherwise.
const DEFAULT_ALLOWED_ORIGIN: &str = "*";

// Default CORS preflight max age, in seconds.
const DEFAULT_MAX_AGE: u64 = 1200;

// Default HTTP request timeout, in seconds.
const DEFAULT_REQUEST_TIMEOUT: u64 = 30;

// Default device timeout, in seconds.
const DEFAULT_TIMEOUT: f64 = 30.;

// Value replacing passwords in the exposed device list.
const REDACTED_PASSWORD: &str = "*********";

fn config_error(description: impl Into<std::borrow::Cow<'static, str>>) -> Error {
    Error::new(ErrorKind::Config, description)
}

/// Client certificate policy of the HTTP endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClientAuth {
    /// Client certificates are not requested.
    #[default]
    NoClientCert,
    /// Client certificates are requested but neither required nor verified.
    RequestClientCert,
    /// Client certificates are mandatory but not verified.
    RequireAnyClientCert,
    /// Client certificates are verified when presented.
    VerifyClientCertIfGiven,
    /// Client certificates are mandatory and verified.
    RequireAndVerifyClientCert,
}

impl ClientAuth {
    /// Whether client certificates must be verified against a trust root.
    #[must_use]
    pub const fn verifies(self) -> bool {
        matches!(
            self,
            Self::VerifyClientCertIfGiven | Self::RequireAndVerifyClientCert
        )
    }
}

/// TLS material of the HTTP endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsConfig {
    /// Certificate chain, PEM encoded.
    #[serde(default)]
    pub cert_file: String,
    /// Private key, PEM encoded.
    #[serde(default)]
    pub key_file: String,
    /// Client certificate policy.
    #[serde(rename = "client_auth_type", default)]
    pub client_auth: ClientAuth,
    /// Trust root for client certificates, PEM encoded.
    #[serde(default)]
    pub client_ca_file: Option<String>,
}

/// CORS settings of the HTTP endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorsConfig {
    /// Allowed origins. `*` allows any origin.
    #[serde(default)]
    pub allowed_origins: Option<Vec<String>>,
    /// Preflight max age, in seconds.
    #[serde(default)]
    pub max_age: Option<u64>,
}

impl CorsConfig {
    fn defaults() -> Self {
        Self {
            allowed_origins: Some(vec![DEFAULT_ALLOWED_ORIGIN.into()]),
            max_age: Some(DEFAULT_MAX_AGE),
        }
    }

    fn merge(self, defaults: Self) -> Self {
        Self {
            allowed_origins: self.allowed_origins.or(defaults.allowed_origins),
            max_age: self.max_age.or(defaults.max_age),
        }
    }

    /// Returns the allowed origins.
    #[must_use]
    pub fn allowed_origins(&self) -> &[String] {
        self.allowed_origins.as_deref().unwrap_or_default()
    }

    /// Returns the preflight max age.
    #[must_use]
    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age.unwrap_or(DEFAULT_MAX_AGE))
    }
}

/// HTTP endpoint settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen address, as `host:port`.
    #[serde(default)]
    pub http_listen_address: Option<String>,
    /// TLS material. When absent, plain HTTP is served.
    #[serde(default)]
    pub http_tls_config: Option<TlsConfig>,
    /// CORS settings.
    #[serde(default)]
    pub cors: Option<CorsConfig>,
    /// Upper bound of a request handling, in seconds.
    #[serde(default)]
    pub http_request_timeout: Option<u64>,
}

impl ServerConfig {
    fn defaults() -> Self {
        Self {
            http_listen_address: Some(DEFAULT_LISTEN_ADDRESS.into()),
            http_tls_config: None,
            cors: Some(CorsConfig::defaults()),
            http_request_timeout: Some(DEFAULT_REQUEST_TIMEOUT),
        }
    }

    // Explicit fields win, absent fields take the default. A partially
    // configured CORS section is completed field by field.
    fn merge(self, defaults: Self) -> Self {
        let cors = match (self.cors, defaults.cors) {
            (Some(cors), Some(defaults)) => Some(cors.merge(defaults)),
            (cors, defaults) => cors.or(defaults),
        };

        Self {
            http_listen_address: self.http_listen_address.or(defaults.http_listen_address),
            http_tls_config: self.http_tls_config.or(defaults.http_tls_config),
            cors,
            http_request_timeout: self.http_request_timeout.or(defaults.http_request_timeout),
        }
    }

    fn validate(&self) -> Result<()> {
        let address = self.listen_address();
        let valid_port = address
            .rsplit_once(':')
            .is_some_and(|(host, port)| !host.is_empty() && port.parse::<u16>().is_ok());
        if !valid_port {
            return Err(config_error(format!(
                "invalid http_listen_address '{address}', expected host:port"
            )));
        }

        if self.http_request_timeout == Some(0) {
            return Err(config_error(
                "http_request_timeout must be a positive number of seconds",
            ));
        }

        if let Some(tls) = &self.http_tls_config {
            if tls.cert_file.is_empty() || tls.key_file.is_empty() {
                return Err(config_error(
                    "http_tls_config requires both cert_file and key_file",
                ));
            }
            if tls.client_auth.verifies() && tls.client_ca_file.as_deref().is_none_or(str::is_empty)
            {
                return Err(config_error(format!(
                    "client_auth_type {:?} requires client_ca_file",
                    tls.client_auth
                )));
            }
        }

        Ok(())
    }

    /// Returns the listen address.
    #[must_use]
    pub fn listen_address(&self) -> &str {
        self.http_listen_address
            .as_deref()
            .unwrap_or(DEFAULT_LISTEN_ADDRESS)
    }

    /// Returns the upper bound of a request handling.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.http_request_timeout.unwrap_or(DEFAULT_REQUEST_TIMEOUT))
    }

    /// Returns the CORS settings.
    #[must_use]
    pub fn cors(&self) -> CorsConfig {
        self.cors.clone().unwrap_or_else(CorsConfig::defaults)
    }
}

/// A named resource path on the device configuration tree.
///
/// Listing and reading are always allowed, while creating, updating and
/// deleting must be enabled explicitly.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alias {
    /// Alias name, taken from its configuration key.
    #[serde(default)]
    pub name: String,
    /// Device-side path, such as `/system/package`.
    #[serde(default)]
    pub path: String,
    /// Whether items can be created.
    #[serde(default)]
    pub create: Option<bool>,
    /// Whether items can be updated.
    #[serde(default)]
    pub update: Option<bool>,
    /// Whether items can be deleted.
    #[serde(default)]
    pub delete: Option<bool>,
}

impl Alias {
    fn defaults() -> Self {
        Self {
            create: Some(false),
            update: Some(false),
            delete: Some(false),
            ..Self::default()
        }
    }

    fn fill_missing(&mut self, defaults: &Self) {
        self.create = self.create.or(defaults.create);
        self.update = self.update.or(defaults.update);
        self.delete = self.delete.or(defaults.delete);
    }

    /// Creates an [`Alias`] for the given path with every mutating
    /// operation disabled.
    #[must_use]
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Self::defaults()
        }
    }

    /// Enables item creation.
    #[must_use]
    pub const fn creatable(mut self) -> Self {
        self.create = Some(true);
        self
    }

    /// Enables item updates.
    #[must_use]
    pub const fn updatable(mut self) -> Self {
        self.update = Some(true);
        self
    }

    /// Enables item deletion.
    #[must_use]
    pub const fn deletable(mut self) -> Self {
        self.delete = Some(true);
        self
    }

    /// Whether items can be created.
    #[must_use]
    pub fn can_create(&self) -> bool {
        self.create.unwrap_or_default()
    }

    /// Whether items can be updated.
    #[must_use]
    pub fn can_update(&self) -> bool {
        self.update.unwrap_or_default()
    }

    /// Whether items can be deleted.
    #[must_use]
    pub fn can_delete(&self) -> bool {
        self.delete.unwrap_or_default()
    }
}

/// TLS settings for a device connection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceTls {
    /// Trust root, PEM encoded. When absent, the system roots are used.
    #[serde(default)]
    pub ca: Option<String>,
    /// Skips the verification of the device certificate.
    ///
    /// Meant for devices using self-signed certificates. Read and written
    /// under the `verify` key.
    #[serde(default, rename = "verify", alias = "skip_verify")]
    pub skip_verify: bool,
}

/// A managed device.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Device {
    /// Device name, taken from its configuration key.
    #[serde(default)]
    pub name: String,
    /// Device address, as `host` or `host:port`.
    #[serde(default)]
    pub address: String,
    /// Login user name.
    #[serde(default)]
    pub username: String,
    /// Login password.
    #[serde(default)]
    pub password: String,
    /// Connection timeout, in seconds.
    #[serde(default)]
    pub timeout: Option<f64>,
    /// TLS settings. When absent, a plain connection is used.
    #[serde(default)]
    pub tls: Option<DeviceTls>,
}

impl Device {
    fn defaults() -> Self {
        Self {
            timeout: Some(DEFAULT_TIMEOUT),
            ..Self::default()
        }
    }

    fn fill_missing(&mut self, defaults: &Self) {
        self.timeout = self.timeout.or(defaults.timeout);
    }

    fn validate(&self) -> Result<()> {
        for (field, value) in [
            ("username", &self.username),
            ("password", &self.password),
            ("address", &self.address),
        ] {
            if value.is_empty() {
                return Err(config_error(format!(
                    "device '{}' is missing {field}",
                    self.name
                )));
            }
        }

        if let Some(timeout) = self.timeout
            && !(timeout.is_finite() && timeout > 0.)
        {
            return Err(config_error(format!(
                "device '{}' has invalid timeout {timeout}, expected a positive number of seconds",
                self.name
            )));
        }

        Ok(())
    }

    /// Creates a [`Device`] reachable at the given address.
    #[must_use]
    pub fn new(
        address: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            address: address.into(),
            username: username.into(),
            password: password.into(),
            ..Self::defaults()
        }
    }

    /// Sets the TLS settings.
    #[must_use]
    pub fn tls(mut self, tls: DeviceTls) -> Self {
        self.tls = Some(tls);
        self
    }

    /// Returns the connection timeout.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.timeout.unwrap_or(DEFAULT_TIMEOUT))
            .unwrap_or(Duration::MAX)
    }

    /// Returns a copy of this device with the password masked.
    #[must_use]
    pub fn redacted(&self) -> Self {
        Self {
            password: REDACTED_PASSWORD.into(),
            ..self.clone()
        }
    }
}

/// The bridge configuration.
///
/// Once [`Config::normalize`] succeeds, the configuration is complete and it
/// is only read for the rest of the process lifetime.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// HTTP endpoint settings.
    #[serde(default)]
    pub server: ServerConfig,
    /// Aliases, by name.
    #[serde(rename = "Aliases", alias = "aliases", default)]
    pub aliases: IndexMap<String, Alias>,
    /// Devices, by name.
    #[serde(rename = "Devices", alias = "devices", default)]
    pub devices: IndexMap<String, Device>,
}

impl Config {
    /// Reads, decodes and normalizes a YAML configuration file.
    ///
    /// # Errors
    ///
    /// Returns an [`ErrorKind::Config`] error when the file cannot be read,
    /// is not valid YAML, or fails normalization.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        debug!("Loading configuration from {}", path.display());

        let document = tokio::fs::read_to_string(path).await.map_err(|e| {
            config_error(format!("cannot read {}: {e}", path.display()))
        })?;

        let config = Self::from_yaml(&document)?;
        info!(
            "Loaded {} aliases and {} devices",
            config.aliases.len(),
            config.devices.len()
        );
        Ok(config)
    }

    /// Decodes and normalizes a YAML configuration document.
    ///
    /// # Errors
    ///
    /// Returns an [`ErrorKind::Config`] error when the document is not valid
    /// YAML or fails normalization.
    pub fn from_yaml(document: &str) -> Result<Self> {
        let mut config: Self = serde_yaml::from_str(document)?;
        config.normalize()?;
        Ok(config)
    }

    /// Fills defaults and validates the configuration.
    ///
    /// Alias and device names are stamped from their keys. Explicit values
    /// are never overwritten, so normalizing twice has no further effect.
    ///
    /// # Errors
    ///
    /// Returns an [`ErrorKind::Config`] error naming the first offending
    /// entry, in document order.
    pub fn normalize(&mut self) -> Result<()> {
        self.server = std::mem::take(&mut self.server).merge(ServerConfig::defaults());
        self.server.validate()?;

        if self.aliases.is_empty() {
            return Err(config_error("no aliases defined"));
        }
        let alias_defaults = Alias::defaults();
        for (name, alias) in &mut self.aliases {
            alias.name.clone_from(name);
            if alias.path.is_empty() {
                return Err(config_error(format!("alias '{name}' is missing path")));
            }
            alias.fill_missing(&alias_defaults);
        }

        if self.devices.is_empty() {
            return Err(config_error("no device defined"));
        }
        let device_defaults = Device::defaults();
        for (name, device) in &mut self.devices {
            device.name.clone_from(name);
            device.validate()?;
            device.fill_missing(&device_defaults);
        }

        Ok(())
    }
}

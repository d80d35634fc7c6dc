//! Driver Configuration
//!
//! A flat key/value [`ConfigStore`] (loaded from YAML with environment
//! overrides) and the validated [`DriverConfig`] handed to constructors.

use crate::error::{Error, Result};
use reqwest::Url;
use serde_yaml::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

// =============================================================================
// Keys
// =============================================================================

/// Scope every driver key lives under
pub const KEY_SCOPE: &str = "vmax";

pub const KEY_ENDPOINT: &str = "vmax.endpoint";
pub const KEY_INSECURE: &str = "vmax.insecure";
pub const KEY_USE_CERTS: &str = "vmax.useCerts";
pub const KEY_CERT_FILE: &str = "vmax.certFile";
pub const KEY_USER_NAME: &str = "vmax.userName";
pub const KEY_PASSWORD: &str = "vmax.password";
pub const KEY_SYMMETRIX_ID: &str = "vmax.symmetrixID";
pub const KEY_SYSTEM_ID: &str = "vmax.systemID";
pub const KEY_PORT: &str = "vmax.port";
pub const KEY_STORAGE_GROUP_ID: &str = "vmax.storageGroupID";
pub const KEY_GROUP_PREFIX_ID: &str = "vmax.groupPrefixID";
pub const KEY_DEFAULT_GROUP_ID: &str = "vmax.defaultGroupID";
pub const KEY_PORT_GROUP_ID: &str = "vmax.portGroupID";
pub const KEY_THIN_OR_THICK: &str = "vmax.thinOrThick";

const KNOWN_KEYS: &[&str] = &[
    KEY_ENDPOINT,
    KEY_INSECURE,
    KEY_USE_CERTS,
    KEY_CERT_FILE,
    KEY_USER_NAME,
    KEY_PASSWORD,
    KEY_SYMMETRIX_ID,
    KEY_SYSTEM_ID,
    KEY_PORT,
    KEY_STORAGE_GROUP_ID,
    KEY_GROUP_PREFIX_ID,
    KEY_DEFAULT_GROUP_ID,
    KEY_PORT_GROUP_ID,
    KEY_THIN_OR_THICK,
];

pub const DEFAULT_USER_NAME: &str = "smc";
pub const DEFAULT_PASSWORD: &str = "smc";
pub const DEFAULT_PORT: u16 = 8443;
pub const DEFAULT_GROUP_PREFIX: &str = "libStorage_";
pub const DEFAULT_THIN_OR_THICK: &str = "ThinProvisioned";

// =============================================================================
// Config Store
// =============================================================================

/// Flat key/value configuration provider
#[derive(Debug, Clone, Default)]
pub struct ConfigStore {
    values: BTreeMap<String, String>,
}

impl ConfigStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a YAML document, flattening nested maps into dotted keys
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let root: Value = serde_yaml::from_str(yaml)?;
        let mut store = Self::new();
        flatten("", &root, &mut store.values);
        Ok(store)
    }

    /// Load a YAML file
    pub fn from_file(path: &Path) -> Result<Self> {
        debug!("Loading configuration from {}", path.display());
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&contents)
    }

    /// Apply `VMAX_<KEY>` overrides, e.g. `VMAX_ENDPOINT` or `VMAX_SYMMETRIXID`
    pub fn apply_env<I>(&mut self, vars: I)
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (name, value) in vars {
            let Some(suffix) = name.strip_prefix("VMAX_") else {
                continue;
            };
            let wanted = suffix.replace('_', "").to_uppercase();
            if let Some(key) = KNOWN_KEYS.iter().find(|key| {
                key.trim_start_matches("vmax.").to_uppercase() == wanted
            }) {
                self.values.insert((*key).to_string(), value);
            }
        }
    }

    /// Set a key
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.values.insert(key.into(), value.into());
        self
    }

    /// Non-empty string value for a key
    pub fn get_string(&self, key: &str) -> Option<&str> {
        self.values
            .get(key)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    /// First non-empty value among alias keys
    pub fn get_first(&self, keys: &[&str]) -> Option<&str> {
        keys.iter().find_map(|key| self.get_string(key))
    }

    /// Boolean value for a key
    pub fn get_bool(&self, key: &str) -> Result<Option<bool>> {
        match self.get_string(key) {
            None => Ok(None),
            Some(raw) => match raw.to_lowercase().as_str() {
                "true" | "yes" | "1" => Ok(Some(true)),
                "false" | "no" | "0" => Ok(Some(false)),
                _ => Err(Error::Configuration(format!(
                    "{} must be a boolean, got '{}'",
                    key, raw
                ))),
            },
        }
    }
}

fn flatten(prefix: &str, value: &Value, out: &mut BTreeMap<String, String>) {
    let scalar = match value {
        Value::Mapping(map) => {
            for (k, v) in map {
                let Some(k) = k.as_str() else { continue };
                let key = if prefix.is_empty() {
                    k.to_string()
                } else {
                    format!("{}.{}", prefix, k)
                };
                flatten(&key, v, out);
            }
            return;
        }
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Null | Value::Sequence(_) | Value::Tagged(_) => return,
    };
    out.insert(prefix.to_string(), scalar);
}

// =============================================================================
// Driver Configuration
// =============================================================================

/// Validated configuration for the VMAX driver
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Unisphere base URL
    pub endpoint: String,
    /// Skip TLS verification
    pub insecure: bool,
    /// Authenticate with a client certificate
    pub use_certs: bool,
    /// PEM file holding the client certificate and key
    pub cert_file: Option<PathBuf>,
    /// API username
    pub user_name: String,
    /// API password
    pub password: String,
    /// Target array
    pub symmetrix_id: String,
    /// API port, used when the endpoint has none
    pub port: u16,
    /// Prefix for per-host storage group names
    pub group_prefix: String,
    /// Storage group holding volumes not attached to any host
    pub default_group: String,
    /// Port group bound into masking views this driver creates
    pub port_group: Option<String>,
    /// Provisioning mode (informational)
    pub thin_or_thick: String,
}

impl DriverConfig {
    /// Build a configuration with defaults for everything but the required keys
    pub fn new(endpoint: impl Into<String>, symmetrix_id: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            insecure: true,
            use_certs: false,
            cert_file: None,
            user_name: DEFAULT_USER_NAME.to_string(),
            password: DEFAULT_PASSWORD.to_string(),
            symmetrix_id: symmetrix_id.into(),
            port: DEFAULT_PORT,
            group_prefix: DEFAULT_GROUP_PREFIX.to_string(),
            default_group: format!("{}default", DEFAULT_GROUP_PREFIX),
            port_group: None,
            thin_or_thick: DEFAULT_THIN_OR_THICK.to_string(),
        }
    }

    /// Read and validate the driver keys from a store
    pub fn from_store(store: &ConfigStore) -> Result<Self> {
        let endpoint = store
            .get_string(KEY_ENDPOINT)
            .ok_or_else(|| Error::Configuration(format!("{} is required", KEY_ENDPOINT)))?;
        let symmetrix_id = store
            .get_first(&[KEY_SYMMETRIX_ID, KEY_SYSTEM_ID])
            .ok_or_else(|| {
                Error::Configuration(format!(
                    "{} (or {}) is required",
                    KEY_SYMMETRIX_ID, KEY_SYSTEM_ID
                ))
            })?;

        let mut config = Self::new(endpoint, symmetrix_id);

        if let Some(insecure) = store.get_bool(KEY_INSECURE)? {
            config.insecure = insecure;
        }
        if let Some(use_certs) = store.get_bool(KEY_USE_CERTS)? {
            config.use_certs = use_certs;
        }
        config.cert_file = store.get_string(KEY_CERT_FILE).map(PathBuf::from);
        if let Some(user) = store.get_string(KEY_USER_NAME) {
            config.user_name = user.to_string();
        }
        if let Some(password) = store.get_string(KEY_PASSWORD) {
            config.password = password.to_string();
        }
        if let Some(port) = store.get_string(KEY_PORT) {
            config.port = port.parse().map_err(|_| {
                Error::Configuration(format!("{} must be a port number, got '{}'", KEY_PORT, port))
            })?;
        }
        if let Some(prefix) = store.get_first(&[KEY_STORAGE_GROUP_ID, KEY_GROUP_PREFIX_ID]) {
            config.group_prefix = prefix.to_string();
        }
        config.default_group = store
            .get_string(KEY_DEFAULT_GROUP_ID)
            .map(str::to_string)
            .unwrap_or_else(|| format!("{}default", config.group_prefix));
        config.port_group = store.get_string(KEY_PORT_GROUP_ID).map(str::to_string);
        if let Some(mode) = store.get_string(KEY_THIN_OR_THICK) {
            config.thin_or_thick = mode.to_string();
        }

        config.validate()?;
        Ok(config)
    }

    /// Check invariants that constructors rely on
    pub fn validate(&self) -> Result<()> {
        if self.endpoint.trim().is_empty() {
            return Err(Error::Configuration("endpoint must not be empty".into()));
        }
        if self.symmetrix_id.trim().is_empty() {
            return Err(Error::Configuration("symmetrix ID must not be empty".into()));
        }
        if self.group_prefix.is_empty() {
            return Err(Error::Configuration("group prefix must not be empty".into()));
        }
        if self.use_certs && self.cert_file.is_none() {
            return Err(Error::Configuration(format!(
                "{} is required when {} is set",
                KEY_CERT_FILE, KEY_USE_CERTS
            )));
        }
        self.base_url()?;
        Ok(())
    }

    /// Endpoint with scheme and port filled in
    pub fn base_url(&self) -> Result<Url> {
        let raw = if self.endpoint.contains("://") {
            self.endpoint.clone()
        } else {
            format!("https://{}", self.endpoint)
        };
        let mut url = Url::parse(&raw)
            .map_err(|e| Error::Configuration(format!("invalid endpoint '{}': {}", raw, e)))?;
        if url.port().is_none() {
            url.set_port(Some(self.port)).map_err(|_| {
                Error::Configuration(format!("endpoint '{}' cannot carry a port", raw))
            })?;
        }
        Ok(url)
    }
}

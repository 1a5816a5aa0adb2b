use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, time::Duration};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// This service as seen by other services
    #[serde(default)]
    pub service: ServiceConfig,
    /// The OpenLMIS reference data service
    #[serde(default)]
    pub referencedata: ReferenceDataConfig,
    /// Outbound credentials and inbound trust
    #[serde(default)]
    pub auth: AuthConfig,
    /// Startup bulk load
    #[serde(default)]
    pub loader: LoaderConfig,
    /// Reverse-sync hook delivery
    #[serde(default)]
    pub hooks: HooksConfig,
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), String> {
        // Server validations
        if self.server.port == 0 {
            return Err("server.port must be > 0".into());
        }
        if self.server.request_timeout_ms == 0 {
            return Err("server.request_timeout_ms must be > 0".into());
        }
        // Logging validation
        let lvl = self.logging.level.to_ascii_lowercase();
        let valid_levels = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid_levels.contains(&lvl.as_str()) {
            return Err(format!("logging.level must be one of {valid_levels:?}"));
        }
        // Registry validations
        url::Url::parse(&self.referencedata.url)
            .map_err(|e| format!("referencedata.url is not a valid URL: {e}"))?;
        url::Url::parse(&self.service.url)
            .map_err(|e| format!("service.url is not a valid URL: {e}"))?;
        if self.referencedata.facility_type_id.is_nil() {
            return Err("referencedata.facility_type_id must be set".into());
        }
        if self.referencedata.timeout_ms == 0 {
            return Err("referencedata.timeout_ms must be > 0".into());
        }
        // Auth validation
        if self.auth.api_key_prefix.is_empty() {
            return Err("auth.api_key_prefix must not be empty".into());
        }
        if self.auth.client_id.is_empty() {
            return Err("auth.client_id must not be empty".into());
        }
        // Loader validations
        if self.loader.chunk_size == 0 {
            return Err("loader.chunk_size must be > 0".into());
        }
        if self.loader.poll_interval_ms == 0 {
            return Err("loader.poll_interval_ms must be > 0".into());
        }
        if self.loader.page_size == 0 {
            return Err("loader.page_size must be > 0".into());
        }
        Ok(())
    }

    pub fn addr(&self) -> SocketAddr {
        use std::net::{IpAddr, Ipv4Addr};
        let host: IpAddr = self
            .server
            .host
            .parse()
            .unwrap_or(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)));
        SocketAddr::from((host, self.server.port))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.server.request_timeout_ms)
    }

    pub fn registry_timeout(&self) -> Duration {
        Duration::from_millis(self.referencedata.timeout_ms)
    }

    /// Client-credentials endpoint; the registry's own by default.
    pub fn token_url(&self) -> String {
        self.auth
            .token_url
            .clone()
            .unwrap_or_else(|| format!("{}/api/oauth/token", self.registry_base()))
    }

    /// Token introspection endpoint; the registry's own by default.
    pub fn check_token_url(&self) -> String {
        self.auth
            .check_token_url
            .clone()
            .unwrap_or_else(|| format!("{}/api/oauth/check_token", self.registry_base()))
    }

    fn registry_base(&self) -> &str {
        self.referencedata.url.trim_end_matches('/')
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_body_limit")]
    pub body_limit_bytes: usize,
}

fn default_host() -> String {
    "0.0.0.0".into()
}
fn default_port() -> u16 {
    8080
}
fn default_request_timeout_ms() -> u64 {
    60_000
}
fn default_body_limit() -> usize {
    // Bulk-load bundles carry up to a full chunk of Locations.
    16 * 1024 * 1024
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_ms: default_request_timeout_ms(),
            body_limit_bytes: default_body_limit(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Public base URL; the bundle loader posts to `{url}/fhir`.
    #[serde(default = "default_service_url")]
    pub url: String,
}

fn default_service_url() -> String {
    "http://localhost:8080".into()
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            url: default_service_url(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferenceDataConfig {
    /// Registry base URL, also used as the Location identifier system
    #[serde(default = "default_referencedata_url")]
    pub url: String,
    /// Facility type given to every facility created through reverse-sync
    #[serde(default)]
    pub facility_type_id: Uuid,
    /// Level number of root geographic zones
    #[serde(default = "default_largest_level_number")]
    pub largest_level_number: i32,
    #[serde(default = "default_referencedata_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_referencedata_url() -> String {
    "http://localhost".into()
}
fn default_largest_level_number() -> i32 {
    1
}
fn default_referencedata_timeout_ms() -> u64 {
    30_000
}

impl Default for ReferenceDataConfig {
    fn default() -> Self {
        Self {
            url: default_referencedata_url(),
            facility_type_id: Uuid::nil(),
            largest_level_number: default_largest_level_number(),
            timeout_ms: default_referencedata_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub token_url: Option<String>,
    #[serde(default)]
    pub check_token_url: Option<String>,
    /// Service client; also the only non-api-key client trusted inbound
    #[serde(default = "default_client_id")]
    pub client_id: String,
    #[serde(default = "default_client_secret")]
    pub client_secret: String,
    #[serde(default = "default_api_key_prefix")]
    pub api_key_prefix: String,
}

fn default_client_id() -> String {
    "trusted-client".into()
}
fn default_client_secret() -> String {
    "secret".into()
}
fn default_api_key_prefix() -> String {
    "api-key-client-".into()
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            token_url: None,
            check_token_url: None,
            client_id: default_client_id(),
            client_secret: default_client_secret(),
            api_key_prefix: default_api_key_prefix(),
        }
    }
}

/// How the bulk loader writes Locations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LoadStrategy {
    /// Direct upserts through one storage transaction per batch
    #[default]
    Storage,
    /// Chunked transaction bundles posted to this service
    Bundle,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoaderConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub strategy: LoadStrategy,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

fn default_true() -> bool {
    true
}
fn default_chunk_size() -> usize {
    octofhir_refdata::loader::DEFAULT_CHUNK_SIZE
}
fn default_poll_interval_ms() -> u64 {
    5_000
}
fn default_page_size() -> u32 {
    octofhir_refdata::loader::DEFAULT_PAGE_SIZE
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            strategy: LoadStrategy::default(),
            chunk_size: default_chunk_size(),
            poll_interval_ms: default_poll_interval_ms(),
            page_size: default_page_size(),
        }
    }
}

impl LoaderConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HooksConfig {
    /// Run reverse-sync inside the request transaction and fail the request
    /// with it, instead of in the background after commit.
    #[serde(default = "default_true")]
    pub blocking: bool,
    #[serde(default = "default_hook_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_hook_timeout_ms() -> u64 {
    30_000
}

impl Default for HooksConfig {
    fn default() -> Self {
        Self {
            blocking: true,
            timeout_ms: default_hook_timeout_ms(),
        }
    }
}

impl HooksConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

pub mod loader {
    use super::AppConfig;
    use config::{Config, Environment, File};
    use std::path::PathBuf;

    pub const DEFAULT_CONFIG_FILE: &str = "octofhir-bridge.toml";

    pub fn load_config(path: Option<&str>) -> Result<AppConfig, String> {
        let pathbuf = PathBuf::from(path.unwrap_or(DEFAULT_CONFIG_FILE));
        let mut builder = Config::builder();
        if pathbuf.exists() {
            builder = builder.add_source(File::from(pathbuf));
        }
        // Environment variable overrides, e.g., OCTOFHIR__REFERENCEDATA__URL=http://registry
        builder = builder.add_source(
            Environment::with_prefix("OCTOFHIR")
                .try_parsing(true)
                .separator("__"),
        );
        let cfg = builder
            .build()
            .map_err(|e| format!("config build error: {e}"))?;
        let merged: AppConfig = cfg
            .try_deserialize()
            .map_err(|e| format!("config deserialize error: {e}"))?;
        merged.validate()?;
        Ok(merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn valid() -> AppConfig {
        let mut cfg = AppConfig::default();
        cfg.referencedata.facility_type_id = Uuid::from_u128(7);
        cfg
    }

    #[test]
    fn test_defaults_need_only_a_facility_type() {
        assert!(AppConfig::default().validate().is_err());
        assert!(valid().validate().is_ok());

        let cfg = valid();
        assert_eq!(cfg.loader.chunk_size, 500);
        assert_eq!(cfg.loader.poll_interval(), Duration::from_secs(5));
        assert_eq!(cfg.loader.strategy, LoadStrategy::Storage);
        assert_eq!(cfg.token_url(), "http://localhost/api/oauth/token");
        assert_eq!(cfg.check_token_url(), "http://localhost/api/oauth/check_token");
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut cfg = valid();
        cfg.server.port = 0;
        assert!(cfg.validate().unwrap_err().contains("server.port"));

        let mut cfg = valid();
        cfg.loader.chunk_size = 0;
        assert!(cfg.validate().unwrap_err().contains("chunk_size"));

        let mut cfg = valid();
        cfg.loader.poll_interval_ms = 0;
        assert!(cfg.validate().unwrap_err().contains("poll_interval_ms"));

        let mut cfg = valid();
        cfg.referencedata.url = "not a url".into();
        assert!(cfg.validate().unwrap_err().contains("referencedata.url"));

        let mut cfg = valid();
        cfg.auth.api_key_prefix.clear();
        assert!(cfg.validate().unwrap_err().contains("api_key_prefix"));

        let mut cfg = valid();
        cfg.logging.level = "loud".into();
        assert!(cfg.validate().unwrap_err().contains("logging.level"));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[referencedata]
url = "http://registry:8080"
facility_type_id = "00000000-0000-0000-0000-000000000007"
largest_level_number = 4

[loader]
strategy = "bundle"
chunk_size = 50

[hooks]
blocking = false
"#
        )
        .unwrap();

        let cfg = loader::load_config(file.path().to_str()).unwrap();
        assert_eq!(cfg.referencedata.url, "http://registry:8080");
        assert_eq!(cfg.referencedata.largest_level_number, 4);
        assert_eq!(cfg.loader.strategy, LoadStrategy::Bundle);
        assert_eq!(cfg.loader.chunk_size, 50);
        assert!(!cfg.hooks.blocking);
        assert_eq!(cfg.check_token_url(), "http://registry:8080/api/oauth/check_token");
        // untouched sections keep their defaults
        assert_eq!(cfg.server.port, 8080);
        assert_eq!(cfg.auth.api_key_prefix, "api-key-client-");
    }

    #[test]
    fn test_invalid_file_is_reported() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[loader]\nchunk_size = 0").unwrap();

        let err = loader::load_config(file.path().to_str()).unwrap_err();
        assert!(err.contains("facility_type_id") || err.contains("chunk_size"));
    }
}

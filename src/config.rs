//! Layered service configuration.
//!
//! Merge order (later overrides earlier):
//! 1. Compiled defaults
//! 2. `config/<service>/<env>.yaml` (optional)
//! 3. `.env` file (skipped in production)
//! 4. `<PREFIX><KEY>_FILE` secret files
//! 5. `<PREFIX><KEY>` environment variables
//!
//! Environment keys use `__` for nesting, so `AUTH_HTTP__ADDR` maps to `http.addr`.

use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;
use std::time::Duration;

use figment::{
    Figment, Metadata, Profile, Provider,
    providers::{Env, Format, Serialized, Yaml},
    value::{Dict, Map, Value},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Upper bound for a `*_FILE` secret.
pub const MAX_SECRET_FILE_BYTES: u64 = 1024 * 1024;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),

    #[error("secret file for {key} at {path}: {reason}")]
    SecretFile {
        key: String,
        path: String,
        reason: String,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Which binary is loading the configuration. Selects env prefix and defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceKind {
    Transaction,
    Auth,
}

impl ServiceKind {
    pub fn env_prefix(&self) -> &'static str {
        match self {
            ServiceKind::Transaction => "TRANSACTION_",
            ServiceKind::Auth => "AUTH_",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ServiceKind::Transaction => "transaction",
            ServiceKind::Auth => "auth",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    pub env: String,
    pub http: HttpConfig,
    pub grpc: GrpcConfig,
    pub db: DbConfig,
    pub auth: AuthConfig,
    pub user: UserConfig,
    pub observability: ObservabilityConfig,
    pub logging: LoggingConfig,
    pub message_publisher: MessagePublisherConfig,
    pub recovery: RecoveryConfig,
    pub account_service: AccountServiceConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct HttpConfig {
    /// Liveness/readiness/metrics sidecar address
    pub addr: String,
    pub request_timeout_seconds: u64,
    pub shutdown_timeout_seconds: u64,
}

/// RPC listener. Key name kept for compatibility with existing deployments.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GrpcConfig {
    pub addr: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct DbConfig {
    pub dsn: String,
    #[serde(rename = "type")]
    pub db_type: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct AuthConfig {
    pub hash_key: String,
    pub jwt_secret: String,
    /// Access token lifetime in seconds
    pub jwt_token_duration: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct UserConfig {
    pub admin_username: String,
    pub admin_password: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct ObservabilityConfig {
    pub metrics: MetricsConfig,
    pub tracing: TracingConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct MetricsConfig {
    pub enabled: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct TracingConfig {
    pub enabled: bool,
    pub protocol: String,
    pub endpoint: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LoggingConfig {
    pub level: String,
    /// `json` or `console`
    pub encoding: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            encoding: "console".to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct MessagePublisherConfig {
    pub enabled: bool,
    pub broker_type: String,
    pub broker_addr: String,
    pub publish_topic: String,
    pub health_check_interval_seconds: u64,
    pub max_reconnect_attempts: u32,
    pub retry_interval_seconds: u64,
    pub probe_timeout_seconds: u64,
}

impl Default for MessagePublisherConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            broker_type: "redis".to_string(),
            broker_addr: "redis://127.0.0.1:6379".to_string(),
            publish_topic: "transaction-events".to_string(),
            health_check_interval_seconds: 10,
            max_reconnect_attempts: 5,
            retry_interval_seconds: 2,
            probe_timeout_seconds: 3,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RecoveryConfig {
    /// Seconds between reconciliation ticks
    pub interval: u64,
    /// Seconds from creation until a transaction counts as stuck
    pub transaction_timeout: u64,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            interval: 30,
            transaction_timeout: 300,
        }
    }
}

impl RecoveryConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval.max(1))
    }

    pub fn transaction_timeout(&self) -> Duration {
        Duration::from_secs(self.transaction_timeout)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AccountServiceConfig {
    pub addr: String,
    pub timeout_seconds: u64,
    pub monitor_interval_seconds: u64,
}

impl Default for AccountServiceConfig {
    fn default() -> Self {
        Self {
            addr: "http://127.0.0.1:9092".to_string(),
            timeout_seconds: 30,
            monitor_interval_seconds: 5,
        }
    }
}

impl AppConfig {
    /// Compiled defaults for the given service.
    pub fn defaults(kind: ServiceKind) -> Self {
        let (http_addr, grpc_addr) = match kind {
            ServiceKind::Transaction => ("0.0.0.0:8081", "0.0.0.0:9090"),
            ServiceKind::Auth => ("0.0.0.0:8091", "0.0.0.0:9091"),
        };

        Self {
            env: "development".to_string(),
            http: HttpConfig {
                addr: http_addr.to_string(),
                request_timeout_seconds: 30,
                shutdown_timeout_seconds: 15,
            },
            grpc: GrpcConfig {
                addr: grpc_addr.to_string(),
            },
            db: DbConfig {
                dsn: String::new(),
                db_type: "postgres".to_string(),
            },
            auth: AuthConfig {
                hash_key: String::new(),
                jwt_secret: String::new(),
                jwt_token_duration: 3600,
            },
            user: UserConfig {
                admin_username: "admin".to_string(),
                admin_password: String::new(),
            },
            observability: ObservabilityConfig {
                metrics: MetricsConfig { enabled: true },
                tracing: TracingConfig {
                    enabled: false,
                    protocol: "grpc".to_string(),
                    endpoint: String::new(),
                },
            },
            logging: LoggingConfig::default(),
            message_publisher: MessagePublisherConfig::default(),
            recovery: RecoveryConfig::default(),
            account_service: AccountServiceConfig::default(),
        }
    }

    /// Load the full layered configuration from the process environment.
    pub fn load(kind: ServiceKind) -> Result<Self, ConfigError> {
        let prefix = kind.env_prefix();
        let env_name = std::env::var(format!("{prefix}ENV"))
            .unwrap_or_else(|_| "development".to_string());

        if env_name != "production" {
            // Absent .env is the normal case outside local development
            let _ = dotenvy::dotenv();
        }

        let vars: Vec<(String, String)> = std::env::vars().collect();
        let secrets = SecretFiles::collect(prefix, &vars)?;

        let config: AppConfig = build_figment(kind, &env_name)
            .merge(secrets)
            .merge(env_provider(prefix))
            .extract()
            .map_err(|e| ConfigError::Load(Box::new(e)))?;

        config.validate(kind)?;
        Ok(config)
    }

    /// Reject configurations the service cannot start with.
    pub fn validate(&self, kind: ServiceKind) -> Result<(), ConfigError> {
        if self.db.dsn.trim().is_empty() {
            return Err(ConfigError::Invalid("db.dsn is required".to_string()));
        }
        if self.db.db_type != "postgres" {
            return Err(ConfigError::Invalid(format!(
                "unsupported db.type '{}', only 'postgres' is available",
                self.db.db_type
            )));
        }
        if self.auth.jwt_secret.is_empty() {
            return Err(ConfigError::Invalid("auth.jwt_secret is required".to_string()));
        }
        if kind == ServiceKind::Auth && self.auth.hash_key.is_empty() {
            return Err(ConfigError::Invalid("auth.hash_key is required".to_string()));
        }
        if kind == ServiceKind::Transaction
            && self.message_publisher.enabled
            && self.message_publisher.broker_type != "redis"
        {
            return Err(ConfigError::Invalid(format!(
                "unsupported message_publisher.broker_type '{}'",
                self.message_publisher.broker_type
            )));
        }
        Ok(())
    }

    pub fn is_production(&self) -> bool {
        self.env == "production"
    }
}

/// Defaults plus the optional per-environment YAML file.
pub fn build_figment(kind: ServiceKind, env_name: &str) -> Figment {
    let yaml_path = format!("config/{}/{}.yaml", kind.name(), env_name);
    Figment::new()
        .merge(Serialized::defaults(AppConfig::defaults(kind)))
        .merge(Yaml::file(yaml_path))
}

/// `PREFIX_A__B` -> `a.b`. `_FILE` keys are handled by [`SecretFiles`].
fn env_provider(prefix: &str) -> Env {
    Env::prefixed(prefix)
        .filter(|key| !key.as_str().to_ascii_lowercase().ends_with("_file"))
        .split("__")
}

/// Provider for `<PREFIX><KEY>_FILE=/path/to/secret` variables.
#[derive(Debug, Default)]
pub struct SecretFiles {
    values: BTreeMap<String, String>,
}

impl SecretFiles {
    /// Read every `_FILE` variable under `prefix` from `vars`.
    pub fn collect(prefix: &str, vars: &[(String, String)]) -> Result<Self, ConfigError> {
        let mut values = BTreeMap::new();

        for (name, path) in vars {
            let Some(stripped) = name.strip_prefix(prefix) else {
                continue;
            };
            let Some(key) = stripped.strip_suffix("_FILE") else {
                continue;
            };
            if key.is_empty() {
                continue;
            }

            let value = read_secret_file(Path::new(path)).map_err(|reason| {
                ConfigError::SecretFile {
                    key: name.clone(),
                    path: path.clone(),
                    reason,
                }
            })?;
            values.insert(key.to_lowercase().replace("__", "."), value);
        }

        Ok(Self { values })
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }
}

impl Provider for SecretFiles {
    fn metadata(&self) -> Metadata {
        Metadata::named("secret files")
    }

    fn data(&self) -> Result<Map<Profile, Dict>, figment::Error> {
        let mut root = Dict::new();
        for (key, raw) in &self.values {
            let value: Value = raw.parse().unwrap_or_else(|_| Value::from(raw.clone()));
            if let Value::Dict(_, nested) = figment::util::nest(key, value) {
                merge_dict(&mut root, nested);
            }
        }
        Ok(Profile::Default.collect(root))
    }
}

fn merge_dict(into: &mut Dict, from: Dict) {
    for (key, value) in from {
        match (into.get_mut(&key), value) {
            (Some(Value::Dict(_, existing)), Value::Dict(_, incoming)) => {
                merge_dict(existing, incoming)
            }
            (_, value) => {
                into.insert(key, value);
            }
        }
    }
}

fn read_secret_file(path: &Path) -> Result<String, String> {
    let file = std::fs::File::open(path).map_err(|e| e.to_string())?;
    let len = file.metadata().map_err(|e| e.to_string())?.len();
    if len > MAX_SECRET_FILE_BYTES {
        return Err(format!("file exceeds {MAX_SECRET_FILE_BYTES} bytes"));
    }

    let mut content = String::new();
    file.take(MAX_SECRET_FILE_BYTES + 1)
        .read_to_string(&mut content)
        .map_err(|e| e.to_string())?;
    if content.len() as u64 > MAX_SECRET_FILE_BYTES {
        return Err(format!("file exceeds {MAX_SECRET_FILE_BYTES} bytes"));
    }

    Ok(content.trim_end_matches(['\n', '\r']).to_string())
}

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Placeholder accepted during local development; `validate()` rejects it
/// unless the load was explicitly marked as a dev load.
const DEV_JWT_SECRET_PLACEHOLDER: &str = "dev-insecure-secret-change-me";

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub backend: Backend,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    pub server: ServerConfig,
    pub reports: ReportsConfig,
    pub pipeline: PipelineConfig,
    pub logging: LoggingConfig,
    pub dev_mode: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    Embedded,
    Networked,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub path: String,
    pub dsn: Option<String>,
    pub max_connections: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMode {
    Local,
    Idp,
    Mixed,
}

#[derive(Clone, Debug)]
pub struct AuthConfig {
    pub jwt_secret: SecretString,
    pub idp_jwks_path: Option<PathBuf>,
    pub idp_issuer: Option<String>,
    pub idp_audience: Option<String>,
    pub idp_role_claim: String,
    pub mode: AuthMode,
    pub allow_trusted_headers: bool,
    pub allow_compat_headers: bool,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
}

#[derive(Clone, Debug)]
pub struct ReportsConfig {
    pub root: String,
}

#[derive(Clone, Debug)]
pub struct PipelineConfig {
    pub max_retry: u32,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub filter: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub backend: Option<Backend>,
    pub database_path: Option<String>,
    pub database_dsn: Option<String>,
    pub jwt_secret: Option<String>,
    pub auth_mode: Option<AuthMode>,
    pub bind_address: Option<String>,
    pub port: Option<u16>,
    pub reports_root: Option<String>,
    pub max_retry: Option<u32>,
    pub log_filter: Option<String>,
    pub log_format: Option<LogFormat>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub dev_mode: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            backend: Backend::Embedded,
            database: DatabaseConfig {
                path: "data/orchestrator.sqlite3".to_string(),
                dsn: None,
                max_connections: 5,
            },
            auth: AuthConfig {
                jwt_secret: secret_value(DEV_JWT_SECRET_PLACEHOLDER.to_string()),
                idp_jwks_path: None,
                idp_issuer: None,
                idp_audience: None,
                idp_role_claim: "role".to_string(),
                mode: AuthMode::Mixed,
                allow_trusted_headers: false,
                allow_compat_headers: true,
            },
            server: ServerConfig { bind_address: "127.0.0.1".to_string(), port: 8080 },
            reports: ReportsConfig { root: "reports".to_string() },
            pipeline: PipelineConfig { max_retry: 1 },
            logging: LoggingConfig { filter: "info".to_string(), format: LogFormat::Compact },
            dev_mode: false,
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for Backend {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "embedded" => Ok(Self::Embedded),
            "networked" => Ok(Self::Networked),
            other => Err(ConfigError::Validation(format!(
                "unsupported backend `{other}` (expected embedded|networked)"
            ))),
        }
    }
}

impl std::str::FromStr for AuthMode {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "idp" => Ok(Self::Idp),
            "mixed" => Ok(Self::Mixed),
            other => Err(ConfigError::Validation(format!(
                "unsupported auth mode `{other}` (expected local|idp|mixed)"
            ))),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.dev_mode = options.dev_mode;
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected =
                options.config_path.unwrap_or_else(|| PathBuf::from("orchestrator.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(backend) = patch.backend {
            self.backend = backend;
        }

        if let Some(database) = patch.database {
            if let Some(path) = database.path {
                self.database.path = path;
            }
            if let Some(dsn) = database.dsn {
                self.database.dsn = Some(dsn);
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
        }

        if let Some(auth) = patch.auth {
            if let Some(jwt_secret) = auth.jwt_secret {
                self.auth.jwt_secret = secret_value(jwt_secret); // ubs:ignore
            }
            if let Some(idp_jwks_path) = auth.idp_jwks_path {
                self.auth.idp_jwks_path = Some(PathBuf::from(idp_jwks_path));
            }
            if let Some(idp_issuer) = auth.idp_issuer {
                self.auth.idp_issuer = Some(idp_issuer);
            }
            if let Some(idp_audience) = auth.idp_audience {
                self.auth.idp_audience = Some(idp_audience);
            }
            if let Some(idp_role_claim) = auth.idp_role_claim {
                self.auth.idp_role_claim = idp_role_claim;
            }
            if let Some(mode) = auth.mode {
                self.auth.mode = mode;
            }
            if let Some(allow_trusted_headers) = auth.allow_trusted_headers {
                self.auth.allow_trusted_headers = allow_trusted_headers;
            }
            if let Some(allow_compat_headers) = auth.allow_compat_headers {
                self.auth.allow_compat_headers = allow_compat_headers;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
        }

        if let Some(reports) = patch.reports {
            if let Some(root) = reports.root {
                self.reports.root = root;
            }
        }

        if let Some(pipeline) = patch.pipeline {
            if let Some(max_retry) = pipeline.max_retry {
                self.pipeline.max_retry = max_retry;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(filter) = logging.filter {
                self.logging.filter = filter;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("ORCH_BACKEND") {
            self.backend = value.parse()?;
        }

        if let Some(value) = read_env("ORCH_DB_PATH") {
            self.database.path = value;
        }
        if let Some(value) = read_env("ORCH_DB_DSN") {
            self.database.dsn = Some(value);
        }
        if let Some(value) = read_env("ORCH_DB_MAX_CONNECTIONS") {
            self.database.max_connections = parse_u32("ORCH_DB_MAX_CONNECTIONS", &value)?;
        }

        if let Some(value) = read_env("ORCH_JWT_SECRET") {
            self.auth.jwt_secret = secret_value(value); // ubs:ignore
        }
        if let Some(value) = read_env("ORCH_IDP_JWKS_PATH") {
            self.auth.idp_jwks_path = Some(PathBuf::from(value));
        }
        if let Some(value) = read_env("ORCH_IDP_ISSUER") {
            self.auth.idp_issuer = Some(value);
        }
        if let Some(value) = read_env("ORCH_IDP_AUDIENCE") {
            self.auth.idp_audience = Some(value);
        }
        if let Some(value) = read_env("ORCH_IDP_ROLE_CLAIM") {
            self.auth.idp_role_claim = value;
        }
        if let Some(value) = read_env("ORCH_AUTH_MODE") {
            self.auth.mode = value.parse()?;
        }
        if let Some(value) = read_env("ORCH_ALLOW_TRUSTED_HEADERS") {
            self.auth.allow_trusted_headers = parse_bool("ORCH_ALLOW_TRUSTED_HEADERS", &value)?;
        }
        if let Some(value) = read_env("ORCH_ALLOW_COMPAT_HEADERS") {
            self.auth.allow_compat_headers = parse_bool("ORCH_ALLOW_COMPAT_HEADERS", &value)?;
        }

        if let Some(value) = read_env("ORCH_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("ORCH_PORT") {
            self.server.port = parse_u16("ORCH_PORT", &value)?;
        }

        if let Some(value) = read_env("ORCH_REPORTS_ROOT") {
            self.reports.root = value;
        }

        if let Some(value) = read_env("ORCH_MAX_RETRY") {
            self.pipeline.max_retry = parse_u32("ORCH_MAX_RETRY", &value)?;
        }

        if let Some(value) = read_env("ORCH_LOG_FILTER") {
            self.logging.filter = value;
        }
        if let Some(value) = read_env("ORCH_LOG_FORMAT") {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(backend) = overrides.backend {
            self.backend = backend;
        }
        if let Some(database_path) = overrides.database_path {
            self.database.path = database_path;
        }
        if let Some(database_dsn) = overrides.database_dsn {
            self.database.dsn = Some(database_dsn);
        }
        if let Some(jwt_secret) = overrides.jwt_secret {
            self.auth.jwt_secret = secret_value(jwt_secret); // ubs:ignore
        }
        if let Some(auth_mode) = overrides.auth_mode {
            self.auth.mode = auth_mode;
        }
        if let Some(bind_address) = overrides.bind_address {
            self.server.bind_address = bind_address;
        }
        if let Some(port) = overrides.port {
            self.server.port = port;
        }
        if let Some(reports_root) = overrides.reports_root {
            self.reports.root = reports_root;
        }
        if let Some(max_retry) = overrides.max_retry {
            self.pipeline.max_retry = max_retry;
        }
        if let Some(log_filter) = overrides.log_filter {
            self.logging.filter = log_filter;
        }
        if let Some(log_format) = overrides.log_format {
            self.logging.format = log_format;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.backend, &self.database)?;
        validate_auth(&self.auth, self.dev_mode)?;
        validate_server(&self.server)?;
        validate_pipeline(&self.pipeline)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("orchestrator.toml"), PathBuf::from("config/orchestrator.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(backend: &Backend, database: &DatabaseConfig) -> Result<(), ConfigError> {
    if database.path.trim().is_empty() {
        return Err(ConfigError::Validation("database.path must not be empty".to_string()));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if matches!(backend, Backend::Networked)
        && database.dsn.as_ref().map(|dsn| dsn.trim().is_empty()).unwrap_or(true)
    {
        return Err(ConfigError::Validation(
            "database.dsn is required when backend = networked".to_string(),
        ));
    }

    Ok(())
}

fn validate_auth(auth: &AuthConfig, dev_mode: bool) -> Result<(), ConfigError> {
    let secret = auth.jwt_secret.expose_secret(); // ubs:ignore
    if secret.is_empty() {
        return Err(ConfigError::Validation("auth.jwt_secret must not be empty".to_string()));
    }
    if secret == DEV_JWT_SECRET_PLACEHOLDER && !dev_mode {
        return Err(ConfigError::Validation(
            "auth.jwt_secret is still the development placeholder; set ORCH_JWT_SECRET or load with dev_mode"
                .to_string(),
        ));
    }

    if auth.idp_role_claim.trim().is_empty() {
        return Err(ConfigError::Validation("auth.idp_role_claim must not be empty".to_string()));
    }

    if let Some(path) = &auth.idp_jwks_path {
        if !path.exists() {
            return Err(ConfigError::Validation(format!(
                "auth.idp_jwks_path `{}` does not exist",
                path.display()
            )));
        }
    }

    if matches!(auth.mode, AuthMode::Idp) && auth.idp_jwks_path.is_none() {
        return Err(ConfigError::Validation(
            "auth.mode = idp requires auth.idp_jwks_path to be configured".to_string(),
        ));
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }
    Ok(())
}

fn validate_pipeline(pipeline: &PipelineConfig) -> Result<(), ConfigError> {
    if pipeline.max_retry > 100 {
        return Err(ConfigError::Validation(
            "pipeline.max_retry is implausibly large (> 100)".to_string(),
        ));
    }
    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    if logging.filter.trim().is_empty() {
        return Err(ConfigError::Validation("logging.filter must not be empty".to_string()));
    }
    Ok(())
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value
        .parse::<u16>()
        .map_err(|_| ConfigError::InvalidEnvOverride { key: key.to_string(), value: value.to_string() })
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value
        .parse::<u32>()
        .map_err(|_| ConfigError::InvalidEnvOverride { key: key.to_string(), value: value.to_string() })
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    value
        .parse::<bool>()
        .map_err(|_| ConfigError::InvalidEnvOverride { key: key.to_string(), value: value.to_string() })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    backend: Option<Backend>,
    database: Option<DatabasePatch>,
    auth: Option<AuthPatch>,
    server: Option<ServerPatch>,
    reports: Option<ReportsPatch>,
    pipeline: Option<PipelinePatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    path: Option<String>,
    dsn: Option<String>,
    max_connections: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct AuthPatch {
    jwt_secret: Option<String>,
    idp_jwks_path: Option<String>,
    idp_issuer: Option<String>,
    idp_audience: Option<String>,
    idp_role_claim: Option<String>,
    mode: Option<AuthMode>,
    allow_trusted_headers: Option<bool>,
    allow_compat_headers: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
}

#[derive(Debug, Default, Deserialize)]
struct ReportsPatch {
    root: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct PipelinePatch {
    max_retry: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    filter: Option<String>,
    format: Option<LogFormat>,
}

impl<'de> Deserialize<'de> for Backend {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

impl<'de> Deserialize<'de> for AuthMode {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

impl<'de> Deserialize<'de> for LogFormat {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Mutex, OnceLock};

    use tempfile::TempDir;

    use super::*;

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    fn env_lock() -> &'static Mutex<()> {
        ENV_LOCK.get_or_init(|| Mutex::new(()))
    }

    fn clear_vars(vars: &[&str]) {
        for var in vars {
            std::env::remove_var(var);
        }
    }

    #[test]
    fn defaults_pass_validation_in_dev_mode() {
        let config =
            AppConfig::load(LoadOptions { dev_mode: true, ..Default::default() }).expect("load");
        assert_eq!(config.backend, Backend::Embedded);
        assert_eq!(config.auth.mode, AuthMode::Mixed);
    }

    #[test]
    fn placeholder_secret_is_rejected_outside_dev_mode() {
        let error = AppConfig::load(LoadOptions::default()).expect_err("should reject placeholder");
        assert!(matches!(error, ConfigError::Validation(_)));
    }

    #[test]
    fn networked_backend_without_dsn_fails_validation() {
        let overrides = ConfigOverrides { backend: Some(Backend::Networked), ..Default::default() };
        let error = AppConfig::load(LoadOptions { dev_mode: true, overrides, ..Default::default() })
            .expect_err("missing dsn");
        assert!(matches!(error, ConfigError::Validation(_)));
    }

    #[test]
    fn idp_mode_without_jwks_path_fails_validation() {
        let overrides = ConfigOverrides { auth_mode: Some(AuthMode::Idp), ..Default::default() };
        let error = AppConfig::load(LoadOptions { dev_mode: true, overrides, ..Default::default() })
            .expect_err("missing jwks path");
        assert!(matches!(error, ConfigError::Validation(_)));
    }

    #[test]
    fn env_override_wins_over_default() {
        let _guard = env_lock().lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        std::env::set_var("ORCH_PORT", "9090");
        let config =
            AppConfig::load(LoadOptions { dev_mode: true, ..Default::default() }).expect("load");
        clear_vars(&["ORCH_PORT"]);
        assert_eq!(config.server.port, 9090);
    }

    #[test]
    fn explicit_override_wins_over_env() {
        let _guard = env_lock().lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        std::env::set_var("ORCH_PORT", "9090");
        let overrides = ConfigOverrides { port: Some(7070), ..Default::default() };
        let config = AppConfig::load(LoadOptions { dev_mode: true, overrides, ..Default::default() })
            .expect("load");
        clear_vars(&["ORCH_PORT"]);
        assert_eq!(config.server.port, 7070);
    }

    #[test]
    fn file_load_supports_env_interpolation() {
        let _guard = env_lock().lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        std::env::set_var("TEST_ORCH_DB_PATH", "data/from-env.sqlite3");

        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("orchestrator.toml");
        fs::write(
            &path,
            r#"
[database]
path = "${TEST_ORCH_DB_PATH}"
"#,
        )
        .expect("write config file");

        let config = AppConfig::load(LoadOptions {
            config_path: Some(path),
            dev_mode: true,
            ..Default::default()
        })
        .expect("load");

        clear_vars(&["TEST_ORCH_DB_PATH"]);
        assert_eq!(config.database.path, "data/from-env.sqlite3");
    }

    #[test]
    fn missing_interpolation_variable_is_a_config_error() {
        let _guard = env_lock().lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        clear_vars(&["TEST_ORCH_MISSING_VAR"]);

        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("orchestrator.toml");
        fs::write(&path, "[database]\npath = \"${TEST_ORCH_MISSING_VAR}\"\n").expect("write config file");

        let error = AppConfig::load(LoadOptions {
            config_path: Some(path),
            dev_mode: true,
            ..Default::default()
        })
        .expect_err("missing interpolation var should fail");

        assert!(matches!(error, ConfigError::MissingEnvInterpolation { var } if var == "TEST_ORCH_MISSING_VAR"));
    }

    #[test]
    fn precedence_defaults_file_env_overrides() {
        let _guard = env_lock().lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        std::env::set_var("ORCH_PORT", "9191");

        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("orchestrator.toml");
        fs::write(
            &path,
            r#"
[server]
bind_address = "0.0.0.0"
port = 8181

[reports]
root = "from-file-reports"
"#,
        )
        .expect("write config file");

        let overrides = ConfigOverrides { reports_root: Some("from-override-reports".to_string()), ..Default::default() };
        let config = AppConfig::load(LoadOptions {
            config_path: Some(path),
            dev_mode: true,
            overrides,
            ..Default::default()
        })
        .expect("load");

        clear_vars(&["ORCH_PORT"]);

        // file sets bind_address (no env/override touches it)
        assert_eq!(config.server.bind_address, "0.0.0.0");
        // env wins over the file's port
        assert_eq!(config.server.port, 9191);
        // explicit override wins over the file's reports.root
        assert_eq!(config.reports.root, "from-override-reports");
    }

    #[test]
    fn require_file_without_an_existing_path_fails() {
        let dir = TempDir::new().expect("tempdir");
        let missing = dir.path().join("does-not-exist.toml");
        let error = AppConfig::load(LoadOptions {
            config_path: Some(missing.clone()),
            require_file: true,
            dev_mode: true,
            ..Default::default()
        })
        .expect_err("missing required file should fail");
        assert!(matches!(error, ConfigError::MissingConfigFile(path) if path == missing));
    }
}

use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use crate::workflows::screening::{AutoApproval, RiskPolicy, ScreeningPolicy};

const DEFAULT_AI_TIMEOUT_SECS: u64 = 30;
const DEFAULT_AI_BASE_URL: &str = "http://127.0.0.1:8088";
const DEFAULT_SCORING_MODEL: &str = "screening-ranker-v1";
const DEFAULT_MODERATION_MODEL: &str = "screening-moderator-v1";

/// Distinguishes runtime behavior for different stages of the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnvironment {
    Development,
    Test,
    Production,
}

impl AppEnvironment {
    fn from_str(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "prod" | "production" => Self::Production,
            "test" | "ci" => Self::Test,
            _ => Self::Development,
        }
    }
}

/// Top-level configuration for the application.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: AppEnvironment,
    pub server: ServerConfig,
    pub telemetry: TelemetryConfig,
    pub ai: AiBackendConfig,
    pub screening: ScreeningPolicy,
    pub audit: AuditConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let environment = AppEnvironment::from_str(
            &env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
        );

        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("APP_PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort)?;

        let log_level = env::var("APP_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        Ok(Self {
            environment,
            server: ServerConfig { host, port },
            telemetry: TelemetryConfig { log_level },
            ai: AiBackendConfig::from_env()?,
            screening: screening_policy_from_env()?,
            audit: AuditConfig {
                log_path: non_empty_var("AUDIT_LOG_PATH").map(PathBuf::from),
            },
        })
    }
}

/// Settings controlling the HTTP server binding.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        if self.host.eq_ignore_ascii_case("localhost") {
            return Ok(SocketAddr::new(IpAddr::from([127, 0, 0, 1]), self.port));
        }

        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|source| ConfigError::InvalidHost { source })?;

        Ok(SocketAddr::new(ip, self.port))
    }
}

/// Tracing controls.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
}

/// Where the audit trail is written. `None` keeps it in memory.
#[derive(Debug, Clone, Default)]
pub struct AuditConfig {
    pub log_path: Option<PathBuf>,
}

/// Which scorer/flagger pair backs the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScreeningBackend {
    /// Deterministic keyword scorer and phrase-rule flagger, no network.
    Local,
    /// External AI backend reached over HTTP.
    Remote,
}

/// Connection settings for the external scoring/classification backend.
#[derive(Clone)]
pub struct AiBackendConfig {
    pub backend: ScreeningBackend,
    pub base_url: String,
    pub api_key: Option<String>,
    pub scoring_model: String,
    pub moderation_model: String,
    pub timeout: Duration,
}

impl fmt::Debug for AiBackendConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AiBackendConfig")
            .field("backend", &self.backend)
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("scoring_model", &self.scoring_model)
            .field("moderation_model", &self.moderation_model)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl AiBackendConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let backend = match env::var("SCREENING_BACKEND")
            .unwrap_or_else(|_| "local".to_string())
            .trim()
            .to_ascii_lowercase()
            .as_str()
        {
            "local" | "" => ScreeningBackend::Local,
            "remote" | "ai" => ScreeningBackend::Remote,
            other => {
                return Err(ConfigError::InvalidValue {
                    variable: "SCREENING_BACKEND",
                    value: other.to_string(),
                })
            }
        };

        let api_key = non_empty_var("AI_API_KEY");
        if backend == ScreeningBackend::Remote && api_key.is_none() {
            return Err(ConfigError::MissingApiKey);
        }

        let timeout_secs = parse_var("AI_TIMEOUT_SECS", DEFAULT_AI_TIMEOUT_SECS)?;
        if timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                variable: "AI_TIMEOUT_SECS",
                value: "0".to_string(),
            });
        }

        Ok(Self {
            backend,
            base_url: non_empty_var("AI_BASE_URL").unwrap_or_else(|| DEFAULT_AI_BASE_URL.into()),
            api_key,
            scoring_model: non_empty_var("AI_SCORING_MODEL")
                .unwrap_or_else(|| DEFAULT_SCORING_MODEL.into()),
            moderation_model: non_empty_var("AI_MODERATION_MODEL")
                .unwrap_or_else(|| DEFAULT_MODERATION_MODEL.into()),
            timeout: Duration::from_secs(timeout_secs),
        })
    }
}

fn screening_policy_from_env() -> Result<ScreeningPolicy, ConfigError> {
    let defaults = ScreeningPolicy::default();

    let shortlist_threshold = parse_var("SHORTLIST_THRESHOLD", defaults.shortlist_threshold)?;
    if shortlist_threshold > 100 {
        return Err(ConfigError::InvalidValue {
            variable: "SHORTLIST_THRESHOLD",
            value: shortlist_threshold.to_string(),
        });
    }

    let risk = RiskPolicy::new(
        parse_var("RISK_FLAG_THRESHOLD", defaults.risk.flag_threshold)?,
        parse_var("RISK_POLICY_CHECK_RATIO", defaults.risk.policy_check_ratio)?,
        parse_var("RISK_HIGH_RATIO", defaults.risk.high_ratio)?,
    )
    .map_err(|reason| ConfigError::InvalidRiskPolicy { reason })?;

    let auto_approve = match non_empty_var("AUTO_APPROVE") {
        None => defaults.auto_approve,
        Some(raw) => AutoApproval::parse(&raw).ok_or(ConfigError::InvalidValue {
            variable: "AUTO_APPROVE",
            value: raw,
        })?,
    };

    Ok(ScreeningPolicy {
        shortlist_threshold,
        risk,
        auto_approve,
    })
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_var<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match non_empty_var(name) {
        None => Ok(default),
        Some(raw) => raw.parse::<T>().map_err(|_| ConfigError::InvalidValue {
            variable: name,
            value: raw,
        }),
    }
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidHost { source: std::net::AddrParseError },
    MissingApiKey,
    InvalidValue { variable: &'static str, value: String },
    InvalidRiskPolicy { reason: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "APP_PORT must be a valid u16"),
            ConfigError::InvalidHost { .. } => {
                write!(f, "APP_HOST must parse to an IPv4 or IPv6 address")
            }
            ConfigError::MissingApiKey => write!(
                f,
                "AI_API_KEY is required when SCREENING_BACKEND=remote"
            ),
            ConfigError::InvalidValue { variable, value } => {
                write!(f, "{variable} has an invalid value '{value}'")
            }
            ConfigError::InvalidRiskPolicy { reason } => {
                write!(f, "risk policy rejected: {reason}")
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidHost { source } => Some(source),
            ConfigError::InvalidPort
            | ConfigError::MissingApiKey
            | ConfigError::InvalidValue { .. }
            | ConfigError::InvalidRiskPolicy { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::{Mutex, OnceLock};

    fn env_guard() -> &'static Mutex<()> {
        static GUARD: OnceLock<Mutex<()>> = OnceLock::new();
        GUARD.get_or_init(|| Mutex::new(()))
    }

    fn reset_env() {
        for name in [
            "APP_ENV",
            "APP_HOST",
            "APP_PORT",
            "APP_LOG_LEVEL",
            "SCREENING_BACKEND",
            "AI_BASE_URL",
            "AI_API_KEY",
            "AI_SCORING_MODEL",
            "AI_MODERATION_MODEL",
            "AI_TIMEOUT_SECS",
            "SHORTLIST_THRESHOLD",
            "RISK_FLAG_THRESHOLD",
            "RISK_POLICY_CHECK_RATIO",
            "RISK_HIGH_RATIO",
            "AUTO_APPROVE",
            "AUDIT_LOG_PATH",
        ] {
            env::remove_var(name);
        }
    }

    #[test]
    fn load_uses_defaults_when_env_missing() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        let config = AppConfig::load().expect("config loads with defaults");
        assert_eq!(config.environment, AppEnvironment::Development);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.telemetry.log_level, "info");
        assert_eq!(config.ai.backend, ScreeningBackend::Local);
        assert_eq!(config.ai.timeout, Duration::from_secs(30));
        assert_eq!(config.screening.shortlist_threshold, 75);
        assert_eq!(config.screening.risk.flag_threshold, 3);
        assert_eq!(config.screening.auto_approve, AutoApproval::NoRiskOnly);
        assert!(config.audit.log_path.is_none());
    }

    #[test]
    fn accepts_localhost_host() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("APP_HOST", "localhost");
        let config = AppConfig::load().expect("config loads");
        let addr = config.server.socket_addr().expect("localhost resolves");
        assert_eq!(addr, SocketAddr::new(IpAddr::from([127, 0, 0, 1]), 3000));
    }

    #[test]
    fn remote_backend_without_key_is_a_startup_error() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("SCREENING_BACKEND", "remote");
        match AppConfig::load() {
            Err(ConfigError::MissingApiKey) => {}
            other => panic!("expected missing api key, got {other:?}"),
        }

        env::set_var("AI_API_KEY", "   ");
        assert!(matches!(AppConfig::load(), Err(ConfigError::MissingApiKey)));

        env::set_var("AI_API_KEY", "sk-test");
        let config = AppConfig::load().expect("config loads with key");
        assert_eq!(config.ai.backend, ScreeningBackend::Remote);
        assert!(!format!("{:?}", config.ai).contains("sk-test"));
        reset_env();
    }

    #[test]
    fn risk_tuning_is_read_from_env() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("RISK_FLAG_THRESHOLD", "5");
        env::set_var("RISK_POLICY_CHECK_RATIO", "0.2");
        env::set_var("RISK_HIGH_RATIO", "0.5");
        env::set_var("AUTO_APPROVE", "policy_check");
        let config = AppConfig::load().expect("config loads");
        assert_eq!(config.screening.risk.flag_threshold, 5);
        assert_eq!(config.screening.risk.policy_check_ratio, 0.2);
        assert_eq!(config.screening.risk.high_ratio, 0.5);
        assert_eq!(config.screening.auto_approve, AutoApproval::UpToPolicyCheck);
        reset_env();
    }

    #[test]
    fn rejects_inverted_risk_ratios() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("RISK_POLICY_CHECK_RATIO", "0.4");
        env::set_var("RISK_HIGH_RATIO", "0.3");
        assert!(matches!(
            AppConfig::load(),
            Err(ConfigError::InvalidRiskPolicy { .. })
        ));
        reset_env();
    }

    #[test]
    fn rejects_out_of_range_threshold() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("SHORTLIST_THRESHOLD", "140");
        assert!(matches!(
            AppConfig::load(),
            Err(ConfigError::InvalidValue {
                variable: "SHORTLIST_THRESHOLD",
                ..
            })
        ));
        reset_env();
    }
}

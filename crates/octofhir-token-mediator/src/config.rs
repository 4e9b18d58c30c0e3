//! Token mediator configuration.
//!
//! # Example (TOML)
//!
//! ```toml
//! model = "User"
//! identifier = "email"
//! key = "email"
//! secret = "change-me"
//! algorithms = ["HS256"]
//! cache_enabled = true
//! negative_ttl = "30s"
//! login_failure_policy = "fail_fast_on_invalid_credentials"
//! unless = ["/health", "regex:^/public/"]
//! ```
//!
//! The shared account password may be omitted from the file and supplied
//! through the `JWT_USER_PASSWORD` environment variable instead.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::acquirer::LoginFailurePolicy;
use crate::bearer::BearerDecoder;
use crate::bypass::PathExclusions;
use crate::error::ConfigError;

/// Environment variable consulted when no password is configured.
pub const PASSWORD_ENV: &str = "JWT_USER_PASSWORD";

/// Prefix for environment overrides, e.g. `OCTOFHIR_MEDIATOR__CACHE_ENABLED=false`.
pub const ENV_PREFIX: &str = "OCTOFHIR_MEDIATOR";

/// Token mediator configuration.
///
/// `Debug` output redacts the password and secret.
#[derive(Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MediatorConfig {
    /// Backing model accounts are created in.
    pub model: String,

    /// Assertion claim that carries the identity.
    pub identifier: String,

    /// Backing account field the identity is stored in.
    pub key: String,

    /// Shared password for all mediated accounts.
    /// Falls back to [`PASSWORD_ENV`] when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    /// JWT verification secret (shared key or PEM public key).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,

    /// Accepted JWT algorithms. All must belong to one key family, since
    /// they share `secret`.
    pub algorithms: Vec<String>,

    /// Cache acquired credentials until their assertion expires.
    /// Concurrent requests are deduplicated either way.
    pub cache_enabled: bool,

    /// How long a failed acquisition is replayed to new callers before
    /// the next request retries.
    #[serde(with = "humantime_serde")]
    pub negative_ttl: Duration,

    /// Whether a failed first login proceeds to account creation.
    pub login_failure_policy: LoginFailurePolicy,

    /// Request paths that bypass mediation.
    /// Exact paths, or regular expressions prefixed with `regex:`.
    pub unless: Vec<String>,
}

impl Default for MediatorConfig {
    fn default() -> Self {
        Self {
            model: "User".to_string(),
            identifier: "email".to_string(),
            key: "email".to_string(),
            password: None,
            secret: None,
            algorithms: vec!["HS256".to_string()],
            cache_enabled: true,
            negative_ttl: Duration::ZERO,
            login_failure_policy: LoginFailurePolicy::default(),
            unless: Vec::new(),
        }
    }
}

impl fmt::Debug for MediatorConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redact = |v: &Option<String>| v.as_ref().map(|_| "[REDACTED]");
        f.debug_struct("MediatorConfig")
            .field("model", &self.model)
            .field("identifier", &self.identifier)
            .field("key", &self.key)
            .field("password", &redact(&self.password))
            .field("secret", &redact(&self.secret))
            .field("algorithms", &self.algorithms)
            .field("cache_enabled", &self.cache_enabled)
            .field("negative_ttl", &self.negative_ttl)
            .field("login_failure_policy", &self.login_failure_policy)
            .field("unless", &self.unless)
            .finish()
    }
}

impl MediatorConfig {
    /// Creates a configuration with the required secret and password.
    #[must_use]
    pub fn new(secret: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            secret: Some(secret.into()),
            password: Some(password.into()),
            ..Self::default()
        }
    }

    /// Sets the identity claim.
    #[must_use]
    pub fn with_identifier(mut self, identifier: impl Into<String>) -> Self {
        self.identifier = identifier.into();
        self
    }

    /// Sets the backing account field.
    #[must_use]
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }

    /// Sets the backing model.
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Enables or disables credential caching.
    #[must_use]
    pub fn with_cache_enabled(mut self, enabled: bool) -> Self {
        self.cache_enabled = enabled;
        self
    }

    /// Sets the negative caching window.
    #[must_use]
    pub fn with_negative_ttl(mut self, ttl: Duration) -> Self {
        self.negative_ttl = ttl;
        self
    }

    /// Sets the login failure policy.
    #[must_use]
    pub fn with_login_failure_policy(mut self, policy: LoginFailurePolicy) -> Self {
        self.login_failure_policy = policy;
        self
    }

    /// Adds a path exclusion.
    #[must_use]
    pub fn with_unless(mut self, path: impl Into<String>) -> Self {
        self.unless.push(path.into());
        self
    }

    /// Returns the configured password, or the [`PASSWORD_ENV`] value.
    #[must_use]
    pub fn resolve_password(&self) -> Option<String> {
        self.password
            .clone()
            .or_else(|| std::env::var(PASSWORD_ENV).ok())
            .filter(|p| !p.is_empty())
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Missing` if the secret or password is absent, and
    /// `ConfigError::InvalidValue` if:
    /// - `model`, `identifier` or `key` is empty
    /// - an algorithm is unknown, none is given, or they mix key families
    /// - the secret is not a valid key for the algorithm family
    /// - an `unless` pattern does not compile
    pub fn validate(&self) -> Result<(), ConfigError> {
        let secret = self
            .secret
            .as_deref()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ConfigError::Missing("secret".to_string()))?;

        if self.resolve_password().is_none() {
            return Err(ConfigError::Missing(format!(
                "password (set it in the configuration or via {PASSWORD_ENV})"
            )));
        }

        for (name, value) in [
            ("model", &self.model),
            ("identifier", &self.identifier),
            ("key", &self.key),
        ] {
            if value.is_empty() {
                return Err(ConfigError::InvalidValue(format!(
                    "{name} cannot be empty"
                )));
            }
        }

        BearerDecoder::new(secret, &self.algorithms)?;
        PathExclusions::new(&self.unless)?;

        Ok(())
    }
}

/// Loads configuration from an optional TOML file plus environment overrides,
/// then validates it.
///
/// Environment variables use the [`ENV_PREFIX`] prefix and `__` as separator.
/// `algorithms` and `unless` take comma-separated lists, e.g.
/// `OCTOFHIR_MEDIATOR__UNLESS=/health,regex:^/public/`.
///
/// # Errors
///
/// Returns `ConfigError::Load` if the sources cannot be read or deserialized,
/// or any validation error.
pub fn load_config(path: Option<&str>) -> Result<MediatorConfig, ConfigError> {
    let mut builder = Config::builder();
    if let Some(p) = path {
        let pathbuf = PathBuf::from(p);
        if pathbuf.exists() {
            builder = builder.add_source(File::from(pathbuf));
        }
    }
    builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .try_parsing(true)
            .separator("__")
            .list_separator(",")
            .with_list_parse_key("algorithms")
            .with_list_parse_key("unless"),
    );

    let cfg = builder
        .build()
        .map_err(|e| ConfigError::Load(format!("config build error: {e}")))?;
    let merged: MediatorConfig = cfg
        .try_deserialize()
        .map_err(|e| ConfigError::Load(format!("config deserialize error: {e}")))?;

    merged.validate()?;
    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> MediatorConfig {
        MediatorConfig::new("jwt-secret", "s3cret")
    }

    #[test]
    fn test_default_config() {
        let config = MediatorConfig::default();
        assert_eq!(config.model, "User");
        assert_eq!(config.identifier, "email");
        assert_eq!(config.key, "email");
        assert_eq!(config.algorithms, vec!["HS256"]);
        assert!(config.cache_enabled);
        assert_eq!(config.negative_ttl, Duration::ZERO);
        assert_eq!(
            config.login_failure_policy,
            LoginFailurePolicy::FailFastOnInvalidCredentials
        );
    }

    #[test]
    fn test_valid_config_validates() {
        assert!(valid().validate().is_ok());
    }

    #[test]
    fn test_missing_secret_fails_validation() {
        let mut config = valid();
        config.secret = None;
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::Missing(_)));
        assert!(err.to_string().contains("secret"));
    }

    #[test]
    fn test_empty_key_fails_validation() {
        let config = valid().with_key("");
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("key cannot be empty"));
    }

    #[test]
    fn test_invalid_algorithm_fails_validation() {
        let mut config = valid();
        config.algorithms = vec!["XS999".to_string()];
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("JWT algorithm"));
    }

    #[test]
    fn test_mixed_algorithm_families_fail_validation() {
        let mut config = valid();
        config.algorithms = vec!["RS256".to_string(), "HS256".to_string()];
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(_)));
    }

    #[test]
    fn test_hmac_secret_with_rsa_algorithm_fails_validation() {
        let mut config = valid();
        config.algorithms = vec!["RS256".to_string()];
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("public key"));
    }

    #[test]
    fn test_invalid_unless_fails_validation() {
        let config = valid().with_unless("regex:[");
        assert!(matches!(
            config.validate().unwrap_err(),
            ConfigError::InvalidValue(_)
        ));
    }

    #[test]
    fn test_toml_parsing() {
        let config: MediatorConfig = toml::from_str(
            r#"
            model = "Account"
            identifier = "sub"
            secret = "jwt-secret"
            password = "s3cret"
            algorithms = ["HS256"]
            cache_enabled = false
            negative_ttl = "30s"
            login_failure_policy = "always_create"
            unless = ["/health"]
            "#,
        )
        .unwrap();

        assert_eq!(config.model, "Account");
        assert_eq!(config.identifier, "sub");
        assert_eq!(config.key, "email");
        assert!(!config.cache_enabled);
        assert_eq!(config.negative_ttl, Duration::from_secs(30));
        assert_eq!(
            config.login_failure_policy,
            LoginFailurePolicy::AlwaysCreate
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let debug = format!("{:?}", valid());
        assert!(!debug.contains("jwt-secret"));
        assert!(!debug.contains("s3cret"));
    }

    #[test]
    fn test_serde_roundtrip() {
        let config = valid().with_negative_ttl(Duration::from_secs(5));
        let json = serde_json::to_string(&config).unwrap();
        let parsed: MediatorConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.negative_ttl, Duration::from_secs(5));
        assert_eq!(parsed.secret, config.secret);
    }
}

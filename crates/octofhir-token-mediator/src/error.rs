//! Token mediation error types.
//!
//! [`MediationError`] is what callers of the mediator see. It is `Clone`
//! because a single failed acquisition is delivered to every request that
//! was waiting on it. [`BackingError`] is the narrower vocabulary a
//! [`BackingStore`](crate::acquirer::BackingStore) speaks.

use std::fmt;

/// Errors surfaced by the token mediator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MediationError {
    /// The mediator was constructed with an invalid configuration.
    #[error("Configuration error: {message}")]
    Configuration {
        /// Description of the configuration problem.
        message: String,
    },

    /// The verification hook rejected the assertion.
    #[error("Verification failed: {message}")]
    Verification {
        /// Description of why the assertion was rejected.
        message: String,
    },

    /// The assertion does not carry what the mediator needs to derive an identity.
    #[error("Invalid assertion: {message}")]
    InvalidAssertion {
        /// Description of what is missing or malformed.
        message: String,
    },

    /// The login-or-create exchange with the backing store failed.
    #[error("Credential acquisition failed during {stage}: {message}")]
    Acquisition {
        /// The step of the exchange that failed terminally.
        stage: AcquisitionStage,
        /// Description of the failure.
        message: String,
    },

    /// The pre-create hook failed.
    #[error("Hook failed: {message}")]
    Hook {
        /// Description of the hook failure.
        message: String,
    },

    /// An unexpected internal error occurred.
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
    },
}

impl MediationError {
    /// Creates a new `Configuration` error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Creates a new `Verification` error.
    #[must_use]
    pub fn verification(message: impl Into<String>) -> Self {
        Self::Verification {
            message: message.into(),
        }
    }

    /// Creates a new `InvalidAssertion` error.
    #[must_use]
    pub fn invalid_assertion(message: impl Into<String>) -> Self {
        Self::InvalidAssertion {
            message: message.into(),
        }
    }

    /// Creates a new `Acquisition` error for the given stage.
    #[must_use]
    pub fn acquisition(stage: AcquisitionStage, message: impl Into<String>) -> Self {
        Self::Acquisition {
            stage,
            message: message.into(),
        }
    }

    /// Creates a new `Hook` error.
    #[must_use]
    pub fn hook(message: impl Into<String>) -> Self {
        Self::Hook {
            message: message.into(),
        }
    }

    /// Creates a new `Internal` error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns `true` if the error was caused by the inbound assertion.
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::Verification { .. } | Self::InvalidAssertion { .. }
        )
    }

    /// Returns `true` if the error originates on the server side.
    #[must_use]
    pub fn is_server_error(&self) -> bool {
        matches!(self, Self::Configuration { .. } | Self::Internal { .. })
    }

    /// Returns `true` if this error ends a login-or-create exchange.
    ///
    /// Pre-create hook failures count as acquisition failures.
    #[must_use]
    pub fn is_acquisition_failure(&self) -> bool {
        matches!(self, Self::Acquisition { .. } | Self::Hook { .. })
    }

    /// Returns the error category for logging/monitoring purposes.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Configuration { .. } => ErrorCategory::Configuration,
            Self::Verification { .. } => ErrorCategory::Verification,
            Self::InvalidAssertion { .. } => ErrorCategory::Verification,
            Self::Acquisition { .. } => ErrorCategory::Acquisition,
            Self::Hook { .. } => ErrorCategory::Acquisition,
            Self::Internal { .. } => ErrorCategory::Internal,
        }
    }
}

/// The step of the login-or-create exchange an acquisition failed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AcquisitionStage {
    /// The first login attempt.
    Login,
    /// Account creation after a failed login.
    Create,
    /// The single login retry after a successful create.
    Relogin,
}

impl fmt::Display for AcquisitionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Login => write!(f, "login"),
            Self::Create => write!(f, "create"),
            Self::Relogin => write!(f, "relogin"),
        }
    }
}

/// Categories of mediation errors for logging and monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Startup configuration problems.
    Configuration,
    /// Assertion verification or identity extraction.
    Verification,
    /// Backing store exchange failures.
    Acquisition,
    /// Internal errors.
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Configuration => write!(f, "configuration"),
            Self::Verification => write!(f, "verification"),
            Self::Acquisition => write!(f, "acquisition"),
            Self::Internal => write!(f, "internal"),
        }
    }
}

/// Errors returned by a backing store's `login` and `create` calls.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackingError {
    /// The account exists but the supplied credentials were refused.
    #[error("login failed")]
    InvalidCredentials,

    /// No account exists for the supplied identity.
    #[error("account not found")]
    AccountNotFound,

    /// The store refused the request (e.g. payload validation on create).
    #[error("rejected: {message}")]
    Rejected {
        /// Description of the rejection.
        message: String,
    },

    /// The store could not be reached or timed out.
    #[error("unavailable: {message}")]
    Unavailable {
        /// Description of the outage.
        message: String,
    },
}

impl BackingError {
    /// Creates a new `Rejected` error.
    #[must_use]
    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected {
            message: message.into(),
        }
    }

    /// Creates a new `Unavailable` error.
    #[must_use]
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }
}

/// Configuration validation errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    /// An invalid configuration value was provided.
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),

    /// A required configuration value is missing.
    #[error("Missing required configuration: {0}")]
    Missing(String),

    /// The configuration sources could not be read or deserialized.
    #[error("Failed to load configuration: {0}")]
    Load(String),
}

impl From<ConfigError> for MediationError {
    fn from(err: ConfigError) -> Self {
        Self::configuration(err.to_string())
    }
}

//! Login-or-create credential acquisition.
//!
//! The acquirer is the only component that talks to the backing store. Each
//! acquisition walks a fixed sequence and stops at the first success or
//! terminal failure:
//!
//! ```text
//! login ──ok──────────────────────────────▶ credential
//!   │
//!   └─fail─▶ policy allows create? ──no──▶ fail (login)
//!                 │
//!                 yes
//!                 ▼
//!           before_create hook ──err──▶ fail (hook)
//!                 ▼
//!              create ──err──────────▶ fail (create)
//!                 ▼
//!              login ──ok──▶ credential
//!                 └──err───▶ fail (relogin)
//! ```
//!
//! Every terminal failure is passed to the [`FailureHook`], which may swap
//! in a replacement error.

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::MediationResult;
use crate::assertion::{Assertion, IdentityKey};
use crate::credential::Credential;
use crate::error::{AcquisitionStage, BackingError, MediationError};
use crate::hooks::{BeforeCreateHook, FailureHook, NoopBeforeCreate, NoopFailureHook};

// =============================================================================
// Backing Store Contract
// =============================================================================

/// Credentials presented to the backing store's login call.
#[derive(Clone, PartialEq, Eq)]
pub struct LoginCredentials {
    /// Backing model the account lives in (e.g. `"User"`).
    pub model: String,
    /// Account field holding the identity (e.g. `"email"`).
    pub key: String,
    /// The identity value.
    pub identity: String,
    /// Shared password used for every mediated account.
    pub password: String,
}

impl fmt::Debug for LoginCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginCredentials")
            .field("model", &self.model)
            .field("key", &self.key)
            .field("identity", &self.identity)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// Account payload handed to the backing store's create call.
///
/// Starts as `{ <key>: <identity>, "password": <password> }` and may be
/// extended by the [`BeforeCreateHook`].
#[derive(Debug, Clone, PartialEq)]
pub struct AccountPayload {
    /// Backing model to create the account in.
    pub model: String,
    /// Account fields.
    pub fields: Map<String, Value>,
}

impl AccountPayload {
    /// Creates the base payload for an identity.
    #[must_use]
    pub fn new(
        model: impl Into<String>,
        key: impl Into<String>,
        identity: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        let mut fields = Map::new();
        fields.insert("password".to_string(), Value::String(password.into()));
        fields.insert(key.into(), Value::String(identity.into()));
        Self {
            model: model.into(),
            fields,
        }
    }

    /// Returns a field value.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Sets a field value, returning the previous one.
    pub fn set(&mut self, field: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.fields.insert(field.into(), value.into())
    }
}

/// The backing system that owns accounts and issues session credentials.
///
/// Both calls may be slow and may fail; timeouts are the implementation's
/// responsibility.
#[async_trait]
pub trait BackingStore: Send + Sync {
    /// Exchanges account credentials for a session credential.
    async fn login(&self, credentials: &LoginCredentials) -> Result<Credential, BackingError>;

    /// Creates an account, returning the stored record.
    async fn create(&self, payload: &AccountPayload) -> Result<Value, BackingError>;
}

// =============================================================================
// Login Failure Policy
// =============================================================================

/// Decides whether a failed first login proceeds to account creation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoginFailurePolicy {
    /// Fail without creating when the store reports invalid credentials
    /// for an existing account; create on any other login failure.
    #[default]
    FailFastOnInvalidCredentials,

    /// Attempt creation after any login failure.
    AlwaysCreate,
}

impl LoginFailurePolicy {
    /// Returns `true` if `error` from the first login should lead to a create.
    #[must_use]
    pub fn should_create(&self, error: &BackingError) -> bool {
        match self {
            Self::FailFastOnInvalidCredentials => {
                !matches!(error, BackingError::InvalidCredentials)
            }
            Self::AlwaysCreate => true,
        }
    }
}

// =============================================================================
// Credential Acquirer
// =============================================================================

/// Runs the login-or-create exchange against a [`BackingStore`].
pub struct CredentialAcquirer {
    store: Arc<dyn BackingStore>,
    model: String,
    key: String,
    password: String,
    policy: LoginFailurePolicy,
    before_create: Arc<dyn BeforeCreateHook>,
    on_failure: Arc<dyn FailureHook>,
}

impl CredentialAcquirer {
    /// Creates an acquirer with no-op hooks and the default policy.
    ///
    /// # Arguments
    ///
    /// * `store` - Backing store to log in to / create accounts in
    /// * `model` - Backing model name
    /// * `key` - Account field the identity is written to
    /// * `password` - Shared password for mediated accounts
    #[must_use]
    pub fn new(
        store: Arc<dyn BackingStore>,
        model: impl Into<String>,
        key: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            store,
            model: model.into(),
            key: key.into(),
            password: password.into(),
            policy: LoginFailurePolicy::default(),
            before_create: Arc::new(NoopBeforeCreate),
            on_failure: Arc::new(NoopFailureHook),
        }
    }

    /// Sets the login failure policy.
    #[must_use]
    pub fn with_policy(mut self, policy: LoginFailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Sets the pre-create hook.
    #[must_use]
    pub fn with_before_create(mut self, hook: Arc<dyn BeforeCreateHook>) -> Self {
        self.before_create = hook;
        self
    }

    /// Sets the failure hook.
    #[must_use]
    pub fn with_on_failure(mut self, hook: Arc<dyn FailureHook>) -> Self {
        self.on_failure = hook;
        self
    }

    /// Acquires a session credential for `key`.
    ///
    /// # Errors
    ///
    /// Returns an `Acquisition` or `Hook` error when the exchange fails
    /// terminally, or whatever the failure hook substitutes for it.
    pub async fn acquire(
        &self,
        key: &IdentityKey,
        assertion: &Assertion,
    ) -> MediationResult<Credential> {
        match self.exchange(key, assertion).await {
            Ok(credential) => Ok(credential),
            Err(error) => {
                tracing::warn!(
                    key = %key,
                    category = %error.category(),
                    error = %error,
                    "Credential acquisition failed"
                );
                Err(self.handle_failure(key, error).await)
            }
        }
    }

    async fn exchange(
        &self,
        key: &IdentityKey,
        assertion: &Assertion,
    ) -> MediationResult<Credential> {
        let credentials = self.login_credentials(key);

        let login_error = match self.store.login(&credentials).await {
            Ok(credential) => {
                tracing::debug!(key = %key, "Logged in to backing store");
                return Ok(credential);
            }
            Err(e) => e,
        };

        if !self.policy.should_create(&login_error) {
            return Err(MediationError::acquisition(
                AcquisitionStage::Login,
                login_error.to_string(),
            ));
        }

        tracing::debug!(key = %key, reason = %login_error, "Login failed, creating account");

        let mut payload = AccountPayload::new(
            self.model.as_str(),
            self.key.as_str(),
            key.subject(),
            self.password.as_str(),
        );
        self.before_create
            .before_create(&mut payload, assertion)
            .await
            .map_err(|e| match e {
                MediationError::Hook { .. } => e,
                other => MediationError::hook(other.to_string()),
            })?;

        let account = self.store.create(&payload).await.map_err(|e| {
            MediationError::acquisition(AcquisitionStage::Create, e.to_string())
        })?;
        let account_id = match account.get("id") {
            Some(Value::String(id)) => id.clone(),
            Some(other) => other.to_string(),
            None => "-".to_string(),
        };
        tracing::info!(
            key = %key,
            model = %self.model,
            account_id = %account_id,
            "Created backing account"
        );

        self.store
            .login(&credentials)
            .await
            .map_err(|e| MediationError::acquisition(AcquisitionStage::Relogin, e.to_string()))
    }

    async fn handle_failure(&self, key: &IdentityKey, error: MediationError) -> MediationError {
        let hook = AssertUnwindSafe(self.on_failure.on_failure(&error, key))
            .catch_unwind()
            .await;

        match hook {
            Ok(Some(replacement)) => {
                tracing::debug!(key = %key, replacement = %replacement, "Failure hook replaced error");
                replacement
            }
            Ok(None) => error,
            Err(_) => {
                tracing::warn!(key = %key, "Failure hook panicked, keeping original error");
                error
            }
        }
    }

    fn login_credentials(&self, key: &IdentityKey) -> LoginCredentials {
        LoginCredentials {
            model: self.model.clone(),
            key: self.key.clone(),
            identity: key.subject().to_string(),
            password: self.password.clone(),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

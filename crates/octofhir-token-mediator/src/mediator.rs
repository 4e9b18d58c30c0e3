//! The token mediator: the single entry point for callers.
//!
//! ```text
//! assertion ─▶ verify hook ─▶ derive key ─▶ cache hit? ──yes──▶ credential
//!                                              │
//!                                              no
//!                                              ▼
//!                              join or start in-flight acquisition
//!                                              │
//!                     success: cache until exp │ failure: every waiter gets it
//!                                              ▼
//!                                          credential
//! ```
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use octofhir_token_mediator::{MediatorConfig, TokenMediator};
//!
//! let config = MediatorConfig::new("jwt-secret", "shared-password");
//! let mediator = TokenMediator::builder(config, Arc::new(my_store)).build()?;
//!
//! let credential = mediator.resolve(&assertion).await?;
//! ```

use std::sync::Arc;

use tracing::Instrument;

use crate::MediationResult;
use crate::acquirer::{BackingStore, CredentialAcquirer};
use crate::assertion::{Assertion, IdentityKey, IdentitySelector, derive_identity_key};
use crate::bearer::BearerDecoder;
use crate::bypass::PathExclusions;
use crate::cache::ExpiringCache;
use crate::config::MediatorConfig;
use crate::credential::{Clock, Credential, SystemClock};
use crate::error::{ConfigError, MediationError};
use crate::hooks::{
    AssertionVerifier, BeforeCreateHook, FailureHook, NoopBeforeCreate, NoopFailureHook,
    NoopVerifier,
};
use crate::inflight::InFlightRegistry;

// =============================================================================
// Token Mediator
// =============================================================================

struct MediatorInner {
    selector: IdentitySelector,
    verifier: Arc<dyn AssertionVerifier>,
    acquirer: Arc<CredentialAcquirer>,
    cache: Arc<ExpiringCache>,
    registry: InFlightRegistry,
    cache_enabled: bool,
    exclusions: PathExclusions,
    decoder: BearerDecoder,
}

/// Maps identity assertions onto backing-store session credentials.
///
/// Cheap to clone; clones share the cache and in-flight registry. Separate
/// instances built from separate builders share nothing.
#[derive(Clone)]
pub struct TokenMediator {
    inner: Arc<MediatorInner>,
}

impl TokenMediator {
    /// Starts building a mediator.
    #[must_use]
    pub fn builder(config: MediatorConfig, store: Arc<dyn BackingStore>) -> TokenMediatorBuilder {
        TokenMediatorBuilder::new(config, store)
    }

    /// Resolves the backing credential for a verified assertion.
    ///
    /// Concurrent calls for the same identity key share one acquisition.
    ///
    /// # Errors
    ///
    /// - `Verification` if the verification hook rejects the assertion
    /// - `InvalidAssertion` if no identity can be derived
    /// - `Acquisition`/`Hook` (or the failure hook's replacement) if the
    ///   login-or-create exchange fails
    pub async fn resolve(&self, assertion: &Assertion) -> MediationResult<Credential> {
        let inner = &self.inner;

        inner
            .verifier
            .verify(assertion)
            .await
            .map_err(|e| match e {
                MediationError::Verification { .. } => e,
                other => MediationError::verification(other.to_string()),
            })?;

        let key = derive_identity_key(assertion, &inner.selector)?;

        if inner.cache_enabled
            && let Some(credential) = inner.cache.get(&key)
        {
            tracing::debug!(key = %key, "Credential cache hit");
            return Ok(credential);
        }

        let acquirer = Arc::clone(&inner.acquirer);
        let cache = inner.cache_enabled.then(|| Arc::clone(&inner.cache));
        let task_key = key.clone();
        let assertion = assertion.clone();
        let span = tracing::info_span!("credential_acquisition", key = %key);

        let pending = inner.registry.get_or_start(&key, move || {
            acquire_and_cache(acquirer, cache, task_key, assertion).instrument(span)
        });

        pending.await
    }

    /// Request-level entry point.
    ///
    /// Returns `Ok(None)` when `path` is excluded from mediation or the
    /// request carries no assertion; otherwise resolves the credential.
    ///
    /// # Errors
    ///
    /// Same as [`resolve`](Self::resolve).
    pub async fn mediate(
        &self,
        path: &str,
        assertion: Option<&Assertion>,
    ) -> MediationResult<Option<Credential>> {
        if self.inner.exclusions.is_excluded(path) {
            tracing::trace!(path, "Path excluded from token mediation");
            return Ok(None);
        }

        match assertion {
            Some(assertion) => self.resolve(assertion).await.map(Some),
            None => Ok(None),
        }
    }

    /// Like [`mediate`](Self::mediate), but starts from a raw bearer token.
    ///
    /// Excluded paths are not decoded at all.
    ///
    /// # Errors
    ///
    /// `InvalidAssertion` if the token fails decoding, otherwise as
    /// [`resolve`](Self::resolve).
    pub async fn mediate_bearer(
        &self,
        path: &str,
        bearer: Option<&str>,
    ) -> MediationResult<Option<Credential>> {
        if self.inner.exclusions.is_excluded(path) {
            tracing::trace!(path, "Path excluded from token mediation");
            return Ok(None);
        }

        let Some(token) = bearer.filter(|t| !t.is_empty()) else {
            return Ok(None);
        };

        let assertion = self.inner.decoder.decode(token)?;
        self.resolve(&assertion).await.map(Some)
    }

    /// Derives the identity key an assertion would be cached under.
    ///
    /// # Errors
    ///
    /// `InvalidAssertion` if no identity can be derived.
    pub fn identity_key(&self, assertion: &Assertion) -> MediationResult<IdentityKey> {
        derive_identity_key(assertion, &self.inner.selector)
    }

    /// Returns the cached credential for `key`, if any.
    #[must_use]
    pub fn cached_credential(&self, key: &IdentityKey) -> Option<Credential> {
        if !self.inner.cache_enabled {
            return None;
        }
        self.inner.cache.get(key)
    }

    /// Drops the cached credential for `key`.
    pub fn invalidate(&self, key: &IdentityKey) -> bool {
        self.inner.cache.evict(key)
    }

    /// Whether credentials are cached.
    #[must_use]
    pub fn cache_enabled(&self) -> bool {
        self.inner.cache_enabled
    }

    /// Number of cached credentials.
    #[must_use]
    pub fn cache_len(&self) -> usize {
        self.inner.cache.len()
    }

    /// Number of registered in-flight acquisitions (including remembered failures).
    #[must_use]
    pub fn in_flight_count(&self) -> usize {
        self.inner.registry.len()
    }

    /// Cancels pending eviction timers and running acquisitions, and clears
    /// all state.
    pub fn shutdown(&self) {
        let in_flight = self.inner.registry.len();
        let cached = self.inner.cache.len();
        self.inner.registry.clear();
        self.inner.cache.clear();
        tracing::info!(in_flight, cached, "Token mediator shut down");
    }
}

async fn acquire_and_cache(
    acquirer: Arc<CredentialAcquirer>,
    cache: Option<Arc<ExpiringCache>>,
    key: IdentityKey,
    assertion: Assertion,
) -> MediationResult<Credential> {
    let credential = acquirer.acquire(&key, &assertion).await?;
    if let Some(cache) = cache {
        cache.put(key, credential.clone(), assertion.expires_at);
    }
    Ok(credential)
}

// =============================================================================
// Builder
// =============================================================================

/// Builder for [`TokenMediator`].
pub struct TokenMediatorBuilder {
    config: MediatorConfig,
    store: Arc<dyn BackingStore>,
    selector: Option<IdentitySelector>,
    verifier: Arc<dyn AssertionVerifier>,
    before_create: Arc<dyn BeforeCreateHook>,
    on_failure: Arc<dyn FailureHook>,
    clock: Arc<dyn Clock>,
}

impl TokenMediatorBuilder {
    /// Creates a builder with no-op hooks and the system clock.
    #[must_use]
    pub fn new(config: MediatorConfig, store: Arc<dyn BackingStore>) -> Self {
        Self {
            config,
            store,
            selector: None,
            verifier: Arc::new(NoopVerifier),
            before_create: Arc::new(NoopBeforeCreate),
            on_failure: Arc::new(NoopFailureHook),
            clock: Arc::new(SystemClock),
        }
    }

    /// Overrides how the identity is extracted.
    /// Defaults to the claim named by `config.identifier`.
    #[must_use]
    pub fn identity(mut self, selector: IdentitySelector) -> Self {
        self.selector = Some(selector);
        self
    }

    /// Extracts the identity with a custom function.
    #[must_use]
    pub fn identity_fn<F>(self, f: F) -> Self
    where
        F: Fn(&Assertion) -> Option<String> + Send + Sync + 'static,
    {
        self.identity(IdentitySelector::custom(f))
    }

    /// Sets the verification hook.
    #[must_use]
    pub fn verifier(mut self, verifier: impl AssertionVerifier + 'static) -> Self {
        self.verifier = Arc::new(verifier);
        self
    }

    /// Sets the pre-create hook.
    #[must_use]
    pub fn before_create(mut self, hook: impl BeforeCreateHook + 'static) -> Self {
        self.before_create = Arc::new(hook);
        self
    }

    /// Sets the failure hook.
    #[must_use]
    pub fn on_failure(mut self, hook: impl FailureHook + 'static) -> Self {
        self.on_failure = Arc::new(hook);
        self
    }

    /// Sets the wall clock compared against assertion expiry.
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Validates the configuration and builds the mediator.
    ///
    /// # Errors
    ///
    /// Returns a `Configuration` error if the secret or password is missing
    /// or any configured value is invalid.
    pub fn build(self) -> MediationResult<TokenMediator> {
        let config = self.config;
        config.validate()?;

        let password = config
            .resolve_password()
            .ok_or_else(|| ConfigError::Missing("password".to_string()))?;
        let secret = config
            .secret
            .as_deref()
            .ok_or_else(|| ConfigError::Missing("secret".to_string()))?;

        let decoder = BearerDecoder::new(secret, &config.algorithms)?;
        let exclusions = PathExclusions::new(&config.unless)?;
        let selector = self
            .selector
            .unwrap_or_else(|| IdentitySelector::claim(config.identifier.as_str()));

        let acquirer = CredentialAcquirer::new(
            self.store,
            config.model.as_str(),
            config.key.as_str(),
            password,
        )
        .with_policy(config.login_failure_policy)
        .with_before_create(self.before_create)
        .with_on_failure(self.on_failure);

        tracing::debug!(
            model = %config.model,
            identifier = ?selector,
            cache_enabled = config.cache_enabled,
            algorithms = ?decoder.algorithms(),
            negative_ttl_ms = config.negative_ttl.as_millis() as u64,
            exclusions = exclusions.len(),
            "Token mediator configured"
        );

        Ok(TokenMediator {
            inner: Arc::new(MediatorInner {
                selector,
                verifier: self.verifier,
                acquirer: Arc::new(acquirer),
                cache: Arc::new(ExpiringCache::new(self.clock)),
                registry: InFlightRegistry::new(config.negative_ttl),
                cache_enabled: config.cache_enabled,
                exclusions,
                decoder,
            }),
        })
    }
}

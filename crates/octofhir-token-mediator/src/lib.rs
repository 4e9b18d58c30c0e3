//! # octofhir-token-mediator
//!
//! Bridges externally issued identity assertions (JWTs) to session
//! credentials of a backing data store for the OctoFHIR server.
//!
//! For every verified assertion the mediator logs in to the backing store
//! under a deterministic account, creating the account on first sight, and
//! hands back the backing session credential.
//!
//! ## Overview
//!
//! - Credentials are cached per identity key (`subject@iat`) until the
//!   assertion expires.
//! - Concurrent requests for the same identity key share a single
//!   acquisition; late joiners receive the same outcome.
//! - Failed acquisitions are deregistered so the next request retries,
//!   optionally after a negative caching window.
//!
//! ## Modules
//!
//! - [`assertion`] - Assertions, identity keys and identity selection
//! - [`credential`] - Opaque credentials and the wall clock
//! - [`cache`] - Expiring credential cache
//! - [`inflight`] - In-flight acquisition registry
//! - [`acquirer`] - Login-or-create exchange against the backing store
//! - [`hooks`] - Verification, pre-create and failure hooks
//! - [`mediator`] - The [`TokenMediator`] entry point
//! - [`bearer`] - Bearer JWT decoding
//! - [`bypass`] - Paths excluded from mediation
//! - [`config`] - Configuration and loading
//! - [`error`] - Error types

pub mod acquirer;
pub mod assertion;
pub mod bearer;
pub mod bypass;
pub mod cache;
pub mod config;
pub mod credential;
pub mod error;
pub mod hooks;
pub mod inflight;
pub mod mediator;

pub use acquirer::{
    AccountPayload, BackingStore, CredentialAcquirer, LoginCredentials, LoginFailurePolicy,
};
pub use assertion::{Assertion, IdentityFn, IdentityKey, IdentitySelector, derive_identity_key};
pub use bearer::BearerDecoder;
pub use bypass::PathExclusions;
pub use cache::ExpiringCache;
pub use config::{ENV_PREFIX, MediatorConfig, PASSWORD_ENV, load_config};
pub use credential::{Clock, Credential, ManualClock, SystemClock};
pub use error::{AcquisitionStage, BackingError, ConfigError, ErrorCategory, MediationError};
pub use hooks::{
    AssertionVerifier, BeforeCreateHook, FailureHook, NoopBeforeCreate, NoopFailureHook,
    NoopVerifier, before_create_fn, failure_fn, verifier_fn,
};
pub use inflight::{InFlightRegistry, PendingAcquisition};
pub use mediator::{TokenMediator, TokenMediatorBuilder};

/// Type alias for mediation results.
pub type MediationResult<T> = Result<T, MediationError>;

/// Prelude module for convenient imports.
///
/// ```ignore
/// use octofhir_token_mediator::prelude::*;
/// ```
pub mod prelude {
    pub use crate::MediationResult;
    pub use crate::acquirer::{AccountPayload, BackingStore, LoginCredentials, LoginFailurePolicy};
    pub use crate::assertion::{Assertion, IdentityKey, IdentitySelector};
    pub use crate::config::{MediatorConfig, load_config};
    pub use crate::credential::{Clock, Credential};
    pub use crate::error::{BackingError, ConfigError, MediationError};
    pub use crate::hooks::{AssertionVerifier, BeforeCreateHook, FailureHook};
    pub use crate::mediator::{TokenMediator, TokenMediatorBuilder};
}

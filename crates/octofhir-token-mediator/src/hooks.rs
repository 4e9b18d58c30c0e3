//! Optional extension points of the mediation pipeline.
//!
//! Every hook has a no-op default, so the mediator always holds a hook
//! object and never branches on whether one was configured.
//!
//! - [`AssertionVerifier`] - runs before anything else; rejecting stops the request
//! - [`BeforeCreateHook`] - adjusts the account payload before the backing store creates it
//! - [`FailureHook`] - observes (and may replace) the error of a failed acquisition

use async_trait::async_trait;

use crate::MediationResult;
use crate::acquirer::AccountPayload;
use crate::assertion::{Assertion, IdentityKey};
use crate::error::MediationError;

/// Extra per-request checks on an already-verified assertion.
#[async_trait]
pub trait AssertionVerifier: Send + Sync {
    /// Returns an error to reject the assertion.
    async fn verify(&self, assertion: &Assertion) -> MediationResult<()>;
}

/// Runs before a backing account is created.
#[async_trait]
pub trait BeforeCreateHook: Send + Sync {
    /// Transforms or pre-populates the account payload in place.
    ///
    /// An error aborts the acquisition and is reported as a hook failure.
    async fn before_create(
        &self,
        payload: &mut AccountPayload,
        assertion: &Assertion,
    ) -> MediationResult<()>;
}

/// Observes terminal acquisition failures.
#[async_trait]
pub trait FailureHook: Send + Sync {
    /// Returns a replacement error, or `None` to keep the original.
    ///
    /// A panic inside this hook is caught and the original error is kept.
    async fn on_failure(&self, error: &MediationError, key: &IdentityKey)
    -> Option<MediationError>;
}

/// Accepts every assertion.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopVerifier;

#[async_trait]
impl AssertionVerifier for NoopVerifier {
    async fn verify(&self, _assertion: &Assertion) -> MediationResult<()> {
        Ok(())
    }
}

/// Leaves the payload untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopBeforeCreate;

#[async_trait]
impl BeforeCreateHook for NoopBeforeCreate {
    async fn before_create(
        &self,
        _payload: &mut AccountPayload,
        _assertion: &Assertion,
    ) -> MediationResult<()> {
        Ok(())
    }
}

/// Keeps the original error.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopFailureHook;

#[async_trait]
impl FailureHook for NoopFailureHook {
    async fn on_failure(
        &self,
        _error: &MediationError,
        _key: &IdentityKey,
    ) -> Option<MediationError> {
        None
    }
}

struct FnVerifier<F>(F);

#[async_trait]
impl<F> AssertionVerifier for FnVerifier<F>
where
    F: Fn(&Assertion) -> MediationResult<()> + Send + Sync,
{
    async fn verify(&self, assertion: &Assertion) -> MediationResult<()> {
        (self.0)(assertion)
    }
}

struct FnBeforeCreate<F>(F);

#[async_trait]
impl<F> BeforeCreateHook for FnBeforeCreate<F>
where
    F: Fn(&mut AccountPayload, &Assertion) -> MediationResult<()> + Send + Sync,
{
    async fn before_create(
        &self,
        payload: &mut AccountPayload,
        assertion: &Assertion,
    ) -> MediationResult<()> {
        (self.0)(payload, assertion)
    }
}

struct FnFailureHook<F>(F);

#[async_trait]
impl<F> FailureHook for FnFailureHook<F>
where
    F: Fn(&MediationError, &IdentityKey) -> Option<MediationError> + Send + Sync,
{
    async fn on_failure(
        &self,
        error: &MediationError,
        key: &IdentityKey,
    ) -> Option<MediationError> {
        (self.0)(error, key)
    }
}

/// Wraps a synchronous closure as an [`AssertionVerifier`].
pub fn verifier_fn<F>(f: F) -> impl AssertionVerifier
where
    F: Fn(&Assertion) -> MediationResult<()> + Send + Sync + 'static,
{
    FnVerifier(f)
}

/// Wraps a synchronous closure as a [`BeforeCreateHook`].
pub fn before_create_fn<F>(f: F) -> impl BeforeCreateHook
where
    F: Fn(&mut AccountPayload, &Assertion) -> MediationResult<()> + Send + Sync + 'static,
{
    FnBeforeCreate(f)
}

/// Wraps a synchronous closure as a [`FailureHook`].
pub fn failure_fn<F>(f: F) -> impl FailureHook
where
    F: Fn(&MediationError, &IdentityKey) -> Option<MediationError> + Send + Sync + 'static,
{
    FnFailureHook(f)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_noop_hooks() {
        let assertion = Assertion::new("u1", 100, 200);
        let key = IdentityKey::new("u1", 100);
        let mut payload = AccountPayload::new("User", "email", "u1", "pw");
        let before = payload.clone();

        assert!(NoopVerifier.verify(&assertion).await.is_ok());
        NoopBeforeCreate
            .before_create(&mut payload, &assertion)
            .await
            .unwrap();
        assert_eq!(payload, before);

        let err = MediationError::hook("boom");
        assert!(NoopFailureHook.on_failure(&err, &key).await.is_none());
    }

    #[tokio::test]
    async fn test_closure_hooks() {
        let assertion = Assertion::new("u1", 100, 200).with_claim("name", "Alice");

        let verifier = verifier_fn(|a: &Assertion| {
            if a.subject() == Some("u1") {
                Ok(())
            } else {
                Err(MediationError::verification("unknown subject"))
            }
        });
        assert!(verifier.verify(&assertion).await.is_ok());
        assert!(
            verifier
                .verify(&Assertion::new("u2", 100, 200))
                .await
                .is_err()
        );

        let hook = before_create_fn(|payload: &mut AccountPayload, a: &Assertion| {
            if let Some(name) = a.claim("name") {
                payload.set("name", name.clone());
            }
            Ok(())
        });
        let mut payload = AccountPayload::new("User", "email", "u1", "pw");
        hook.before_create(&mut payload, &assertion).await.unwrap();
        assert_eq!(payload.get("name").and_then(|v| v.as_str()), Some("Alice"));
    }
}

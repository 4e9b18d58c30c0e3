//! Inbound identity assertions and identity key derivation.
//!
//! An [`Assertion`] is the decoded claim set of an already-verified token.
//! The mediator never looks at signatures; it only needs the identity claim
//! plus the `iat`/`exp` timestamps.
//!
//! # Identity keys
//!
//! An [`IdentityKey`] scopes a cached credential to one subject *and* one
//! issuance. Re-issuing a token for the same subject yields a different
//! `iat` and therefore a different key, so the old credential is never
//! served for the new token.
//!
//! ```ignore
//! let selector = IdentitySelector::claim("email");
//! let key = derive_identity_key(&assertion, &selector)?;
//! assert_eq!(key.to_string(), "alice@example.com@1700000000");
//! ```

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::MediationResult;
use crate::error::MediationError;

/// A verified, decoded identity assertion.
///
/// `issued_at` and `expires_at` are Unix timestamps in seconds, as carried
/// by the JWT `iat` and `exp` claims.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assertion {
    /// Issued-at timestamp (`iat`).
    pub issued_at: i64,

    /// Expiry timestamp (`exp`).
    pub expires_at: i64,

    /// The full claim set, including `iat` and `exp`.
    pub claims: Map<String, Value>,
}

impl Assertion {
    /// Creates an assertion with only a `sub` claim.
    #[must_use]
    pub fn new(subject: impl Into<String>, issued_at: i64, expires_at: i64) -> Self {
        let mut claims = Map::new();
        claims.insert("sub".to_string(), Value::String(subject.into()));
        claims.insert("iat".to_string(), Value::from(issued_at));
        claims.insert("exp".to_string(), Value::from(expires_at));
        Self {
            issued_at,
            expires_at,
            claims,
        }
    }

    /// Builds an assertion from a decoded claim set.
    ///
    /// # Errors
    ///
    /// Returns `InvalidAssertion` if the claims are not an object or lack
    /// integer `iat`/`exp` claims.
    pub fn from_claims(claims: Value) -> MediationResult<Self> {
        let Value::Object(claims) = claims else {
            return Err(MediationError::invalid_assertion(
                "claims must be a JSON object",
            ));
        };

        let issued_at = timestamp_claim(&claims, "iat")?;
        let expires_at = timestamp_claim(&claims, "exp")?;

        Ok(Self {
            issued_at,
            expires_at,
            claims,
        })
    }

    /// Adds or replaces a claim.
    #[must_use]
    pub fn with_claim(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.claims.insert(name.into(), value.into());
        self
    }

    /// Returns the `sub` claim, if present.
    #[must_use]
    pub fn subject(&self) -> Option<&str> {
        self.claims.get("sub").and_then(Value::as_str)
    }

    /// Returns a raw claim value.
    #[must_use]
    pub fn claim(&self, name: &str) -> Option<&Value> {
        self.claims.get(name)
    }
}

fn timestamp_claim(claims: &Map<String, Value>, name: &str) -> MediationResult<i64> {
    claims
        .get(name)
        .and_then(Value::as_i64)
        .ok_or_else(|| MediationError::invalid_assertion(format!("missing integer '{name}' claim")))
}

/// Identifies one subject as of one issuance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IdentityKey {
    subject: String,
    issued_at: i64,
}

impl IdentityKey {
    /// Creates a key from its parts.
    #[must_use]
    pub fn new(subject: impl Into<String>, issued_at: i64) -> Self {
        Self {
            subject: subject.into(),
            issued_at,
        }
    }

    /// The identity value written to the backing account.
    #[must_use]
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// The issuance this key is scoped to.
    #[must_use]
    pub fn issued_at(&self) -> i64 {
        self.issued_at
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.subject, self.issued_at)
    }
}

/// Custom identity extraction function.
pub type IdentityFn = Arc<dyn Fn(&Assertion) -> Option<String> + Send + Sync>;

/// How the identity value is extracted from an assertion.
#[derive(Clone)]
pub enum IdentitySelector {
    /// Read a named claim. String and numeric claims are accepted.
    Claim(String),
    /// Compute the identity with a custom function.
    Custom(IdentityFn),
}

impl IdentitySelector {
    /// Selects the named claim.
    #[must_use]
    pub fn claim(name: impl Into<String>) -> Self {
        Self::Claim(name.into())
    }

    /// Selects the identity with a custom function.
    #[must_use]
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&Assertion) -> Option<String> + Send + Sync + 'static,
    {
        Self::Custom(Arc::new(f))
    }

    fn select(&self, assertion: &Assertion) -> Option<String> {
        match self {
            Self::Claim(name) => match assertion.claim(name)? {
                Value::String(s) => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            },
            Self::Custom(f) => f(assertion),
        }
    }
}

impl Default for IdentitySelector {
    fn default() -> Self {
        Self::Claim("email".to_string())
    }
}

impl fmt::Debug for IdentitySelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Claim(name) => f.debug_tuple("Claim").field(name).finish(),
            Self::Custom(_) => f.write_str("Custom(<fn>)"),
        }
    }
}

/// Derives the identity key for an assertion.
///
/// # Errors
///
/// Returns `InvalidAssertion` if the selector yields no (or an empty) identity.
pub fn derive_identity_key(
    assertion: &Assertion,
    selector: &IdentitySelector,
) -> MediationResult<IdentityKey> {
    let subject = selector
        .select(assertion)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| {
            let what = match selector {
                IdentitySelector::Claim(name) => format!("claim '{name}'"),
                IdentitySelector::Custom(_) => "custom identity function".to_string(),
            };
            MediationError::invalid_assertion(format!("no identity found via {what}"))
        })?;

    Ok(IdentityKey::new(subject, assertion.issued_at))
}

//! Bearer token decoding.
//!
//! Turns a raw `Authorization: Bearer` JWT into an [`Assertion`]. This is the
//! inbound assertion source used by [`TokenMediator::mediate_bearer`]; callers
//! that already verify tokens elsewhere can build assertions directly.
//!
//! The configured secret is interpreted per algorithm family: a shared key
//! for `HS*`, a PEM-encoded public key for `RS*`/`PS*`, `ES*` and `EdDSA`.
//! The key is parsed once at construction and bound to its family, so a
//! single decoder never accepts both HMAC and public-key signatures.
//!
//! [`TokenMediator::mediate_bearer`]: crate::mediator::TokenMediator::mediate_bearer

use std::fmt;
use std::str::FromStr;

use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde_json::Value;

use crate::MediationResult;
use crate::assertion::Assertion;
use crate::error::{ConfigError, MediationError};

const PEM_MARKER: &str = "-----BEGIN";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyFamily {
    Hmac,
    Rsa,
    Ec,
    Ed,
}

impl KeyFamily {
    fn of(algorithm: Algorithm) -> Result<Self, ConfigError> {
        #[allow(unreachable_patterns)]
        match algorithm {
            Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512 => Ok(Self::Hmac),
            Algorithm::RS256
            | Algorithm::RS384
            | Algorithm::RS512
            | Algorithm::PS256
            | Algorithm::PS384
            | Algorithm::PS512 => Ok(Self::Rsa),
            Algorithm::ES256 | Algorithm::ES384 => Ok(Self::Ec),
            Algorithm::EdDSA => Ok(Self::Ed),
            other => Err(ConfigError::InvalidValue(format!(
                "unsupported JWT algorithm {other:?}"
            ))),
        }
    }

    fn decoding_key(self, secret: &str) -> Result<DecodingKey, ConfigError> {
        let pem = secret.as_bytes();
        let invalid = |e: jsonwebtoken::errors::Error| {
            ConfigError::InvalidValue(format!("secret is not a valid {self:?} public key: {e}"))
        };

        match self {
            Self::Hmac => {
                if secret.trim_start().starts_with(PEM_MARKER) {
                    return Err(ConfigError::InvalidValue(
                        "HS* algorithms cannot use a PEM key as shared secret".to_string(),
                    ));
                }
                Ok(DecodingKey::from_secret(pem))
            }
            Self::Rsa => DecodingKey::from_rsa_pem(pem).map_err(invalid),
            Self::Ec => DecodingKey::from_ec_pem(pem).map_err(invalid),
            Self::Ed => DecodingKey::from_ed_pem(pem).map_err(invalid),
        }
    }
}

/// Verifies and decodes bearer JWTs.
pub struct BearerDecoder {
    key: DecodingKey,
    algorithms: Vec<Algorithm>,
}

impl fmt::Debug for BearerDecoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BearerDecoder")
            .field("algorithms", &self.algorithms)
            .finish_non_exhaustive()
    }
}

impl BearerDecoder {
    /// Creates a decoder accepting the given algorithm names.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - the secret is empty, or no algorithm is given
    /// - an algorithm name is unknown
    /// - the algorithms span more than one key family (e.g. `HS256` with `RS256`)
    /// - the secret does not parse as a key of that family, or is a PEM key
    ///   used with `HS*`
    pub fn new<S: AsRef<str>>(
        secret: impl Into<String>,
        algorithms: &[S],
    ) -> Result<Self, ConfigError> {
        let secret = secret.into();
        if secret.is_empty() {
            return Err(ConfigError::Missing("secret".to_string()));
        }

        let algorithms = parse_algorithms(algorithms)?;
        let family = single_family(&algorithms)?;
        let key = family.decoding_key(&secret)?;

        Ok(Self { key, algorithms })
    }

    /// The accepted algorithms.
    #[must_use]
    pub fn algorithms(&self) -> &[Algorithm] {
        &self.algorithms
    }

    /// Verifies `token` and returns its claims as an assertion.
    ///
    /// # Errors
    ///
    /// Returns `InvalidAssertion` if the token is malformed, uses an
    /// algorithm that is not accepted, fails signature or expiry checks,
    /// or lacks `iat`/`exp` claims.
    pub fn decode(&self, token: &str) -> MediationResult<Assertion> {
        let header = jsonwebtoken::decode_header(token)
            .map_err(|e| MediationError::invalid_assertion(format!("malformed token: {e}")))?;

        if !self.algorithms.contains(&header.alg) {
            return Err(MediationError::invalid_assertion(format!(
                "algorithm {:?} is not accepted",
                header.alg
            )));
        }

        let mut validation = Validation::new(header.alg);
        validation.validate_aud = false;
        validation.set_required_spec_claims(&["exp"]);

        let data = jsonwebtoken::decode::<Value>(token, &self.key, &validation).map_err(|e| {
            tracing::debug!(error = %e, "Bearer token rejected");
            MediationError::invalid_assertion(e.to_string())
        })?;

        Assertion::from_claims(data.claims)
    }
}

fn parse_algorithms<S: AsRef<str>>(names: &[S]) -> Result<Vec<Algorithm>, ConfigError> {
    if names.is_empty() {
        return Err(ConfigError::InvalidValue(
            "at least one JWT algorithm is required".to_string(),
        ));
    }

    names
        .iter()
        .map(|name| {
            Algorithm::from_str(name.as_ref()).map_err(|_| {
                ConfigError::InvalidValue(format!(
                    "Invalid JWT algorithm: '{}'",
                    name.as_ref()
                ))
            })
        })
        .collect()
}

fn single_family(algorithms: &[Algorithm]) -> Result<KeyFamily, ConfigError> {
    let mut families = algorithms.iter().map(|alg| KeyFamily::of(*alg));
    let first = match families.next() {
        Some(family) => family?,
        None => {
            return Err(ConfigError::InvalidValue(
                "at least one JWT algorithm is required".to_string(),
            ));
        }
    };

    for family in families {
        let family = family?;
        if family != first {
            return Err(ConfigError::InvalidValue(format!(
                "JWT algorithms mix {first:?} and {family:?} keys; one secret serves one key family"
            )));
        }
    }
    Ok(first)
}

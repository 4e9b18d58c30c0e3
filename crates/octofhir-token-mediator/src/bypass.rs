//! Request paths that bypass mediation.
//!
//! Entries are either exact paths (`/health`) or regular expressions
//! prefixed with `regex:` (`regex:^/public/`).

use regex::Regex;

use crate::error::ConfigError;

const REGEX_PREFIX: &str = "regex:";

#[derive(Debug, Clone)]
enum Exclusion {
    Exact(String),
    Pattern(Regex),
}

/// Compiled set of excluded request paths.
#[derive(Debug, Clone, Default)]
pub struct PathExclusions {
    exclusions: Vec<Exclusion>,
}

impl PathExclusions {
    /// Compiles the configured exclusions.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if a `regex:` entry does not compile
    /// or an entry is empty.
    pub fn new<S: AsRef<str>>(entries: &[S]) -> Result<Self, ConfigError> {
        let exclusions = entries
            .iter()
            .map(|entry| {
                let entry = entry.as_ref();
                if let Some(pattern) = entry.strip_prefix(REGEX_PREFIX) {
                    Regex::new(pattern).map(Exclusion::Pattern).map_err(|e| {
                        ConfigError::InvalidValue(format!(
                            "Invalid unless pattern '{}': {}",
                            pattern, e
                        ))
                    })
                } else if entry.is_empty() {
                    Err(ConfigError::InvalidValue(
                        "unless paths cannot be empty".to_string(),
                    ))
                } else {
                    Ok(Exclusion::Exact(entry.to_string()))
                }
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { exclusions })
    }

    /// Returns `true` if requests to `path` skip mediation.
    #[must_use]
    pub fn is_excluded(&self, path: &str) -> bool {
        self.exclusions.iter().any(|exclusion| match exclusion {
            Exclusion::Exact(p) => p == path,
            Exclusion::Pattern(re) => re.is_match(path),
        })
    }

    /// Number of configured exclusions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.exclusions.len()
    }

    /// Returns `true` if no exclusions are configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.exclusions.is_empty()
    }
}

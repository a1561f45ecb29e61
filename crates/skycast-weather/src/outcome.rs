use skycast_core::WeatherError;

use crate::fetch::FetchError;

/// Tagged result of a city-level lookup.
///
/// Expected failure modes are values here, never panics or raw errors.
#[derive(Debug, Clone, PartialEq)]
pub enum LookupOutcome<T> {
    Found(T),
    /// No usable city; `suggestions` only ever holds provider candidates.
    NotFound {
        query: String,
        suggestions: Vec<String>,
    },
    Failed(WeatherError),
}

impl<T> LookupOutcome<T> {
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> LookupOutcome<U> {
        match self {
            LookupOutcome::Found(value) => LookupOutcome::Found(f(value)),
            LookupOutcome::NotFound { query, suggestions } => {
                LookupOutcome::NotFound { query, suggestions }
            }
            LookupOutcome::Failed(e) => LookupOutcome::Failed(e),
        }
    }

    /// The found value, or this outcome re-typed for early return.
    pub fn into_found<U>(self) -> Result<T, LookupOutcome<U>> {
        match self {
            LookupOutcome::Found(value) => Ok(value),
            LookupOutcome::NotFound { query, suggestions } => {
                Err(LookupOutcome::NotFound { query, suggestions })
            }
            LookupOutcome::Failed(e) => Err(LookupOutcome::Failed(e)),
        }
    }

    pub fn found(self) -> Option<T> {
        match self {
            LookupOutcome::Found(value) => Some(value),
            _ => None,
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, LookupOutcome::Found(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, LookupOutcome::NotFound { .. })
    }

    /// A failure the caller may retry later.
    pub fn is_transient_failure(&self) -> bool {
        matches!(self, LookupOutcome::Failed(e) if e.is_transient())
    }
}

impl<T> From<Result<T, FetchError>> for LookupOutcome<T> {
    fn from(result: Result<T, FetchError>) -> Self {
        match result {
            Ok(value) => LookupOutcome::Found(value),
            Err(e) => LookupOutcome::Failed(e.into()),
        }
    }
}

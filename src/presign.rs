//! # Pre-signed URL Expiration
//!
//! Blob stores sign URLs with a timestamp and a lifetime in the query string. The
//! key names differ per provider, so they are kept in a small table of dialects and
//! both keys are always read from the same dialect.
//!
//! Nothing here touches the network: expiration is a pure function of the URL.

use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, TimeDelta, Utc};
use thiserror::Error;
use url::Url;

use crate::config::{Config, DEFAULT_GRACE_SECS};

/// Fixed signing timestamp format, e.g. `20240101T000000Z`.
pub const SIGNING_DATE_FORMAT: &str = "%Y%m%dT%H%M%SZ";

/// The query keys one provider uses for a signed URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SigningDialect {
    pub provider: &'static str,
    pub date_key: &'static str,
    pub expires_key: &'static str,
}

/// Dialects in lookup order.
pub const DIALECTS: &[SigningDialect] = &[
    SigningDialect {
        provider: "gcs",
        date_key: "X-Goog-Date",
        expires_key: "X-Goog-Expires",
    },
    SigningDialect {
        provider: "s3",
        date_key: "X-Amz-Date",
        expires_key: "X-Amz-Expires",
    },
];

/// Why a URL's expiration could not be determined.
///
/// Messages never include the URL; its query string is a credential.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum UrlError {
    #[error("cannot parse URL: {0}")]
    InvalidUrl(String),

    #[error("URL carries no signing date (tried {tried})")]
    MissingDate { tried: String },

    #[error("cannot parse {key} '{value}'")]
    InvalidDate { key: &'static str, value: String },

    #[error("URL signed by {provider} carries no {key}")]
    MissingExpiry {
        provider: &'static str,
        key: &'static str,
    },

    #[error("cannot parse {key} '{value}'")]
    InvalidExpiry { key: &'static str, value: String },
}

/// Parses the expiration instant of a pre-signed URL.
pub fn parse_expiration(url: &str) -> Result<DateTime<Utc>, UrlError> {
    let parsed = Url::parse(url).map_err(|e| UrlError::InvalidUrl(e.to_string()))?;
    let query: Vec<(String, String)> = parsed.query_pairs().into_owned().collect();
    let lookup = |key: &str| {
        query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
            .filter(|v| !v.is_empty())
    };

    let (dialect, date_raw) = DIALECTS
        .iter()
        .find_map(|d| lookup(d.date_key).map(|v| (d, v)))
        .ok_or_else(|| UrlError::MissingDate {
            tried: DIALECTS
                .iter()
                .map(|d| d.date_key)
                .collect::<Vec<_>>()
                .join(", "),
        })?;

    let date = NaiveDateTime::parse_from_str(date_raw, SIGNING_DATE_FORMAT)
        .map_err(|_| UrlError::InvalidDate {
            key: dialect.date_key,
            value: date_raw.to_string(),
        })?
        .and_utc();

    let expires_raw = lookup(dialect.expires_key).ok_or(UrlError::MissingExpiry {
        provider: dialect.provider,
        key: dialect.expires_key,
    })?;
    let invalid_expiry = || UrlError::InvalidExpiry {
        key: dialect.expires_key,
        value: expires_raw.to_string(),
    };
    let seconds: u32 = expires_raw.parse().map_err(|_| invalid_expiry())?;
    let expiration = date
        .checked_add_signed(TimeDelta::seconds(i64::from(seconds)))
        .ok_or_else(invalid_expiry)?;

    tracing::debug!(
        provider = dialect.provider,
        lifetime_secs = seconds,
        %expiration,
        "parsed signed URL expiration"
    );
    Ok(expiration)
}

/// Decides whether a cached pre-signed URL may still be used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UrlValidator {
    grace: TimeDelta,
}

impl Default for UrlValidator {
    fn default() -> Self {
        Self::with_grace(Duration::from_secs(DEFAULT_GRACE_SECS))
    }
}

impl UrlValidator {
    /// A validator that retires URLs `grace` before their nominal expiry.
    pub fn with_grace(grace: Duration) -> Self {
        Self {
            grace: TimeDelta::from_std(grace).unwrap_or(TimeDelta::MAX),
        }
    }

    /// A validator using the grace window from `config`.
    pub fn from_config(config: &Config) -> Self {
        Self::with_grace(config.grace())
    }

    pub fn grace(&self) -> TimeDelta {
        self.grace
    }

    /// Validity against the system clock.
    pub fn is_valid(&self, url: &str) -> Result<bool, UrlError> {
        self.is_valid_at(url, Utc::now())
    }

    /// Valid iff `now + grace <= expiration`.
    pub fn is_valid_at(&self, url: &str, now: DateTime<Utc>) -> Result<bool, UrlError> {
        let expiration = parse_expiration(url)?;
        let valid = match now.checked_add_signed(self.grace) {
            Some(deadline) => deadline <= expiration,
            None => false,
        };
        if !valid {
            tracing::debug!(
                %now,
                %expiration,
                grace_secs = self.grace.num_seconds(),
                "signed URL is stale"
            );
        }
        Ok(valid)
    }

    /// Returns `cached` while it is valid, otherwise asks `refresh` for a new URL.
    ///
    /// A cached URL that cannot be parsed counts as stale.
    pub fn reuse_or_refresh<E>(
        &self,
        cached: Option<&str>,
        refresh: impl FnOnce() -> Result<String, E>,
    ) -> Result<String, E> {
        if let Some(url) = cached {
            match self.is_valid(url) {
                Ok(true) => return Ok(url.to_string()),
                Ok(false) => {}
                Err(e) => tracing::debug!("discarding cached URL: {e}"),
            }
        }
        refresh()
    }
}

/// [`UrlValidator::is_valid`] with the default one-minute grace window.
pub fn is_valid(url: &str) -> Result<bool, UrlError> {
    UrlValidator::default().is_valid(url)
}

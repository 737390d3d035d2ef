//! Bearer tokens for the Dropbox API.
//!
//! A [`Token`] is an immutable record: refreshing produces a new value which
//! replaces the stored one. Freshness is always computed from `expires_at`
//! against a clock reading, never cached as a flag.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::store::Secret;

/// Token type reported by Dropbox.
pub const BEARER: &str = "bearer";

/// An access token with its refresh value and expiry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    /// The bearer value sent as `Authorization: Bearer ...`.
    pub access_token: Secret,

    /// Long-lived refresh value. Absent on short-lived-only grants.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<Secret>,

    /// When the access value stops being accepted (None if non-expiring).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,

    /// Token type (usually "bearer").
    #[serde(default = "default_token_type")]
    pub token_type: String,

    /// When the provider issued this token.
    #[serde(default = "Utc::now")]
    pub issued_at: DateTime<Utc>,
}

fn default_token_type() -> String {
    BEARER.to_string()
}

impl Token {
    /// Create a non-expiring token without a refresh value.
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: Secret::new(access_token),
            refresh_token: None,
            expires_at: None,
            token_type: default_token_type(),
            issued_at: Utc::now(),
        }
    }

    /// Create a token that expires `ttl` after now.
    pub fn from_ttl(access_token: impl Into<String>, ttl: Duration) -> Self {
        let token = Self::new(access_token);
        let expires_at = token.issued_at + ttl;
        token.with_expiry(expires_at)
    }

    /// Set an absolute expiry.
    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Attach a refresh value.
    pub fn with_refresh_token(mut self, refresh_token: impl Into<String>) -> Self {
        self.refresh_token = Some(Secret::new(refresh_token));
        self
    }

    /// Whether the token is usable at `now`, treating it as stale `buffer`
    /// before its expiry.
    pub fn is_fresh_at(&self, now: DateTime<Utc>, buffer: Duration) -> bool {
        match self.expires_at {
            Some(expires_at) => expires_at
                .checked_sub_signed(buffer.max(Duration::zero()))
                .is_some_and(|deadline| deadline > now),
            None => true,
        }
    }

    /// Whether the token is usable right now.
    pub fn is_fresh(&self) -> bool {
        self.is_fresh_at(Utc::now(), Duration::zero())
    }

    /// Time left before expiry, if the token expires and has not yet.
    pub fn remaining(&self) -> Option<Duration> {
        let left = self.expires_at? - Utc::now();
        (left > Duration::zero()).then_some(left)
    }

    /// A log-safe description: type, expiry, and whether a refresh value is held.
    pub fn summary(&self) -> TokenSummary {
        TokenSummary {
            token_type: self.token_type.clone(),
            expires_at: self.expires_at,
            has_refresh_token: self.refresh_token.is_some(),
        }
    }
}

/// Redacted view of a [`Token`], safe to log or print.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TokenSummary {
    pub token_type: String,
    pub expires_at: Option<DateTime<Utc>>,
    pub has_refresh_token: bool,
}

impl std::fmt::Display for TokenSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} token", self.token_type)?;
        match self.expires_at {
            Some(at) => write!(f, ", expires {}", at.to_rfc3339())?,
            None => write!(f, ", no expiry")?,
        }
        if self.has_refresh_token {
            write!(f, ", refreshable")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_freshness() {
        let stale = Token::new("t").with_expiry(Utc::now() - Duration::hours(1));
        assert!(!stale.is_fresh());

        let fresh = Token::new("t").with_expiry(Utc::now() + Duration::hours(1));
        assert!(fresh.is_fresh());

        assert!(Token::new("t").is_fresh());
    }

    #[test]
    fn test_token_freshness_is_pure() {
        let at = Utc::now();
        let token = Token::new("t").with_expiry(at);

        assert!(token.is_fresh_at(at - Duration::seconds(1), Duration::zero()));
        assert!(!token.is_fresh_at(at, Duration::zero()));
        assert!(!token.is_fresh_at(at - Duration::seconds(1), Duration::minutes(5)));
    }

    #[test]
    fn test_out_of_range_buffers() {
        let now = Utc::now();
        let expired = Token::new("t").with_expiry(now - Duration::minutes(5));
        let fresh = Token::new("t").with_expiry(now + Duration::hours(4));

        // A negative buffer never extends a token's life.
        assert!(!expired.is_fresh_at(now, Duration::hours(-1)));
        assert!(fresh.is_fresh_at(now, Duration::hours(-1)));

        // Past the representable range means stale, not a panic.
        assert!(!fresh.is_fresh_at(now, Duration::MAX));
        assert!(!fresh.is_fresh_at(now, Duration::seconds(10_000_000_000_000)));
    }

    #[test]
    fn test_from_ttl_sets_expiry_from_issue_time() {
        let token = Token::from_ttl("t", Duration::seconds(14_400));
        assert_eq!(
            token.expires_at.unwrap() - token.issued_at,
            Duration::seconds(14_400)
        );
        assert!(token.remaining().is_some());
    }

    #[test]
    fn test_summary_hides_secrets() {
        let token = Token::from_ttl("sl.access-value", Duration::hours(4))
            .with_refresh_token("refresh-value");

        let summary = token.summary();
        assert!(summary.has_refresh_token);

        let printed = format!("{} {:?}", summary, token);
        assert!(!printed.contains("sl.access-value"));
        assert!(!printed.contains("refresh-value"));
    }

    #[test]
    fn test_token_json_round_trip_keeps_refresh_value() {
        let token = Token::from_ttl("a", Duration::hours(1)).with_refresh_token("r");
        let json = serde_json::to_string(&token).unwrap();
        let back: Token = serde_json::from_str(&json).unwrap();
        assert_eq!(back, token);
    }
}

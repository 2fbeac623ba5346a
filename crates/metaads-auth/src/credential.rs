//! The persisted representation of a usable Meta access token.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Which provider produced a credential.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Authorization-code flow directly against Meta.
    #[default]
    Direct,
    /// Pre-exchanged token handed out by the Pipeboard broker.
    Broker,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Direct => "direct",
            ProviderKind::Broker => "broker",
        }
    }

    /// File name of this provider's token cache.
    pub fn cache_file_name(&self) -> &'static str {
        match self {
            ProviderKind::Direct => "token_cache.json",
            ProviderKind::Broker => "pipeboard_token_cache.json",
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A Meta Graph API bearer token plus the metadata needed to reason about it.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub access_token: String,
    #[serde(default = "Utc::now", deserialize_with = "timestamp::deserialize")]
    pub obtained_at: DateTime<Utc>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "timestamp::deserialize_opt"
    )]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub provider: ProviderKind,
}

impl Credential {
    /// Create a credential obtained now.
    pub fn new(access_token: impl Into<String>, provider: ProviderKind) -> Self {
        Self {
            access_token: access_token.into(),
            obtained_at: Utc::now(),
            expires_at: None,
            provider,
        }
    }

    /// Set the expiry from a lifetime in seconds, counted from `obtained_at`.
    pub fn expires_in(mut self, secs: u64) -> Self {
        let secs = i64::try_from(secs).unwrap_or(i64::MAX);
        self.expires_at = self
            .obtained_at
            .checked_add_signed(Duration::seconds(secs));
        self
    }

    /// Like [`Credential::expires_in`], but leaves the expiry unset for `None`.
    pub fn with_expiry_secs(self, secs: Option<u64>) -> Self {
        match secs {
            Some(secs) => self.expires_in(secs),
            None => self,
        }
    }

    /// Set an absolute expiry.
    pub fn with_expires_at(mut self, expires_at: Option<DateTime<Utc>>) -> Self {
        self.expires_at = expires_at;
        self
    }

    /// Whether the token is past its known expiry.
    ///
    /// Tokens without an expiry are never considered expired.
    pub fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|exp| exp <= Utc::now())
    }

    /// Seconds until expiry, if known. Zero once expired.
    pub fn expires_in_secs(&self) -> Option<u64> {
        self.expires_at
            .map(|exp| (exp - Utc::now()).num_seconds().max(0) as u64)
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &"<redacted>")
            .field("obtained_at", &self.obtained_at)
            .field("expires_at", &self.expires_at)
            .field("provider", &self.provider)
            .finish()
    }
}

/// Lenient timestamp parsing: RFC 3339 strings, unix seconds, or numeric strings.
pub(crate) mod timestamp {
    use super::*;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Secs(i64),
        Float(f64),
        Text(String),
    }

    fn convert(raw: Raw) -> Option<DateTime<Utc>> {
        match raw {
            Raw::Secs(secs) => DateTime::from_timestamp(secs, 0),
            Raw::Float(secs) => DateTime::from_timestamp(secs as i64, 0),
            Raw::Text(text) => DateTime::parse_from_rfc3339(text.trim())
                .map(|dt| dt.with_timezone(&Utc))
                .ok()
                .or_else(|| {
                    text.trim()
                        .parse::<i64>()
                        .ok()
                        .and_then(|secs| DateTime::from_timestamp(secs, 0))
                }),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Raw::deserialize(deserializer)?;
        convert(raw).ok_or_else(|| serde::de::Error::custom("invalid timestamp"))
    }

    pub fn deserialize_opt<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Option::<Raw>::deserialize(deserializer)? {
            None => Ok(None),
            Some(raw) => convert(raw)
                .map(Some)
                .ok_or_else(|| serde::de::Error::custom("invalid timestamp")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_expiry_never_expired() {
        let cred = Credential::new("tok", ProviderKind::Direct);
        assert!(!cred.is_expired());
        assert!(cred.expires_in_secs().is_none());
    }

    #[test]
    fn test_expires_in() {
        let cred = Credential::new("tok", ProviderKind::Direct).expires_in(3600);
        assert!(!cred.is_expired());
        let left = cred.expires_in_secs().unwrap();
        assert!(left <= 3600 && left >= 3590);
    }

    #[test]
    fn test_past_expiry() {
        let cred = Credential::new("tok", ProviderKind::Broker)
            .with_expires_at(Some(Utc::now() - Duration::seconds(10)));
        assert!(cred.is_expired());
        assert_eq!(cred.expires_in_secs(), Some(0));
    }

    #[test]
    fn test_debug_redacts_token() {
        let cred = Credential::new("super-secret", ProviderKind::Direct);
        let debug = format!("{:?}", cred);
        assert!(!debug.contains("super-secret"));
        assert!(debug.contains("redacted"));
    }

    #[test]
    fn test_missing_provider_defaults_to_direct() {
        let json = r#"{"access_token":"X","obtained_at":"2024-01-01T00:00:00Z"}"#;
        let cred: Credential = serde_json::from_str(json).unwrap();
        assert_eq!(cred.provider, ProviderKind::Direct);
        assert!(cred.expires_at.is_none());
    }

    #[test]
    fn test_unix_seconds_expiry() {
        let json = r#"{"access_token":"X","expires_at":1000}"#;
        let cred: Credential = serde_json::from_str(json).unwrap();
        assert_eq!(cred.expires_at.unwrap().timestamp(), 1000);
        assert!(cred.is_expired());
    }

    #[test]
    fn test_rfc3339_roundtrip_is_exact() {
        let cred = Credential::new("tok", ProviderKind::Broker).expires_in(60);
        let json = serde_json::to_string(&cred).unwrap();
        let parsed: Credential = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, cred);
    }

    #[test]
    fn test_cache_file_names() {
        assert_eq!(ProviderKind::Direct.cache_file_name(), "token_cache.json");
        assert_eq!(
            ProviderKind::Broker.cache_file_name(),
            "pipeboard_token_cache.json"
        );
    }
}

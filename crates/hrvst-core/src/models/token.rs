use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Response body of the OAuth2 token endpoint, for both the
/// authorization-code and the refresh-token grant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenSet {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
    /// Lifetime of `access_token` in seconds.
    #[serde(default)]
    pub expires_in: Option<i64>,
    /// Space separated list of granted scopes.
    #[serde(default)]
    pub scope: Option<String>,
}

impl TokenSet {
    /// Absolute expiry of the access token. A response without `expires_in`
    /// is treated as already expiring so the next read refreshes.
    pub fn expires_at(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self.expires_in {
            Some(secs) if secs > 0 => now + Duration::seconds(secs),
            _ => now,
        }
    }

    pub fn scopes(&self) -> Vec<String> {
        self.scope
            .as_deref()
            .map(|s| s.split_whitespace().map(String::from).collect())
            .unwrap_or_default()
    }

    /// The refresh token, if the server returned a usable one.
    pub fn refresh_token(&self) -> Option<&str> {
        self.refresh_token
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_token_response() {
        let json = r#"{"access_token":"at","refresh_token":"rt","token_type":"bearer","expires_in":1209600}"#;
        let tokens: TokenSet = serde_json::from_str(json).expect("Failed to parse token JSON");
        assert_eq!(tokens.access_token, "at");
        assert_eq!(tokens.refresh_token(), Some("rt"));
        assert_eq!(tokens.expires_in, Some(1_209_600));
        assert!(tokens.scopes().is_empty());
    }

    #[test]
    fn test_expires_at() {
        let now = Utc::now();
        let mut tokens = TokenSet {
            access_token: "at".to_string(),
            refresh_token: None,
            token_type: None,
            expires_in: Some(60),
            scope: Some("harvest:1 forecast:2".to_string()),
        };
        assert_eq!(tokens.expires_at(now), now + Duration::seconds(60));
        assert_eq!(tokens.scopes(), vec!["harvest:1", "forecast:2"]);

        tokens.expires_in = None;
        assert_eq!(tokens.expires_at(now), now);
    }

    #[test]
    fn test_blank_refresh_token_is_none() {
        let tokens = TokenSet {
            access_token: "at".to_string(),
            refresh_token: Some("   ".to_string()),
            token_type: None,
            expires_in: None,
            scope: None,
        };
        assert_eq!(tokens.refresh_token(), None);
    }
}

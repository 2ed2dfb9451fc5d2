// Authentication types

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde_json::Value;

/// Field names under which backends have historically returned the access token
pub const DEFAULT_ACCESS_TOKEN_FIELDS: [&str; 4] = ["access", "key", "auth_token", "token"];

/// Authentication state for the current user agent
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Session {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,

    /// When the access token was last written
    pub updated_at: Option<DateTime<Utc>>,
}

impl Session {
    /// An access token is present (it may still be rejected by the server)
    pub fn is_authenticated(&self) -> bool {
        self.access_token.is_some()
    }

    /// A refresh can be attempted
    pub fn can_refresh(&self) -> bool {
        self.refresh_token.is_some()
    }
}

/// Token data from a login or refresh response
#[derive(Debug, Clone, PartialEq)]
pub struct TokenData {
    pub access_token: String,

    /// Present only when the server rotated it and rotation is enabled
    pub refresh_token: Option<String>,
    pub issued_at: DateTime<Utc>,
}

/// Names of the JSON fields exchanged with the token endpoints
#[derive(Debug, Clone)]
pub struct TokenFields {
    /// Field carrying the refresh token in the refresh request body
    pub refresh_request: String,

    /// Access token aliases, tried in order
    pub access: Vec<String>,

    /// Field carrying a (possibly rotated) refresh token in responses
    pub refresh: String,
}

impl Default for TokenFields {
    fn default() -> Self {
        Self {
            refresh_request: "refresh".to_string(),
            access: DEFAULT_ACCESS_TOKEN_FIELDS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            refresh: "refresh".to_string(),
        }
    }
}

/// Pick the first non-empty string among `fields`
pub fn extract_token(body: &Value, fields: &[String]) -> Option<String> {
    fields.iter().find_map(|field| {
        body.get(field)
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    })
}

/// Build token data from a token endpoint response body
pub fn parse_token_response(
    body: &Value,
    fields: &TokenFields,
    keep_refresh_token: bool,
) -> Option<TokenData> {
    let access_token = extract_token(body, &fields.access)?;
    let refresh_token = if keep_refresh_token {
        extract_token(body, std::slice::from_ref(&fields.refresh))
    } else {
        None
    };

    Some(TokenData {
        access_token,
        refresh_token,
        issued_at: Utc::now(),
    })
}

/// Parse datetime from various ISO 8601 formats
pub fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
    // Handle Z suffix
    let normalized = if s.ends_with('Z') {
        s.replace('Z', "+00:00")
    } else {
        s.to_string()
    };

    DateTime::parse_from_rfc3339(&normalized)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("Failed to parse datetime: {}", s))
}

/// Shorten a token for log output
pub fn token_preview(token: &str) -> String {
    let prefix: String = token.chars().take(8).collect();
    format!("{}...", prefix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_extract_token_tolerates_aliases() {
        let fields = TokenFields::default();

        for alias in ["access", "key", "auth_token", "token"] {
            let mut map = serde_json::Map::new();
            map.insert(alias.to_string(), json!("A2"));
            let body = Value::Object(map);
            assert_eq!(extract_token(&body, &fields.access), Some("A2".to_string()));
        }
    }

    #[test]
    fn test_extract_token_prefers_first_alias() {
        let fields = TokenFields::default();
        let body = json!({ "token": "legacy", "access": "current" });
        assert_eq!(
            extract_token(&body, &fields.access),
            Some("current".to_string())
        );
    }

    #[test]
    fn test_extract_token_skips_empty_and_non_string() {
        let fields = TokenFields::default();
        let body = json!({ "access": "", "key": 42, "token": "A3" });
        assert_eq!(extract_token(&body, &fields.access), Some("A3".to_string()));

        let body = json!({ "detail": "nope" });
        assert_eq!(extract_token(&body, &fields.access), None);
    }

    #[test]
    fn test_parse_token_response_rotation() {
        let fields = TokenFields::default();
        let body = json!({ "access": "A2", "refresh": "R2" });

        let rotated = parse_token_response(&body, &fields, true).unwrap();
        assert_eq!(rotated.access_token, "A2");
        assert_eq!(rotated.refresh_token.as_deref(), Some("R2"));

        let kept = parse_token_response(&body, &fields, false).unwrap();
        assert_eq!(kept.refresh_token, None);
    }

    #[test]
    fn test_parse_token_response_without_access() {
        let fields = TokenFields::default();
        let body = json!({ "refresh": "R2" });
        assert!(parse_token_response(&body, &fields, true).is_none());
    }

    #[test]
    fn test_parse_datetime() {
        // Test with Z suffix
        let dt = parse_datetime("2025-01-12T10:30:00Z").unwrap();
        assert_eq!(dt.to_rfc3339(), "2025-01-12T10:30:00+00:00");

        // Test with timezone
        let dt = parse_datetime("2025-01-12T10:30:00+00:00").unwrap();
        assert_eq!(dt.to_rfc3339(), "2025-01-12T10:30:00+00:00");

        assert!(parse_datetime("yesterday").is_err());
    }

    #[test]
    fn test_token_preview() {
        assert_eq!(token_preview("abcdefghijkl"), "abcdefgh...");
        assert_eq!(token_preview("abc"), "abc...");
    }

    #[test]
    fn test_session_flags() {
        let mut session = Session::default();
        assert!(!session.is_authenticated());
        assert!(!session.can_refresh());

        session.access_token = Some("A1".to_string());
        assert!(session.is_authenticated());
        assert!(!session.can_refresh());
    }
}

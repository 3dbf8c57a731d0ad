use serde::{Deserialize, Serialize};

/// JWT claims carried by the handshake token.
///
/// The `sub` claim is the authenticated user ID and becomes the
/// connection's identity in the registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user ID)
    pub sub: String,
    /// Expiration timestamp
    pub exp: i64,
    /// Issued-at timestamp
    pub iat: i64,
    /// Account role ("driver", "hitcher", ...)
    #[serde(default)]
    pub role: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claims_roundtrip() {
        let claims = Claims {
            sub: "user-42".to_string(),
            exp: 2_000_000_000,
            iat: 1_000_000_000,
            role: Some("driver".to_string()),
        };

        let json = serde_json::to_string(&claims).unwrap();
        let parsed: Claims = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.sub, "user-42");
        assert_eq!(parsed.role.as_deref(), Some("driver"));
    }
}

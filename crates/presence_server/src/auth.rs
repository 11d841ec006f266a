//! Bearer-token authentication for incoming connections.
//!
//! Tokens are issued by the account service (out of scope here) and validated
//! against a shared HS256 secret. A connection that cannot present a valid
//! token is closed with a policy-violation status before any session state is
//! created.

use crate::error::AuthError;
use crate::UserId;
use jsonwebtoken::{decode, errors::ErrorKind, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

/// Claims carried by an access token.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// User ID
    pub sub: String,
    /// Display name; falls back to the subject when absent
    #[serde(default)]
    pub name: Option<String>,
    /// Expiry timestamp
    pub exp: i64,
    /// Issued at
    #[serde(default)]
    pub iat: i64,
}

/// Identity resolved from a validated token.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub user_id: UserId,
    pub username: String,
}

/// Validates bearer tokens against the configured secret.
#[derive(Clone)]
pub struct TokenVerifier {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl TokenVerifier {
    /// Creates a verifier for the given HS256 secret.
    pub fn new(secret: &str) -> Self {
        Self {
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
        }
    }

    /// Validates a token and resolves the connecting identity.
    ///
    /// # Errors
    ///
    /// [`AuthError::ExpiredToken`] when the signature is valid but the expiry
    /// has passed, [`AuthError::InvalidToken`] for every other validation
    /// failure.
    pub fn verify(&self, token: &str) -> Result<AuthenticatedUser, AuthError> {
        let data = decode::<Claims>(token, &self.decoding_key, &self.validation).map_err(|e| {
            match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::ExpiredToken,
                _ => AuthError::InvalidToken,
            }
        })?;

        let claims = data.claims;
        let username = claims.name.unwrap_or_else(|| claims.sub.clone());
        Ok(AuthenticatedUser {
            user_id: claims.sub,
            username,
        })
    }
}

impl std::fmt::Debug for TokenVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenVerifier").finish_non_exhaustive()
    }
}

#[cfg(test)]
pub(crate) mod test_tokens {
    use super::Claims;
    use jsonwebtoken::{encode, EncodingKey, Header};

    /// Mints a token the way the account service does.
    pub fn mint(secret: &str, user_id: &str, name: &str, ttl_secs: i64) -> String {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("clock before epoch")
            .as_secs() as i64;
        let claims = Claims {
            sub: user_id.to_string(),
            name: Some(name.to_string()),
            exp: now + ttl_secs,
            iat: now,
        };
        encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_bytes()))
            .expect("token encoding")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_token_resolves_identity() {
        let verifier = TokenVerifier::new("secret");
        let token = test_tokens::mint("secret", "user-1", "ada", 3600);
        let user = verifier.verify(&token).expect("token should validate");
        assert_eq!(user.user_id, "user-1");
        assert_eq!(user.username, "ada");
    }

    #[test]
    fn wrong_secret_is_invalid() {
        let verifier = TokenVerifier::new("secret");
        let token = test_tokens::mint("other-secret", "user-1", "ada", 3600);
        assert!(matches!(verifier.verify(&token), Err(AuthError::InvalidToken)));
    }

    #[test]
    fn expired_token_is_reported_as_expired() {
        let verifier = TokenVerifier::new("secret");
        let token = test_tokens::mint("secret", "user-1", "ada", -3600);
        assert!(matches!(verifier.verify(&token), Err(AuthError::ExpiredToken)));
    }

    #[test]
    fn garbage_is_invalid() {
        let verifier = TokenVerifier::new("secret");
        assert!(matches!(verifier.verify("not-a-token"), Err(AuthError::InvalidToken)));
    }
}

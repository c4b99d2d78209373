use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::errors::{AppError, Result};

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// Account id.
    pub sub: String,
    pub email: String,
    pub exp: i64,
    pub iat: i64,
}

/// Signs and verifies the session tokens handed out after a provider login.
pub struct JwtService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    session_duration: Duration,
}

impl JwtService {
    pub fn new(secret: &str) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_ref()),
            decoding_key: DecodingKey::from_secret(secret.as_ref()),
            session_duration: Duration::days(7),
        }
    }

    pub fn generate_session_token(&self, account_id: i64, email: &str) -> Result<String> {
        let now = Utc::now();
        let claims = Claims {
            sub: account_id.to_string(),
            email: email.to_string(),
            exp: (now + self.session_duration).timestamp(),
            iat: now.timestamp(),
        };

        encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|e| AppError::Auth(format!("Failed to generate session token: {e}")))
    }

    pub fn verify_session_token(&self, token: &str) -> Result<Claims> {
        let token_data = decode::<Claims>(token, &self.decoding_key, &Validation::default())
            .map_err(|e| AppError::Auth(format!("Invalid token: {e}")))?;

        Ok(token_data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_token_round_trip() {
        let jwt_service = JwtService::new("test-secret");

        let token = jwt_service.generate_session_token(42, "test@example.com").unwrap();
        let claims = jwt_service.verify_session_token(&token).unwrap();

        assert_eq!(claims.sub, "42");
        assert_eq!(claims.email, "test@example.com");
    }

    #[test]
    fn test_wrong_secret_is_rejected() {
        let token = JwtService::new("first-secret")
            .generate_session_token(1, "a@example.com")
            .unwrap();

        assert!(JwtService::new("second-secret")
            .verify_session_token(&token)
            .is_err());
    }
}

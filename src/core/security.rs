use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::config::Settings;

#[derive(Debug, Error)]
pub(crate) enum TokenError {
    #[error("jwt decoding failed")]
    JwtDecoding,
    #[error("unsupported jwt algorithm: {0}")]
    UnsupportedAlgorithm(String),
}

/// Claims of a token issued by the identity provider. Only the subject is used.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct Claims {
    pub(crate) sub: String,
    pub(crate) exp: i64,
}

pub(crate) fn verify_token(token: &str, settings: &Settings) -> Result<Claims, TokenError> {
    let algorithm = algorithm_from_settings(settings)?;
    let mut validation = Validation::new(algorithm);
    validation.validate_exp = true;
    validation.required_spec_claims.insert("exp".to_string());
    validation.required_spec_claims.insert("sub".to_string());

    decode::<Claims>(
        token,
        &DecodingKey::from_secret(settings.security().jwt_secret.as_bytes()),
        &validation,
    )
    .map(|data| data.claims)
    .map_err(|_| TokenError::JwtDecoding)
}

fn algorithm_from_settings(settings: &Settings) -> Result<Algorithm, TokenError> {
    match settings.security().algorithm.as_str() {
        "HS256" => Ok(Algorithm::HS256),
        other => Err(TokenError::UnsupportedAlgorithm(other.to_string())),
    }
}

#[cfg(test)]
pub(crate) fn issue_test_token(subject: &str, settings: &Settings, ttl_seconds: i64) -> String {
    use jsonwebtoken::{encode, EncodingKey, Header};
    use time::OffsetDateTime;

    let claims =
        Claims { sub: subject.to_string(), exp: OffsetDateTime::now_utc().unix_timestamp() + ttl_seconds };
    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(settings.security().jwt_secret.as_bytes()),
    )
    .expect("encode test token")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support;

    fn settings() -> Settings {
        let _guard = test_support::env_lock();
        test_support::set_test_env();
        Settings::load().expect("settings")
    }

    #[test]
    fn accepts_token_signed_with_configured_secret() {
        let settings = settings();
        let token = issue_test_token("student-42", &settings, 60);

        let claims = verify_token(&token, &settings).expect("claims");

        assert_eq!(claims.sub, "student-42");
    }

    #[test]
    fn rejects_expired_and_tampered_tokens() {
        let settings = settings();

        let expired = issue_test_token("student-42", &settings, -3_600);
        assert!(matches!(verify_token(&expired, &settings), Err(TokenError::JwtDecoding)));

        let mut tampered = issue_test_token("student-42", &settings, 60);
        tampered.push('x');
        assert!(verify_token(&tampered, &settings).is_err());
    }
}

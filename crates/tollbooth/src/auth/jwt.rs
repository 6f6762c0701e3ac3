//! Signed bearer tokens: HMAC-SHA-256 with typed, fully validated claims.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

use crate::auth::AuthError;

/// Registered claims carried by every gateway bearer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User UUID as a string.
    pub sub: String,
    pub iat: i64,
    pub nbf: i64,
    pub exp: i64,
    pub iss: String,
    pub aud: String,
}

pub struct Jwt {
    encoding: EncodingKey,
    decoding: DecodingKey,
    issuer: String,
    audience: String,
    ttl: ChronoDuration,
    validation: Validation,
}

impl Jwt {
    pub fn new(secret: &str, issuer: &str, audience: &str, ttl: Duration) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.validate_nbf = true;
        validation.set_issuer(&[issuer]);
        validation.set_audience(&[audience]);
        validation.set_required_spec_claims(&["exp", "nbf", "iss", "aud", "sub"]);

        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            issuer: issuer.to_string(),
            audience: audience.to_string(),
            ttl: ChronoDuration::from_std(ttl).unwrap_or_else(|_| ChronoDuration::hours(24)),
            validation,
        }
    }

    /// Sign a bearer for `subject` valid from now until now + ttl.
    pub fn sign(&self, subject: Uuid) -> Result<String, AuthError> {
        self.sign_at(subject, Utc::now())
    }

    pub fn sign_at(&self, subject: Uuid, now: DateTime<Utc>) -> Result<String, AuthError> {
        let claims = Claims {
            sub: subject.to_string(),
            iat: now.timestamp(),
            nbf: now.timestamp(),
            exp: (now + self.ttl).timestamp(),
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|_| AuthError::MalformedClaims)
    }

    /// Verify signature and every registered claim; failures are distinct.
    pub fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        decode::<Claims>(token, &self.decoding, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| classify(&e))
    }

    /// Verify and parse the subject as a user id.
    pub fn subject(&self, token: &str) -> Result<Uuid, AuthError> {
        let claims = self.verify(token)?;
        Uuid::parse_str(&claims.sub).map_err(|_| AuthError::MalformedClaims)
    }
}

fn classify(err: &jsonwebtoken::errors::Error) -> AuthError {
    use jsonwebtoken::errors::ErrorKind;

    match err.kind() {
        ErrorKind::InvalidSignature | ErrorKind::InvalidAlgorithm => AuthError::BadSignature,
        ErrorKind::ExpiredSignature => AuthError::Expired,
        ErrorKind::ImmatureSignature => AuthError::NotYetValid,
        ErrorKind::InvalidIssuer => AuthError::WrongIssuer,
        ErrorKind::InvalidAudience => AuthError::WrongAudience,
        _ => AuthError::MalformedClaims,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jwt() -> Jwt {
        Jwt::new(
            "unit-test-key",
            "http://gateway.test",
            "tollbooth",
            Duration::from_secs(3600),
        )
    }

    #[test]
    fn sign_verify_round_trip() {
        let jwt = jwt();
        let subject = Uuid::new_v4();

        let token = jwt.sign(subject).unwrap();
        let claims = jwt.verify(&token).unwrap();

        assert_eq!(claims.sub, subject.to_string());
        assert_eq!(claims.iss, "http://gateway.test");
        assert_eq!(claims.aud, "tollbooth");
        assert!(claims.exp > claims.iat);
        assert_eq!(jwt.subject(&token).unwrap(), subject);
    }

    #[test]
    fn expired_token_is_rejected() {
        let jwt = jwt();
        let past = Utc::now() - ChronoDuration::hours(2);
        let token = jwt.sign_at(Uuid::new_v4(), past).unwrap();

        assert_eq!(jwt.verify(&token).unwrap_err(), AuthError::Expired);
    }

    #[test]
    fn future_token_is_not_yet_valid() {
        let jwt = jwt();
        let future = Utc::now() + ChronoDuration::hours(1);
        let token = jwt.sign_at(Uuid::new_v4(), future).unwrap();

        assert_eq!(jwt.verify(&token).unwrap_err(), AuthError::NotYetValid);
    }

    #[test]
    fn wrong_key_is_a_bad_signature() {
        let token = jwt().sign(Uuid::new_v4()).unwrap();
        let other = Jwt::new(
            "different-key",
            "http://gateway.test",
            "tollbooth",
            Duration::from_secs(3600),
        );

        assert_eq!(other.verify(&token).unwrap_err(), AuthError::BadSignature);
    }

    #[test]
    fn wrong_issuer_and_audience_are_distinct() {
        let token = jwt().sign(Uuid::new_v4()).unwrap();

        let other_issuer = Jwt::new(
            "unit-test-key",
            "http://imposter.test",
            "tollbooth",
            Duration::from_secs(3600),
        );
        assert_eq!(
            other_issuer.verify(&token).unwrap_err(),
            AuthError::WrongIssuer
        );

        let other_audience = Jwt::new(
            "unit-test-key",
            "http://gateway.test",
            "someone-else",
            Duration::from_secs(3600),
        );
        assert_eq!(
            other_audience.verify(&token).unwrap_err(),
            AuthError::WrongAudience
        );
    }

    #[test]
    fn garbage_is_malformed() {
        assert_eq!(
            jwt().verify("not-a-token").unwrap_err(),
            AuthError::MalformedClaims
        );
    }
}

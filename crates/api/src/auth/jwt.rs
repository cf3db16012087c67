//! JWT session tokens
//!
//! HS256 tokens carrying the user, their hospital, and their role. The
//! hospital id in the token is the tenant boundary: handlers never accept a
//! hospital id from a request body.

use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use medsight_shared::Role;
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

const DEFAULT_EXPIRY_HOURS: i64 = 24;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User id.
    pub sub: Uuid,
    pub hospital_id: Uuid,
    pub role: Role,
    pub exp: i64,
    pub iat: i64,
}

#[derive(Clone)]
pub struct JwtManager {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    expiry_hours: i64,
}

impl JwtManager {
    pub fn new(secret: &str) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            expiry_hours: DEFAULT_EXPIRY_HOURS,
        }
    }

    pub fn create_token(
        &self,
        user_id: Uuid,
        hospital_id: Uuid,
        role: Role,
    ) -> Result<String, jsonwebtoken::errors::Error> {
        let now = OffsetDateTime::now_utc();
        let claims = Claims {
            sub: user_id,
            hospital_id,
            role,
            iat: now.unix_timestamp(),
            exp: (now + Duration::hours(self.expiry_hours)).unix_timestamp(),
        };
        encode(&Header::default(), &claims, &self.encoding_key)
    }

    pub fn verify_token(&self, token: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
        let data = decode::<Claims>(token, &self.decoding_key, &Validation::default())?;
        Ok(data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> JwtManager {
        JwtManager::new("test-secret-at-least-32-bytes-long!!")
    }

    #[test]
    fn token_round_trips_claims() {
        let manager = manager();
        let user_id = Uuid::new_v4();
        let hospital_id = Uuid::new_v4();

        let token = manager
            .create_token(user_id, hospital_id, Role::HospitalAdmin)
            .unwrap();
        let claims = manager.verify_token(&token).unwrap();

        assert_eq!(claims.sub, user_id);
        assert_eq!(claims.hospital_id, hospital_id);
        assert_eq!(claims.role, Role::HospitalAdmin);
        assert!(claims.exp > claims.iat);
    }

    #[test]
    fn token_from_other_secret_rejected() {
        let token = manager()
            .create_token(Uuid::new_v4(), Uuid::new_v4(), Role::Viewer)
            .unwrap();
        let other = JwtManager::new("another-secret-also-32-bytes-long!!!");
        assert!(other.verify_token(&token).is_err());
    }

    #[test]
    fn garbage_token_rejected() {
        assert!(manager().verify_token("not.a.jwt").is_err());
        assert!(manager().verify_token("").is_err());
    }
}

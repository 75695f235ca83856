use std::time::Duration;

use axum::extract::FromRef;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use time::{Duration as TimeDuration, OffsetDateTime};
use tracing::debug;

use crate::auth::claims::Claims;
use crate::auth::repo_types::User;
use crate::config::JwtConfig;
use crate::state::AppState;

#[derive(Clone)]
pub struct JwtKeys {
    pub encoding: EncodingKey,
    pub decoding: DecodingKey,
    pub issuer: String,
    pub audience: String,
    pub ttl: Duration,
}

impl FromRef<AppState> for JwtKeys {
    fn from_ref(state: &AppState) -> Self {
        let JwtConfig {
            secret,
            issuer,
            audience,
            ttl_hours,
        } = state.config.jwt.clone();
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            issuer,
            audience,
            ttl: Duration::from_secs((ttl_hours as u64) * 3600),
        }
    }
}

impl JwtKeys {
    /// Sign a fresh claim for the given record.
    pub fn sign(&self, user: &User) -> anyhow::Result<String> {
        let now = OffsetDateTime::now_utc();
        let exp = now + TimeDuration::seconds(self.ttl.as_secs() as i64);
        let claims = Claims {
            sub: user.id,
            email: user.email.clone(),
            role: user.role,
            iat: now.unix_timestamp() as usize,
            exp: exp.unix_timestamp() as usize,
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
        };
        let token = encode(&Header::default(), &claims, &self.encoding)?;
        debug!(user_id = %user.id, "jwt signed");
        Ok(token)
    }

    /// Verify signature, expiry, issuer and audience; pure computation.
    pub fn verify(&self, token: &str) -> anyhow::Result<Claims> {
        let mut validation = Validation::default();
        validation.set_audience(std::slice::from_ref(&self.audience));
        validation.set_issuer(std::slice::from_ref(&self.issuer));
        let data = decode::<Claims>(token, &self.decoding, &validation)?;
        debug!(user_id = %data.claims.sub, "jwt verified");
        Ok(data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::repo_types::Role;

    fn make_keys(secret: &str, issuer: &str, audience: &str) -> JwtKeys {
        JwtKeys {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            issuer: issuer.into(),
            audience: audience.into(),
            ttl: Duration::from_secs(24 * 3600),
        }
    }

    fn make_user(id: i64, email: &str, role: Role) -> User {
        let now = OffsetDateTime::now_utc();
        User {
            id,
            email: email.into(),
            password_hash: "$argon2id$fake".into(),
            first_name: "Test".into(),
            last_name: "User".into(),
            phone: String::new(),
            address: String::new(),
            role,
            is_active: true,
            created_at: now,
            last_login: None,
            updated_at: now,
        }
    }

    #[test]
    fn sign_and_verify_roundtrip() {
        let keys = make_keys("dev-secret", "test-issuer", "test-aud");
        let user = make_user(7, "claims@example.com", Role::User);
        let token = keys.sign(&user).expect("sign");
        let claims = keys.verify(&token).expect("verify");
        assert_eq!(claims.sub, 7);
        assert_eq!(claims.email, "claims@example.com");
        assert_eq!(claims.role, Role::User);
        assert_eq!(claims.iss, "test-issuer");
        assert_eq!(claims.aud, "test-aud");
        assert_eq!(claims.exp - claims.iat, 24 * 3600);
    }

    #[test]
    fn verify_rejects_wrong_secret() {
        let keys = make_keys("secret-a", "iss", "aud");
        let other = make_keys("secret-b", "iss", "aud");
        let token = keys.sign(&make_user(1, "a@b.com", Role::User)).expect("sign");
        assert!(other.verify(&token).is_err());
    }

    #[test]
    fn verify_rejects_wrong_issuer_or_audience() {
        let keys = make_keys("same-secret", "good-iss", "good-aud");
        let bad = make_keys("same-secret", "bad-iss", "bad-aud");
        let token = keys.sign(&make_user(1, "a@b.com", Role::User)).expect("sign");
        assert!(bad.verify(&token).is_err());
    }

    // A 24h claim issued an hour ago still verifies; one issued 25 hours ago
    // is past expiry and fails.
    #[test]
    fn expiry_window() {
        let keys = make_keys("dev-secret", "iss", "aud");

        let claims_at = |issued: OffsetDateTime| Claims {
            sub: 1,
            email: "a@b.com".into(),
            role: Role::User,
            iat: issued.unix_timestamp() as usize,
            exp: (issued + TimeDuration::hours(24)).unix_timestamp() as usize,
            iss: "iss".into(),
            aud: "aud".into(),
        };

        let now = OffsetDateTime::now_utc();
        let fresh = encode(
            &Header::default(),
            &claims_at(now - TimeDuration::hours(1)),
            &keys.encoding,
        )
        .expect("encode");
        assert!(keys.verify(&fresh).is_ok());

        let stale = encode(
            &Header::default(),
            &claims_at(now - TimeDuration::hours(25)),
            &keys.encoding,
        )
        .expect("encode");
        assert!(keys.verify(&stale).is_err());
    }
}

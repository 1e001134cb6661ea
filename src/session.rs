use std::sync::Arc;

use axum::http::{header, HeaderMap};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation};
use uuid::Uuid;

use crate::config::AuthConfig;
use crate::errors::AppError;

pub const SESSION_COOKIE: &str = "sid";

/// Signs and verifies the session token handed to clients. The token only
/// names a session row; whether that session is still live is decided by
/// the store on every request.
#[derive(Debug, Clone)]
pub struct SessionCodec {
    secret: Arc<Vec<u8>>,
    pub ttl_hours: i64,
}

impl SessionCodec {
    pub fn new(config: &AuthConfig) -> Self {
        Self {
            secret: Arc::clone(&config.session_secret),
            ttl_hours: config.session_ttl_hours,
        }
    }

    pub fn expiry_from(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now + Duration::hours(self.ttl_hours)
    }

    pub fn encode(&self, session_id: Uuid, user_id: Uuid, issued_at: DateTime<Utc>) -> Result<String, AppError> {
        let claims = SessionClaims {
            sid: session_id,
            sub: user_id,
            exp: self.expiry_from(issued_at).timestamp() as usize,
            iat: issued_at.timestamp() as usize,
        };

        jsonwebtoken::encode(&Header::default(), &claims, &EncodingKey::from_secret(&self.secret))
            .map_err(|err| AppError::internal(format!("failed to sign session token: {err}")))
    }

    pub fn decode(&self, token: &str) -> Result<SessionClaims, jsonwebtoken::errors::Error> {
        let mut validation = Validation::default();
        validation.validate_exp = true;

        jsonwebtoken::decode::<SessionClaims>(token, &DecodingKey::from_secret(&self.secret), &validation)
            .map(|data| data.claims)
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SessionClaims {
    pub sid: Uuid,
    pub sub: Uuid,
    pub exp: usize,
    pub iat: usize,
}

/// Session token from `Authorization: Bearer` or the `sid` cookie.
pub fn token_from_headers(headers: &HeaderMap) -> Option<String> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty());

    if let Some(token) = bearer {
        return Some(token.to_string());
    }

    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, value)| *name == SESSION_COOKIE && !value.is_empty())
        .map(|(_, value)| value.to_string())
}

pub fn session_cookie(token: &str, max_age_secs: i64) -> String {
    format!("{SESSION_COOKIE}={token}; HttpOnly; Path=/; SameSite=Lax; Max-Age={max_age_secs}")
}

pub fn cleared_session_cookie() -> String {
    format!("{SESSION_COOKIE}=; HttpOnly; Path=/; SameSite=Lax; Max-Age=0")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Environment;
    use axum::http::HeaderValue;

    fn codec() -> SessionCodec {
        SessionCodec::new(&AuthConfig::for_environment(Environment::Test, "unit-secret"))
    }

    #[test]
    fn token_carries_session_and_subject() {
        let codec = codec();
        let (sid, sub) = (Uuid::new_v4(), Uuid::new_v4());
        let token = codec.encode(sid, sub, Utc::now()).unwrap();

        let claims = codec.decode(&token).unwrap();
        assert_eq!(claims.sid, sid);
        assert_eq!(claims.sub, sub);
    }

    #[test]
    fn token_signed_with_another_secret_is_rejected() {
        let other = SessionCodec::new(&AuthConfig::for_environment(Environment::Test, "other"));
        let token = other.encode(Uuid::new_v4(), Uuid::new_v4(), Utc::now()).unwrap();
        assert!(codec().decode(&token).is_err());
    }

    #[test]
    fn expired_token_is_rejected() {
        let codec = codec();
        let issued = Utc::now() - Duration::hours(48);
        let token = codec.encode(Uuid::new_v4(), Uuid::new_v4(), issued).unwrap();
        assert!(codec.decode(&token).is_err());
    }

    #[test]
    fn reads_bearer_before_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_static("theme=dark; sid=from-cookie"));
        assert_eq!(token_from_headers(&headers).as_deref(), Some("from-cookie"));

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer from-header"));
        assert_eq!(token_from_headers(&headers).as_deref(), Some("from-header"));
    }

    #[test]
    fn empty_cookie_is_no_token() {
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_static("sid="));
        assert_eq!(token_from_headers(&headers), None);
    }
}

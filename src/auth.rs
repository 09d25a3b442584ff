use crate::{
    error::{AppError, AppResult},
    models::{Role, User},
    schema::users,
    DbPool,
};
use argon2::Argon2;
use axum::{
    async_trait,
    extract::{FromRequest, RequestParts, TypedHeader},
    headers::{authorization::Bearer, Authorization},
    http::{header::AUTHORIZATION, StatusCode},
    Extension,
};
use diesel::prelude::*;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use jsonwebtoken::{
    errors::Result as JwtResult, DecodingKey, EncodingKey, Header, TokenData, Validation,
};
use password_hash::{
    self, rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub fn hash_password(password: impl AsRef<[u8]>) -> password_hash::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_ref(), &salt)
        .map(|h| h.to_string())
}

pub fn verify_password(
    password: impl AsRef<[u8]>,
    password_hash: impl AsRef<str>,
) -> password_hash::Result<bool> {
    let parsed_hash = PasswordHash::new(password_hash.as_ref())?;
    Ok(Argon2::default()
        .verify_password(password.as_ref(), &parsed_hash)
        .is_ok())
}

/// Signing material for bearer tokens, shared with handlers as an extension.
#[derive(Clone)]
pub struct JwtKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
}

impl JwtKeys {
    pub fn from_base64_secret(secret: &str, ttl: Duration) -> JwtResult<JwtKeys> {
        Ok(JwtKeys {
            encoding: EncodingKey::from_base64_secret(secret)?,
            decoding: DecodingKey::from_base64_secret(secret)?,
            ttl,
        })
    }

    /// Issues a token for `email` that expires after the configured lifetime.
    pub fn issue(&self, email: &str) -> JwtResult<String> {
        self.encode(&Claims {
            sub: email.to_string(),
            exp: jsonwebtoken::get_current_timestamp() + self.ttl.as_secs(),
        })
    }

    pub fn encode(&self, claims: &Claims) -> JwtResult<String> {
        jsonwebtoken::encode(&Header::default(), claims, &self.encoding)
    }

    pub fn validate(&self, token: &str) -> JwtResult<TokenData<Claims>> {
        jsonwebtoken::decode::<Claims>(token, &self.decoding, &Validation::default())
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// email of the user the token was issued to
    pub sub: String,
    pub exp: u64,
}

fn credentials_error() -> AppError {
    AppError::unauthorized("Could not validate credentials")
}

/// Resolves the user a bearer token was issued to.
///
/// Malformed, expired or tampered tokens, subjects that no longer exist and
/// deactivated accounts are all rejected as unauthorized.
pub async fn resolve_current_user(
    conn: &mut AsyncPgConnection,
    keys: &JwtKeys,
    token: &str,
) -> AppResult<User> {
    let claims = keys.validate(token).map_err(|_| credentials_error())?.claims;

    let user = users::table
        .filter(users::email.eq(claims.sub))
        .first::<User>(conn)
        .await
        .optional()?
        .ok_or_else(credentials_error)?;

    if !user.is_active {
        return Err(credentials_error());
    }
    Ok(user)
}

pub fn has_role(user: &User, allowed: &[Role]) -> bool {
    user.role().map_or(false, |role| allowed.contains(&role))
}

pub fn require_role(user: &User, allowed: &[Role]) -> AppResult<()> {
    if has_role(user, allowed) {
        Ok(())
    } else {
        Err(AppError::forbidden(
            "You don't have permission to perform this action",
        ))
    }
}

/// The authenticated caller. Rejects the request with 401 when the bearer
/// token is missing or does not resolve to an active user.
pub struct ExtractAuth(pub User);

/// Like [`ExtractAuth`] but lets anonymous requests through. A token that is
/// present but invalid is still rejected.
pub struct OptionalAuth(pub Option<User>);

async fn authenticate<B: Send>(req: &mut RequestParts<B>) -> AppResult<User> {
    let TypedHeader(Authorization(bearer)) =
        TypedHeader::<Authorization<Bearer>>::from_request(req)
            .await
            .map_err(|_| AppError::unauthorized("Not authenticated"))?;
    let Extension(keys) = Extension::<JwtKeys>::from_request(req)
        .await
        .map_err(|_| missing_extension("JwtKeys"))?;
    let Extension(pool) = Extension::<DbPool>::from_request(req)
        .await
        .map_err(|_| missing_extension("DbPool"))?;

    let conn = &mut pool.get().await?;
    resolve_current_user(conn, &keys, bearer.token()).await
}

fn missing_extension(name: &'static str) -> AppError {
    tracing::error!(extension = name, "extension missing from router");
    AppError::from(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
}

#[async_trait]
impl<B: Send> FromRequest<B> for ExtractAuth {
    type Rejection = AppError;

    async fn from_request(req: &mut RequestParts<B>) -> Result<Self, Self::Rejection> {
        authenticate(req).await.map(ExtractAuth)
    }
}

#[async_trait]
impl<B: Send> FromRequest<B> for OptionalAuth {
    type Rejection = AppError;

    async fn from_request(req: &mut RequestParts<B>) -> Result<Self, Self::Rejection> {
        if !req.headers().contains_key(AUTHORIZATION) {
            return Ok(OptionalAuth(None));
        }
        authenticate(req).await.map(|user| OptionalAuth(Some(user)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys() -> JwtKeys {
        JwtKeys::from_base64_secret(
            "c2Nob29sLWFjdGl2aXRpZXMtZGV2LXNlY3JldC1rZXk=",
            Duration::from_secs(30 * 60),
        )
        .unwrap()
    }

    #[test]
    fn password_hashes_are_salted_and_verifiable() {
        let first = hash_password("correct horse").unwrap();
        let second = hash_password("correct horse").unwrap();
        assert_ne!(first, second);

        assert!(verify_password("correct horse", &first).unwrap());
        assert!(!verify_password("battery staple", &first).unwrap());
    }

    #[test]
    fn garbage_hashes_fail_to_parse() {
        assert!(verify_password("anything", "not-a-phc-string").is_err());
    }

    #[test]
    fn issued_tokens_carry_the_email_as_subject() {
        let keys = keys();
        let token = keys.issue("alice@x.edu").unwrap();
        let claims = keys.validate(&token).unwrap().claims;

        assert_eq!(claims.sub, "alice@x.edu");
        let now = jsonwebtoken::get_current_timestamp();
        assert!(claims.exp > now && claims.exp <= now + 30 * 60);
    }

    #[test]
    fn expired_tokens_are_rejected() {
        let keys = keys();
        let token = keys
            .encode(&Claims {
                sub: "alice@x.edu".into(),
                exp: jsonwebtoken::get_current_timestamp() - 3600,
            })
            .unwrap();
        assert!(keys.validate(&token).is_err());
    }

    #[test]
    fn tokens_signed_with_another_secret_are_rejected() {
        let other = JwtKeys::from_base64_secret("b3RoZXItc2VjcmV0", Duration::from_secs(60))
            .unwrap();
        let token = other.issue("alice@x.edu").unwrap();
        assert!(keys().validate(&token).is_err());
        assert!(keys().validate("not.a.token").is_err());
    }

    #[test]
    fn role_gate_only_admits_listed_roles() {
        let student = User::fixture(1, Role::Student);
        let teacher = User::fixture(2, Role::Teacher);
        let admin = User::fixture(3, Role::Admin);

        assert!(!has_role(&student, crate::models::STAFF));
        assert!(has_role(&teacher, crate::models::STAFF));
        assert!(has_role(&admin, &[Role::Admin]));
        assert!(!has_role(&teacher, &[Role::Admin]));

        assert_eq!(
            require_role(&student, &[Role::Admin]).unwrap_err().status(),
            StatusCode::FORBIDDEN
        );
        assert!(require_role(&admin, &[Role::Admin]).is_ok());
    }
}

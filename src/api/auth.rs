use super::MessageResponse;
use crate::{
    audit::{self, AuditEvent},
    auth::{self, ExtractAuth, JwtKeys, OptionalAuth},
    error::{AppError, AppResult},
    models::{Role, User},
    schema::users,
    DbPool,
};
use axum::{
    extract::{ConnectInfo, Form},
    routing::{get, post},
    Extension, Json, Router,
};
use chrono::NaiveDateTime;
use diesel::prelude::*;
use diesel_async::{AsyncConnection, RunQueryDsl};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

/// OAuth2 password-flow form. `grant_type` and `scope` are accepted and ignored.
#[derive(Deserialize)]
struct LoginForm {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
struct TokenResponse {
    pub access_token: String,
    pub token_type: &'static str,
}

#[derive(Deserialize)]
struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    #[serde(default)]
    pub role: Role,
}

#[derive(Serialize)]
struct ProfileResponse {
    id: i32,
    email: String,
    first_name: Option<String>,
    last_name: Option<String>,
    role: String,
    is_active: bool,
    created_at: NaiveDateTime,
}

impl From<User> for ProfileResponse {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            email: user.email,
            first_name: user.first_name,
            last_name: user.last_name,
            role: user.role,
            is_active: user.is_active,
            created_at: user.created_at,
        }
    }
}

#[derive(Insertable)]
#[diesel(table_name = users)]
struct NewUser {
    email: String,
    hashed_password: Option<String>,
    first_name: Option<String>,
    last_name: Option<String>,
    role: &'static str,
}

/// Cheap shape check, the address is never mailed.
pub(crate) fn is_valid_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.is_empty()
                && !domain.contains('@')
                && !email.chars().any(char::is_whitespace)
        }
        None => false,
    }
}

/// Anyone may register a student account; every other role needs an admin caller.
pub(crate) fn check_register_permission(requested: Role, caller: Option<&User>) -> AppResult<()> {
    if requested == Role::Student || caller.map_or(false, |c| auth::has_role(c, &[Role::Admin])) {
        Ok(())
    } else {
        Err(AppError::forbidden(
            "Only admins can create non-student accounts",
        ))
    }
}

async fn login(
    Extension(pool): Extension<DbPool>,
    Extension(keys): Extension<JwtKeys>,
    Form(form): Form<LoginForm>,
) -> AppResult<Json<TokenResponse>> {
    let conn = &mut pool.get().await?;

    let user = users::table
        .filter(users::email.eq(&form.username))
        .first::<User>(conn)
        .await
        .optional()?;

    let Some(user) = user else {
        return Err(AppError::unauthorized("Incorrect email or password"));
    };
    let password_matches = match &user.hashed_password {
        Some(hash) => auth::verify_password(&form.password, hash)?,
        None => false,
    };
    if !password_matches {
        return Err(AppError::unauthorized("Incorrect email or password"));
    }
    if !user.is_active {
        return Err(AppError::unauthorized("Account is inactive"));
    }

    tracing::info!(user_id = user.id, "issued access token");
    Ok(Json(TokenResponse {
        access_token: keys.issue(&user.email)?,
        token_type: "bearer",
    }))
}

async fn register(
    Extension(pool): Extension<DbPool>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    OptionalAuth(caller): OptionalAuth,
    Json(req): Json<RegisterRequest>,
) -> AppResult<Json<MessageResponse>> {
    if !is_valid_email(&req.email) {
        return Err(AppError::bad_request("Invalid email address"));
    }
    if req.password.is_empty() {
        return Err(AppError::bad_request("Password must not be empty"));
    }

    let conn = &mut pool.get().await?;

    let existing = users::table
        .filter(users::email.eq(&req.email))
        .select(users::id)
        .first::<i32>(conn)
        .await
        .optional()?;
    if existing.is_some() {
        return Err(AppError::conflict("Email already registered"));
    }

    check_register_permission(req.role, caller.as_ref())?;

    let new_user = NewUser {
        email: req.email,
        hashed_password: Some(auth::hash_password(&req.password)?),
        first_name: req.first_name,
        last_name: req.last_name,
        role: req.role.as_str(),
    };
    let caller_id = caller.map(|c| c.id);
    let ip_address = audit::client_ip(connect_info);

    let user_id = conn
        .transaction::<_, AppError, _>(|conn| {
            Box::pin(async move {
                let user = diesel::insert_into(users::table)
                    .values(new_user)
                    .on_conflict(users::email)
                    .do_nothing()
                    .get_result::<User>(conn)
                    .await
                    .optional()?
                    .ok_or_else(|| AppError::conflict("Email already registered"))?;

                audit::record_event(
                    conn,
                    AuditEvent {
                        actor_id: caller_id.or(Some(user.id)),
                        action: "register",
                        entity_type: "user",
                        entity_id: Some(user.id),
                        details: audit::details(&serde_json::json!({
                            "email": user.email,
                            "role": user.role,
                        })),
                        ip_address,
                    },
                )
                .await?;
                Ok(user.id)
            })
        })
        .await?;

    tracing::info!(user_id, registered_by = ?caller_id, "registered user");
    Ok(Json(MessageResponse::new("User registered successfully")))
}

async fn me(ExtractAuth(user): ExtractAuth) -> Json<ProfileResponse> {
    Json(user.into())
}

/// Creates an active admin account for `email` unless the address is already taken.
pub async fn ensure_admin_user(pool: &DbPool, email: &str, password: &str) -> anyhow::Result<()> {
    let conn = &mut pool.get().await?;

    let inserted = diesel::insert_into(users::table)
        .values(NewUser {
            email: email.to_string(),
            hashed_password: Some(auth::hash_password(password)?),
            first_name: None,
            last_name: None,
            role: Role::Admin.as_str(),
        })
        .on_conflict(users::email)
        .do_nothing()
        .execute(conn)
        .await?;

    if inserted > 0 {
        tracing::info!(email, "created bootstrap admin account");
    } else {
        tracing::debug!(email, "bootstrap admin account already exists");
    }
    Ok(())
}

pub fn app() -> Router {
    Router::new()
        .route("/token", post(login))
        .route("/register", post(register))
        .route("/me", get(me))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    #[test]
    fn email_shape_is_checked() {
        assert!(is_valid_email("alice@x.edu"));
        assert!(!is_valid_email("alice"));
        assert!(!is_valid_email("@x.edu"));
        assert!(!is_valid_email("alice@"));
        assert!(!is_valid_email("a@b@c"));
        assert!(!is_valid_email("al ice@x.edu"));
    }

    #[test]
    fn students_may_self_register() {
        assert!(check_register_permission(Role::Student, None).is_ok());
        let student = User::fixture(1, Role::Student);
        assert!(check_register_permission(Role::Student, Some(&student)).is_ok());
    }

    #[test]
    fn only_admins_may_create_staff_accounts() {
        let teacher = User::fixture(2, Role::Teacher);
        let admin = User::fixture(3, Role::Admin);

        for role in [Role::Teacher, Role::Admin] {
            assert_eq!(
                check_register_permission(role, None).unwrap_err().status(),
                StatusCode::FORBIDDEN
            );
            assert_eq!(
                check_register_permission(role, Some(&teacher))
                    .unwrap_err()
                    .status(),
                StatusCode::FORBIDDEN
            );
            assert!(check_register_permission(role, Some(&admin)).is_ok());
        }
    }

    #[test]
    fn register_role_defaults_to_student() {
        let req: RegisterRequest =
            serde_json::from_str(r#"{"email": "alice@x.edu", "password": "pw"}"#).unwrap();
        assert_eq!(req.role, Role::Student);

        let req: RegisterRequest = serde_json::from_str(
            r#"{"email": "t@x.edu", "password": "pw", "role": "teacher", "first_name": "Tess"}"#,
        )
        .unwrap();
        assert_eq!(req.role, Role::Teacher);
        assert_eq!(req.first_name.as_deref(), Some("Tess"));

        assert!(serde_json::from_str::<RegisterRequest>(
            r#"{"email": "x@x.edu", "password": "pw", "role": "principal"}"#
        )
        .is_err());
    }
}

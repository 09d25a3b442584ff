use super::MessageResponse;
use crate::{
    audit::{self, AuditEvent},
    auth::{self, ExtractAuth},
    error::{AppError, AppResult},
    models::{AuditLog, Role, User},
    schema::{audit_logs, users},
    DbPool,
};
use axum::{
    extract::{ConnectInfo, Path, Query},
    routing::{get, patch},
    Extension, Json, Router,
};
use diesel::prelude::*;
use diesel_async::{AsyncConnection, RunQueryDsl};
use serde::Deserialize;
use std::net::SocketAddr;

const DEFAULT_LOG_LIMIT: i64 = 100;
const MAX_LOG_LIMIT: i64 = 500;

#[derive(Deserialize)]
struct AuditLogQuery {
    action: Option<String>,
    entity_type: Option<String>,
    actor_id: Option<i32>,
    limit: Option<i64>,
}

#[derive(Deserialize)]
struct UserUpdateRequest {
    role: Option<Role>,
    is_active: Option<bool>,
}

#[derive(AsChangeset)]
#[diesel(table_name = users)]
struct UserChanges {
    role: Option<&'static str>,
    is_active: Option<bool>,
}

pub(crate) fn clamp_limit(limit: Option<i64>) -> i64 {
    limit
        .unwrap_or(DEFAULT_LOG_LIMIT)
        .clamp(1, MAX_LOG_LIMIT)
}

async fn list_audit_logs(
    Extension(pool): Extension<DbPool>,
    ExtractAuth(user): ExtractAuth,
    Query(query): Query<AuditLogQuery>,
) -> AppResult<Json<Vec<AuditLog>>> {
    auth::require_role(&user, &[Role::Admin])?;

    let mut logs = audit_logs::table.into_boxed();
    if let Some(action) = query.action {
        logs = logs.filter(audit_logs::action.eq(action));
    }
    if let Some(entity_type) = query.entity_type {
        logs = logs.filter(audit_logs::entity_type.eq(entity_type));
    }
    if let Some(actor_id) = query.actor_id {
        logs = logs.filter(audit_logs::actor_id.eq(actor_id));
    }

    let conn = &mut pool.get().await?;
    let entries = logs
        .order((audit_logs::timestamp.desc(), audit_logs::id.desc()))
        .limit(clamp_limit(query.limit))
        .load::<AuditLog>(conn)
        .await?;
    Ok(Json(entries))
}

async fn update_user(
    Extension(pool): Extension<DbPool>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    ExtractAuth(admin): ExtractAuth,
    Path(email): Path<String>,
    Json(req): Json<UserUpdateRequest>,
) -> AppResult<Json<MessageResponse>> {
    auth::require_role(&admin, &[Role::Admin])?;
    if req.role.is_none() && req.is_active.is_none() {
        return Err(AppError::bad_request("No fields to update"));
    }

    let changes = UserChanges {
        role: req.role.map(|r| r.as_str()),
        is_active: req.is_active,
    };
    let actor_id = admin.id;
    let ip_address = audit::client_ip(connect_info);
    let conn = &mut pool.get().await?;

    let user_id = conn
        .transaction::<_, AppError, _>(|conn| {
            Box::pin(async move {
                let user = diesel::update(users::table.filter(users::email.eq(email)))
                    .set((&changes, users::updated_at.eq(diesel::dsl::now)))
                    .get_result::<User>(conn)
                    .await
                    .optional()?
                    .ok_or_else(|| AppError::not_found("User not found"))?;

                audit::record_event(
                    conn,
                    AuditEvent {
                        actor_id: Some(actor_id),
                        action: "update",
                        entity_type: "user",
                        entity_id: Some(user.id),
                        details: audit::details(&serde_json::json!({
                            "email": user.email,
                            "role": changes.role,
                            "is_active": changes.is_active,
                        })),
                        ip_address,
                    },
                )
                .await?;
                Ok(user.id)
            })
        })
        .await?;

    tracing::info!(user_id, admin_id = actor_id, "updated user account");
    Ok(Json(MessageResponse::new("User updated successfully")))
}

pub fn app() -> Router {
    Router::new()
        .route("/audit-logs", get(list_audit_logs))
        .route("/users/:email", patch(update_user))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_limit_defaults_and_clamps() {
        assert_eq!(clamp_limit(None), 100);
        assert_eq!(clamp_limit(Some(25)), 25);
        assert_eq!(clamp_limit(Some(0)), 1);
        assert_eq!(clamp_limit(Some(-3)), 1);
        assert_eq!(clamp_limit(Some(10_000)), 500);
    }

    #[test]
    fn user_update_accepts_partial_bodies() {
        let req: UserUpdateRequest = serde_json::from_str(r#"{"is_active": false}"#).unwrap();
        assert_eq!(req.role, None);
        assert_eq!(req.is_active, Some(false));

        let req: UserUpdateRequest = serde_json::from_str(r#"{"role": "teacher"}"#).unwrap();
        assert_eq!(req.role, Some(Role::Teacher));
    }
}

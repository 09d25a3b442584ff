use super::{CreatedResponse, MessageResponse};
use crate::{
    audit::{self, AuditEvent},
    auth::{self, ExtractAuth},
    error::{AppError, AppResult},
    models::{Activity, ActivityParticipant, MemberStatus, Role, User, STAFF},
    schema::*,
    DbPool,
};
use axum::{
    extract::{ConnectInfo, Path, Query},
    routing::{delete, get, post},
    Extension, Json, Router,
};
use diesel::prelude::*;
use diesel_async::{pg::AsyncPgConnection, AsyncConnection, RunQueryDsl};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

#[derive(Serialize)]
struct ActivityResponse {
    name: String,
    description: String,
    schedule: String,
    max_participants: i32,
    club: Option<String>,
    participants: Vec<String>,
}

#[derive(Deserialize)]
struct NewActivityRequest {
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    schedule: String,
    max_participants: i32,
    club_id: Option<i32>,
}

#[derive(Insertable)]
#[diesel(table_name = activities)]
struct NewActivity {
    name: String,
    description: String,
    schedule: String,
    max_participants: i32,
    club_id: Option<i32>,
}

#[derive(Deserialize)]
struct UnregisterQuery {
    user_email: Option<String>,
}

/// Decides whether `caller` may join `activity` given what the database says
/// about them.
pub(crate) fn check_signup(
    activity: &Activity,
    caller: &User,
    is_club_member: bool,
    already_signed_up: bool,
    participant_count: i64,
) -> AppResult<()> {
    if activity.club_id.is_some() && !is_club_member && caller.role() == Some(Role::Student) {
        return Err(AppError::forbidden(
            "You must be a club member to join this activity",
        ));
    }
    if already_signed_up {
        return Err(AppError::conflict("You are already signed up"));
    }
    if participant_count >= i64::from(activity.max_participants) {
        return Err(AppError::capacity_exceeded("Activity is full"));
    }
    Ok(())
}

/// Returns the email of the user to unregister when it is not the caller.
/// Only staff may name somebody else. An empty `user_email` names nobody.
pub(crate) fn other_unregister_target<'a>(
    caller: &User,
    user_email: Option<&'a str>,
) -> AppResult<Option<&'a str>> {
    match user_email.filter(|e| !e.is_empty()) {
        Some(email) if auth::has_role(caller, STAFF) => Ok(Some(email)),
        Some(_) => Err(AppError::forbidden(
            "Only teachers and admins can unregister other users",
        )),
        None => Ok(None),
    }
}

async fn find_activity(conn: &mut AsyncPgConnection, name: &str) -> AppResult<Activity> {
    activities::table
        .filter(activities::name.eq(name))
        .first::<Activity>(conn)
        .await
        .optional()?
        .ok_or_else(|| AppError::not_found("Activity not found"))
}

async fn is_signed_up(
    conn: &mut AsyncPgConnection,
    activity_id: i32,
    user_id: i32,
) -> QueryResult<bool> {
    diesel::select(diesel::dsl::exists(
        activity_participants::table
            .filter(activity_participants::activity_id.eq(activity_id))
            .filter(activity_participants::user_id.eq(user_id)),
    ))
    .get_result(conn)
    .await
}

async fn is_active_member(
    conn: &mut AsyncPgConnection,
    club_id: i32,
    user_id: i32,
) -> QueryResult<bool> {
    diesel::select(diesel::dsl::exists(
        club_members::table
            .filter(club_members::club_id.eq(club_id))
            .filter(club_members::user_id.eq(user_id))
            .filter(club_members::status.eq(MemberStatus::Active.as_str())),
    ))
    .get_result(conn)
    .await
}

async fn list(Extension(pool): Extension<DbPool>) -> AppResult<Json<Vec<ActivityResponse>>> {
    let conn = &mut pool.get().await?;

    let activities = activities::table
        .left_join(clubs::table)
        .select((activities::all_columns, clubs::name.nullable()))
        .order(activities::name)
        .load::<(Activity, Option<String>)>(conn)
        .await?;

    let participants = activity_participants::table
        .inner_join(users::table)
        .filter(activity_participants::activity_id.eq_any(activities.iter().map(|a| a.0.id)))
        .order(users::email)
        .load::<(ActivityParticipant, User)>(conn)
        .await?
        .grouped_by(&activities.iter().map(|a| &a.0).collect::<Vec<_>>());

    Ok(Json(
        activities
            .into_iter()
            .zip(participants)
            .map(|((activity, club), participants)| ActivityResponse {
                name: activity.name,
                description: activity.description,
                schedule: activity.schedule,
                max_participants: activity.max_participants,
                club,
                participants: participants.into_iter().map(|p| p.1.email).collect(),
            })
            .collect(),
    ))
}

async fn create(
    Extension(pool): Extension<DbPool>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    ExtractAuth(user): ExtractAuth,
    Json(req): Json<NewActivityRequest>,
) -> AppResult<Json<CreatedResponse>> {
    auth::require_role(&user, STAFF)?;
    if req.max_participants < 1 {
        return Err(AppError::bad_request("max_participants must be at least 1"));
    }

    let actor_id = user.id;
    let ip_address = audit::client_ip(connect_info);
    let conn = &mut pool.get().await?;

    let response = conn
        .transaction::<_, AppError, _>(|conn| {
            Box::pin(async move {
                if let Some(club_id) = req.club_id {
                    let club_exists = diesel::select(diesel::dsl::exists(
                        clubs::table
                            .filter(clubs::id.eq(club_id))
                            .filter(clubs::is_active.eq(true)),
                    ))
                    .get_result::<bool>(conn)
                    .await?;
                    if !club_exists {
                        return Err(AppError::not_found("Club not found"));
                    }
                }

                let activity = diesel::insert_into(activities::table)
                    .values(NewActivity {
                        name: req.name,
                        description: req.description,
                        schedule: req.schedule,
                        max_participants: req.max_participants,
                        club_id: req.club_id,
                    })
                    .on_conflict(activities::name)
                    .do_nothing()
                    .get_result::<Activity>(conn)
                    .await
                    .optional()?
                    .ok_or_else(|| AppError::conflict("Activity already exists"))?;

                let response = CreatedResponse::new("Activity created successfully", activity.id);
                audit::record_event(
                    conn,
                    AuditEvent {
                        actor_id: Some(actor_id),
                        action: "create",
                        entity_type: "activity",
                        entity_id: Some(activity.id),
                        details: audit::details(&response),
                        ip_address,
                    },
                )
                .await?;
                Ok(response)
            })
        })
        .await?;

    tracing::info!(activity_id = response.id, actor_id, "created activity");
    Ok(Json(response))
}

async fn signup(
    Extension(pool): Extension<DbPool>,
    Path(activity_name): Path<String>,
    ExtractAuth(user): ExtractAuth,
) -> AppResult<Json<MessageResponse>> {
    let conn = &mut pool.get().await?;

    let activity = find_activity(conn, &activity_name).await?;
    let is_club_member = match activity.club_id {
        Some(club_id) => is_active_member(conn, club_id, user.id).await?,
        None => false,
    };
    let already_signed_up = is_signed_up(conn, activity.id, user.id).await?;
    let participant_count = activity_participants::table
        .filter(activity_participants::activity_id.eq(activity.id))
        .count()
        .get_result::<i64>(conn)
        .await?;

    check_signup(
        &activity,
        &user,
        is_club_member,
        already_signed_up,
        participant_count,
    )?;

    let inserted = diesel::insert_into(activity_participants::table)
        .values(ActivityParticipant {
            activity_id: activity.id,
            user_id: user.id,
        })
        .on_conflict_do_nothing()
        .execute(conn)
        .await?;
    if inserted == 0 {
        return Err(AppError::conflict("You are already signed up"));
    }

    tracing::info!(activity_id = activity.id, user_id = user.id, "signed up for activity");
    Ok(Json(MessageResponse::new(format!(
        "Signed up for {activity_name}"
    ))))
}

async fn unregister(
    Extension(pool): Extension<DbPool>,
    Path(activity_name): Path<String>,
    Query(query): Query<UnregisterQuery>,
    ExtractAuth(user): ExtractAuth,
) -> AppResult<Json<MessageResponse>> {
    let conn = &mut pool.get().await?;

    let activity = find_activity(conn, &activity_name).await?;

    let named = other_unregister_target(&user, query.user_email.as_deref())?;
    let target = match named {
        Some(email) => users::table
            .filter(users::email.eq(email))
            .first::<User>(conn)
            .await
            .optional()?
            .ok_or_else(|| AppError::not_found("User not found"))?,
        None => user,
    };

    if !is_signed_up(conn, activity.id, target.id).await? {
        return Err(AppError::conflict("Not signed up for this activity"));
    }

    diesel::delete(
        activity_participants::table
            .filter(activity_participants::activity_id.eq(activity.id))
            .filter(activity_participants::user_id.eq(target.id)),
    )
    .execute(conn)
    .await?;

    tracing::info!(activity_id = activity.id, user_id = target.id, "unregistered from activity");
    let message = if named.is_some() {
        format!("Unregistered {} from {activity_name}", target.email)
    } else {
        format!("Unregistered from {activity_name}")
    };
    Ok(Json(MessageResponse::new(message)))
}

pub fn app() -> Router {
    Router::new()
        .route("/activities", get(list).post(create))
        .route("/activities/:activity_name/signup", post(signup))
        .route("/activities/:activity_name/unregister", delete(unregister))
}

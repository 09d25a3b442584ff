use super::{CreatedResponse, MessageResponse};
use crate::{
    audit::{self, AuditEvent},
    auth::{self, ExtractAuth},
    error::{AppError, AppResult},
    models::{BudgetType, Club, ClubBudget, ClubMember, ClubRole, MemberStatus, User, STAFF},
    schema::*,
    DbPool,
};
use axum::{
    extract::{ConnectInfo, Path, Query},
    routing::{get, patch},
    Extension, Json, Router,
};
use chrono::NaiveDateTime;
use diesel::{
    prelude::*,
    result::{DatabaseErrorKind, Error as DieselError},
};
use diesel_async::{pg::AsyncPgConnection, AsyncConnection, RunQueryDsl};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, net::SocketAddr};

pub const LEADER_ROLE: &str = "Leader";
pub const MEMBER_ROLE: &str = "Member";

struct DefaultRole {
    name: &'static str,
    description: &'static str,
    permissions: &'static [&'static str],
}

/// Every club starts with exactly these roles.
const DEFAULT_ROLES: [DefaultRole; 2] = [
    DefaultRole {
        name: LEADER_ROLE,
        description: "Club leader with full permissions",
        permissions: &["all"],
    },
    DefaultRole {
        name: MEMBER_ROLE,
        description: "Regular club member",
        permissions: &["view", "participate"],
    },
];

#[derive(Deserialize)]
struct ClubRequest {
    name: String,
    description: String,
    category: String,
    max_members: Option<i32>,
}

#[derive(Deserialize, AsChangeset)]
#[diesel(table_name = clubs)]
struct ClubUpdate {
    name: Option<String>,
    description: Option<String>,
    category: Option<String>,
    max_members: Option<i32>,
    is_active: Option<bool>,
}

impl ClubUpdate {
    fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.description.is_none()
            && self.category.is_none()
            && self.max_members.is_none()
            && self.is_active.is_none()
    }
}

#[derive(Deserialize)]
struct ListClubsQuery {
    category: Option<String>,
    is_active: Option<bool>,
}

#[derive(Deserialize)]
struct AddMemberRequest {
    email: String,
    role_name: String,
}

#[derive(Deserialize)]
struct MemberStatusRequest {
    status: MemberStatus,
}

#[derive(Deserialize)]
struct BudgetEntryRequest {
    amount: f64,
    description: String,
    #[serde(rename = "type")]
    entry_type: BudgetType,
    category: String,
}

#[derive(Insertable)]
#[diesel(table_name = clubs)]
struct NewClub {
    name: String,
    description: String,
    category: Option<String>,
    max_members: Option<i32>,
    leader_id: Option<i32>,
}

#[derive(Insertable)]
#[diesel(table_name = club_roles)]
struct NewClubRole {
    name: &'static str,
    description: Option<&'static str>,
    permissions: Option<String>,
    club_id: i32,
}

#[derive(Insertable)]
#[diesel(table_name = club_members)]
struct NewClubMember {
    user_id: i32,
    club_id: i32,
    role_id: i32,
    status: &'static str,
}

#[derive(Insertable)]
#[diesel(table_name = club_budgets)]
struct NewBudgetEntry {
    club_id: i32,
    amount: f64,
    description: Option<String>,
    entry_type: &'static str,
    category: String,
    created_by_id: i32,
}

#[derive(Serialize)]
struct LeaderResponse {
    id: i32,
    email: String,
    name: String,
}

#[derive(Serialize)]
struct ClubResponse {
    id: i32,
    name: String,
    description: String,
    category: Option<String>,
    max_members: Option<i32>,
    member_count: i64,
    leader: Option<LeaderResponse>,
}

#[derive(Serialize)]
struct MemberResponse {
    user_id: i32,
    email: String,
    role: String,
    permissions: Vec<String>,
    status: String,
    joined_at: NaiveDateTime,
}

#[derive(Debug, PartialEq, Serialize)]
pub(crate) struct BudgetTotals {
    total_income: f64,
    total_expense: f64,
    balance: f64,
}

#[derive(Serialize)]
struct BudgetResponse {
    #[serde(flatten)]
    totals: BudgetTotals,
    entries: Vec<ClubBudget>,
}

fn default_roles(club_id: i32) -> Vec<NewClubRole> {
    DEFAULT_ROLES
        .iter()
        .map(|role| NewClubRole {
            name: role.name,
            description: Some(role.description),
            permissions: Some(role.permissions.iter().join(",")),
            club_id,
        })
        .collect()
}

pub(crate) fn check_capacity(max_members: Option<i32>, member_count: i64) -> AppResult<()> {
    match max_members {
        Some(max) if member_count >= i64::from(max) => {
            Err(AppError::capacity_exceeded("Club is at maximum capacity"))
        }
        _ => Ok(()),
    }
}

/// Sums entries by their type. Amounts are stored as entered, so the sign is
/// ignored and the type decides the direction.
pub(crate) fn summarize(entries: &[ClubBudget]) -> BudgetTotals {
    let (income, expense): (Vec<_>, Vec<_>) = entries
        .iter()
        .partition(|e| e.entry_type == BudgetType::Income.as_str());
    let total_income: f64 = income.iter().map(|e| e.amount.abs()).sum();
    let total_expense: f64 = expense.iter().map(|e| e.amount.abs()).sum();
    BudgetTotals {
        total_income,
        total_expense,
        balance: total_income - total_expense,
    }
}

async fn find_club(conn: &mut AsyncPgConnection, club_id: i32) -> AppResult<Club> {
    clubs::table
        .find(club_id)
        .first::<Club>(conn)
        .await
        .optional()?
        .ok_or_else(|| AppError::not_found("Club not found"))
}

async fn find_active_club(conn: &mut AsyncPgConnection, club_id: i32) -> AppResult<Club> {
    let club = find_club(conn, club_id).await?;
    if !club.is_active {
        return Err(AppError::not_found("Club not found"));
    }
    Ok(club)
}

async fn member_counts(
    conn: &mut AsyncPgConnection,
    club_ids: Vec<i32>,
) -> QueryResult<HashMap<i32, i64>> {
    Ok(club_members::table
        .filter(club_members::club_id.eq_any(club_ids))
        .group_by(club_members::club_id)
        .select((club_members::club_id, diesel::dsl::count(club_members::id)))
        .load::<(i32, i64)>(conn)
        .await?
        .into_iter()
        .collect())
}

async fn create(
    Extension(pool): Extension<DbPool>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    ExtractAuth(user): ExtractAuth,
    Json(req): Json<ClubRequest>,
) -> AppResult<Json<CreatedResponse>> {
    auth::require_role(&user, STAFF)?;
    if matches!(req.max_members, Some(max) if max < 1) {
        return Err(AppError::bad_request("max_members must be at least 1"));
    }

    let leader_id = user.id;
    let ip_address = audit::client_ip(connect_info);
    let conn = &mut pool.get().await?;

    // club, its roles, the leader membership and the audit row commit together
    let response = conn
        .transaction::<_, AppError, _>(|conn| {
            Box::pin(async move {
                let club = diesel::insert_into(clubs::table)
                    .values(NewClub {
                        name: req.name,
                        description: req.description,
                        category: Some(req.category),
                        max_members: req.max_members,
                        leader_id: Some(leader_id),
                    })
                    .on_conflict(clubs::name)
                    .do_nothing()
                    .get_result::<Club>(conn)
                    .await
                    .optional()?
                    .ok_or_else(|| AppError::conflict("Club already exists"))?;

                let roles = diesel::insert_into(club_roles::table)
                    .values(default_roles(club.id))
                    .get_results::<ClubRole>(conn)
                    .await?;
                let leader_role = roles
                    .iter()
                    .find(|r| r.name == LEADER_ROLE)
                    .ok_or_else(|| anyhow::anyhow!("leader role missing after seeding"))?;

                diesel::insert_into(club_members::table)
                    .values(NewClubMember {
                        user_id: leader_id,
                        club_id: club.id,
                        role_id: leader_role.id,
                        status: MemberStatus::Active.as_str(),
                    })
                    .execute(conn)
                    .await?;

                let response = CreatedResponse::new("Club created successfully", club.id);
                audit::record_event(
                    conn,
                    AuditEvent {
                        actor_id: Some(leader_id),
                        action: "create",
                        entity_type: "club",
                        entity_id: Some(club.id),
                        details: audit::details(&response),
                        ip_address,
                    },
                )
                .await?;
                Ok(response)
            })
        })
        .await?;

    tracing::info!(club_id = response.id, leader_id, "created club");
    Ok(Json(response))
}

async fn list(
    Extension(pool): Extension<DbPool>,
    Query(query): Query<ListClubsQuery>,
) -> AppResult<Json<Vec<ClubResponse>>> {
    let conn = &mut pool.get().await?;

    let mut clubs_query = clubs::table
        .left_join(users::table)
        .filter(clubs::is_active.eq(query.is_active.unwrap_or(true)))
        .order(clubs::name)
        .into_boxed();
    if let Some(category) = query.category.filter(|c| !c.is_empty()) {
        clubs_query = clubs_query.filter(clubs::category.eq(category));
    }
    let clubs = clubs_query.load::<(Club, Option<User>)>(conn).await?;

    let counts = member_counts(conn, clubs.iter().map(|c| c.0.id).collect()).await?;

    Ok(Json(
        clubs
            .into_iter()
            .map(|(club, leader)| ClubResponse {
                member_count: counts.get(&club.id).copied().unwrap_or(0),
                id: club.id,
                name: club.name,
                description: club.description,
                category: club.category,
                max_members: club.max_members,
                leader: leader.map(|leader| LeaderResponse {
                    name: leader.display_name(),
                    id: leader.id,
                    email: leader.email,
                }),
            })
            .collect(),
    ))
}

async fn update(
    Extension(pool): Extension<DbPool>,
    Path(club_id): Path<i32>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    ExtractAuth(user): ExtractAuth,
    Json(changes): Json<ClubUpdate>,
) -> AppResult<Json<MessageResponse>> {
    auth::require_role(&user, STAFF)?;
    if changes.is_empty() {
        return Err(AppError::bad_request("No fields to update"));
    }
    if matches!(changes.max_members, Some(max) if max < 1) {
        return Err(AppError::bad_request("max_members must be at least 1"));
    }

    let actor_id = user.id;
    let ip_address = audit::client_ip(connect_info);
    let conn = &mut pool.get().await?;

    conn.transaction::<_, AppError, _>(|conn| {
        Box::pin(async move {
            let club = diesel::update(clubs::table.find(club_id))
                .set((&changes, clubs::updated_at.eq(diesel::dsl::now)))
                .get_result::<Club>(conn)
                .await
                .optional()
                .map_err(|e| match e {
                    DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _) => {
                        AppError::conflict("Club name already taken")
                    }
                    e => e.into(),
                })?
                .ok_or_else(|| AppError::not_found("Club not found"))?;

            audit::record_event(
                conn,
                AuditEvent {
                    actor_id: Some(actor_id),
                    action: "update",
                    entity_type: "club",
                    entity_id: Some(club.id),
                    details: audit::details(&serde_json::json!({
                        "name": club.name,
                        "category": club.category,
                        "max_members": club.max_members,
                        "is_active": club.is_active,
                    })),
                    ip_address,
                },
            )
            .await?;
            Ok(())
        })
    })
    .await?;

    tracing::info!(club_id, actor_id, "updated club");
    Ok(Json(MessageResponse::new("Club updated successfully")))
}

async fn add_member(
    Extension(pool): Extension<DbPool>,
    Path(club_id): Path<i32>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    ExtractAuth(user): ExtractAuth,
    Json(req): Json<AddMemberRequest>,
) -> AppResult<Json<MessageResponse>> {
    auth::require_role(&user, STAFF)?;

    let actor_id = user.id;
    let ip_address = audit::client_ip(connect_info);
    let conn = &mut pool.get().await?;

    let member_id = conn
        .transaction::<_, AppError, _>(|conn| {
            Box::pin(async move {
                let club = find_active_club(conn, club_id).await?;

                let member = users::table
                    .filter(users::email.eq(&req.email))
                    .first::<User>(conn)
                    .await
                    .optional()?
                    .ok_or_else(|| AppError::not_found("User not found"))?;

                let role = club_roles::table
                    .filter(club_roles::club_id.eq(club_id))
                    .filter(club_roles::name.eq(&req.role_name))
                    .first::<ClubRole>(conn)
                    .await
                    .optional()?
                    .ok_or_else(|| AppError::not_found("Role not found"))?;

                let already_member = diesel::select(diesel::dsl::exists(
                    club_members::table
                        .filter(club_members::club_id.eq(club_id))
                        .filter(club_members::user_id.eq(member.id)),
                ))
                .get_result::<bool>(conn)
                .await?;
                if already_member {
                    return Err(AppError::conflict(
                        "User is already a member of this club",
                    ));
                }

                let member_count = club_members::table
                    .filter(club_members::club_id.eq(club_id))
                    .count()
                    .get_result::<i64>(conn)
                    .await?;
                check_capacity(club.max_members, member_count)?;

                let membership = diesel::insert_into(club_members::table)
                    .values(NewClubMember {
                        user_id: member.id,
                        club_id,
                        role_id: role.id,
                        status: MemberStatus::Active.as_str(),
                    })
                    .get_result::<ClubMember>(conn)
                    .await?;

                audit::record_event(
                    conn,
                    AuditEvent {
                        actor_id: Some(actor_id),
                        action: "add_member",
                        entity_type: "club_member",
                        entity_id: Some(membership.id),
                        details: audit::details(&serde_json::json!({
                            "club_id": club_id,
                            "user_id": member.id,
                            "role": role.name,
                        })),
                        ip_address,
                    },
                )
                .await?;
                Ok(membership.id)
            })
        })
        .await?;

    tracing::info!(club_id, member_id, actor_id, "added club member");
    Ok(Json(MessageResponse::new("Member added successfully")))
}

async fn list_members(
    Extension(pool): Extension<DbPool>,
    Path(club_id): Path<i32>,
    ExtractAuth(_user): ExtractAuth,
) -> AppResult<Json<Vec<MemberResponse>>> {
    let conn = &mut pool.get().await?;
    find_club(conn, club_id).await?;

    let members = club_members::table
        .inner_join(users::table)
        .inner_join(club_roles::table)
        .filter(club_members::club_id.eq(club_id))
        .select((club_members::all_columns, users::email, club_roles::all_columns))
        .order(club_members::joined_at)
        .load::<(ClubMember, String, ClubRole)>(conn)
        .await?;

    Ok(Json(
        members
            .into_iter()
            .map(|(member, email, role)| MemberResponse {
                user_id: member.user_id,
                email,
                permissions: role.permissions().into_iter().map(String::from).collect(),
                role: role.name,
                status: member.status,
                joined_at: member.joined_at,
            })
            .collect(),
    ))
}

async fn update_member_status(
    Extension(pool): Extension<DbPool>,
    Path((club_id, user_id)): Path<(i32, i32)>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    ExtractAuth(user): ExtractAuth,
    Json(req): Json<MemberStatusRequest>,
) -> AppResult<Json<MessageResponse>> {
    auth::require_role(&user, STAFF)?;

    let status = req.status;
    let actor_id = user.id;
    let ip_address = audit::client_ip(connect_info);
    let conn = &mut pool.get().await?;

    conn.transaction::<_, AppError, _>(|conn| {
        Box::pin(async move {
            let membership = diesel::update(
                club_members::table
                    .filter(club_members::club_id.eq(club_id))
                    .filter(club_members::user_id.eq(user_id)),
            )
            .set(club_members::status.eq(status.as_str()))
            .get_result::<ClubMember>(conn)
            .await
            .optional()?
            .ok_or_else(|| AppError::not_found("Membership not found"))?;

            audit::record_event(
                conn,
                AuditEvent {
                    actor_id: Some(actor_id),
                    action: "update_status",
                    entity_type: "club_member",
                    entity_id: Some(membership.id),
                    details: audit::details(&serde_json::json!({
                        "club_id": club_id,
                        "user_id": user_id,
                        "status": membership.status,
                    })),
                    ip_address,
                },
            )
            .await?;
            Ok(())
        })
    })
    .await?;

    tracing::info!(club_id, user_id, status = status.as_str(), "updated membership status");
    Ok(Json(MessageResponse::new("Membership updated successfully")))
}

async fn add_budget_entry(
    Extension(pool): Extension<DbPool>,
    Path(club_id): Path<i32>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    ExtractAuth(user): ExtractAuth,
    Json(req): Json<BudgetEntryRequest>,
) -> AppResult<Json<MessageResponse>> {
    auth::require_role(&user, STAFF)?;

    let created_by_id = user.id;
    let ip_address = audit::client_ip(connect_info);
    let conn = &mut pool.get().await?;

    conn.transaction::<_, AppError, _>(|conn| {
        Box::pin(async move {
            find_active_club(conn, club_id).await?;

            let entry = diesel::insert_into(club_budgets::table)
                .values(NewBudgetEntry {
                    club_id,
                    amount: req.amount,
                    description: Some(req.description),
                    entry_type: req.entry_type.as_str(),
                    category: req.category,
                    created_by_id,
                })
                .get_result::<ClubBudget>(conn)
                .await?;

            audit::record_event(
                conn,
                AuditEvent {
                    actor_id: Some(created_by_id),
                    action: "add_budget_entry",
                    entity_type: "club_budget",
                    entity_id: Some(entry.id),
                    details: audit::details(&entry),
                    ip_address,
                },
            )
            .await?;
            Ok(())
        })
    })
    .await?;

    tracing::info!(club_id, created_by_id, "added budget entry");
    Ok(Json(MessageResponse::new("Budget entry added successfully")))
}

async fn list_budget(
    Extension(pool): Extension<DbPool>,
    Path(club_id): Path<i32>,
    ExtractAuth(user): ExtractAuth,
) -> AppResult<Json<BudgetResponse>> {
    auth::require_role(&user, STAFF)?;

    let conn = &mut pool.get().await?;
    find_club(conn, club_id).await?;

    let entries = club_budgets::table
        .filter(club_budgets::club_id.eq(club_id))
        .order((club_budgets::date.desc(), club_budgets::id.desc()))
        .load::<ClubBudget>(conn)
        .await?;

    Ok(Json(BudgetResponse {
        totals: summarize(&entries),
        entries,
    }))
}

pub fn app() -> Router {
    Router::new()
        .route("/clubs", get(list).post(create))
        .route("/clubs/", get(list).post(create))
        .route("/clubs/:club_id", patch(update))
        .route("/clubs/:club_id/members", get(list_members).post(add_member))
        .route("/clubs/:club_id/members/:user_id", patch(update_member_status))
        .route("/clubs/:club_id/budget", get(list_budget).post(add_budget_entry))
}

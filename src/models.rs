use crate::schema::*;
use chrono::NaiveDateTime;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// School-wide role of a user, stored as lowercase text in `users.role`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Student,
    Teacher,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Student => "student",
            Role::Teacher => "teacher",
            Role::Admin => "admin",
        }
    }
}

impl Default for Role {
    fn default() -> Self {
        Role::Student
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "student" => Ok(Role::Student),
            "teacher" => Ok(Role::Teacher),
            "admin" => Ok(Role::Admin),
            other => Err(format!("unknown role `{other}`")),
        }
    }
}

/// Staff roles allowed to manage clubs, activities and other users' signups.
pub const STAFF: &[Role] = &[Role::Admin, Role::Teacher];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberStatus {
    Active,
    Inactive,
    Pending,
}

impl MemberStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemberStatus::Active => "active",
            MemberStatus::Inactive => "inactive",
            MemberStatus::Pending => "pending",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BudgetType {
    Income,
    Expense,
}

impl BudgetType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BudgetType::Income => "income",
            BudgetType::Expense => "expense",
        }
    }
}

#[derive(Debug, Clone, Queryable, Identifiable)]
pub struct User {
    pub id: i32,
    pub email: String,
    pub role: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
    pub hashed_password: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub is_active: bool,
}

impl User {
    pub fn role(&self) -> Option<Role> {
        self.role.parse().ok()
    }

    pub fn display_name(&self) -> String {
        use itertools::Itertools;

        [&self.first_name, &self.last_name]
            .into_iter()
            .flatten()
            .join(" ")
    }

    #[cfg(test)]
    pub(crate) fn fixture(id: i32, role: Role) -> User {
        let epoch = NaiveDateTime::default();
        User {
            id,
            email: format!("user{id}@mergington.edu"),
            role: role.to_string(),
            created_at: epoch,
            updated_at: epoch,
            hashed_password: None,
            first_name: None,
            last_name: None,
            is_active: true,
        }
    }
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(belongs_to(Club))]
#[diesel(table_name = activities)]
pub struct Activity {
    pub id: i32,
    pub name: String,
    pub description: String,
    pub schedule: String,
    pub max_participants: i32,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
    pub club_id: Option<i32>,
}

#[derive(Debug, Clone, Queryable, Associations, Insertable)]
#[diesel(belongs_to(Activity))]
#[diesel(belongs_to(User))]
#[diesel(table_name = activity_participants)]
pub struct ActivityParticipant {
    pub activity_id: i32,
    pub user_id: i32,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
pub struct Club {
    pub id: i32,
    pub name: String,
    pub description: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
    pub leader_id: Option<i32>,
    pub category: Option<String>,
    pub max_members: Option<i32>,
    pub is_active: bool,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(belongs_to(Club))]
pub struct ClubRole {
    pub id: i32,
    pub name: String,
    pub description: Option<String>,
    pub permissions: Option<String>,
    pub created_at: NaiveDateTime,
    pub club_id: i32,
}

impl ClubRole {
    /// Permissions are stored comma separated, e.g. `view,participate`.
    pub fn permissions(&self) -> Vec<&str> {
        self.permissions
            .as_deref()
            .map(|p| p.split(',').map(str::trim).filter(|p| !p.is_empty()).collect())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(belongs_to(Club))]
#[diesel(belongs_to(User))]
#[diesel(belongs_to(ClubRole, foreign_key = role_id))]
pub struct ClubMember {
    pub id: i32,
    pub user_id: i32,
    pub club_id: i32,
    pub role_id: i32,
    pub joined_at: NaiveDateTime,
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Queryable, Identifiable, Associations)]
#[diesel(belongs_to(Club))]
pub struct ClubBudget {
    pub id: i32,
    pub club_id: i32,
    pub amount: f64,
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub entry_type: String,
    pub category: String,
    pub date: NaiveDateTime,
    pub created_by_id: i32,
}

#[derive(Debug, Clone, Serialize, Queryable, Identifiable)]
pub struct AuditLog {
    pub id: i32,
    pub timestamp: NaiveDateTime,
    pub actor_id: Option<i32>,
    pub action: String,
    pub entity_type: String,
    pub entity_id: Option<i32>,
    pub details: Option<String>,
    pub ip_address: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roles_round_trip_through_their_column_text() {
        for role in [Role::Student, Role::Teacher, Role::Admin] {
            assert_eq!(role.as_str().parse::<Role>(), Ok(role));
        }
        assert!("principal".parse::<Role>().is_err());
        assert_eq!(Role::default(), Role::Student);
    }

    #[test]
    fn club_role_permissions_are_split_on_commas() {
        let role = ClubRole {
            id: 1,
            name: "Member".into(),
            description: None,
            permissions: Some("view, participate,".into()),
            created_at: NaiveDateTime::default(),
            club_id: 1,
        };
        assert_eq!(role.permissions(), vec!["view", "participate"]);

        let empty = ClubRole {
            permissions: None,
            ..role
        };
        assert!(empty.permissions().is_empty());
    }

    #[test]
    fn display_name_skips_missing_parts() {
        let mut user = User::fixture(1, Role::Teacher);
        assert_eq!(user.display_name(), "");

        user.first_name = Some("Ada".into());
        assert_eq!(user.display_name(), "Ada");

        user.last_name = Some("Lovelace".into());
        assert_eq!(user.display_name(), "Ada Lovelace");
    }
}

//! Append-only audit trail.
//!
//! Handlers call [`record_event`] right after the action it describes, on the
//! same connection and inside the same transaction, so a failed audit write
//! rolls the action back with it.

use crate::{models::AuditLog, schema::audit_logs};
use axum::extract::ConnectInfo;
use diesel::prelude::*;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use std::net::SocketAddr;

const MAX_DETAILS_LEN: usize = 1000;

pub struct AuditEvent<'a> {
    pub actor_id: Option<i32>,
    pub action: &'a str,
    pub entity_type: &'a str,
    pub entity_id: Option<i32>,
    pub details: Option<String>,
    pub ip_address: Option<String>,
}

#[derive(Insertable)]
#[diesel(table_name = audit_logs)]
struct NewAuditLog<'a> {
    actor_id: Option<i32>,
    action: &'a str,
    entity_type: &'a str,
    entity_id: Option<i32>,
    details: Option<String>,
    ip_address: Option<String>,
}

pub async fn record_event(
    conn: &mut AsyncPgConnection,
    event: AuditEvent<'_>,
) -> QueryResult<AuditLog> {
    let entry = diesel::insert_into(audit_logs::table)
        .values(NewAuditLog {
            actor_id: event.actor_id,
            action: event.action,
            entity_type: event.entity_type,
            entity_id: event.entity_id,
            details: event.details.map(truncate_details),
            ip_address: event.ip_address,
        })
        .get_result::<AuditLog>(conn)
        .await?;

    tracing::debug!(
        audit_id = entry.id,
        action = %entry.action,
        entity_type = %entry.entity_type,
        entity_id = ?entry.entity_id,
        "audit event recorded"
    );
    Ok(entry)
}

/// Serializes a response or request summary for the `details` column.
pub fn details<T: serde::Serialize>(value: &T) -> Option<String> {
    serde_json::to_string(value).ok()
}

pub fn client_ip(info: Option<ConnectInfo<SocketAddr>>) -> Option<String> {
    info.map(|ConnectInfo(addr)| addr.ip().to_string())
}

fn truncate_details(details: String) -> String {
    if details.len() <= MAX_DETAILS_LEN {
        return details;
    }
    let mut end = MAX_DETAILS_LEN;
    while !details.is_char_boundary(end) {
        end -= 1;
    }
    details[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    #[test]
    fn long_details_are_cut_on_a_char_boundary() {
        let short = "x".repeat(10);
        assert_eq!(truncate_details(short.clone()), short);

        let long = "é".repeat(600);
        let cut = truncate_details(long);
        assert!(cut.len() <= MAX_DETAILS_LEN);
        assert!(cut.chars().all(|c| c == 'é'));
    }

    #[test]
    fn client_ip_drops_the_port() {
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 7)), 51234);
        assert_eq!(client_ip(Some(ConnectInfo(addr))).as_deref(), Some("10.0.0.7"));
        assert_eq!(client_ip(None), None);
    }

    #[test]
    fn details_are_json() {
        let details = details(&serde_json::json!({ "message": "Club created successfully", "id": 4 }));
        assert_eq!(
            details.as_deref(),
            Some(r#"{"id":4,"message":"Club created successfully"}"#)
        );
    }
}

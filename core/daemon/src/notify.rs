//! Notification emitter.
//!
//! Emitters write through the caller's connection so a notification commits
//! or rolls back together with the state change that caused it. Delivery is
//! somebody else's job; the daemon only creates and lists rows.

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde_json::Value;
use zara_shiftd_protocol::{GetNotificationsParams, NotificationPriority, UserRole};

use crate::db;
use crate::error::Result;
use crate::model::{format_timestamp, new_id, Notification};
use crate::state::SharedState;

pub const MACHINE_STATUS_CHANGE: &str = "MACHINE_STATUS_CHANGE";
pub const SHIFT_ROLLOVER: &str = "SHIFT_ROLLOVER";
pub const STUCK_OPERATION_CANCELLED: &str = "STUCK_OPERATION_CANCELLED";

#[derive(Debug, Clone)]
pub struct NotificationDraft {
    pub notification_type: &'static str,
    pub title: String,
    pub message: String,
    pub priority: NotificationPriority,
    pub metadata: Value,
}

pub fn emit(
    conn: &Connection,
    user_id: &str,
    draft: &NotificationDraft,
    now: DateTime<Utc>,
) -> Result<Notification> {
    let notification = Notification {
        id: new_id(),
        user_id: user_id.to_string(),
        notification_type: draft.notification_type.to_string(),
        title: draft.title.clone(),
        message: draft.message.clone(),
        priority: draft.priority,
        read: false,
        metadata: draft.metadata.clone(),
        created_at: format_timestamp(now),
    };
    db::insert_notification(conn, &notification)?;
    Ok(notification)
}

/// One notification per active user holding any of `roles`.
pub fn emit_to_roles(
    conn: &Connection,
    roles: &[UserRole],
    draft: &NotificationDraft,
    now: DateTime<Utc>,
) -> Result<Vec<Notification>> {
    let recipients = db::list_active_users_with_roles(conn, roles)?;
    if recipients.is_empty() {
        tracing::debug!(
            notification_type = draft.notification_type,
            "No recipients for notification"
        );
        return Ok(Vec::new());
    }

    let mut sent = Vec::with_capacity(recipients.len());
    for user in &recipients {
        sent.push(emit(conn, &user.id, draft, now)?);
    }
    tracing::debug!(
        notification_type = draft.notification_type,
        recipients = sent.len(),
        "Notification emitted"
    );
    Ok(sent)
}

impl SharedState {
    pub fn notifications(&self, params: &GetNotificationsParams) -> Result<Vec<Notification>> {
        self.db().with_connection(|conn| {
            db::list_notifications(
                conn,
                &params.user_id,
                params.unread_only,
                params.effective_limit(),
            )
        })
    }

    /// Broadcasts to the configured notify roles.
    pub(crate) fn notify_roles(
        &self,
        conn: &Connection,
        draft: &NotificationDraft,
        now: DateTime<Utc>,
    ) -> Result<Vec<Notification>> {
        emit_to_roles(conn, &self.config().notifications.roles, draft, now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{insert_user, Db};
    use crate::model::User;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 10, 6, 0, 0).unwrap()
    }

    fn user(name: &str, role: UserRole) -> User {
        User {
            id: new_id(),
            name: name.to_string(),
            email: None,
            role,
            is_active: true,
            created_at: format_timestamp(now()),
        }
    }

    fn draft() -> NotificationDraft {
        NotificationDraft {
            notification_type: SHIFT_ROLLOVER,
            title: "Shift rolled over".to_string(),
            message: "INJ-01 closed MORNING".to_string(),
            priority: NotificationPriority::Low,
            metadata: serde_json::json!({ "machine_code": "INJ-01" }),
        }
    }

    #[test]
    fn emits_one_row_per_recipient() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let db = Db::new(temp_dir.path().join("state.db")).expect("db");
        let admin = user("Admin", UserRole::Admin);
        let manager = user("Gerente", UserRole::Manager);
        let operator = user("Ana", UserRole::Operator);

        let sent = db
            .with_transaction(|tx| {
                for u in [&admin, &manager, &operator] {
                    insert_user(tx, u)?;
                }
                emit_to_roles(tx, &[UserRole::Admin, UserRole::Manager], &draft(), now())
            })
            .expect("emit");
        assert_eq!(sent.len(), 2);
        assert!(sent.iter().all(|n| !n.read));

        let inbox = db
            .with_connection(|conn| db::list_notifications(conn, &manager.id, true, 10))
            .expect("inbox");
        assert_eq!(inbox.len(), 1);
        assert_eq!(inbox[0].notification_type, SHIFT_ROLLOVER);
        assert_eq!(inbox[0].metadata["machine_code"], "INJ-01");

        let operator_inbox = db
            .with_connection(|conn| db::list_notifications(conn, &operator.id, false, 10))
            .expect("inbox");
        assert!(operator_inbox.is_empty());
    }

    #[test]
    fn no_recipients_is_not_an_error() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let db = Db::new(temp_dir.path().join("state.db")).expect("db");
        let sent = db
            .with_transaction(|tx| emit_to_roles(tx, &[UserRole::Admin], &draft(), now()))
            .expect("emit");
        assert!(sent.is_empty());
    }
}

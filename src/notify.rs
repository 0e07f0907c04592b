//! Notification Sink
//!
//! Append-only per-user notification lists, written as a side effect of
//! lifecycle transitions. Records are individually marked read; there are
//! no batch operations and no expiry.

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::auth::authenticate;
use crate::error::ApiError;
use crate::store::User;
use crate::AppState;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: u64,
    pub message: String,
    pub read: bool,
    pub timestamp: DateTime<Utc>,
}

/// Append a notification to a user's list. Ids are monotonic per user.
pub fn push(user: &mut User, message: impl Into<String>) {
    let next_id = user
        .notifications
        .iter()
        .map(|n| n.id)
        .max()
        .unwrap_or(0)
        + 1;
    user.notifications.push(Notification {
        id: next_id,
        message: message.into(),
        read: false,
        timestamp: Utc::now(),
    });
}

/// Flip one record's read flag. Fails `NotFound` if absent.
pub fn mark_read(user: &mut User, notification_id: u64) -> Result<(), ApiError> {
    match user
        .notifications
        .iter_mut()
        .find(|n| n.id == notification_id)
    {
        Some(notification) => {
            notification.read = true;
            Ok(())
        }
        None => Err(ApiError::NotFound("Notification not found".into())),
    }
}

/// GET /api/user/notifications
pub async fn list_notifications(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let actor = authenticate(&state, &headers).await?;

    let data = state.store.data.read().await;
    let user = data
        .find_user(actor.id)
        .ok_or_else(|| ApiError::NotFound("User not found".into()))?;
    Ok(Json(user.notifications.clone()))
}

/// POST /api/user/notifications/:id/read
pub async fn read_notification(
    State(state): State<AppState>,
    Path(notification_id): Path<u64>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let actor = authenticate(&state, &headers).await?;

    {
        let mut data = state.store.data.write().await;
        let user = data
            .find_user_mut(actor.id)
            .ok_or_else(|| ApiError::NotFound("User not found".into()))?;
        mark_read(user, notification_id)?;
    }
    state.store.persist().await?;

    Ok(Json(serde_json::json!({ "success": true })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::User;

    fn test_user() -> User {
        User {
            id: 1,
            name: "Jean".into(),
            email: "jean@example.com".into(),
            password: "hash".into(),
            balance: 0,
            bio: String::new(),
            avatar: "/avatars/default.png".into(),
            phone: String::new(),
            notifications: Vec::new(),
        }
    }

    #[test]
    fn test_push_appends_with_monotonic_ids() {
        let mut user = test_user();
        push(&mut user, "first");
        push(&mut user, "second");

        assert_eq!(user.notifications.len(), 2);
        assert_eq!(user.notifications[0].id, 1);
        assert_eq!(user.notifications[1].id, 2);
        assert!(!user.notifications[0].read);
        assert_eq!(user.notifications[0].message, "first");
    }

    #[test]
    fn test_mark_read_flips_one_record() {
        let mut user = test_user();
        push(&mut user, "a");
        push(&mut user, "b");

        mark_read(&mut user, 1).unwrap();
        assert!(user.notifications[0].read);
        assert!(!user.notifications[1].read);
    }

    #[test]
    fn test_mark_read_missing_is_not_found() {
        let mut user = test_user();
        push(&mut user, "a");
        let err = mark_read(&mut user, 99).unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
    }
}

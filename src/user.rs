//! User Profiles & Reviews
//!
//! Profile updates (multipart avatar), public profile lookups with the
//! aggregated rating, and the review exchange between a quest's creator and
//! its completer.

use axum::extract::{Multipart, Path, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::auth::{authenticate, UserInfo};
use crate::error::ApiError;
use crate::notify;
use crate::store::{StoreData, User};
use crate::AppState;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Review {
    pub id: u64,
    #[serde(rename = "questId")]
    pub quest_id: u64,
    #[serde(rename = "questTitle")]
    pub quest_title: String,
    #[serde(rename = "fromUserId")]
    pub from_user_id: u64,
    #[serde(rename = "fromUserName")]
    pub from_user_name: String,
    #[serde(rename = "targetUserId")]
    pub target_user_id: u64,
    /// 1..=5 stars
    pub rating: u8,
    #[serde(default)]
    pub comment: String,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
}

/// Average received rating, one decimal.
pub fn avg_rating(reviews: &[Review], target_user_id: u64) -> (f64, usize) {
    let received: Vec<_> = reviews
        .iter()
        .filter(|r| r.target_user_id == target_user_id)
        .collect();
    if received.is_empty() {
        return (0.0, 0);
    }
    let sum: u32 = received.iter().map(|r| r.rating as u32).sum();
    let avg = sum as f64 / received.len() as f64;
    ((avg * 10.0).round() / 10.0, received.len())
}

#[derive(Deserialize)]
pub struct ReviewRequest {
    #[serde(rename = "questId")]
    pub quest_id: u64,
    #[serde(rename = "targetUserId")]
    pub target_user_id: u64,
    pub rating: u8,
    #[serde(default)]
    pub comment: String,
}

/// Apply one review against the store. Only the creator and the completer of
/// a completed quest may review, each exactly once, and only each other.
pub fn record_review(
    data: &mut StoreData,
    actor: &User,
    req: &ReviewRequest,
) -> Result<Review, ApiError> {
    if !(1..=5).contains(&req.rating) {
        return Err(ApiError::Validation("Rating must be between 1 and 5".into()));
    }

    let quest = data
        .find_quest(req.quest_id)
        .ok_or_else(|| ApiError::NotFound("Quest not found".into()))?;
    if quest.completed_by.is_none() {
        return Err(ApiError::Conflict("Quest is not completed".into()));
    }
    let completed_by = quest.completed_by.expect("checked above");
    let (quest_title, creator_id) = (quest.title.clone(), quest.creator_id);

    // Which side of the exchange is the actor on?
    let is_creator = actor.id == creator_id;
    let is_completer = actor.id == completed_by;
    if !is_creator && !is_completer {
        return Err(ApiError::Forbidden("Not a party to this quest".into()));
    }
    let expected_target = if is_creator { completed_by } else { creator_id };
    if req.target_user_id != expected_target {
        return Err(ApiError::Validation("Unexpected review target".into()));
    }

    let quest = data.find_quest_mut(req.quest_id).expect("checked above");
    let flag = if is_creator {
        &mut quest.reviews.creator_reviewed
    } else {
        &mut quest.reviews.completer_reviewed
    };
    if *flag {
        return Err(ApiError::Conflict("Already reviewed".into()));
    }
    *flag = true;

    let review = Review {
        id: data.next_review_id(),
        quest_id: req.quest_id,
        quest_title,
        from_user_id: actor.id,
        from_user_name: actor.name.clone(),
        target_user_id: req.target_user_id,
        rating: req.rating,
        comment: req.comment.clone(),
        created_at: Utc::now(),
    };
    data.reviews.push(review.clone());

    if let Some(target) = data.find_user_mut(req.target_user_id) {
        notify::push(
            target,
            format!(
                "{} vous a laissé un avis ({}★) pour « {} »",
                review.from_user_name, review.rating, review.quest_title
            ),
        );
    }
    Ok(review)
}

/// Parsed fields of a profile-update form
#[derive(Debug, Default)]
pub struct ProfileUpdate {
    pub name: Option<String>,
    pub bio: Option<String>,
    pub phone: Option<String>,
    pub avatar: Option<String>,
}

/// Apply a profile update. Renames honor the same name-uniqueness rule as
/// signup; renaming to your own current name is a no-op, not a collision.
pub fn apply_profile_update(
    data: &mut StoreData,
    actor_id: u64,
    update: ProfileUpdate,
) -> Result<UserInfo, ApiError> {
    if let Some(name) = update.name.as_deref().filter(|n| !n.is_empty()) {
        if data.users.iter().any(|u| u.id != actor_id && u.name == name) {
            return Err(ApiError::Conflict(
                "Ce nom d'utilisateur est déjà pris".into(),
            ));
        }
    }

    let user = data
        .find_user_mut(actor_id)
        .ok_or_else(|| ApiError::NotFound("User not found".into()))?;
    if let Some(name) = update.name.filter(|n| !n.is_empty()) {
        user.name = name;
    }
    if let Some(bio) = update.bio {
        user.bio = bio;
    }
    if let Some(phone) = update.phone {
        user.phone = phone;
    }
    if let Some(avatar) = update.avatar {
        user.avatar = avatar;
    }
    Ok(UserInfo::from_user(user))
}

// ============================================================================
// HTTP Handlers
// ============================================================================

#[derive(Serialize)]
struct PublicProfile {
    id: u64,
    name: String,
    bio: String,
    avatar: String,
    #[serde(rename = "avgRating")]
    avg_rating: f64,
    #[serde(rename = "reviewCount")]
    review_count: usize,
    reviews: Vec<Review>,
}

/// GET /api/users/:id
pub async fn get_user_profile(
    State(state): State<AppState>,
    Path(user_id): Path<u64>,
) -> Result<impl IntoResponse, ApiError> {
    let data = state.store.data.read().await;
    let user = data
        .find_user(user_id)
        .ok_or_else(|| ApiError::NotFound("User not found".into()))?;

    let (rating, count) = avg_rating(&data.reviews, user_id);
    let reviews = data
        .reviews
        .iter()
        .filter(|r| r.target_user_id == user_id)
        .cloned()
        .collect();
    Ok(Json(PublicProfile {
        id: user.id,
        name: user.name.clone(),
        bio: user.bio.clone(),
        avatar: user.avatar.clone(),
        avg_rating: rating,
        review_count: count,
        reviews,
    }))
}

/// POST /api/reviews
pub async fn post_review(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<ReviewRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let actor = authenticate(&state, &headers).await?;

    let review = {
        let mut data = state.store.data.write().await;
        record_review(&mut data, &actor, &req)?
    };
    state.store.persist().await?;
    Ok(Json(review))
}

/// POST /api/user/profile (multipart, optional avatar)
pub async fn update_profile(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    let actor = authenticate(&state, &headers).await?;

    let mut update = ProfileUpdate::default();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::Validation(format!("Invalid multipart body: {}", e)))?
    {
        let Some(field_name) = field.name().map(str::to_string) else {
            continue;
        };
        if field_name == "avatar" {
            let original = field.file_name().unwrap_or("avatar").to_string();
            let bytes = field
                .bytes()
                .await
                .map_err(|e| ApiError::Validation(format!("Invalid upload: {}", e)))?;
            if !bytes.is_empty() {
                update.avatar = Some(state.uploads.store(&original, &bytes).await?);
            }
            continue;
        }

        let value = field
            .text()
            .await
            .map_err(|e| ApiError::Validation(format!("Invalid field '{}': {}", field_name, e)))?;
        match field_name.as_str() {
            "name" => update.name = Some(value),
            "bio" => update.bio = Some(value),
            "phone" => update.phone = Some(value),
            _ => {}
        }
    }

    let updated = {
        let mut data = state.store.data.write().await;
        apply_profile_update(&mut data, actor.id, update)?
    };
    state.store.persist().await?;

    Ok(Json(updated))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quest::model::{Quest, QuestStatus, ReviewFlags};

    fn test_user(id: u64, name: &str) -> User {
        User {
            id,
            name: name.into(),
            email: format!("{}@example.com", name.to_lowercase()),
            password: "hash".into(),
            balance: 0,
            bio: String::new(),
            avatar: String::new(),
            phone: String::new(),
            notifications: Vec::new(),
        }
    }

    fn completed_quest(id: u64, creator_id: u64, completed_by: u64) -> Quest {
        Quest {
            id,
            title: "Quête".into(),
            description: "d".into(),
            category: "aide".into(),
            reward: 100,
            duration: String::new(),
            location: String::new(),
            creator: "c".into(),
            creator_id,
            creator_phone: None,
            image: None,
            slots: 1,
            accepted: Vec::new(),
            status: QuestStatus::Completed,
            completion_key: None,
            completed_by: Some(completed_by),
            reviews: ReviewFlags::default(),
            created_at: Utc::now(),
        }
    }

    fn setup() -> (StoreData, User, User) {
        let creator = test_user(1, "Ama");
        let completer = test_user(2, "Bob");
        let mut data = StoreData::default();
        data.users.push(creator.clone());
        data.users.push(completer.clone());
        data.quests.push(completed_quest(1, creator.id, completer.id));
        (data, creator, completer)
    }

    #[test]
    fn test_both_parties_review_once_each() {
        let (mut data, creator, completer) = setup();

        let review = record_review(
            &mut data,
            &creator,
            &ReviewRequest {
                quest_id: 1,
                target_user_id: completer.id,
                rating: 5,
                comment: "Parfait".into(),
            },
        )
        .unwrap();
        assert_eq!(review.id, 1);
        assert!(data.find_quest(1).unwrap().reviews.creator_reviewed);

        // Second creator review is rejected
        let err = record_review(
            &mut data,
            &creator,
            &ReviewRequest {
                quest_id: 1,
                target_user_id: completer.id,
                rating: 4,
                comment: String::new(),
            },
        )
        .unwrap_err();
        assert!(matches!(err, ApiError::Conflict(_)));

        // Completer reviews the creator back
        record_review(
            &mut data,
            &completer,
            &ReviewRequest {
                quest_id: 1,
                target_user_id: creator.id,
                rating: 3,
                comment: String::new(),
            },
        )
        .unwrap();
        assert!(data.find_quest(1).unwrap().reviews.completer_reviewed);
        assert_eq!(data.reviews.len(), 2);
    }

    #[test]
    fn test_outsider_cannot_review() {
        let (mut data, _creator, completer) = setup();
        let outsider = test_user(9, "Zed");
        data.users.push(outsider.clone());

        let err = record_review(
            &mut data,
            &outsider,
            &ReviewRequest {
                quest_id: 1,
                target_user_id: completer.id,
                rating: 5,
                comment: String::new(),
            },
        )
        .unwrap_err();
        assert!(matches!(err, ApiError::Forbidden(_)));
    }

    #[test]
    fn test_review_requires_completed_quest_and_valid_rating() {
        let (mut data, creator, completer) = setup();
        data.find_quest_mut(1).unwrap().completed_by = None;

        let err = record_review(
            &mut data,
            &creator,
            &ReviewRequest {
                quest_id: 1,
                target_user_id: completer.id,
                rating: 5,
                comment: String::new(),
            },
        )
        .unwrap_err();
        assert!(matches!(err, ApiError::Conflict(_)));

        let err = record_review(
            &mut data,
            &creator,
            &ReviewRequest {
                quest_id: 1,
                target_user_id: completer.id,
                rating: 6,
                comment: String::new(),
            },
        )
        .unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));
    }

    #[test]
    fn test_rename_rejects_taken_name() {
        let (mut data, _creator, completer) = setup();

        let err = apply_profile_update(
            &mut data,
            completer.id,
            ProfileUpdate {
                name: Some("Ama".into()),
                ..ProfileUpdate::default()
            },
        )
        .unwrap_err();
        assert!(matches!(err, ApiError::Conflict(_)));
        assert_eq!(data.find_user(completer.id).unwrap().name, "Bob");
    }

    #[test]
    fn test_rename_to_own_name_and_partial_update() {
        let (mut data, creator, _completer) = setup();

        // Re-submitting your current name is not a collision
        let info = apply_profile_update(
            &mut data,
            creator.id,
            ProfileUpdate {
                name: Some("Ama".into()),
                bio: Some("Disponible le week-end".into()),
                ..ProfileUpdate::default()
            },
        )
        .unwrap();
        assert_eq!(info.name, "Ama");
        assert_eq!(info.bio, "Disponible le week-end");

        // Omitted fields stay untouched, empty names are ignored
        let info = apply_profile_update(
            &mut data,
            creator.id,
            ProfileUpdate {
                name: Some(String::new()),
                ..ProfileUpdate::default()
            },
        )
        .unwrap();
        assert_eq!(info.name, "Ama");
        assert_eq!(info.bio, "Disponible le week-end");
    }

    #[test]
    fn test_avg_rating_aggregation() {
        let (mut data, creator, completer) = setup();
        data.quests.push(completed_quest(2, creator.id, completer.id));

        record_review(
            &mut data,
            &creator,
            &ReviewRequest {
                quest_id: 1,
                target_user_id: completer.id,
                rating: 5,
                comment: String::new(),
            },
        )
        .unwrap();
        record_review(
            &mut data,
            &creator,
            &ReviewRequest {
                quest_id: 2,
                target_user_id: completer.id,
                rating: 4,
                comment: String::new(),
            },
        )
        .unwrap();

        let (avg, count) = avg_rating(&data.reviews, completer.id);
        assert_eq!(avg, 4.5);
        assert_eq!(count, 2);

        let (avg, count) = avg_rating(&data.reviews, creator.id);
        assert_eq!(avg, 0.0);
        assert_eq!(count, 0);
    }
}

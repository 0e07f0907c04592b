//! Quest HTTP Surface
//!
//! Maps the REST endpoints onto lifecycle engine calls. Handlers only
//! authenticate, parse, and serialize; every state decision lives in the
//! engine.

use axum::extract::{Multipart, Path, Query, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;

use crate::auth::authenticate;
use crate::error::ApiError;
use crate::quest::model::QuestInput;
use crate::AppState;

#[derive(Deserialize)]
pub struct ListParams {
    category: Option<String>,
    q: Option<String>,
}

/// GET /api/quests?category=&q=
pub async fn list_quests(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> impl IntoResponse {
    let data = state.store.data.read().await;
    let needle = params.q.as_deref().map(str::to_lowercase);

    let list: Vec<_> = data
        .quests
        .iter()
        .filter(|quest| match params.category.as_deref() {
            Some(cat) if !cat.is_empty() => quest.category == cat,
            _ => true,
        })
        .filter(|quest| match &needle {
            Some(needle) if !needle.is_empty() => {
                quest.title.to_lowercase().contains(needle)
                    || quest.description.to_lowercase().contains(needle)
            }
            _ => true,
        })
        .cloned()
        .collect();
    Json(list)
}

/// GET /api/quests/:id
pub async fn get_quest(
    State(state): State<AppState>,
    Path(quest_id): Path<u64>,
) -> Result<impl IntoResponse, ApiError> {
    let data = state.store.data.read().await;
    let quest = data
        .find_quest(quest_id)
        .ok_or_else(|| ApiError::NotFound("Not found".into()))?;
    Ok(Json(quest.clone()))
}

/// POST /api/quests (multipart, optional image)
pub async fn create_quest(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    let actor = authenticate(&state, &headers).await?;

    let mut input = QuestInput {
        slots: 1,
        ..QuestInput::default()
    };
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::Validation(format!("Invalid multipart body: {}", e)))?
    {
        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };
        if name == "image" {
            let original = field.file_name().unwrap_or("upload").to_string();
            let bytes = field
                .bytes()
                .await
                .map_err(|e| ApiError::Validation(format!("Invalid upload: {}", e)))?;
            if !bytes.is_empty() {
                input.image = Some(state.uploads.store(&original, &bytes).await?);
            }
            continue;
        }

        let value = field
            .text()
            .await
            .map_err(|e| ApiError::Validation(format!("Invalid field '{}': {}", name, e)))?;
        match name.as_str() {
            "title" => input.title = value,
            "description" => input.description = value,
            "category" => input.category = value,
            "reward" => input.reward = value.parse().unwrap_or(0),
            "duration" => input.duration = value,
            "location" => input.location = value,
            "creatorPhone" => {
                if !value.is_empty() {
                    input.creator_phone = Some(value);
                }
            }
            "slots" => input.slots = value.parse().unwrap_or(1),
            _ => {}
        }
    }

    let quest = state.engine.create(&actor, input).await?;
    Ok(Json(quest))
}

/// POST /api/quests/:id/accept
pub async fn accept_quest(
    State(state): State<AppState>,
    Path(quest_id): Path<u64>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let actor = authenticate(&state, &headers).await?;
    let quest = state.engine.accept(&actor, quest_id).await?;
    Ok(Json(quest))
}

#[derive(Deserialize)]
pub struct CompleteRequest {
    key: String,
}

/// POST /api/quests/:id/complete
pub async fn complete_quest(
    State(state): State<AppState>,
    Path(quest_id): Path<u64>,
    headers: HeaderMap,
    Json(req): Json<CompleteRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let actor = authenticate(&state, &headers).await?;
    let quest = state.engine.complete(&actor, quest_id, &req.key).await?;
    Ok(Json(quest))
}

/// POST /api/quests/:id/leave
pub async fn leave_quest(
    State(state): State<AppState>,
    Path(quest_id): Path<u64>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let actor = authenticate(&state, &headers).await?;
    let quest = state.engine.leave(&actor, quest_id).await?;
    Ok(Json(quest))
}

/// DELETE /api/quests/:id
pub async fn delete_quest(
    State(state): State<AppState>,
    Path(quest_id): Path<u64>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let actor = authenticate(&state, &headers).await?;
    state.engine.delete(&actor, quest_id).await?;
    Ok(Json(serde_json::json!({ "success": true })))
}

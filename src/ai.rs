//! External AI Collaborator
//!
//! Glue for the recommendation/chat service: send a text query (plus a
//! compact quest digest for search), get free text or ids back. The core
//! treats it as opaque and never mutates state on its behalf. Without an
//! API key the endpoints fail upstream instead of fabricating answers.

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::error::ApiError;
use crate::quest::model::Quest;
use crate::AppState;

const DEFAULT_ENDPOINT: &str =
    "https://generativelanguage.googleapis.com/v1beta/models/gemini-1.5-flash:generateContent";

#[derive(Clone)]
pub struct AiClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl AiClient {
    /// Reads `GEMINI_API_KEY` (and optionally `GEMINI_API_URL`) from the
    /// environment. A missing key leaves the client unconfigured.
    pub fn from_env() -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: std::env::var("GEMINI_API_URL")
                .unwrap_or_else(|_| DEFAULT_ENDPOINT.to_string()),
            api_key: std::env::var("GEMINI_API_KEY").ok(),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    /// Send one prompt, return the model's text reply.
    async fn generate(&self, prompt: &str) -> Result<String, ApiError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| ApiError::Upstream("AI service not configured".into()))?;

        let body = serde_json::json!({
            "contents": [{ "parts": [{ "text": prompt }] }]
        });
        let response = self
            .http
            .post(format!("{}?key={}", self.endpoint, api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                error!("AI request failed: {}", e);
                ApiError::Upstream("AI request failed".into())
            })?;
        if !response.status().is_success() {
            return Err(ApiError::Upstream(format!(
                "AI service returned {}",
                response.status()
            )));
        }

        let value: serde_json::Value = response
            .json()
            .await
            .map_err(|_| ApiError::Upstream("Malformed AI response".into()))?;
        value["candidates"][0]["content"]["parts"][0]["text"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| ApiError::Upstream("Empty AI response".into()))
    }
}

/// Parsed recommendation payload the model is asked to produce
#[derive(Debug, Deserialize)]
pub struct Recommendation {
    #[serde(rename = "recommendedIds", default)]
    pub recommended_ids: Vec<u64>,
    #[serde(default)]
    pub suggestion: String,
    #[serde(default)]
    pub reasoning: String,
}

/// Strip optional markdown fences and parse the model's JSON reply.
pub fn parse_recommendation(text: &str) -> Option<Recommendation> {
    let trimmed = text.trim();
    let inner = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|s| s.strip_suffix("```"))
        .unwrap_or(trimmed);
    serde_json::from_str(inner.trim()).ok()
}

/// Compact quest digest included in the search prompt
#[derive(Serialize)]
struct QuestDigest<'a> {
    id: u64,
    title: &'a str,
    description: &'a str,
    category: &'a str,
    reward: u64,
    location: &'a str,
}

pub fn build_search_prompt(query: &str, quests: &[Quest]) -> String {
    let digest: Vec<QuestDigest> = quests
        .iter()
        .map(|q| QuestDigest {
            id: q.id,
            title: &q.title,
            description: &q.description,
            category: &q.category,
            reward: q.reward,
            location: &q.location,
        })
        .collect();
    let digest_json = serde_json::to_string_pretty(&digest).unwrap_or_else(|_| "[]".into());

    format!(
        "You are a quest recommendation engine. A user is searching for quests \
         with the following query: \"{query}\"\n\n\
         Here is the list of available quests:\n{digest_json}\n\n\
         Based on the user's query, recommend the most relevant quests by their \
         IDs. Also suggest what the user might be looking for if their query is \
         vague.\n\
         Respond in JSON format: {{\"recommendedIds\": [1,2,3], \"suggestion\": \
         \"Your helpful suggestion\", \"reasoning\": \"Why these quests match\"}}\n\
         Respond ONLY with valid JSON, no markdown or extra text."
    )
}

// ============================================================================
// HTTP Handlers
// ============================================================================

#[derive(Deserialize)]
pub struct SearchRequest {
    query: String,
}

#[derive(Serialize)]
struct SearchResponse {
    quests: Vec<Quest>,
    suggestion: String,
    reasoning: String,
}

/// POST /api/search/ai
pub async fn search_ai(
    State(state): State<AppState>,
    Json(req): Json<SearchRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.query.trim().is_empty() {
        return Err(ApiError::Validation("Query required".into()));
    }

    let quests: Vec<Quest> = {
        let data = state.store.data.read().await;
        data.quests.clone()
    };

    let prompt = build_search_prompt(&req.query, &quests);
    let text = state.ai.generate(&prompt).await?;
    let parsed = parse_recommendation(&text)
        .ok_or_else(|| ApiError::Upstream("Failed to parse AI response".into()))?;

    let recommended = quests
        .into_iter()
        .filter(|q| parsed.recommended_ids.contains(&q.id))
        .collect();
    Ok(Json(SearchResponse {
        quests: recommended,
        suggestion: parsed.suggestion,
        reasoning: parsed.reasoning,
    }))
}

#[derive(Deserialize)]
pub struct ChatRequest {
    message: String,
}

/// POST /api/ai/chat
pub async fn ai_chat(
    State(state): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.message.trim().is_empty() {
        return Err(ApiError::Validation("Message required".into()));
    }

    let prompt = format!(
        "You are TAVNO-AI, the helpful assistant of a micro-task marketplace. \
         Answer briefly, in the user's language.\n\nUser: {}",
        req.message
    );
    let reply = state.ai.generate(&prompt).await?;
    Ok(Json(serde_json::json!({ "reply": reply })))
}

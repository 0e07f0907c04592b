use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use futures::{SinkExt, StreamExt};
use std::{net::SocketAddr, sync::Arc};
use tower_http::{cors::CorsLayer, services::ServeDir};
use tracing::{info, warn};

mod ai;
mod auth;
mod error;
mod events;
mod notify;
mod quest;
mod store;
mod upload;
mod user;

use ai::AiClient;
use auth::TokenSigner;
use events::{encode_event, EventHub};
use quest::QuestEngine;
use store::Store;
use upload::UploadStore;

// ============================================================================
// App State
// ============================================================================

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<Store>,
    pub engine: QuestEngine,
    pub events: EventHub,
    pub uploads: UploadStore,
    pub token_signer: TokenSigner,
    pub ai: AiClient,
}

impl AppState {
    async fn new() -> Self {
        let store = Arc::new(
            Store::open("db.json")
                .await
                .expect("Failed to initialize document store"),
        );
        let uploads = UploadStore::new("uploads")
            .await
            .expect("Failed to create uploads directory");
        let events = EventHub::new();
        let engine = QuestEngine::new(store.clone(), events.clone(), uploads.clone());

        let ai = AiClient::from_env();
        if !ai.is_configured() {
            warn!("GEMINI_API_KEY not set; AI search/chat endpoints will be unavailable");
        }

        Self {
            store,
            engine,
            events,
            uploads,
            token_signer: TokenSigner::new(),
            ai,
        }
    }
}

// ============================================================================
// WebSocket Handler
// ============================================================================

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Forward quest lifecycle events to one connected client. Best-effort: a
/// lagging receiver skips missed events, a dead socket just ends the task.
async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let mut events_rx = state.events.subscribe();
    info!("Realtime client connected");

    let mut send_task = tokio::spawn(async move {
        loop {
            match events_rx.recv().await {
                Ok(event) => {
                    if let Ok(text) = encode_event(&event) {
                        if sender.send(Message::Text(text)).await.is_err() {
                            break;
                        }
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Realtime client lagged, skipped {} events", skipped);
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    // Clients only listen; drain incoming frames until the socket closes.
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            if let Message::Close(_) = msg {
                break;
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }
    info!("Realtime client disconnected");
}

async fn health_check() -> impl IntoResponse {
    axum::Json(serde_json::json!({
        "status": "ok",
        "timestamp": chrono::Utc::now().timestamp_millis()
    }))
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("tavno_server=info".parse().unwrap()),
        )
        .init();

    let state = AppState::new().await;
    let uploads_dir = state.uploads.dir().to_path_buf();

    let app = Router::new()
        // Health check
        .route("/health", get(health_check))
        // Quests
        .route(
            "/api/quests",
            get(quest::api::list_quests).post(quest::api::create_quest),
        )
        .route(
            "/api/quests/:id",
            get(quest::api::get_quest).delete(quest::api::delete_quest),
        )
        .route("/api/quests/:id/accept", post(quest::api::accept_quest))
        .route("/api/quests/:id/complete", post(quest::api::complete_quest))
        .route("/api/quests/:id/leave", post(quest::api::leave_quest))
        // Authentication
        .route("/api/auth/login", post(auth::login))
        .route("/api/auth/signup", post(auth::signup))
        .route("/api/auth/logout", post(auth::logout))
        .route("/api/auth/me", get(auth::me))
        // Notifications
        .route("/api/user/notifications", get(notify::list_notifications))
        .route(
            "/api/user/notifications/:id/read",
            post(notify::read_notification),
        )
        // Profiles & reviews
        .route("/api/user/profile", post(user::update_profile))
        .route("/api/users/:id", get(user::get_user_profile))
        .route("/api/reviews", post(user::post_review))
        // AI collaborator
        .route("/api/search/ai", post(ai::search_ai))
        .route("/api/ai/chat", post(ai::ai_chat))
        // Realtime channel
        .route("/ws", get(ws_handler))
        // Static assets
        .nest_service("/uploads", ServeDir::new(uploads_dir))
        .fallback_service(ServeDir::new("public"))
        .layer(
            CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods([
                    axum::http::Method::GET,
                    axum::http::Method::POST,
                    axum::http::Method::DELETE,
                    axum::http::Method::OPTIONS,
                ])
                .allow_headers([
                    axum::http::header::CONTENT_TYPE,
                    axum::http::header::AUTHORIZATION,
                ]),
        )
        .with_state(state);

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(3000);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("Server running on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind listener");
    axum::serve(listener, app).await.expect("Server error");
}

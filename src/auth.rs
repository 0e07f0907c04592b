//! Authentication
//!
//! Argon2 password hashing plus HMAC-signed bearer tokens. A token carries
//! the user id, an expiry, and a random nonce; resolution is strictly
//! "token -> user id or fail". Secrets are generated at startup, so tokens
//! do not survive a restart.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::Json;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::ApiError;
use crate::store::User;
use crate::AppState;

type HmacSha256 = Hmac<Sha256>;

/// Bearer token validity duration
const TOKEN_EXPIRY_SECS: u64 = 60 * 60 * 24; // 24 hours

pub fn hash_password(password: &str) -> Result<String, ApiError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| ApiError::Internal(format!("Failed to hash password: {}", e)))
}

pub fn verify_password(hash: &str, password: &str) -> bool {
    match PasswordHash::new(hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}

/// Signed bearer token generator/validator
#[derive(Clone)]
pub struct TokenSigner {
    /// Secret key for HMAC signing (generated at startup)
    secret: Vec<u8>,
}

impl TokenSigner {
    pub fn new() -> Self {
        use rand::RngCore;
        let mut secret = vec![0u8; 32];
        rand::thread_rng().fill_bytes(&mut secret);
        Self { secret }
    }

    /// Create a signed token for a user id.
    /// Format: base64(user_id:expiry_ts:nonce:signature)
    pub fn create_token(&self, user_id: u64) -> String {
        self.create_token_with_expiry(user_id, now_secs() + TOKEN_EXPIRY_SECS)
    }

    fn create_token_with_expiry(&self, user_id: u64, expiry: u64) -> String {
        use base64::Engine;

        let nonce = Uuid::new_v4().simple().to_string();
        let payload = format!("{}:{}:{}", user_id, expiry, nonce);

        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .expect("HMAC can take key of any size");
        mac.update(payload.as_bytes());
        let signature = mac.finalize().into_bytes();

        let token_data = format!(
            "{}:{}",
            payload,
            base64::engine::general_purpose::STANDARD.encode(signature)
        );
        base64::engine::general_purpose::URL_SAFE.encode(token_data)
    }

    /// Validate a signed token. Returns the user id if valid, None if
    /// malformed, tampered, or expired.
    pub fn validate_token(&self, token: &str) -> Option<u64> {
        use base64::Engine;

        let token_data = base64::engine::general_purpose::URL_SAFE.decode(token).ok()?;
        let token_str = String::from_utf8(token_data).ok()?;

        // Parse: user_id:expiry:nonce:signature
        let parts: Vec<&str> = token_str.splitn(4, ':').collect();
        if parts.len() != 4 {
            return None;
        }

        let user_id: u64 = parts[0].parse().ok()?;
        let expiry: u64 = parts[1].parse().ok()?;
        let nonce = parts[2];
        let signature_b64 = parts[3];

        if now_secs() > expiry {
            warn!("Bearer token expired for user {}", user_id);
            return None;
        }

        let payload = format!("{}:{}:{}", user_id, expiry, nonce);
        let expected_sig = base64::engine::general_purpose::STANDARD
            .decode(signature_b64)
            .ok()?;

        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .expect("HMAC can take key of any size");
        mac.update(payload.as_bytes());

        if mac.verify_slice(&expected_sig).is_err() {
            warn!("Bearer token signature invalid");
            return None;
        }

        Some(user_id)
    }
}

fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("Authorization")?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

/// Resolve the bearer token in `headers` to a user record, or fail
/// `Unauthenticated`.
pub async fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<User, ApiError> {
    let token =
        bearer_token(headers).ok_or_else(|| ApiError::Unauthenticated("Not authenticated".into()))?;
    let user_id = state
        .token_signer
        .validate_token(token)
        .ok_or_else(|| ApiError::Unauthenticated("Invalid token".into()))?;

    let data = state.store.data.read().await;
    data.find_user(user_id)
        .cloned()
        .ok_or_else(|| ApiError::Unauthenticated("User not found".into()))
}

// ============================================================================
// HTTP Handlers
// ============================================================================

#[derive(Debug, Serialize)]
pub struct UserInfo {
    pub id: u64,
    pub name: String,
    pub email: String,
    pub balance: u64,
    pub bio: String,
    pub avatar: String,
    pub phone: String,
}

impl UserInfo {
    pub fn from_user(user: &User) -> Self {
        Self {
            id: user.id,
            name: user.name.clone(),
            email: user.email.clone(),
            balance: user.balance,
            bio: user.bio.clone(),
            avatar: user.avatar.clone(),
            phone: user.phone.clone(),
        }
    }
}

#[derive(Serialize)]
struct AuthResponse {
    token: String,
    #[serde(flatten)]
    user: UserInfo,
}

#[derive(Deserialize)]
pub struct LoginRequest {
    email: String,
    password: String,
}

#[derive(Deserialize)]
pub struct SignupRequest {
    email: String,
    password: String,
    #[serde(rename = "confirmPassword")]
    confirm_password: Option<String>,
    username: String,
    phone: Option<String>,
}

/// POST /api/auth/login
pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let user = {
        let data = state.store.data.read().await;
        data.find_user_by_email(&req.email).cloned()
    };

    let user = match user {
        Some(u) if verify_password(&u.password, &req.password) => u,
        _ => {
            warn!("Failed login attempt for {}", req.email);
            return Err(ApiError::Unauthenticated(
                "Email ou mot de passe incorrect".into(),
            ));
        }
    };

    info!("User logged in: {} (id: {})", user.name, user.id);
    Ok(Json(AuthResponse {
        token: state.token_signer.create_token(user.id),
        user: UserInfo::from_user(&user),
    }))
}

/// POST /api/auth/signup
pub async fn signup(
    State(state): State<AppState>,
    Json(req): Json<SignupRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.email.is_empty() || req.password.is_empty() || req.username.is_empty() {
        return Err(ApiError::Validation("Tous les champs sont requis".into()));
    }
    if req.password.len() < 6 {
        return Err(ApiError::Validation(
            "Le mot de passe doit faire au moins 6 caractères".into(),
        ));
    }
    if req.confirm_password.as_deref() != Some(req.password.as_str()) {
        return Err(ApiError::Validation(
            "Les mots de passe ne correspondent pas".into(),
        ));
    }

    let password_hash = hash_password(&req.password)?;

    let user = {
        let mut data = state.store.data.write().await;
        if data.find_user_by_email(&req.email).is_some() {
            return Err(ApiError::Conflict("Cet email est déjà utilisé".into()));
        }
        if data.users.iter().any(|u| u.name == req.username) {
            return Err(ApiError::Conflict(
                "Ce nom d'utilisateur est déjà pris".into(),
            ));
        }

        let user = User {
            id: data.next_user_id(),
            name: req.username,
            email: req.email,
            password: password_hash,
            balance: 0,
            bio: String::new(),
            avatar: "/avatars/default.png".into(),
            phone: req.phone.unwrap_or_default(),
            notifications: Vec::new(),
        };
        data.users.push(user.clone());
        user
    };
    state.store.persist().await?;

    info!("User registered: {} (id: {})", user.name, user.id);
    Ok(Json(AuthResponse {
        token: state.token_signer.create_token(user.id),
        user: UserInfo::from_user(&user),
    }))
}

/// POST /api/auth/logout
///
/// Tokens are stateless and short-lived; the client just drops its copy.
pub async fn logout() -> impl IntoResponse {
    Json(serde_json::json!({ "success": true }))
}

/// GET /api/auth/me
pub async fn me(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let user = authenticate(&state, &headers).await?;
    Ok(Json(UserInfo::from_user(&user)))
}

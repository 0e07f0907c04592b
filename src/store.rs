//! Flat Document Store
//!
//! The single JSON file that owns the `users`, `quests`, and `reviews`
//! collections. The in-memory copy is authoritative; every mutation is
//! followed by an atomic snapshot write (temp file + rename) so a failed
//! write never corrupts the previous on-disk state.
//!
//! The store also hands out per-quest locks: lifecycle operations must hold
//! the lock for their quest id across the whole read-modify-write, which is
//! what keeps the slot-capacity invariant intact under concurrent accepts.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};

use crate::error::ApiError;
use crate::notify::Notification;
use crate::quest::model::{Quest, QuestStatus, ReviewFlags};
use crate::user::Review;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: u64,
    pub name: String,
    pub email: String,
    /// Argon2 hash, opaque to everything but the auth module
    pub password: String,
    pub balance: u64,
    #[serde(default)]
    pub bio: String,
    #[serde(default)]
    pub avatar: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub notifications: Vec<Notification>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreData {
    #[serde(default)]
    pub users: Vec<User>,
    #[serde(default)]
    pub quests: Vec<Quest>,
    #[serde(default)]
    pub reviews: Vec<Review>,
}

impl StoreData {
    pub fn find_user(&self, id: u64) -> Option<&User> {
        self.users.iter().find(|u| u.id == id)
    }

    pub fn find_user_mut(&mut self, id: u64) -> Option<&mut User> {
        self.users.iter_mut().find(|u| u.id == id)
    }

    pub fn find_user_by_email(&self, email: &str) -> Option<&User> {
        self.users.iter().find(|u| u.email == email)
    }

    pub fn find_quest(&self, id: u64) -> Option<&Quest> {
        self.quests.iter().find(|q| q.id == id)
    }

    pub fn find_quest_mut(&mut self, id: u64) -> Option<&mut Quest> {
        self.quests.iter_mut().find(|q| q.id == id)
    }

    pub fn next_user_id(&self) -> u64 {
        self.users.iter().map(|u| u.id).max().unwrap_or(0) + 1
    }

    pub fn next_quest_id(&self) -> u64 {
        self.quests.iter().map(|q| q.id).max().unwrap_or(0) + 1
    }

    pub fn next_review_id(&self) -> u64 {
        self.reviews.iter().map(|r| r.id).max().unwrap_or(0) + 1
    }
}

pub struct Store {
    path: PathBuf,
    pub data: RwLock<StoreData>,
    /// Per-quest-id serialization for lifecycle read-modify-write
    quest_locks: DashMap<u64, Arc<Mutex<()>>>,
    /// Serializes snapshot writes: all persists share one temp file, so the
    /// write + rename pair must never interleave across requests.
    persist_lock: Mutex<()>,
}

impl Store {
    /// Open (or create) the store file and seed initial data if empty.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, ApiError> {
        let path = path.into();
        let mut data = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => StoreData::default(),
            Err(e) => return Err(e.into()),
        };

        Self::seed(&mut data)?;

        let store = Self {
            path,
            data: RwLock::new(data),
            quest_locks: DashMap::new(),
            persist_lock: Mutex::new(()),
        };
        store.persist().await?;
        tracing::info!("Document store ready at {}", store.path.display());
        Ok(store)
    }

    /// Seed a sample user and quests on first start, matching the data the
    /// front-end demo expects.
    fn seed(data: &mut StoreData) -> Result<(), ApiError> {
        if data.find_user_by_email("jean@example.com").is_none() {
            data.users.push(User {
                id: data.next_user_id(),
                name: "Jean Dupont".into(),
                email: "jean@example.com".into(),
                password: crate::auth::hash_password("password")?,
                balance: 25_500,
                bio: "Bienvenue sur mon profil!".into(),
                avatar: "/avatars/default.png".into(),
                phone: "+22890000000".into(),
                notifications: Vec::new(),
            });
        }

        if data.quests.is_empty() {
            data.quests.push(Quest {
                id: 1,
                title: "Livraison de colis urgent".into(),
                description: "Livrer un colis depuis Lomé centre vers Agoè.".into(),
                category: "transport".into(),
                reward: 5000,
                duration: "2h".into(),
                location: "Lomé → Agoè".into(),
                creator: "Jean Dupont".into(),
                creator_id: 1,
                creator_phone: Some("+22890000000".into()),
                image: Some("/uploads/sample-1.jpg".into()),
                slots: 1,
                accepted: Vec::new(),
                status: QuestStatus::Open,
                completion_key: None,
                completed_by: None,
                reviews: ReviewFlags::default(),
                created_at: Utc::now(),
            });
            data.quests.push(Quest {
                id: 2,
                title: "Courses au supermarché".into(),
                description: "Faire les courses hebdomadaires.".into(),
                category: "achats".into(),
                reward: 3000,
                duration: "1h".into(),
                location: "Lomé centre".into(),
                creator: "Jean Dupont".into(),
                creator_id: 1,
                creator_phone: None,
                image: Some("/uploads/sample-2.jpg".into()),
                slots: 2,
                accepted: Vec::new(),
                status: QuestStatus::Open,
                completion_key: None,
                completed_by: None,
                reviews: ReviewFlags::default(),
                created_at: Utc::now(),
            });
        }
        Ok(())
    }

    /// Write the current state to disk: serialize to a temp file in the same
    /// directory, then rename over the live file. One persist runs at a
    /// time; a later snapshot always contains every earlier mutation.
    pub async fn persist(&self) -> Result<(), ApiError> {
        let _guard = self.persist_lock.lock().await;
        let bytes = {
            let data = self.data.read().await;
            serde_json::to_vec_pretty(&*data)?
        };

        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    /// Lock handle for one quest id. Callers hold this across their whole
    /// read-modify-write so concurrent operations on the same quest
    /// serialize.
    pub fn quest_lock(&self, quest_id: u64) -> Arc<Mutex<()>> {
        self.quest_locks
            .entry(quest_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drop the lock entry once a quest is deleted.
    pub fn release_quest_lock(&self, quest_id: u64) {
        self.quest_locks.remove(&quest_id);
    }
}

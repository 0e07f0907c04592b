//! Quest Lifecycle Engine
//!
//! Validates and applies state transitions (create, accept, leave, complete,
//! delete) against a single quest record, enforcing the slot/capacity and
//! ownership invariants. Every operation is a per-quest-id serialized
//! read-modify-write: preconditions are checked first, the mutation happens
//! in one block under the store lock, the write-back runs, and only then do
//! broadcast events fire.

use std::sync::Arc;

use rand::distributions::Alphanumeric;
use rand::Rng;
use tracing::info;

use crate::error::ApiError;
use crate::events::{EventHub, QuestEvent};
use crate::notify;
use crate::quest::model::{Quest, QuestInput, QuestStatus, ReviewFlags};
use crate::store::{Store, User};
use crate::upload::UploadStore;

/// Completion key length (short code handed to the creator)
const COMPLETION_KEY_LEN: usize = 6;

fn generate_completion_key() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(COMPLETION_KEY_LEN)
        .map(|c| (c as char).to_ascii_uppercase())
        .collect()
}

#[derive(Clone)]
pub struct QuestEngine {
    store: Arc<Store>,
    events: EventHub,
    uploads: UploadStore,
}

impl QuestEngine {
    pub fn new(store: Arc<Store>, events: EventHub, uploads: UploadStore) -> Self {
        Self {
            store,
            events,
            uploads,
        }
    }

    /// Create a new quest with status `open` and no participants.
    pub async fn create(&self, actor: &User, input: QuestInput) -> Result<Quest, ApiError> {
        if input.title.trim().is_empty()
            || input.description.trim().is_empty()
            || input.category.trim().is_empty()
        {
            return Err(ApiError::Validation(
                "Title, description and category are required".into(),
            ));
        }

        let quest = {
            let mut data = self.store.data.write().await;
            let quest = Quest {
                id: data.next_quest_id(),
                title: input.title,
                description: input.description,
                category: input.category,
                reward: input.reward,
                duration: input.duration,
                location: input.location,
                creator: actor.name.clone(),
                creator_id: actor.id,
                creator_phone: input.creator_phone,
                image: input.image,
                slots: input.slots.max(1),
                accepted: Vec::new(),
                status: QuestStatus::Open,
                completion_key: None,
                completed_by: None,
                reviews: ReviewFlags::default(),
                created_at: chrono::Utc::now(),
            };
            data.quests.push(quest.clone());
            quest
        };
        self.store.persist().await?;

        info!("Quest created: '{}' (id: {}) by {}", quest.title, quest.id, actor.name);
        self.events.publish(QuestEvent::Created(quest.clone()));
        Ok(quest)
    }

    /// Accept a quest: appends the actor to the accepted set, flips the
    /// status to `full` at capacity, and issues a fresh completion key.
    pub async fn accept(&self, actor: &User, quest_id: u64) -> Result<Quest, ApiError> {
        let lock = self.store.quest_lock(quest_id);
        let _guard = lock.lock().await;

        let quest = {
            let mut data = self.store.data.write().await;

            // Preconditions first so the mutation below is all-or-nothing
            {
                let quest = data
                    .find_quest(quest_id)
                    .ok_or_else(|| ApiError::NotFound("Quest not found".into()))?;
                if quest.is_accepted_by(actor.id) {
                    return Err(ApiError::Conflict("Already accepted".into()));
                }
                if quest.creator_id == actor.id {
                    return Err(ApiError::Conflict("Cannot accept your own quest".into()));
                }
                if quest.status == QuestStatus::Completed {
                    return Err(ApiError::Conflict("Quest already completed".into()));
                }
                if quest.at_capacity() {
                    return Err(ApiError::Conflict("Full".into()));
                }
            }

            let quest = data.find_quest_mut(quest_id).expect("checked above");
            quest.accepted.push(actor.id);
            if quest.at_capacity() {
                quest.status = QuestStatus::Full;
            }
            // The key gates the next completion, so it is never reused: each
            // successful accept mints a fresh one.
            let key = generate_completion_key();
            quest.completion_key = Some(key.clone());

            let quest = quest.clone();
            if let Some(creator) = data.find_user_mut(quest.creator_id) {
                notify::push(
                    creator,
                    format!(
                        "{} a accepté votre quête « {} ». Clé de complétion : {}",
                        actor.name, quest.title, key
                    ),
                );
            }
            if let Some(accepter) = data.find_user_mut(actor.id) {
                notify::push(
                    accepter,
                    format!("Vous avez accepté la quête « {} »", quest.title),
                );
            }
            quest
        };
        self.store.persist().await?;

        info!("Quest {} accepted by {} ({}/{})", quest_id, actor.name, quest.accepted.len(), quest.slots);
        self.events.publish(QuestEvent::Updated(quest.clone()));
        Ok(quest)
    }

    /// Complete a quest with the shared completion key, crediting the
    /// actor's balance with the reward.
    pub async fn complete(&self, actor: &User, quest_id: u64, key: &str) -> Result<Quest, ApiError> {
        let lock = self.store.quest_lock(quest_id);
        let _guard = lock.lock().await;

        let quest = {
            let mut data = self.store.data.write().await;

            {
                let quest = data
                    .find_quest(quest_id)
                    .ok_or_else(|| ApiError::NotFound("Quest not found".into()))?;
                if !quest.is_accepted_by(actor.id) {
                    return Err(ApiError::Forbidden("You have not accepted this quest".into()));
                }
                if quest.status == QuestStatus::Completed {
                    return Err(ApiError::Conflict("Quest already completed".into()));
                }
                if quest.completion_key.as_deref() != Some(key) {
                    return Err(ApiError::Validation("Invalid completion key".into()));
                }
            }

            let quest = data.find_quest_mut(quest_id).expect("checked above");
            quest.status = QuestStatus::Completed;
            quest.accepted.retain(|&id| id != actor.id);
            quest.completion_key = None;
            quest.completed_by = Some(actor.id);
            let quest = quest.clone();

            if let Some(completer) = data.find_user_mut(actor.id) {
                completer.balance += quest.reward;
            }
            if let Some(creator) = data.find_user_mut(quest.creator_id) {
                notify::push(
                    creator,
                    format!("{} a complété votre quête « {} »", actor.name, quest.title),
                );
            }
            quest
        };
        self.store.persist().await?;

        info!("Quest {} completed by {} (+{})", quest_id, actor.name, quest.reward);
        self.events.publish(QuestEvent::Updated(quest.clone()));
        Ok(quest)
    }

    /// Leave (abandon) a quest the actor previously accepted.
    pub async fn leave(&self, actor: &User, quest_id: u64) -> Result<Quest, ApiError> {
        let lock = self.store.quest_lock(quest_id);
        let _guard = lock.lock().await;

        let quest = {
            let mut data = self.store.data.write().await;
            let quest = data
                .find_quest_mut(quest_id)
                .ok_or_else(|| ApiError::NotFound("Quest not found".into()))?;
            if quest.status == QuestStatus::Completed {
                return Err(ApiError::Conflict("Quest already completed".into()));
            }
            if !quest.is_accepted_by(actor.id) {
                return Err(ApiError::Conflict("You have not accepted this quest".into()));
            }

            quest.accepted.retain(|&id| id != actor.id);
            if quest.status == QuestStatus::Full && quest.accepted.len() < quest.slots {
                quest.status = QuestStatus::Open;
            }
            quest.clone()
        };
        self.store.persist().await?;

        info!("Quest {} left by {}", quest_id, actor.name);
        self.events.publish(QuestEvent::Updated(quest.clone()));
        Ok(quest)
    }

    /// Delete a quest (creator only, allowed in any status) and release its
    /// uploaded image.
    pub async fn delete(&self, actor: &User, quest_id: u64) -> Result<(), ApiError> {
        let lock = self.store.quest_lock(quest_id);
        let image = {
            let _guard = lock.lock().await;

            let image = {
                let mut data = self.store.data.write().await;
                let idx = data
                    .quests
                    .iter()
                    .position(|q| q.id == quest_id)
                    .ok_or_else(|| ApiError::NotFound("Quest not found".into()))?;
                if data.quests[idx].creator_id != actor.id {
                    return Err(ApiError::Forbidden("Not authorized".into()));
                }
                data.quests.remove(idx).image
            };
            self.store.persist().await?;
            image
        };
        self.store.release_quest_lock(quest_id);

        if let Some(image) = image {
            self.uploads.remove(&image).await;
        }

        info!("Quest {} deleted by {}", quest_id, actor.name);
        self.events.publish(QuestEvent::Deleted { id: quest_id });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreData;

    struct Fixture {
        _dir: tempfile::TempDir,
        engine: QuestEngine,
        store: Arc<Store>,
        events: EventHub,
        creator: User,
        user_b: User,
        user_c: User,
    }

    fn test_user(id: u64, name: &str) -> User {
        User {
            id,
            name: name.into(),
            email: format!("{}@example.com", name.to_lowercase()),
            password: "hash".into(),
            balance: 0,
            bio: String::new(),
            avatar: "/avatars/default.png".into(),
            phone: String::new(),
            notifications: Vec::new(),
        }
    }

    async fn setup() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(Store::open(dir.path().join("db.json")).await.unwrap());
        let uploads = UploadStore::new(dir.path().join("uploads")).await.unwrap();
        let events = EventHub::new();

        let creator = test_user(10, "Ama");
        let user_b = test_user(11, "Bob");
        let user_c = test_user(12, "Chloe");
        {
            let mut data = store.data.write().await;
            // Drop the seeded data so tests start from a clean slate
            *data = StoreData::default();
            data.users.push(creator.clone());
            data.users.push(user_b.clone());
            data.users.push(user_c.clone());
        }

        let engine = QuestEngine::new(store.clone(), events.clone(), uploads);
        Fixture {
            _dir: dir,
            engine,
            store,
            events,
            creator,
            user_b,
            user_c,
        }
    }

    fn quest_input(slots: usize, reward: u64) -> QuestInput {
        QuestInput {
            title: "Livraison".into(),
            description: "Livrer un colis.".into(),
            category: "transport".into(),
            reward,
            slots,
            ..QuestInput::default()
        }
    }

    async fn get_quest(store: &Store, id: u64) -> Quest {
        store.data.read().await.find_quest(id).unwrap().clone()
    }

    async fn get_user(store: &Store, id: u64) -> User {
        store.data.read().await.find_user(id).unwrap().clone()
    }

    #[tokio::test]
    async fn test_create_validates_required_fields() {
        let fx = setup().await;
        let mut input = quest_input(1, 100);
        input.title = "  ".into();
        let err = fx.engine.create(&fx.creator, input).await.unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));
    }

    #[tokio::test]
    async fn test_create_clamps_slots_to_one() {
        let fx = setup().await;
        let quest = fx.engine.create(&fx.creator, quest_input(0, 100)).await.unwrap();
        assert_eq!(quest.slots, 1);
        assert_eq!(quest.status, QuestStatus::Open);
        assert!(quest.accepted.is_empty());
    }

    #[tokio::test]
    async fn test_accept_full_lifecycle_single_slot() {
        let fx = setup().await;
        let mut rx = fx.events.subscribe();
        let quest = fx.engine.create(&fx.creator, quest_input(1, 5000)).await.unwrap();
        assert!(matches!(rx.recv().await.unwrap(), QuestEvent::Created(_)));

        let quest = fx.engine.accept(&fx.user_b, quest.id).await.unwrap();
        assert_eq!(quest.status, QuestStatus::Full);
        assert_eq!(quest.accepted, vec![fx.user_b.id]);
        let key = quest.completion_key.clone().unwrap();
        assert_eq!(key.len(), COMPLETION_KEY_LEN);
        assert!(matches!(rx.recv().await.unwrap(), QuestEvent::Updated(_)));

        // Creator got the key, accepter got a confirmation
        let creator = get_user(&fx.store, fx.creator.id).await;
        assert_eq!(creator.notifications.len(), 1);
        assert!(creator.notifications[0].message.contains(&key));
        let b = get_user(&fx.store, fx.user_b.id).await;
        assert_eq!(b.notifications.len(), 1);

        let quest = fx.engine.complete(&fx.user_b, quest.id, &key).await.unwrap();
        assert_eq!(quest.status, QuestStatus::Completed);
        assert!(quest.accepted.is_empty());
        assert!(quest.completion_key.is_none());
        assert_eq!(quest.completed_by, Some(fx.user_b.id));

        let b = get_user(&fx.store, fx.user_b.id).await;
        assert_eq!(b.balance, 5000);
        let creator = get_user(&fx.store, fx.creator.id).await;
        assert_eq!(creator.notifications.len(), 2);
    }

    #[tokio::test]
    async fn test_accept_is_idempotent_rejecting() {
        let fx = setup().await;
        let quest = fx.engine.create(&fx.creator, quest_input(2, 100)).await.unwrap();

        fx.engine.accept(&fx.user_b, quest.id).await.unwrap();
        let err = fx.engine.accept(&fx.user_b, quest.id).await.unwrap_err();
        assert!(matches!(err, ApiError::Conflict(_)));

        let quest = get_quest(&fx.store, quest.id).await;
        assert_eq!(quest.accepted, vec![fx.user_b.id]);
    }

    #[tokio::test]
    async fn test_creator_cannot_accept_own_quest() {
        let fx = setup().await;
        let quest = fx.engine.create(&fx.creator, quest_input(2, 100)).await.unwrap();

        let err = fx.engine.accept(&fx.creator, quest.id).await.unwrap_err();
        assert!(matches!(err, ApiError::Conflict(_)));
        let quest = get_quest(&fx.store, quest.id).await;
        assert!(!quest.accepted.contains(&fx.creator.id));
    }

    #[tokio::test]
    async fn test_accept_missing_quest_is_not_found() {
        let fx = setup().await;
        let err = fx.engine.accept(&fx.user_b, 999).await.unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_completion_key_regenerated_on_each_accept() {
        let fx = setup().await;
        let quest = fx.engine.create(&fx.creator, quest_input(2, 100)).await.unwrap();

        let after_b = fx.engine.accept(&fx.user_b, quest.id).await.unwrap();
        let key_b = after_b.completion_key.unwrap();
        let after_c = fx.engine.accept(&fx.user_c, quest.id).await.unwrap();
        let key_c = after_c.completion_key.unwrap();
        assert_ne!(key_b, key_c);

        // The stale key no longer completes
        let err = fx
            .engine
            .complete(&fx.user_b, quest.id, &key_b)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));
    }

    #[tokio::test]
    async fn test_concurrent_accepts_respect_capacity() {
        let fx = setup().await;
        let quest = fx.engine.create(&fx.creator, quest_input(1, 100)).await.unwrap();

        let e1 = fx.engine.clone();
        let e2 = fx.engine.clone();
        let (b, c) = (fx.user_b.clone(), fx.user_c.clone());
        let id = quest.id;
        let (r1, r2) = tokio::join!(
            tokio::spawn(async move { e1.accept(&b, id).await }),
            tokio::spawn(async move { e2.accept(&c, id).await }),
        );
        let results = [r1.unwrap(), r2.unwrap()];
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);

        let quest = get_quest(&fx.store, id).await;
        assert_eq!(quest.accepted.len(), 1);
        assert!(quest.accepted.len() <= quest.slots);
    }

    #[tokio::test]
    async fn test_complete_requires_membership_and_exact_key() {
        let fx = setup().await;
        let quest = fx.engine.create(&fx.creator, quest_input(1, 100)).await.unwrap();
        fx.engine.accept(&fx.user_b, quest.id).await.unwrap();
        let before = get_quest(&fx.store, quest.id).await;

        // Non-participant
        let err = fx
            .engine
            .complete(&fx.user_c, quest.id, before.completion_key.as_deref().unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Forbidden(_)));

        // Wrong key leaves the quest untouched
        let err = fx.engine.complete(&fx.user_b, quest.id, "WRONG1").await.unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));
        let after = get_quest(&fx.store, quest.id).await;
        assert_eq!(after.status, before.status);
        assert_eq!(after.accepted, before.accepted);
        assert_eq!(after.completion_key, before.completion_key);
        let b = get_user(&fx.store, fx.user_b.id).await;
        assert_eq!(b.balance, 0);
    }

    #[tokio::test]
    async fn test_completed_is_terminal() {
        let fx = setup().await;
        let quest = fx.engine.create(&fx.creator, quest_input(2, 100)).await.unwrap();
        fx.engine.accept(&fx.user_b, quest.id).await.unwrap();
        let c_view = fx.engine.accept(&fx.user_c, quest.id).await.unwrap();
        let key = c_view.completion_key.unwrap();
        fx.engine.complete(&fx.user_c, quest.id, &key).await.unwrap();

        // No accept, leave, or second complete after completion
        let err = fx.engine.complete(&fx.user_b, quest.id, &key).await.unwrap_err();
        assert!(matches!(err, ApiError::Conflict(_)));
        let err = fx.engine.leave(&fx.user_b, quest.id).await.unwrap_err();
        assert!(matches!(err, ApiError::Conflict(_)));

        // Delete by the creator is still allowed
        fx.engine.delete(&fx.creator, quest.id).await.unwrap();
    }

    #[tokio::test]
    async fn test_leave_reverts_full_to_open() {
        let fx = setup().await;
        let quest = fx.engine.create(&fx.creator, quest_input(2, 100)).await.unwrap();
        fx.engine.accept(&fx.user_b, quest.id).await.unwrap();
        let quest = fx.engine.accept(&fx.user_c, quest.id).await.unwrap();
        assert_eq!(quest.status, QuestStatus::Full);

        let quest = fx.engine.leave(&fx.user_b, quest.id).await.unwrap();
        assert_eq!(quest.status, QuestStatus::Open);
        assert_eq!(quest.accepted, vec![fx.user_c.id]);
        assert_eq!(quest.slots, 2);
    }

    #[tokio::test]
    async fn test_leave_without_accept_is_conflict() {
        let fx = setup().await;
        let quest = fx.engine.create(&fx.creator, quest_input(1, 100)).await.unwrap();
        let err = fx.engine.leave(&fx.user_b, quest.id).await.unwrap_err();
        assert!(matches!(err, ApiError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_delete_is_creator_only_and_releases_image() {
        let fx = setup().await;
        let mut rx = fx.events.subscribe();

        let mut input = quest_input(1, 100);
        let image = fx
            .engine
            .uploads
            .store("cover.jpg", b"image bytes")
            .await
            .unwrap();
        input.image = Some(image.clone());
        let quest = fx.engine.create(&fx.creator, input).await.unwrap();
        assert!(matches!(rx.recv().await.unwrap(), QuestEvent::Created(_)));

        let err = fx.engine.delete(&fx.user_b, quest.id).await.unwrap_err();
        assert!(matches!(err, ApiError::Forbidden(_)));

        fx.engine.delete(&fx.creator, quest.id).await.unwrap();
        assert!(fx.store.data.read().await.find_quest(quest.id).is_none());

        let filename = image.strip_prefix(crate::upload::PUBLIC_PREFIX).unwrap();
        assert!(!fx.engine.uploads.dir().join(filename).exists());

        match rx.recv().await.unwrap() {
            QuestEvent::Deleted { id } => assert_eq!(id, quest.id),
            other => panic!("expected delete event, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_delete_missing_quest_is_not_found() {
        let fx = setup().await;
        let err = fx.engine.delete(&fx.creator, 999).await.unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
    }
}

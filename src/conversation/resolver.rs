//! Identity resolution: mapping an inbound event to one conversation.
//!
//! Platform identities drift — the same person can show up under a new room
//! after a re-invite, or under a different person id with a stable email.
//! Resolution runs an explicit ordered list of lookup strategies; the first
//! hit wins and later strategies reconcile the stored identity to the new
//! one. The recency fallback can merge two genuinely distinct sessions from
//! the same person inside 24 hours; that is an accepted trade for continuity.

use crate::conversation::store::{ConversationStore, NewConversation};
use crate::conversation::Conversation;
use crate::error::StorageError;

/// Hours a conversation stays a candidate for the recency fallback.
const RECENCY_WINDOW_HOURS: i64 = 24;

/// Identity carried by an inbound event.
#[derive(Debug, Clone, Default)]
pub struct EventIdentity {
    pub room_id: String,
    pub person_id: String,
    pub person_email: Option<String>,
    pub person_display_name: Option<String>,
}

/// Lookup strategies, evaluated in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LookupStrategy {
    /// Exact (room, person) match.
    RoomAndPerson,
    /// Match on person email; reconciles room and person id on hit.
    Email,
    /// Same person updated within the recency window; reconciles room on hit.
    RecentPerson,
}

/// Resolves inbound identities to conversations, creating one when no
/// strategy matches.
#[derive(Debug, Clone)]
pub struct ConversationResolver {
    store: ConversationStore,
}

impl ConversationResolver {
    const STRATEGIES: [LookupStrategy; 3] = [
        LookupStrategy::RoomAndPerson,
        LookupStrategy::Email,
        LookupStrategy::RecentPerson,
    ];

    pub fn new(store: ConversationStore) -> Self {
        Self { store }
    }

    /// Resolve the identity to exactly one conversation.
    ///
    /// Returns `None` on any storage fault — the caller treats that as
    /// "proceed without history", never as fatal.
    pub async fn resolve(&self, identity: &EventIdentity) -> Option<Conversation> {
        for strategy in Self::STRATEGIES {
            match self.lookup(strategy, identity).await {
                Ok(Some(conversation)) => {
                    tracing::debug!(
                        conversation_id = %conversation.id,
                        ?strategy,
                        "conversation resolved"
                    );
                    return Some(conversation);
                }
                Ok(None) => continue,
                Err(error) => {
                    tracing::warn!(%error, ?strategy, "conversation lookup failed");
                    return None;
                }
            }
        }

        match self
            .store
            .create(NewConversation {
                room_id: identity.room_id.clone(),
                person_id: identity.person_id.clone(),
                person_email: identity.person_email.clone(),
                person_display_name: identity.person_display_name.clone(),
            })
            .await
        {
            Ok(conversation) => Some(conversation),
            Err(error) => {
                tracing::warn!(%error, room_id = %identity.room_id, "conversation creation failed");
                None
            }
        }
    }

    /// Run one strategy, reconciling stored identity on a hit.
    async fn lookup(
        &self,
        strategy: LookupStrategy,
        identity: &EventIdentity,
    ) -> Result<Option<Conversation>, StorageError> {
        match strategy {
            LookupStrategy::RoomAndPerson => {
                self.store
                    .find_by_room_and_person(&identity.room_id, &identity.person_id)
                    .await
            }
            LookupStrategy::Email => {
                let Some(email) = identity.person_email.as_deref() else {
                    return Ok(None);
                };
                let Some(mut conversation) = self.store.find_by_email(email).await? else {
                    return Ok(None);
                };
                // The email is the stable key here; room and person id moved.
                self.store
                    .reassign_identity(&conversation.id, &identity.room_id, &identity.person_id)
                    .await?;
                conversation.room_id = identity.room_id.clone();
                conversation.person_id = identity.person_id.clone();
                Ok(Some(conversation))
            }
            LookupStrategy::RecentPerson => {
                let since = chrono::Utc::now() - chrono::Duration::hours(RECENCY_WINDOW_HOURS);
                let Some(mut conversation) = self
                    .store
                    .find_recent_by_person(&identity.person_id, since)
                    .await?
                else {
                    return Ok(None);
                };
                self.store
                    .reassign_room(&conversation.id, &identity.room_id)
                    .await?;
                conversation.room_id = identity.room_id.clone();
                Ok(Some(conversation))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConversationConfig;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn setup() -> (ConversationResolver, ConversationStore, sqlx::SqlitePool) {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("in-memory sqlite should connect");

        crate::db::initialize(&pool)
            .await
            .expect("schema should be created");

        let store = ConversationStore::new(pool.clone(), ConversationConfig::default());
        (ConversationResolver::new(store.clone()), store, pool)
    }

    fn identity(room: &str, person: &str, email: Option<&str>) -> EventIdentity {
        EventIdentity {
            room_id: room.to_string(),
            person_id: person.to_string(),
            person_email: email.map(String::from),
            person_display_name: None,
        }
    }

    #[tokio::test]
    async fn creates_once_and_returns_same_conversation_on_repeat() {
        let (resolver, _store, _pool) = setup().await;
        let event = identity("room-1", "person-1", None);

        let first = resolver
            .resolve(&event)
            .await
            .expect("conversation should be created");
        let second = resolver
            .resolve(&event)
            .await
            .expect("conversation should be found");

        assert_eq!(first.id, second.id, "no duplicate conversation created");
        assert!(first.is_active);
        assert_eq!(first.max_messages, 20);
    }

    #[tokio::test]
    async fn email_match_reconciles_room_and_person() {
        let (resolver, store, _pool) = setup().await;
        let existing = resolver
            .resolve(&identity("room-old", "person-old", Some("ana@example.com")))
            .await
            .expect("conversation should be created");

        let found = resolver
            .resolve(&identity("room-2", "person-1", Some("ana@example.com")))
            .await
            .expect("conversation should resolve by email");

        assert_eq!(found.id, existing.id);
        assert_eq!(found.room_id, "room-2");
        assert_eq!(found.person_id, "person-1");

        let persisted = store
            .get(&existing.id)
            .await
            .expect("load should succeed")
            .expect("conversation should exist");
        assert_eq!(persisted.room_id, "room-2");
        assert_eq!(persisted.person_id, "person-1");
    }

    #[tokio::test]
    async fn recent_person_match_reconciles_room() {
        let (resolver, store, _pool) = setup().await;
        let existing = resolver
            .resolve(&identity("room-old", "person-1", None))
            .await
            .expect("conversation should be created");

        let found = resolver
            .resolve(&identity("room-new", "person-1", None))
            .await
            .expect("conversation should resolve by recency");

        assert_eq!(found.id, existing.id);
        assert_eq!(found.room_id, "room-new");

        let persisted = store
            .get(&existing.id)
            .await
            .expect("load should succeed")
            .expect("conversation should exist");
        assert_eq!(persisted.room_id, "room-new");
    }

    #[tokio::test]
    async fn stale_conversations_fall_outside_the_recency_window() {
        let (resolver, _store, pool) = setup().await;
        let existing = resolver
            .resolve(&identity("room-old", "person-1", None))
            .await
            .expect("conversation should be created");

        let stale = chrono::Utc::now() - chrono::Duration::hours(25);
        sqlx::query("UPDATE conversations SET last_updated = ? WHERE id = ?")
            .bind(stale)
            .bind(&existing.id)
            .execute(&pool)
            .await
            .expect("backdate should succeed");

        let fresh = resolver
            .resolve(&identity("room-new", "person-1", None))
            .await
            .expect("a new conversation should be created");

        assert_ne!(fresh.id, existing.id, "stale session must not be revived");
    }

    #[tokio::test]
    async fn exact_room_match_takes_precedence_over_email() {
        let (resolver, store, _pool) = setup().await;
        let exact = resolver
            .resolve(&identity("room-1", "person-1", Some("ana@example.com")))
            .await
            .expect("conversation should be created");

        // A second record sharing the email, created out of band and more
        // recently updated, must not shadow the exact (room, person) match.
        let shadow = store
            .create(NewConversation {
                room_id: "room-2".into(),
                person_id: "person-2".into(),
                person_email: Some("ana@example.com".into()),
                person_display_name: None,
            })
            .await
            .expect("conversation should be created");

        let resolved = resolver
            .resolve(&identity("room-1", "person-1", Some("ana@example.com")))
            .await
            .expect("conversation should resolve");
        assert_eq!(resolved.id, exact.id);
        assert_ne!(resolved.id, shadow.id);
    }
}

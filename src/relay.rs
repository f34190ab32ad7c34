//! The webhook pipeline: resolve, check health, generate, dispatch.
//!
//! Every inbound event is handled by an independent task. Failures in the
//! externally-dependent path are converted into health signals and never
//! propagate to the HTTP layer; the platform always gets its 200.

use crate::conversation::resolver::{ConversationResolver, EventIdentity};
use crate::conversation::store::ConversationStore;
use crate::conversation::{Conversation, Role};
use crate::health::{DedupGuard, HealthTracker};
use crate::llm::Responder;
use crate::platform::Platform;
use crate::prompts::PromptBuilder;
use crate::MessageEvent;

use std::sync::Arc;

/// Shared dependency bundle handed to every event handler.
#[derive(Clone)]
pub struct RelayDeps {
    pub store: ConversationStore,
    pub resolver: ConversationResolver,
    pub health: Arc<HealthTracker>,
    pub dedup: Arc<DedupGuard>,
    pub platform: Arc<dyn Platform>,
    pub responder: Arc<dyn Responder>,
    pub prompts: Arc<PromptBuilder>,
    /// Email of the bot account; events from this sender are skipped.
    pub bot_email: Option<String>,
}

impl RelayDeps {
    fn is_own_message(&self, sender_email: Option<&str>) -> bool {
        match (&self.bot_email, sender_email) {
            (Some(own), Some(sender)) => own.eq_ignore_ascii_case(sender),
            _ => false,
        }
    }
}

/// Handle one inbound message event end to end.
pub async fn handle_event(deps: RelayDeps, event: MessageEvent) {
    if deps.is_own_message(event.person_email.as_deref()) {
        tracing::debug!(message_id = %event.id, "skipping own message");
        return;
    }

    if deps.health.is_maintenance() {
        if try_recovery(&deps).await {
            tracing::info!(message_id = %event.id, "backend reachable again, resuming normal handling");
        } else {
            notify_maintenance(&deps, &event).await;
            return;
        }
    }

    let fetched = match deps.platform.fetch_message(&event.id).await {
        Ok(message) => message,
        Err(error) => {
            // Recovered by falling back to "no content": nothing to answer.
            tracing::warn!(%error, message_id = %event.id, "message fetch failed");
            return;
        }
    };

    // The envelope may omit the sender email; re-check against the fetch.
    if deps.is_own_message(fetched.person_email.as_deref()) {
        tracing::debug!(message_id = %event.id, "skipping own message");
        return;
    }

    let Some(text) = fetched.text.filter(|text| !text.trim().is_empty()) else {
        tracing::debug!(message_id = %event.id, "message has no text content");
        return;
    };

    let identity = EventIdentity {
        room_id: event.room_id.clone(),
        person_id: event.person_id.clone(),
        person_email: event
            .person_email
            .clone()
            .or(fetched.person_email.clone()),
        person_display_name: event.person_display_name.clone(),
    };

    // A storage fault here means "no conversation resolvable": the reply
    // still goes out, just without history.
    let conversation = deps.resolver.resolve(&identity).await;

    let history = match &conversation {
        Some(conversation) => deps
            .store
            .formatted_history(&conversation.id)
            .await
            .unwrap_or_else(|error| {
                tracing::warn!(%error, conversation_id = %conversation.id, "history load failed");
                String::new()
            }),
        None => String::new(),
    };

    // Persist the user message before invoking the responder, but never
    // gate the reply on the write landing.
    if let Some(conversation) = &conversation {
        spawn_append(&deps.store, conversation, Role::User, &text, Some(&event.id));
    }

    let prompt = match deps.prompts.build_reply(&history, &text) {
        Ok(prompt) => prompt,
        Err(error) => {
            tracing::warn!(%error, "prompt rendering failed, using raw message");
            text.clone()
        }
    };

    let reply = match deps.responder.generate(&prompt).await {
        Ok(reply) => {
            // The backend answered: clear the failure window and any
            // pending maintenance notices.
            deps.health.record_success();
            deps.dedup.clear();
            reply
        }
        Err(error) => {
            tracing::warn!(%error, message_id = %event.id, "generation failed");
            report_failure(&deps, &event.room_id, "generation").await;
            return;
        }
    };

    if let Err(error) = deps.platform.send_message(&event.room_id, &reply).await {
        tracing::warn!(%error, room_id = %event.room_id, "reply dispatch failed");
        report_failure(&deps, &event.room_id, "dispatch").await;
        return;
    }

    if let Some(conversation) = &conversation {
        spawn_append(&deps.store, conversation, Role::Assistant, &reply, None);
    }
}

/// Fixed prompt for checking whether the backend answers again.
const RECOVERY_PROMPT: &str = "Reply with the single word: ok";

/// While in maintenance, test the backend before falling back to the notice.
/// A successful generation is the recovery signal: the failure window resets
/// and the notice suppression set is dropped.
async fn try_recovery(deps: &RelayDeps) -> bool {
    match deps.responder.generate(RECOVERY_PROMPT).await {
        Ok(_) => {
            deps.health.record_success();
            deps.dedup.clear();
            true
        }
        Err(error) => {
            tracing::debug!(%error, "backend still unavailable");
            false
        }
    }
}

/// While in maintenance, answer each distinct inbound message at most once
/// with the fixed notice.
async fn notify_maintenance(deps: &RelayDeps, event: &MessageEvent) {
    let key = DedupGuard::key(&event.id, &event.person_id, &event.room_id);
    if !deps.dedup.first_sighting(&key) {
        tracing::debug!(message_id = %event.id, "maintenance notice already sent");
        return;
    }

    let notice = deps.prompts.maintenance_notice();
    if let Err(error) = deps.platform.send_message(&event.room_id, &notice).await {
        tracing::warn!(%error, room_id = %event.room_id, "maintenance notice dispatch failed");
        // Release the key so a redelivery can retry the notice.
        deps.dedup.forget(&key);
    }
}

/// Feed a failure into the tracker and send the one-time degraded notice
/// when a new error window opens.
async fn report_failure(deps: &RelayDeps, room_id: &str, context: &str) {
    let outcome = deps.health.record_failure(context);

    if outcome.first_of_window {
        let notice = deps.prompts.degraded_notice();
        if let Err(error) = deps.platform.send_message(room_id, &notice).await {
            tracing::warn!(%error, room_id, "degraded notice dispatch failed");
        }
    }
}

/// Persist a message on an independent task. Failures are only logged; the
/// response path never waits on storage.
fn spawn_append(
    store: &ConversationStore,
    conversation: &Conversation,
    role: Role,
    content: &str,
    message_id: Option<&str>,
) {
    let store = store.clone();
    let conversation_id = conversation.id.clone();
    let content = content.to_string();
    let message_id = message_id.map(String::from);

    tokio::spawn(async move {
        if let Err(error) = store
            .append(&conversation_id, role, &content, message_id.as_deref())
            .await
        {
            tracing::warn!(%error, conversation_id = %conversation_id, "failed to persist message");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConversationConfig, OrgProfile};
    use crate::error::{GenerationError, PlatformError};
    use crate::platform::PlatformMessage;
    use async_trait::async_trait;
    use sqlx::sqlite::SqlitePoolOptions;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::sync::Mutex;

    struct MockPlatform {
        sent: Mutex<Vec<(String, String)>>,
        fetch_text: Option<String>,
        fail_fetch: bool,
        fail_send: AtomicBool,
    }

    impl MockPlatform {
        fn new(fetch_text: Option<&str>) -> Self {
            Self {
                sent: Mutex::new(Vec::new()),
                fetch_text: fetch_text.map(String::from),
                fail_fetch: false,
                fail_send: AtomicBool::new(false),
            }
        }

        async fn sent(&self) -> Vec<(String, String)> {
            self.sent.lock().await.clone()
        }
    }

    #[async_trait]
    impl Platform for MockPlatform {
        async fn fetch_message(
            &self,
            message_id: &str,
        ) -> Result<PlatformMessage, PlatformError> {
            if self.fail_fetch {
                return Err(PlatformError::Fetch {
                    message_id: message_id.to_string(),
                    reason: "unreachable".into(),
                });
            }
            Ok(PlatformMessage {
                id: message_id.to_string(),
                room_id: Some("room-1".into()),
                person_email: Some("ana@example.com".into()),
                text: self.fetch_text.clone(),
            })
        }

        async fn send_message(&self, room_id: &str, text: &str) -> Result<(), PlatformError> {
            if self.fail_send.load(Ordering::SeqCst) {
                return Err(PlatformError::Dispatch {
                    room_id: room_id.to_string(),
                    reason: "unreachable".into(),
                });
            }
            self.sent
                .lock()
                .await
                .push((room_id.to_string(), text.to_string()));
            Ok(())
        }
    }

    struct MockResponder {
        reply: Option<String>,
    }

    #[async_trait]
    impl Responder for MockResponder {
        async fn generate(&self, _prompt: &str) -> Result<String, GenerationError> {
            self.reply
                .clone()
                .ok_or_else(|| GenerationError::RequestFailed("backend down".into()))
        }
    }

    async fn deps(platform: Arc<MockPlatform>, responder: MockResponder) -> RelayDeps {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("in-memory sqlite should connect");
        crate::db::initialize(&pool)
            .await
            .expect("schema should be created");

        let store = ConversationStore::new(pool, ConversationConfig::default());
        RelayDeps {
            resolver: ConversationResolver::new(store.clone()),
            store,
            health: Arc::new(HealthTracker::new()),
            dedup: Arc::new(DedupGuard::default()),
            platform,
            responder: Arc::new(responder),
            prompts: Arc::new(
                PromptBuilder::new(OrgProfile::default()).expect("template should compile"),
            ),
            bot_email: Some("bot@example.com".into()),
        }
    }

    fn event(message_id: &str) -> MessageEvent {
        MessageEvent {
            id: message_id.to_string(),
            room_id: "room-1".into(),
            person_id: "person-1".into(),
            person_email: Some("ana@example.com".into()),
            person_display_name: None,
        }
    }

    #[tokio::test]
    async fn happy_path_dispatches_reply_and_persists_both_sides() {
        let platform = Arc::new(MockPlatform::new(Some("what is the office wifi?")));
        let deps = deps(
            platform.clone(),
            MockResponder {
                reply: Some("ask reception for the guest network".into()),
            },
        )
        .await;

        handle_event(deps.clone(), event("msg-1")).await;

        let sent = platform.sent().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "room-1");
        assert_eq!(sent[0].1, "ask reception for the guest network");

        // The fire-and-forget appends run on spawned tasks; give them a tick.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        let conversation = deps
            .store
            .find_by_room_and_person("room-1", "person-1")
            .await
            .expect("lookup should succeed")
            .expect("conversation should exist");
        let retained = deps
            .store
            .recent_messages(&conversation.id)
            .await
            .expect("messages should load");
        assert_eq!(retained.len(), 2);
        assert_eq!(retained[0].role, Role::User);
        assert_eq!(retained[1].role, Role::Assistant);
    }

    #[tokio::test]
    async fn generation_failure_feeds_tracker_and_notifies_once_per_window() {
        let platform = Arc::new(MockPlatform::new(Some("anything")));
        let deps = deps(platform.clone(), MockResponder { reply: None }).await;

        handle_event(deps.clone(), event("msg-1")).await;
        handle_event(deps.clone(), event("msg-2")).await;

        let snapshot = deps.health.snapshot();
        assert_eq!(snapshot.error_count, 2);
        assert!(!snapshot.healthy);

        // Only the first failure of the window sends the degraded notice.
        let sent = platform.sent().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].1, deps.prompts.degraded_notice());
    }

    #[tokio::test]
    async fn third_failure_trips_maintenance_and_notices_dedup_per_message() {
        let platform = Arc::new(MockPlatform::new(Some("anything")));
        let deps = deps(platform.clone(), MockResponder { reply: None }).await;

        for n in 1..=3 {
            handle_event(deps.clone(), event(&format!("msg-{n}"))).await;
        }
        assert!(deps.health.is_maintenance());

        // In maintenance, each distinct message gets exactly one notice.
        handle_event(deps.clone(), event("msg-4")).await;
        handle_event(deps.clone(), event("msg-4")).await;
        handle_event(deps.clone(), event("msg-5")).await;

        let sent = platform.sent().await;
        let maintenance_notices: Vec<_> = sent
            .iter()
            .filter(|(_, text)| *text == deps.prompts.maintenance_notice())
            .collect();
        assert_eq!(maintenance_notices.len(), 2, "one per distinct message");
    }

    #[tokio::test]
    async fn maintenance_exits_when_backend_answers_again() {
        let platform = Arc::new(MockPlatform::new(Some("anything")));
        let failing = deps(platform.clone(), MockResponder { reply: None }).await;

        for n in 1..=3 {
            handle_event(failing.clone(), event(&format!("msg-{n}"))).await;
        }
        assert!(failing.health.is_maintenance());

        let recovered = RelayDeps {
            responder: Arc::new(MockResponder {
                reply: Some("back online".into()),
            }),
            ..failing
        };
        handle_event(recovered.clone(), event("msg-4")).await;

        assert!(!recovered.health.is_maintenance());
        assert_eq!(recovered.health.snapshot().error_count, 0);

        // The triggering message gets a normal reply, not the notice.
        let sent = platform.sent().await;
        assert_eq!(
            sent.last().map(|(_, text)| text.as_str()),
            Some("back online")
        );
    }

    #[tokio::test]
    async fn failed_maintenance_notice_is_retried_on_redelivery() {
        let platform = Arc::new(MockPlatform::new(Some("anything")));
        let deps = deps(platform.clone(), MockResponder { reply: None }).await;

        for n in 1..=3 {
            handle_event(deps.clone(), event(&format!("msg-{n}"))).await;
        }
        assert!(deps.health.is_maintenance());

        // First delivery: the notice dispatch itself fails, so the message
        // must not be remembered as already notified.
        platform.fail_send.store(true, Ordering::SeqCst);
        handle_event(deps.clone(), event("msg-4")).await;

        platform.fail_send.store(false, Ordering::SeqCst);
        handle_event(deps.clone(), event("msg-4")).await;

        let sent = platform.sent().await;
        let notices = sent
            .iter()
            .filter(|(_, text)| *text == deps.prompts.maintenance_notice())
            .count();
        assert_eq!(notices, 1, "redelivery gets the notice after a failed dispatch");
    }

    #[tokio::test]
    async fn fetch_failure_produces_no_reply_and_no_health_signal() {
        let mut platform = MockPlatform::new(Some("anything"));
        platform.fail_fetch = true;
        let platform = Arc::new(platform);
        let deps = deps(
            platform.clone(),
            MockResponder {
                reply: Some("never sent".into()),
            },
        )
        .await;

        handle_event(deps.clone(), event("msg-1")).await;

        assert!(platform.sent().await.is_empty());
        assert_eq!(deps.health.snapshot().error_count, 0);
    }

    #[tokio::test]
    async fn own_messages_are_skipped() {
        let platform = Arc::new(MockPlatform::new(Some("echo")));
        let deps = deps(
            platform.clone(),
            MockResponder {
                reply: Some("never sent".into()),
            },
        )
        .await;

        let mut own = event("msg-1");
        own.person_email = Some("bot@example.com".into());
        handle_event(deps, own).await;

        assert!(platform.sent().await.is_empty());
    }

    #[tokio::test]
    async fn successful_generation_clears_the_failure_window() {
        let platform = Arc::new(MockPlatform::new(Some("anything")));
        let failing = deps(platform.clone(), MockResponder { reply: None }).await;

        handle_event(failing.clone(), event("msg-1")).await;
        assert_eq!(failing.health.snapshot().error_count, 1);

        let recovering = RelayDeps {
            responder: Arc::new(MockResponder {
                reply: Some("back online".into()),
            }),
            ..failing
        };
        handle_event(recovering.clone(), event("msg-2")).await;

        let snapshot = recovering.health.snapshot();
        assert!(snapshot.healthy);
        assert_eq!(snapshot.error_count, 0);
    }
}

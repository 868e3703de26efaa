//! Session resolution: find or create the conversation a turn belongs to.
//!
//! A conversation whose last turn is older than the staleness window, or
//! one that has already ended, is superseded by a fresh conversation under a
//! derived session id `<base>_stale_<epoch-secs>`. The suffix is the
//! superseded conversation's last activity, so repeated calls derive the
//! same id until someone speaks under it.

use std::sync::Arc;

use serde_json::{Map, Value};

use super::error::{PipelineError, Result, Stage};
use super::types::SessionContext;
use crate::conversation::store::{ConversationStore, StoreError};
use crate::conversation::types::{Conversation, ConversationMetadata, NewConversation, now_epoch_secs};
use crate::persona::PersonaState;

/// Separator between the original session id and the staleness timestamp.
pub const STALE_SUFFIX: &str = "_stale_";

/// End reason recorded on superseded conversations.
pub const STALE_END_REASON: &str = "stale";

/// Attempts at finding an unused derived id before giving up.
const MAX_DERIVE_ATTEMPTS: u64 = 16;

/// Outcome of trying to create a conversation under a session id.
enum Claim {
    /// Created, or already created by a concurrent request and still usable.
    Ready(Conversation),
    /// The id belongs to an ended or stale conversation.
    Taken(Conversation),
}

/// Strip one trailing `_stale_<digits>` suffix.
pub fn base_session_id(session_id: &str) -> &str {
    match session_id.rfind(STALE_SUFFIX) {
        Some(idx) => {
            let tail = &session_id[idx + STALE_SUFFIX.len()..];
            if !tail.is_empty() && tail.bytes().all(|b| b.is_ascii_digit()) {
                &session_id[..idx]
            } else {
                session_id
            }
        }
        None => session_id,
    }
}

/// Derived session id for `base` at `timestamp`.
pub fn derive_session_id(base: &str, timestamp: u64) -> String {
    format!("{base}{STALE_SUFFIX}{timestamp}")
}

/// Finds or creates the conversation for a session id.
pub struct SessionResolver {
    store: Arc<dyn ConversationStore>,
    persona_state: Arc<dyn PersonaState>,
    staleness_window_secs: u64,
}

impl SessionResolver {
    pub fn new(
        store: Arc<dyn ConversationStore>,
        persona_state: Arc<dyn PersonaState>,
        staleness_window_secs: u64,
    ) -> Self {
        Self {
            store,
            persona_state,
            staleness_window_secs,
        }
    }

    /// Resolve the conversation for `session_id` at the current time.
    pub fn resolve(
        &self,
        session_id: &str,
        context: Option<&Map<String, Value>>,
    ) -> Result<SessionContext> {
        self.resolve_at(session_id, context, now_epoch_secs())
    }

    /// Resolve with an explicit clock.
    pub fn resolve_at(
        &self,
        session_id: &str,
        context: Option<&Map<String, Value>>,
        now: u64,
    ) -> Result<SessionContext> {
        let session_id = session_id.trim();
        if session_id.is_empty() {
            return Err(PipelineError::missing("session_id"));
        }
        let context = context.ok_or_else(|| PipelineError::missing("context"))?;

        let persona = self.resolve_persona(context)?;

        let conversation = match self.store.find_by_session(session_id)? {
            None => {
                tracing::info!(session_id, persona = %persona, "starting conversation");
                match self.claim(session_id, &persona, context, now)? {
                    Claim::Ready(conversation) => conversation,
                    Claim::Taken(existing) => self.supersede(existing, &persona, context, now)?,
                }
            }
            Some(existing) if existing.is_active() && !self.is_stale(&existing, now)? => {
                self.ensure_persona(existing, &persona)?
            }
            Some(existing) => self.supersede(existing, &persona, context, now)?,
        };

        Ok(SessionContext {
            session_id: conversation.session_id.clone(),
            conversation,
            persona,
        })
    }

    fn resolve_persona(&self, context: &Map<String, Value>) -> Result<String> {
        let current = self.persona_state.current();
        let requested = context
            .get("persona")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|p| !p.is_empty());

        match (requested, current) {
            (Some(requested), current) if current.as_deref() != Some(requested) => {
                tracing::warn!(
                    requested,
                    current = current.as_deref().unwrap_or("none"),
                    "persona override from request context"
                );
                Ok(requested.to_owned())
            }
            (_, Some(current)) => Ok(current),
            (_, None) => Err(PipelineError::NoPersonaAvailable(
                "no persona selected and none requested".to_owned(),
            )),
        }
    }

    /// A conversation is stale once its newest turn is older than the window.
    /// Conversations with no turns never go stale.
    fn is_stale(&self, conversation: &Conversation, now: u64) -> Result<bool> {
        let last = self.store.last_log_at(&conversation.session_id)?;
        Ok(last.is_some_and(|at| now.saturating_sub(at) > self.staleness_window_secs))
    }

    fn last_activity(&self, conversation: &Conversation) -> Result<u64> {
        let last_log = self.store.last_log_at(&conversation.session_id)?;
        Ok(last_log
            .or(conversation.ended_at)
            .unwrap_or(conversation.started_at))
    }

    fn ensure_persona(&self, mut conversation: Conversation, persona: &str) -> Result<Conversation> {
        if conversation.persona.is_none() {
            self.store.set_persona(conversation.id, persona)?;
            conversation.persona = Some(persona.to_owned());
        }
        Ok(conversation)
    }

    /// Create `session_id`, or join the conversation a concurrent request
    /// created under it first.
    fn claim(
        &self,
        session_id: &str,
        persona: &str,
        context: &Map<String, Value>,
        now: u64,
    ) -> Result<Claim> {
        let new = NewConversation {
            session_id: session_id.to_owned(),
            persona: Some(persona.to_owned()),
            metadata: initial_metadata(context),
        };
        match self.store.create(&new) {
            Ok(created) => Ok(Claim::Ready(created)),
            Err(StoreError::DuplicateSession(_)) => {
                let existing = self.store.find_by_session(session_id)?.ok_or_else(|| {
                    PipelineError::stage(
                        Stage::Setup,
                        format!("session {session_id} vanished after a duplicate create"),
                    )
                })?;
                if existing.is_active() && !self.is_stale(&existing, now)? {
                    tracing::debug!(session_id, "joining conversation created concurrently");
                    Ok(Claim::Ready(self.ensure_persona(existing, persona)?))
                } else {
                    Ok(Claim::Taken(existing))
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Retire `old` and hand back the conversation that replaces it.
    fn supersede(
        &self,
        old: Conversation,
        persona: &str,
        context: &Map<String, Value>,
        now: u64,
    ) -> Result<Conversation> {
        self.retire(&old)?;

        let base = base_session_id(&old.session_id).to_owned();
        let prefix = format!("{base}{STALE_SUFFIX}");

        // The newest derived conversation may already be the live one.
        let mut latest = self.store.latest_with_prefix(&prefix)?;
        if let Some(derived) = latest.take_if(|d| d.id != old.id) {
            if derived.is_active() && !self.is_stale(&derived, now)? {
                tracing::debug!(
                    session_id = %old.session_id,
                    derived = %derived.session_id,
                    "reusing derived conversation"
                );
                return self.ensure_persona(derived, persona);
            }
            self.retire(&derived)?;
            latest = Some(derived);
        }

        let source = latest.as_ref().unwrap_or(&old);
        let stamp = self.last_activity(source)?;

        for attempt in 0..MAX_DERIVE_ATTEMPTS {
            let candidate = derive_session_id(&base, stamp + attempt);
            if let Claim::Ready(conversation) = self.claim(&candidate, persona, context, now)? {
                tracing::info!(
                    session_id = %old.session_id,
                    new_session_id = %candidate,
                    "conversation went stale, starting fresh"
                );
                return Ok(conversation);
            }
        }

        Err(PipelineError::stage(
            Stage::Setup,
            format!("could not derive a fresh session id for {base}"),
        ))
    }

    fn retire(&self, conversation: &Conversation) -> Result<()> {
        if conversation.is_active() {
            self.store.end(conversation.id, STALE_END_REASON)?;
        }
        Ok(())
    }
}

/// `{agent_id, device_id, source}` from the request context, non-null keys only.
fn initial_metadata(context: &Map<String, Value>) -> ConversationMetadata {
    let field = |key: &str| {
        context
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_owned)
    };
    ConversationMetadata {
        agent_id: field("agent_id"),
        device_id: field("device_id"),
        source: field("source"),
        ..ConversationMetadata::default()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;
    use crate::conversation::sqlite::SqliteStore;
    use crate::conversation::types::NewLogEntry;
    use crate::persona::SharedPersonaState;

    const WINDOW: u64 = 300;

    fn fixture(persona: &str) -> (Arc<SqliteStore>, SessionResolver) {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let resolver = SessionResolver::new(
            store.clone(),
            Arc::new(SharedPersonaState::new(persona)),
            WINDOW,
        );
        (store, resolver)
    }

    fn ctx(pairs: &[(&str, Value)]) -> Map<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), v.clone()))
            .collect()
    }

    fn log_at(store: &SqliteStore, session_id: &str, at: u64) {
        let entry = NewLogEntry {
            session_id: session_id.to_owned(),
            user_message: "hi".to_owned(),
            ai_response: "hello".to_owned(),
            ..NewLogEntry::default()
        };
        store.append_log_at(&entry, at).unwrap();
    }

    #[test]
    fn strips_one_stale_suffix() {
        assert_eq!(base_session_id("xyz_stale_123"), "xyz");
        assert_eq!(base_session_id("xyz"), "xyz");
        assert_eq!(base_session_id("xyz_stale_abc"), "xyz_stale_abc");
        assert_eq!(base_session_id("xyz_stale_"), "xyz_stale_");
        assert_eq!(derive_session_id("xyz", 42), "xyz_stale_42");
    }

    #[test]
    fn blank_session_or_missing_context_is_invalid() {
        let (_store, resolver) = fixture("buddy");
        let err = resolver.resolve("  ", Some(&Map::new())).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidInput(_)));
        let err = resolver.resolve("abc", None).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidInput(_)));
    }

    #[test]
    fn no_persona_is_reported() {
        let (_store, resolver) = fixture("");
        let err = resolver.resolve("abc", Some(&Map::new())).unwrap_err();
        assert!(matches!(err, PipelineError::NoPersonaAvailable(_)));
    }

    #[test]
    fn context_persona_overrides_current() {
        let (_store, resolver) = fixture("buddy");
        let context = ctx(&[("persona", Value::from("jax"))]);
        let resolved = resolver.resolve("abc", Some(&context)).unwrap();
        assert_eq!(resolved.persona, "jax");
        assert_eq!(resolved.conversation.persona.as_deref(), Some("jax"));
    }

    #[test]
    fn fresh_session_creates_conversation_with_context_metadata() {
        let (store, resolver) = fixture("buddy");
        let context = ctx(&[
            ("device_id", Value::from("cube-1")),
            ("agent_id", Value::Null),
            ("source", Value::from("voice")),
        ]);
        let resolved = resolver.resolve("abc", Some(&context)).unwrap();

        assert_eq!(resolved.session_id, "abc");
        assert!(resolved.conversation.is_active());
        assert_eq!(resolved.persona, "buddy");
        let meta = &resolved.conversation.metadata;
        assert_eq!(meta.device_id.as_deref(), Some("cube-1"));
        assert_eq!(meta.source.as_deref(), Some("voice"));
        assert!(meta.agent_id.is_none());
        assert!(store.find_by_session("abc").unwrap().is_some());
    }

    #[test]
    fn repeated_calls_reuse_active_conversation() {
        let (_store, resolver) = fixture("buddy");
        let first = resolver.resolve("abc", Some(&Map::new())).unwrap();
        let second = resolver.resolve("abc", Some(&Map::new())).unwrap();
        assert_eq!(first.conversation.id, second.conversation.id);
    }

    #[test]
    fn concurrent_first_turns_share_one_conversation() {
        let (store, resolver) = fixture("buddy");
        let sessions: Vec<String> = (0..200).map(|i| format!("dup-{i}")).collect();

        let outcomes: Vec<Vec<i64>> = std::thread::scope(|scope| {
            let workers: Vec<_> = (0..2)
                .map(|_| {
                    scope.spawn(|| {
                        sessions
                            .iter()
                            .map(|sid| resolver.resolve(sid, Some(&Map::new())).unwrap().conversation.id)
                            .collect::<Vec<_>>()
                    })
                })
                .collect();
            workers.into_iter().map(|w| w.join().unwrap()).collect()
        });

        assert_eq!(outcomes[0], outcomes[1]);
        for sid in &sessions {
            assert!(store.find_by_session(sid).unwrap().unwrap().is_active());
        }
    }

    #[test]
    fn claim_joins_existing_active_conversation() {
        let (store, resolver) = fixture("buddy");
        let existing = store
            .create(&NewConversation {
                session_id: "abc".into(),
                ..NewConversation::default()
            })
            .unwrap();

        match resolver.claim("abc", "buddy", &Map::new(), 10_000).unwrap() {
            Claim::Ready(conv) => {
                assert_eq!(conv.id, existing.id);
                assert_eq!(conv.persona.as_deref(), Some("buddy"));
            }
            Claim::Taken(_) => panic!("active conversation should be joined"),
        }

        store.end(existing.id, "natural_end").unwrap();
        assert!(matches!(
            resolver.claim("abc", "buddy", &Map::new(), 10_000).unwrap(),
            Claim::Taken(conv) if conv.id == existing.id
        ));
    }

    #[test]
    fn missing_persona_is_backfilled() {
        let (store, resolver) = fixture("buddy");
        let conv = store
            .create(&NewConversation {
                session_id: "abc".into(),
                ..NewConversation::default()
            })
            .unwrap();
        let resolved = resolver.resolve("abc", Some(&Map::new())).unwrap();
        assert_eq!(resolved.conversation.id, conv.id);
        assert_eq!(
            store.get(conv.id).unwrap().unwrap().persona.as_deref(),
            Some("buddy")
        );
    }

    #[test]
    fn stale_session_gets_derived_id() {
        let (store, resolver) = fixture("buddy");
        let now = 10_000;
        let original = resolver.resolve_at("xyz", Some(&Map::new()), now).unwrap();
        log_at(&store, "xyz", now - 600);

        let resolved = resolver.resolve_at("xyz", Some(&Map::new()), now).unwrap();
        assert_eq!(resolved.session_id, format!("xyz_stale_{}", now - 600));
        assert_ne!(resolved.conversation.id, original.conversation.id);

        let old = store.get(original.conversation.id).unwrap().unwrap();
        assert!(!old.is_active());
        assert_eq!(old.end_reason.as_deref(), Some(STALE_END_REASON));
    }

    #[test]
    fn stale_detection_is_idempotent() {
        let (store, resolver) = fixture("buddy");
        let now = 10_000;
        resolver.resolve_at("xyz", Some(&Map::new()), now).unwrap();
        log_at(&store, "xyz", now - 600);

        let first = resolver.resolve_at("xyz", Some(&Map::new()), now).unwrap();
        let second = resolver.resolve_at("xyz", Some(&Map::new()), now + 5).unwrap();
        assert_eq!(first.session_id, second.session_id);
        assert_eq!(first.conversation.id, second.conversation.id);
    }

    #[test]
    fn recent_activity_is_not_stale() {
        let (store, resolver) = fixture("buddy");
        let now = 10_000;
        let original = resolver.resolve_at("xyz", Some(&Map::new()), now).unwrap();
        log_at(&store, "xyz", now - 60);
        let resolved = resolver.resolve_at("xyz", Some(&Map::new()), now).unwrap();
        assert_eq!(resolved.conversation.id, original.conversation.id);
    }

    #[test]
    fn stale_derived_session_does_not_chain_suffixes() {
        let (store, resolver) = fixture("buddy");
        let now = 10_000;
        resolver.resolve_at("xyz", Some(&Map::new()), now).unwrap();
        log_at(&store, "xyz", now - 600);
        let derived = resolver.resolve_at("xyz", Some(&Map::new()), now).unwrap();

        let later = now + 1_000;
        log_at(&store, &derived.session_id, later - 400);
        let next = resolver
            .resolve_at(&derived.session_id, Some(&Map::new()), later)
            .unwrap();
        assert_eq!(next.session_id, format!("xyz_stale_{}", later - 400));
        assert!(!store.get(derived.conversation.id).unwrap().unwrap().is_active());
    }

    #[test]
    fn ended_conversation_is_superseded() {
        let (store, resolver) = fixture("buddy");
        let original = resolver.resolve("abc", Some(&Map::new())).unwrap();
        store.end(original.conversation.id, "natural_end").unwrap();

        let resolved = resolver.resolve("abc", Some(&Map::new())).unwrap();
        assert!(resolved.session_id.starts_with("abc_stale_"));
        assert!(resolved.conversation.is_active());
    }
}

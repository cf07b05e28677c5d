//! Message store - ordered, paginated message list of the active conversation

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

use crate::backend::ChatBackend;
use crate::events::{ChatEvent, EventSink};
use crate::models::{Message, ProfileSummary};
use crate::profiles::ProfileCache;
use crate::timeline::{Reconciled, Timeline};

/// Outcome of a page load
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageOutcome {
    /// The latest page replaced the list
    Loaded { count: usize, has_more: bool },
    /// An older page was merged in front of the list
    Merged { prepended: usize, has_more: bool },
    /// Not attempted: a load is in flight, history is exhausted, or there is no cursor
    Skipped,
    /// The conversation changed while the request was in flight; the response was dropped
    Stale,
    /// The backend failed; state is unchanged
    Failed,
}

/// Single writer of the rendered message list.
///
/// Async page loads capture the active conversation and generation before
/// suspending, and only apply their response if both are still current. All
/// other mutations are synchronous and are ignored when they target a
/// conversation that is no longer active.
pub struct MessageStore {
    backend: Arc<dyn ChatBackend>,
    profiles: Arc<ProfileCache>,
    events: EventSink,
    timeline: Mutex<Timeline>,
}

impl MessageStore {
    pub fn new(backend: Arc<dyn ChatBackend>, profiles: Arc<ProfileCache>, events: EventSink) -> Self {
        Self {
            backend,
            profiles,
            events,
            timeline: Mutex::new(Timeline::new()),
        }
    }

    /// Reset the store for a new active conversation (or none)
    pub fn activate(&self, conversation_id: Option<&str>) -> u64 {
        let generation = self
            .timeline
            .lock()
            .reset(conversation_id.map(str::to_string));
        debug!(?conversation_id, generation, "Message store reset");
        generation
    }

    pub fn active_conversation_id(&self) -> Option<String> {
        self.timeline.lock().conversation_id().map(str::to_string)
    }

    /// Copy of the rendered list
    pub fn messages(&self) -> Vec<Message> {
        self.timeline.lock().messages().to_vec()
    }

    pub fn message(&self, message_id: &str) -> Option<Message> {
        self.timeline.lock().get(message_id).cloned()
    }

    pub fn cursor(&self) -> Option<DateTime<Utc>> {
        self.timeline.lock().cursor()
    }

    pub fn has_more(&self) -> bool {
        self.timeline.lock().has_more()
    }

    pub fn is_loading_older(&self) -> bool {
        self.timeline.lock().is_loading_older()
    }

    /// Fetch the newest `page_size` messages and install them as the list
    #[instrument(skip(self))]
    pub async fn load_latest_page(&self, conversation_id: &str, page_size: usize) -> PageOutcome {
        let generation = {
            let timeline = self.timeline.lock();
            if !timeline.is_active(conversation_id) {
                return PageOutcome::Stale;
            }
            timeline.generation()
        };

        let page = match self
            .backend
            .fetch_messages(conversation_id, page_size, None)
            .await
        {
            Ok(page) => page,
            Err(e) => {
                warn!(error = %e, "Failed to load latest messages");
                return PageOutcome::Failed;
            }
        };
        let profiles = self.resolve_senders(&page).await;

        let outcome = {
            let mut timeline = self.timeline.lock();
            if !timeline.is_current(conversation_id, generation) {
                debug!("Dropping latest page for inactive conversation");
                return PageOutcome::Stale;
            }
            let count = page.len();
            timeline.replace_with_latest(page, page_size);
            timeline.attach_profiles(&profiles);
            PageOutcome::Loaded {
                count,
                has_more: timeline.has_more(),
            }
        };

        debug!(?outcome, "Latest page loaded");
        self.events.messages_changed(conversation_id);
        outcome
    }

    /// Fetch messages strictly older than `before` and merge them in front
    #[instrument(skip(self))]
    pub async fn load_older_page(
        &self,
        conversation_id: &str,
        before: DateTime<Utc>,
        page_size: usize,
    ) -> PageOutcome {
        let generation = {
            let mut timeline = self.timeline.lock();
            if !timeline.is_active(conversation_id) {
                return PageOutcome::Stale;
            }
            if !timeline.begin_older_load() {
                debug!(
                    in_flight = timeline.is_loading_older(),
                    has_more = timeline.has_more(),
                    "Skipping older page"
                );
                return PageOutcome::Skipped;
            }
            timeline.generation()
        };

        let page = match self
            .backend
            .fetch_messages(conversation_id, page_size, Some(before))
            .await
        {
            Ok(page) => page,
            Err(e) => {
                warn!(error = %e, "Failed to load older messages");
                let mut timeline = self.timeline.lock();
                if timeline.is_current(conversation_id, generation) {
                    timeline.finish_older_load();
                }
                return PageOutcome::Failed;
            }
        };
        let profiles = self.resolve_senders(&page).await;

        let (prepended, has_more) = {
            let mut timeline = self.timeline.lock();
            if !timeline.is_current(conversation_id, generation) {
                debug!("Dropping older page for inactive conversation");
                return PageOutcome::Stale;
            }
            let prepended = timeline.prepend_older(page, page_size);
            timeline.attach_profiles(&profiles);
            timeline.finish_older_load();
            (prepended, timeline.has_more())
        };

        debug!(prepended, has_more, "Older page merged");
        self.events.emit(ChatEvent::OlderPageMerged {
            conversation_id: conversation_id.to_string(),
            prepended,
        });
        PageOutcome::Merged {
            prepended,
            has_more,
        }
    }

    /// Append a locally created pending message
    pub fn push_pending(&self, message: Message) -> bool {
        let conversation_id = message.conversation_id.clone();
        let pushed = self.with_active(&conversation_id, |timeline| {
            timeline.insert_ordered(message)
        });
        if pushed == Some(true) {
            self.events.messages_changed(&conversation_id);
            true
        } else {
            false
        }
    }

    /// Fold an authoritative message from the change feed
    pub fn reconcile(&self, message: Message) -> Option<Reconciled> {
        let conversation_id = message.conversation_id.clone();
        let outcome = self.with_active(&conversation_id, |timeline| timeline.reconcile(message))?;
        if outcome.inserted || outcome.replaced_pending.is_some() {
            self.events.messages_changed(&conversation_id);
        }
        Some(outcome)
    }

    pub fn remove(&self, conversation_id: &str, message_id: &str) -> Option<Message> {
        let removed = self
            .with_active(conversation_id, |timeline| timeline.remove(message_id))
            .flatten();
        if removed.is_some() {
            self.events.messages_changed(conversation_id);
        }
        removed
    }

    /// Mutate one message of the active conversation in place
    pub fn update<R>(
        &self,
        conversation_id: &str,
        message_id: &str,
        f: impl FnOnce(&mut Message) -> R,
    ) -> Option<R> {
        let result = self
            .with_active(conversation_id, |timeline| timeline.update(message_id, f))
            .flatten();
        if result.is_some() {
            self.events.messages_changed(conversation_id);
        }
        result
    }

    pub fn attach_profile(&self, conversation_id: &str, profile: &ProfileSummary) -> usize {
        let patched = self
            .with_active(conversation_id, |timeline| timeline.attach_profile(profile))
            .unwrap_or(0);
        if patched > 0 {
            self.events.messages_changed(conversation_id);
        }
        patched
    }

    fn with_active<R>(&self, conversation_id: &str, f: impl FnOnce(&mut Timeline) -> R) -> Option<R> {
        let mut timeline = self.timeline.lock();
        if !timeline.is_active(conversation_id) {
            debug!(conversation_id, "Ignoring change for inactive conversation");
            return None;
        }
        Some(f(&mut timeline))
    }

    async fn resolve_senders(
        &self,
        page: &[Message],
    ) -> std::collections::HashMap<String, ProfileSummary> {
        let senders: HashSet<&str> = page.iter().map(|m| m.sender_id.as_str()).collect();
        if senders.is_empty() {
            return Default::default();
        }
        self.profiles.resolve_many(senders).await
    }
}

//! Events emitted by the messaging core for the presentation layer

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::trace;

/// User-initiated action whose failure is shown to the user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum UserAction {
    Send,
    Delete,
    Edit,
    React,
    CreateConversation,
    OpenConversation,
    Leave,
}

/// Core event
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ChatEvent {
    ConversationsLoaded { count: usize },
    ConversationSelected { conversation_id: String },
    /// The message list of the conversation changed and should be re-rendered
    MessagesChanged { conversation_id: String },
    /// An older page was merged in front of the list.
    ///
    /// `prepended` is the number of entries added at the top; the view keeps its
    /// scroll anchor by offsetting with the height of those entries.
    OlderPageMerged {
        conversation_id: String,
        prepended: usize,
    },
    ActionFailed { action: UserAction, reason: String },
    SignInRequired,
}

/// Sending half of the event channel.
///
/// A dropped receiver is not an error: events are best effort.
#[derive(Debug, Clone)]
pub struct EventSink {
    sender: mpsc::UnboundedSender<ChatEvent>,
}

impl EventSink {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ChatEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    pub fn emit(&self, event: ChatEvent) {
        if self.sender.send(event).is_err() {
            trace!("Event receiver dropped");
        }
    }

    pub fn action_failed(&self, action: UserAction, reason: impl ToString) {
        self.emit(ChatEvent::ActionFailed {
            action,
            reason: reason.to_string(),
        });
    }

    pub fn messages_changed(&self, conversation_id: &str) {
        self.emit(ChatEvent::MessagesChanged {
            conversation_id: conversation_id.to_string(),
        });
    }
}

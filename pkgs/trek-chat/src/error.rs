//! Error types for the messaging core.
//!
//! Collaborators report failures as [`BackendError`]. Core operations wrap those
//! in [`ChatError`], and every [`ChatError`] can be classified with
//! [`ChatError::class`] so callers can tell a degraded read from a failed write.

use thiserror::Error;

/// A type alias for `Result<T, ChatError>`.
pub type Result<T> = std::result::Result<T, ChatError>;

/// Failures reported by the backend collaborators.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BackendError {
    /// The request reached the backend (or tried to) and failed.
    #[error("Backend request failed: {0}")]
    Request(String),

    /// The requested row does not exist or is not visible to the caller.
    #[error("Record not found: {0}")]
    NotFound(String),

    /// The change feed could not be opened or broke while open.
    #[error("Subscription error: {0}")]
    Subscription(String),

    /// The backend rejected the call because there is no session.
    #[error("Not authenticated")]
    Unauthenticated,
}

/// How a failure should be treated by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Transient backend failure on a read. Present an empty or partial result.
    ReadFailure,
    /// Transient backend failure on a write. Tell the user.
    WriteFailure,
    /// Change feed failure. Log only.
    Subscription,
    /// No user identity. Prompt for sign-in, no backend call was made.
    NotAuthenticated,
    /// The request was refused locally before reaching the backend.
    Rejected,
}

/// Errors returned by messaging core operations.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("Not signed in")]
    NotAuthenticated,

    #[error("Message content is empty")]
    EmptyContent,

    #[error("No conversation is active")]
    NoActiveConversation,

    #[error("Conversation not found: {0}")]
    ConversationNotFound(String),

    #[error("Message not found: {0}")]
    MessageNotFound(String),

    #[error("Only the sender can change message {0}")]
    NotSender(String),

    #[error("Message {0} has been deleted")]
    MessageDeleted(String),

    #[error("Message {0} has not been confirmed yet")]
    MessagePending(String),

    #[error("Delete was not confirmed")]
    NotConfirmed,

    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl ChatError {
    /// Classify this error against the failure taxonomy.
    ///
    /// Backend errors are write failures here because every operation that can
    /// return one to the caller is a user-initiated write. Read paths swallow
    /// their backend errors before they reach a `ChatError`.
    pub fn class(&self) -> ErrorClass {
        match self {
            ChatError::NotAuthenticated => ErrorClass::NotAuthenticated,
            ChatError::Backend(BackendError::Unauthenticated) => ErrorClass::NotAuthenticated,
            ChatError::Backend(BackendError::Subscription(_)) => ErrorClass::Subscription,
            ChatError::Backend(_) => ErrorClass::WriteFailure,
            _ => ErrorClass::Rejected,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_errors_classify_as_write_failures() {
        let err = ChatError::from(BackendError::Request("timeout".to_string()));
        assert_eq!(err.class(), ErrorClass::WriteFailure);
        assert!(err.to_string().contains("timeout"));
    }

    #[test]
    fn test_unauthenticated_backend_error_is_not_authenticated() {
        let err = ChatError::from(BackendError::Unauthenticated);
        assert_eq!(err.class(), ErrorClass::NotAuthenticated);
        assert_eq!(ChatError::NotAuthenticated.class(), ErrorClass::NotAuthenticated);
    }

    #[test]
    fn test_local_refusals_are_rejected() {
        assert_eq!(ChatError::EmptyContent.class(), ErrorClass::Rejected);
        assert_eq!(
            ChatError::NotSender("m1".to_string()).class(),
            ErrorClass::Rejected
        );
        assert_eq!(
            ChatError::from(BackendError::Subscription("closed".to_string())).class(),
            ErrorClass::Subscription
        );
    }
}

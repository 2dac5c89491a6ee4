//! Error taxonomy shared by the composition flow, the delivery engine and
//! the platform client.
use thiserror::Error;

/// Rejected admin input. Every variant renders as a corrective message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("The text is empty. Please send some text for the post.")]
    EmptyText,
    #[error("The text is too long: {actual} characters (maximum {max}).")]
    TextTooLong { actual: usize, max: usize },
    #[error("Tag <{tag}> is not supported. Allowed tags: b, strong, i, em, u, ins, s, strike, del, code, pre, a, spoiler.")]
    UnknownTag { tag: String },
    #[error("Closing tag </{found}> does not match the open tag <{expected}>.")]
    MismatchedClose { expected: String, found: String },
    #[error("Closing tag </{tag}> has no matching opening tag.")]
    UnexpectedClose { tag: String },
    #[error("Tag <{tag}> is never closed.")]
    Unclosed { tag: String },
    #[error("The {kind} is too large: {size} bytes (maximum {max}).")]
    MediaTooLarge {
        kind: &'static str,
        size: u64,
        max: u64,
    },
    #[error("A post can hold at most {max} media items.")]
    TooManyMedia { max: usize },
    #[error("A {kind} cannot share a post with a {present}. Albums take photos and videos together, documents only, or a single animation.")]
    IncompatibleMedia {
        kind: &'static str,
        present: &'static str,
    },
    #[error("Line {line}: expected `label | url`.")]
    ButtonFormat { line: usize },
    #[error("Line {line}: the button label must be 1 to {max} characters.")]
    ButtonLabel { line: usize, max: usize },
    #[error("Line {line}: `{url}` is not an absolute URL.")]
    ButtonUrl { line: usize, url: String },
    #[error("That day is already over. Please pick today or a later date.")]
    PastDate,
    #[error("That time has already passed. Please pick a later time.")]
    PastTime,
    #[error("Minutes must be one of 0, 15, 30 or 45.")]
    MinuteNotQuantized,
    #[error("Hour must be between 0 and 23.")]
    InvalidHour,
    #[error("That channel is not available. Pick one from the list.")]
    ChannelUnavailable,
    #[error("Choose when to publish before confirming.")]
    MissingIntent,
    #[error("Published posts cannot be edited. Duplicate it instead.")]
    PublishedNotEditable,
    #[error("That step does not accept this input.")]
    UnexpectedInput,
}

/// Failure of a composition step or command.
#[derive(Debug, Error)]
pub enum ComposeError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("{0} was not found")]
    NotFound(String),
    #[error("composition session expired")]
    SessionExpired,
    #[error("repository failure: {0:#}")]
    Repository(#[from] anyhow::Error),
}

impl ComposeError {
    /// Human readable message for the admin. Never leaks internal detail.
    pub fn user_message(&self) -> String {
        match self {
            ComposeError::Validation(err) => err.to_string(),
            ComposeError::NotFound(what) => format!(
                "{} was not found. Try again or use /drafts and /channels to see what exists.",
                what
            ),
            ComposeError::SessionExpired => {
                "Your draft session has expired. Send /newpost to start again.".to_string()
            }
            ComposeError::Repository(_) => {
                "Something went wrong with the database. Please try again.".to_string()
            }
        }
    }
}

/// Failure reported by the messaging platform client.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    /// Rate limit, timeout or temporary outage; worth retrying.
    #[error("transient platform error: {0}")]
    Transient(String),
    /// Missing rights, deleted chat or content rejected by the platform.
    #[error("permanent platform error: {0}")]
    Permanent(String),
}

/// Typed failure of a delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    #[error("transient delivery failure: {0}")]
    Transient(String),
    #[error("permanent delivery failure: {0}")]
    Permanent(String),
    #[error("post {0} not found")]
    NotFound(i64),
    #[error("storage failure: {0}")]
    Repository(String),
}

impl DeliveryError {
    pub fn is_permanent(&self) -> bool {
        matches!(self, DeliveryError::Permanent(_) | DeliveryError::NotFound(_))
    }
}

impl From<ClientError> for DeliveryError {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::Transient(msg) => DeliveryError::Transient(msg),
            ClientError::Permanent(msg) => DeliveryError::Permanent(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_too_long_names_both_lengths() {
        let msg = ValidationError::TextTooLong {
            actual: 4097,
            max: 4096,
        }
        .to_string();
        assert!(msg.contains("4097"));
        assert!(msg.contains("4096"));
    }

    #[test]
    fn repository_errors_stay_generic_for_admins() {
        let err = ComposeError::Repository(anyhow::anyhow!("database is locked at /var/lib/x"));
        let msg = err.user_message();
        assert!(!msg.contains("/var/lib"));
        assert!(!msg.contains("locked"));
    }

    #[test]
    fn client_errors_map_to_delivery_classes() {
        assert!(DeliveryError::from(ClientError::Permanent("kicked".into())).is_permanent());
        assert!(!DeliveryError::from(ClientError::Transient("timeout".into())).is_permanent());
    }
}

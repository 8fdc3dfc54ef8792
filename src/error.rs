//! User-visible error taxonomy. `Display` strings are part of the
//! wire/CLI contract — do not reword them.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("No {0} provided.")]
    MissingField(&'static str),

    #[error("Invalid userid: {0}")]
    InvalidUserId(String),

    #[error("Unknown command.")]
    UnknownCommand,

    #[error("Already subscribed.")]
    AlreadySubscribed,

    #[error("Not subscribed.")]
    NotSubscribed,

    #[error("Cannot subscribe to self.")]
    CannotSubscribeToSelf,

    #[error("Cannot unsubscribe from self.")]
    CannotUnsubscribeFromSelf,

    #[error("Post not found.")]
    PostNotFound,

    #[error("Not locally available.")]
    NotLocallyAvailable,

    #[error("No available source found.")]
    NoAvailableSource,

    #[error("Could not post message.")]
    CouldNotPost,

    #[error("Could not subscribe.")]
    CouldNotSubscribe,

    #[error("Could not unsubscribe.")]
    CouldNotUnsubscribe,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, NodeError>;

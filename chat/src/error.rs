use thiserror::Error;

/// Errors surfaced by the chat core.
///
/// Only the storage variants indicate that the service cannot make progress;
/// everything else is a per-request outcome reported back to the caller.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("login handle already taken")]
    DuplicateHandle,
    #[error("invalid credentials")]
    AuthFailure,
    #[error("only the room creator may do that")]
    NotCreator,
    #[error("room not found")]
    RoomNotFound,
    #[error("room name must not be empty")]
    InvalidRoomName,
    #[error("user not found")]
    UserNotFound,
    #[error("not a member of the room")]
    NotMember,
    #[error("message is empty")]
    EmptyMessage,
    #[error("password hashing failed: {0}")]
    Hash(String),
    #[error("token error: {0}")]
    Token(#[from] jsonwebtoken::errors::Error),
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),
    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),
    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl ChatError {
    /// Short machine readable code used on the wire.
    pub fn code(&self) -> &'static str {
        match self {
            ChatError::DuplicateHandle => "duplicate_handle",
            ChatError::AuthFailure => "invalid_credentials",
            ChatError::NotCreator => "not_creator",
            ChatError::RoomNotFound => "room_not_found",
            ChatError::InvalidRoomName => "invalid_room_name",
            ChatError::UserNotFound => "user_not_found",
            ChatError::NotMember => "not_member",
            ChatError::EmptyMessage => "empty_message",
            ChatError::Token(_) => "invalid_token",
            ChatError::Hash(_) | ChatError::Storage(_) | ChatError::Pool(_) | ChatError::Task(_) => {
                "internal"
            }
        }
    }

    /// Whether the error comes from the persistence layer rather than the request.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ChatError::Storage(_) | ChatError::Pool(_) | ChatError::Task(_)
        )
    }
}

pub type ChatResult<T> = Result<T, ChatError>;

/// Returns true when a rusqlite error is a UNIQUE / PRIMARY KEY violation.
pub(crate) fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err.sqlite_error_code(),
        Some(rusqlite::ErrorCode::ConstraintViolation)
    )
}

use thiserror::Error;

/// Errors surfaced by the chat-service client (§6 Identity errors: rejected
/// credentials, not host, room full, bot-name collision).
#[derive(Debug, Error)]
pub enum ChatApiError {
    #[error("chat service request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("chat service returned an invalid response")]
    InvalidResponse,

    #[error("{0}")]
    Rejected(String),

    #[error("not connected to the chat service")]
    NotConnected,

    #[error("already connected to the chat service")]
    AlreadyConnected,

    #[error("not connected to a room")]
    RoomNotConnected,

    #[error("already connected to a room")]
    RoomAlreadyConnected,

    #[error("invalid room url")]
    InvalidRoomUrl,

    #[error("user <{0}> is not in the room")]
    UserNotFound(String),
}

use thiserror::Error;

#[derive(Error, Debug)]
pub enum LinkError {
    #[error("bone id {id} is used by both {first:?} and {second:?}")]
    DuplicateBoneId {
        id: i32,
        first: String,
        second: String,
    },
    #[error("streaming client is not connected")]
    NotConnected,
    #[error("transport error: {0}")]
    Transport(String),
    #[error("malformed payload: {0}")]
    Payload(#[from] serde_json::Error),
    #[error("failed to read config: {0}")]
    Config(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, LinkError>;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BridgeError {
    /// The host side of the channel went away.
    #[error("Host channel closed: {0}")]
    ChannelClosed(String),

    /// The request reached the host but no reply could be produced.
    #[error("Host transport failed: {0}")]
    Transport(String),
}

pub type Result<T> = std::result::Result<T, BridgeError>;

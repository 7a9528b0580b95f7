//! Client error types.

use thiserror::Error;

/// Top-level error for session and transport operations.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The connect cycle exhausted its overall deadline without reaching
    /// any configured endpoint.
    #[error("connect deadline exceeded after {attempts} attempts ({elapsed:?})")]
    ConnectDeadline {
        attempts: u32,
        elapsed: std::time::Duration,
    },

    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    #[error("codec error: {0}")]
    Codec(#[from] fieldlink_cot::CodecError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error("configuration error: {0}")]
    Config(String),
}

/// Failure to hand an event to the outbound dispatcher.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    /// The bounded outbound queue is full. Callers should back off and
    /// retry rather than block.
    #[error("outbound queue overloaded")]
    Overloaded,

    /// The dispatcher has shut down and will accept no more events.
    #[error("dispatcher closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, ClientError>;

use thiserror::Error;

use crate::domain::rank::Rank;

#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O failure: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse group configuration JSON: {0}")]
    DeserializationError(#[from] serde_json::Error),

    #[error("Failed to encode or decode a message payload: {0}")]
    CodecError(#[from] bincode::Error),

    /// A message with a tag the coordinator loop does not understand.
    #[error("Protocol violation: unexpected tag {tag} from rank {sender}")]
    ProtocolError { tag: u8, sender: Rank },

    #[error("Received more DONE messages than workers exist (last one from rank {sender})")]
    WorkerUnderflow { sender: Rank },

    #[error("Mapped function failed: {0}")]
    FunctionError(#[source] anyhow::Error),

    #[error("Invalid group configuration: {0}")]
    ConfigError(String),

    #[error("Rank {from} has no route to rank {to}")]
    Unroutable { from: Rank, to: Rank },

    #[error("Connection to rank {0} closed")]
    Disconnected(Rank),

    #[error("Handshake failed: {0}")]
    HandshakeError(String),
}

pub type Result<T> = std::result::Result<T, Error>;

use std::time::Duration;
use thiserror::Error;
use weft_core::{BoxingError, RankId};

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("{what} timed out after {timeout:?} among ranks {members:?}")]
    Timeout {
        what: &'static str,
        members: Vec<RankId>,
        timeout: Duration,
    },

    #[error("rank {0} is not a member of this communicator")]
    UnknownPeer(RankId),

    #[error("codec failure: {0}")]
    Codec(#[from] postcard::Error),

    #[error("malformed payload: {0}")]
    Payload(String),

    #[error("payload shape {got:?} from rank {from} does not match expected {expected:?}")]
    PayloadShape {
        from: RankId,
        expected: Vec<usize>,
        got: Vec<usize>,
    },

    #[error("local kernel failed: {0}")]
    Kernel(#[source] BoxingError),
}

impl From<TransportError> for BoxingError {
    fn from(err: TransportError) -> Self {
        BoxingError::transport_failed(err.to_string())
    }
}

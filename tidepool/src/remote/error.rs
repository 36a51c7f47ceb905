//! Error types for the remote layer.

/// Errors reported by a [`Transport`](super::Transport).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// Nothing is listening at the address, or the link is down.
    #[error("address unreachable: {address}")]
    Unreachable {
        /// Destination address.
        address: String,
    },

    /// Another listener already owns the address.
    #[error("address already in use: {address}")]
    AddressInUse {
        /// Requested address.
        address: String,
    },
}

/// Error type for codec operations.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Failed to encode a message to bytes.
    #[error("encode error: {0}")]
    Encode(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Failed to decode bytes to a message.
    #[error("decode error: {0}")]
    Decode(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Errors from the remote layer.
#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    /// All retries to the endpoint failed.
    #[error("endpoint unreachable: {address}")]
    EndpointUnreachable {
        /// Endpoint address.
        address: String,
    },

    /// Transport-level failure.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Encoding or decoding a payload failed.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// No serializer is registered for the type.
    #[error("no serializer registered for {type_name}")]
    UnknownType {
        /// Type name of the payload.
        type_name: String,
    },
}

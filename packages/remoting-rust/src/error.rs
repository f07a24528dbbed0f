use callscope_core::{DecodeError, EncodeError};

/// Errors surfaced by the remoting decorators and their collaborators.
#[derive(Debug, thiserror::Error)]
pub enum RemotingError {
    /// A context header was present but unreadable. Never replaced by a default.
    #[error("invalid request-context header: {0}")]
    Decode(#[from] DecodeError),
    /// The ambient payload could not be encoded; the request was not sent.
    #[error("failed to encode request context: {0}")]
    Encode(#[from] EncodeError),
    /// A client handed back to a factory was not produced by it.
    #[error("client of type {type_name} was not produced by this factory")]
    InvalidClientType { type_name: &'static str },
    #[error("unknown service: {name}")]
    UnknownService { name: String },
    #[error("no listener registered for {service_uri}")]
    ServiceUnavailable { service_uri: String },
    #[error("transport error: {0}")]
    Transport(#[source] anyhow::Error),
    #[error("handler error: {0}")]
    Handler(#[source] anyhow::Error),
}

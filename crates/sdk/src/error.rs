use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error carried by an `Error` effect and by error replies on the wire.
///
/// `code` is a status hint only: mapping it to a transport status is the
/// transport's job.
#[derive(Clone, Debug, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{code}: {message}")]
pub struct ErrorReply {
    /// The error classification
    pub code: ErrorCode,
    /// Human-readable error message
    pub message: String,
}

/// Classification of error replies.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Error, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Business rule violation - the command was understood but rejected.
    /// Example: "Insufficient funds"
    #[error("rejected")]
    Rejected,

    /// The payload was malformed or could not be decoded.
    #[error("bad_request")]
    BadRequest,

    /// The call named a component or method that is not routable.
    #[error("method_not_found")]
    MethodNotFound,

    /// A view query matched no row.
    #[error("not_found")]
    NotFound,

    /// Request conflicts with current state.
    #[error("conflict")]
    Conflict,

    /// An unexpected error occurred in the handler.
    /// Example: a panic, or a reply that could not be encoded
    #[error("internal")]
    Internal,

    /// A dependency was unavailable or an async reply failed or timed out.
    #[error("unavailable")]
    Unavailable,
}

impl ErrorCode {
    /// Whether a caller may reasonably retry the call.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorCode::Unavailable)
    }
}

impl ErrorReply {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Create a rejection error for business rule violations.
    pub fn rejected(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Rejected, message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::BadRequest, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, message)
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Internal, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unavailable, message)
    }
}

impl From<ClientError> for ErrorReply {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::Remote(reply) => reply,
            ClientError::NotFound(message) => ErrorReply::not_found(message),
            err => ErrorReply::unavailable(err.to_string()),
        }
    }
}

/// A component declaration was rejected at registration.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("invalid component definition `{component}`: {reason}")]
pub struct InvalidComponentDefinition {
    pub component: String,
    pub reason: String,
}

impl InvalidComponentDefinition {
    pub fn new(component: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            reason: reason.into(),
        }
    }
}

/// Error while encoding a value into an [`EncodedPayload`](crate::codec::EncodedPayload).
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum EncodeError {
    #[error("no codec mapping registered for `{0}`")]
    UnregisteredType(String),
    #[error("failed to serialize `{type_url}`: {message}")]
    Serialization { type_url: String, message: String },
}

/// Error while decoding an [`EncodedPayload`](crate::codec::EncodedPayload).
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("unknown type url `{0}`")]
    UnknownType(String),
    #[error("expected `{expected}` but the payload is `{found}`")]
    TypeMismatch { expected: String, found: String },
    #[error("malformed `{type_url}` payload: {message}")]
    Malformed { type_url: String, message: String },
}

/// Two distinct Rust types claimed the same codec type url.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("type url `{type_url}` is claimed by both `{existing}` and `{conflicting}`")]
pub struct TypeConflict {
    pub type_url: String,
    pub existing: &'static str,
    pub conflicting: &'static str,
}

/// Failure reported by a [`StateStore`](crate::store::StateStore) or
/// [`RowStore`](crate::store::RowStore).
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("store error: {0}")]
pub struct StoreError(pub String);

/// Failure of the transport that executes a call.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("transport error: {0}")]
pub struct TransportError(pub String);

/// Error returned by the component client.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The method reference does not resolve to a routable method.
    #[error("`{method}` is not a known method of component `{component}`")]
    UnknownComponentMethod { component: String, method: String },
    #[error(transparent)]
    Encode(#[from] EncodeError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    /// A view query matched no row.
    #[error("no entry found: {0}")]
    NotFound(String),
    /// The remote handler replied with an error.
    #[error(transparent)]
    Remote(ErrorReply),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl ClientError {
    pub(crate) fn unknown_method(component: impl Into<String>, method: impl Into<String>) -> Self {
        ClientError::UnknownComponentMethod {
            component: component.into(),
            method: method.into(),
        }
    }
}

impl From<ErrorReply> for ClientError {
    fn from(reply: ErrorReply) -> Self {
        match reply.code {
            ErrorCode::NotFound => ClientError::NotFound(reply.message),
            _ => ClientError::Remote(reply),
        }
    }
}

/// A view query template that does not parse.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("{message} at position {position}")]
pub struct QueryParseError {
    pub message: String,
    pub position: usize,
}

/// Failure evaluating a view query.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum QueryError {
    #[error("missing query parameter `{0}`")]
    MissingParameter(String),
    #[error("query arguments do not bind the {0} placeholders of the query")]
    UnboundParameters(usize),
    #[error("no row of `{0}` matches the query")]
    NotFound(String),
}

impl From<QueryError> for ErrorReply {
    fn from(err: QueryError) -> Self {
        let code = match &err {
            QueryError::NotFound(_) => ErrorCode::NotFound,
            QueryError::MissingParameter(_) | QueryError::UnboundParameters(_) => {
                ErrorCode::BadRequest
            }
        };
        ErrorReply::new(code, err.to_string())
    }
}

/// Reasons the router refuses a call before or while decoding it.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("component `{component}` has no routable method `{method}`")]
    MethodNotFound { component: String, method: String },
    #[error("`{0}` requires a component id")]
    MissingComponentId(String),
    #[error(transparent)]
    BadRequest(#[from] DecodeError),
    #[error("failed to recover `{component}/{id}`: {message}")]
    Recovery {
        component: String,
        id: String,
        message: String,
    },
}

impl From<DispatchError> for ErrorReply {
    fn from(err: DispatchError) -> Self {
        let code = match &err {
            DispatchError::MethodNotFound { .. } => ErrorCode::MethodNotFound,
            DispatchError::MissingComponentId(_) | DispatchError::BadRequest(_) => {
                ErrorCode::BadRequest
            }
            DispatchError::Recovery { .. } => ErrorCode::Internal,
        };
        ErrorReply::new(code, err.to_string())
    }
}

use std::fmt;

/// Classifies a [`ClientError`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// A required argument was missing or empty.
    ArgumentNull,
    /// The operation is not allowed in the current state, like subscribing a consumer twice or
    /// acknowledging a delivery for the second time.
    InvalidState,
    /// The application callback returned an error.
    HandlerFailure,
    /// An RPC request arrived without `reply_to` or `correlation_id`, so the response cannot be
    /// routed back to the requester.
    UnroutableReply,
    /// Payload could not be encoded or decoded.
    Serialization,
    /// The broker channel reported an error or it cannot be used any more.
    Channel,
    /// The responder answered with a fault payload instead of a response.
    RemoteFault,
}

/// Error raised by the library. It travels inside an `anyhow::Error`, so callers can get it back
/// with `downcast_ref::<ClientError>()`.
///
/// `code` is the AMQP reply code if the error was reported by the broker, `0` otherwise.
#[derive(Clone, Debug)]
pub struct ClientError {
    pub kind: ErrorKind,
    pub code: u16,
    pub message: String,
}

impl ClientError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: 0,
            message: message.into(),
        }
    }
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientError")
            .field("kind", &self.kind)
            .field("code", &self.code)
            .field("message", &self.message)
            .finish()
    }
}

impl std::error::Error for ClientError {}

/// Gets the kind of the `ClientError` carried by an `anyhow::Error`, if there is one in the chain.
pub fn error_kind(err: &anyhow::Error) -> Option<ErrorKind> {
    err.downcast_ref::<ClientError>().map(|e| e.kind)
}

/// Shorthand for creating errors.
///
/// ```
/// use warren::{client_error, ErrorKind};
///
/// fn check(name: &str) -> anyhow::Result<()> {
///     if name.is_empty() {
///         return client_error!(ErrorKind::ArgumentNull, "queue name is empty");
///     }
///     Ok(())
/// }
///
/// assert!(check("").is_err());
/// ```
#[macro_export]
macro_rules! client_error {
    ($kind:expr, $message:expr) => {
        $crate::client_error!($kind, 0, $message)
    };
    ($kind:expr, $code:expr, $message:expr) => {
        ::std::result::Result::Err(anyhow::Error::new($crate::ClientError {
            kind: $kind,
            code: $code,
            message: ::std::string::String::from($message),
        }))
    };
}

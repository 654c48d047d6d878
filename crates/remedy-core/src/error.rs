use thiserror::Error;

/// Error returned by [`execute`](crate::engine::execute).
///
/// Only two shapes leave the engine: the caller's own error (original or
/// substituted by a handler), or a handler contract violation.
#[derive(Debug, Error)]
pub enum ExecuteError<E> {
    /// The original error (unmatched or re-raised) or a handler's substitute.
    #[error(transparent)]
    Raised(E),

    /// The handler took the error but never decided what to do with it.
    #[error("handler did not return an expected action")]
    InvalidHandlerResponse {
        #[source]
        cause: E,
    },
}

impl<E> ExecuteError<E> {
    /// The carried error: the raised one, or the cause of a contract violation.
    pub fn into_inner(self) -> E {
        match self {
            ExecuteError::Raised(e) => e,
            ExecuteError::InvalidHandlerResponse { cause } => cause,
        }
    }

    pub fn inner(&self) -> &E {
        match self {
            ExecuteError::Raised(e) => e,
            ExecuteError::InvalidHandlerResponse { cause } => cause,
        }
    }

    pub fn is_invalid_handler_response(&self) -> bool {
        matches!(self, ExecuteError::InvalidHandlerResponse { .. })
    }
}

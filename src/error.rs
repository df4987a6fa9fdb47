//! Unified error type.

use thiserror::Error;

/// A boxed, thread-safe error raised by layer code.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The error type returned by layerline's fallible operations.
///
/// [`NoRequestHandlers`](Error::NoRequestHandlers) is the only variant handed
/// back synchronously, from [`Chain::invoke`](crate::Chain::invoke). Every
/// other variant arrives through the [`Outcome`](crate::Outcome).
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum Error {
    /// No registered layer has a request handler, so no input can ever resolve.
    #[error("this chain cannot handle requests")]
    NoRequestHandlers,

    /// Every layer delegated and the cursor ran off the end of the chain.
    #[error("the input is not processable")]
    Exhausted,

    /// Every handle to the run was dropped before anything settled it.
    #[error("run abandoned before it settled")]
    Abandoned,

    /// A layer rejected the run. Displays exactly as the layer's error does.
    #[error("{0}")]
    Rejected(BoxError),
}

impl Error {
    /// Returns the layer's original error if this is a rejection.
    ///
    /// ```rust
    /// # use layerline::Error;
    /// let err = Error::Rejected("backend down".into());
    /// assert_eq!(err.into_rejection().unwrap().to_string(), "backend down");
    /// ```
    pub fn into_rejection(self) -> Option<BoxError> {
        match self {
            Self::Rejected(e) => Some(e),
            _ => None,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self, Self::Exhausted)
    }
}

//! Layer descriptors.

use std::fmt;

use crate::error::Error;
use crate::handler::{
    BoxedErrorHandler, BoxedRequest, BoxedResponse, RequestHandler, ResponseHandler,
};

/// One entry in a [`Chain`](crate::Chain).
///
/// A layer supplies zero or more of four capabilities. Only the request and
/// response capabilities take part in a run; the two error capabilities are
/// collected but reserved. A layer with none of them is inert and still
/// occupies its position in the chain.
///
/// Each `on_*` call returns `self`, so a layer is built in one expression:
///
/// ```rust
/// use layerline::{Layer, Run};
///
/// let layer = Layer::<u32, String>::new()
///     .on_request(|run: Run<u32, String>| async move {
///         match run.input() {
///             Some(0) => run.advance().await,
///             Some(n) => run.resolve(n.to_string()),
///             None => {}
///         }
///     })
///     .on_response(|out: String| async move { format!("<{out}>") });
/// ```
///
/// Layers that own state bind it by capturing an `Arc` of the owner in each
/// closure; see the `cache` demo.
pub struct Layer<I, O = I> {
    pub(crate) request: Option<BoxedRequest<I, O>>,
    pub(crate) request_error: Option<BoxedErrorHandler>,
    pub(crate) response: Option<BoxedResponse<O>>,
    pub(crate) response_error: Option<BoxedErrorHandler>,
}

impl<I, O> Layer<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    /// An inert layer with no capabilities.
    pub fn new() -> Self {
        Self {
            request: None,
            request_error: None,
            response: None,
            response_error: None,
        }
    }

    /// Sets the request handler, replacing any previous one.
    ///
    /// The handler receives the [`Run`](crate::Run) and must resolve it,
    /// reject it, or await [`Run::advance`](crate::Run::advance).
    pub fn on_request(mut self, handler: impl RequestHandler<I, O>) -> Self {
        self.request = Some(handler.into_boxed_request());
        self
    }

    /// Sets the response handler, replacing any previous one.
    pub fn on_response(mut self, handler: impl ResponseHandler<O>) -> Self {
        self.response = Some(handler.into_boxed_response());
        self
    }

    /// Reserved. Collected with the layer but never invoked by a run.
    pub fn on_request_error(mut self, handler: impl Fn(&Error) + Send + Sync + 'static) -> Self {
        self.request_error = Some(std::sync::Arc::new(handler));
        self
    }

    /// Reserved. Collected with the layer but never invoked by a run.
    pub fn on_response_error(mut self, handler: impl Fn(&Error) + Send + Sync + 'static) -> Self {
        self.response_error = Some(std::sync::Arc::new(handler));
        self
    }
}

impl<I, O> Default for Layer<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    fn default() -> Self { Self::new() }
}

// Manual impl: cloning only bumps the `Arc`s, so `I` and `O` need not be `Clone`.
impl<I, O> Clone for Layer<I, O> {
    fn clone(&self) -> Self {
        Self {
            request: self.request.clone(),
            request_error: self.request_error.clone(),
            response: self.response.clone(),
            response_error: self.response_error.clone(),
        }
    }
}

impl<I, O> fmt::Debug for Layer<I, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Layer")
            .field("request", &self.request.is_some())
            .field("request_error", &self.request_error.is_some())
            .field("response", &self.response.is_some())
            .field("response_error", &self.response_error.is_some())
            .finish()
    }
}

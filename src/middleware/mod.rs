//! Built-in layers.
//!
//! Cross-cutting concerns that fit any chain regardless of payload:
//!
//! - [`trace`] — logs the request and the response passing through it
//! - [`fallback`] — terminal layer that resolves every request it sees

use tracing::debug;

use crate::layer::Layer;
use crate::run::Run;

/// A pass-through layer that emits a `debug` event on the way in and on the
/// way out. It never resolves on its own.
///
/// ```rust
/// use layerline::{Chain, Layer, Run, middleware};
///
/// let chain = Chain::<u32>::named("users")
///     .register(middleware::trace("outer"))
///     .register(Layer::new().on_request(|run: Run<u32>| async move { run.resolve(7) }));
/// ```
pub fn trace<I, O>(label: &'static str) -> Layer<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    Layer::new()
        .on_request(move |run: Run<I, O>| async move {
            debug!(layer = label, run = run.id(), index = ?run.index(), "request");
            run.advance().await;
        })
        .on_response(move |value: O| async move {
            debug!(layer = label, "response");
            value
        })
}

/// A terminal layer that resolves every request reaching it with a clone of
/// `value`. Register it last and the chain can no longer be exhausted.
pub fn fallback<I, O>(value: O) -> Layer<I, O>
where
    I: Send + 'static,
    O: Clone + Send + Sync + 'static,
{
    Layer::new().on_request(move |run: Run<I, O>| {
        let value = value.clone();
        async move { run.resolve(value) }
    })
}

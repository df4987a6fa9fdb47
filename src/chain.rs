//! The layer chain.
//!
//! An ordered list of layers. No sorting, no priorities, no introspection.
//! You register a layer, it lands at the end. That is all.

use std::fmt;

use tracing::debug_span;

use crate::error::Error;
use crate::layer::Layer;
use crate::outcome::Outcome;
use crate::run::{Run, Steps};

/// The application chain.
///
/// Build it once; invoke it as often as you like. Every invocation gets its
/// own [`Run`] over a snapshot of the layers, so concurrent invocations never
/// see each other's state. [`Chain::register`] returns `self` so
/// registrations chain naturally.
pub struct Chain<I, O = I> {
    name: Option<String>,
    layers: Vec<Layer<I, O>>,
}

impl<I, O> Chain<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    pub fn new() -> Self {
        Self { name: None, layers: Vec::new() }
    }

    /// A chain whose runs carry `name` on their tracing span.
    pub fn named(name: impl Into<String>) -> Self {
        Self { name: Some(name.into()), layers: Vec::new() }
    }

    /// Appends a layer. Returns `self` for chaining.
    ///
    /// ```rust
    /// # use layerline::{Chain, Layer, Run};
    /// let chain = Chain::<u32>::new()
    ///     .register(Layer::new().on_request(|run: Run<u32>| async move { run.advance().await }))
    ///     .register(Layer::new().on_request(|run: Run<u32>| async move { run.resolve(1) }));
    /// assert_eq!(chain.len(), 2);
    /// ```
    ///
    /// The layer's shape is not checked here; [`invoke`](Chain::invoke) does that.
    pub fn register(mut self, layer: Layer<I, O>) -> Self {
        self.push(layer);
        self
    }

    /// Appends a layer through a mutable reference.
    pub fn push(&mut self, layer: Layer<I, O>) -> &mut Self {
        self.layers.push(layer);
        self
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Sends `input` down the chain.
    ///
    /// Returns the run's [`Outcome`] without waiting for it. Fails right away,
    /// before any layer runs, with [`Error::NoRequestHandlers`] if no layer
    /// has a request handler. Every other failure arrives through the outcome.
    ///
    /// No layer runs until the outcome is first polled. Dropping the outcome
    /// without awaiting or spawning it leaves every layer untouched.
    pub fn invoke(&self, input: I) -> Result<Outcome<O>, Error> {
        let steps = Steps::classify(&self.layers)?;
        let (run, settled) = Run::new(steps, input);
        let span = debug_span!("run", id = run.id(), chain = self.name());

        Ok(Outcome::drive(run, settled, span))
    }
}

impl<I, O> Default for Chain<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    fn default() -> Self { Self::new() }
}

impl<I, O> Clone for Chain<I, O> {
    fn clone(&self) -> Self {
        Self { name: self.name.clone(), layers: self.layers.clone() }
    }
}

impl<I, O> fmt::Debug for Chain<I, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chain")
            .field("name", &self.name)
            .field("layers", &self.layers)
            .finish()
    }
}

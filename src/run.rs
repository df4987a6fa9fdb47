//! The per-invocation state machine.
//!
//! A [`Run`] walks the chain forward one position per [`Run::advance`] until a
//! layer resolves or rejects it, or the cursor runs off the end. Settlement is
//! a one-way latch: the first `resolve` / `reject` (or exhaustion) wins and
//! every later attempt is dropped.
//!
//! ```text
//! index: None ──advance──▶ 0 ──advance──▶ 1 ── … ──▶ max   (Exhausted)
//!                          │              │
//!                        resolve        reject
//!                          ▼              ▼
//!                 Resolved { index }    Failed(error)
//! ```

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, MutexGuard};
use tokio::sync::oneshot;
use tracing::{debug, trace, warn};

use crate::error::{BoxError, Error};
use crate::handler::{BoxFuture, BoxedErrorHandler, BoxedRequest, BoxedResponse};
use crate::layer::Layer;

static NEXT_RUN_ID: AtomicU64 = AtomicU64::new(1);

// ── Handler groups ────────────────────────────────────────────────────────────

/// The chain's layers classified into four parallel handler groups.
///
/// Every group has one slot per layer; `None` marks a layer without that
/// capability. Built once per run and never modified.
pub(crate) struct Steps<I, O> {
    request: Vec<Option<BoxedRequest<I, O>>>,
    request_error: Vec<Option<BoxedErrorHandler>>,
    response: Vec<Option<BoxedResponse<O>>>,
    response_error: Vec<Option<BoxedErrorHandler>>,
}

impl<I, O> Steps<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    pub(crate) fn classify(layers: &[Layer<I, O>]) -> Result<Self, Error> {
        let steps = Self {
            request: layers.iter().map(|l| l.request.clone()).collect(),
            request_error: layers.iter().map(|l| l.request_error.clone()).collect(),
            response: layers.iter().map(|l| l.response.clone()).collect(),
            response_error: layers.iter().map(|l| l.response_error.clone()).collect(),
        };

        if steps.request.iter().all(Option::is_none) {
            warn!(layers = layers.len(), "chain has no request handlers");
            return Err(Error::NoRequestHandlers);
        }

        Ok(steps)
    }

    /// Number of traversable positions, present handler or not.
    pub(crate) fn len(&self) -> usize {
        self.request.len()
    }

    /// Applies the response handlers at positions `0..=index` in descending
    /// order, starting from `value`. Absent handlers leave the value as is.
    pub(crate) async fn respond(&self, index: Option<usize>, mut value: O) -> O {
        let end = index.map_or(0, |i| (i + 1).min(self.response.len()));

        for (position, handler) in self.response[..end].iter().enumerate().rev() {
            if let Some(handler) = handler {
                trace!(position, "response handler");
                value = handler.call(value).await;
            }
        }

        value
    }

    fn census(&self) -> [usize; 4] {
        [
            self.request.iter().flatten().count(),
            self.request_error.iter().flatten().count(),
            self.response.iter().flatten().count(),
            self.response_error.iter().flatten().count(),
        ]
    }
}

// ── Settlement ────────────────────────────────────────────────────────────────

/// What the latch hands to the outcome.
pub(crate) enum Settlement<O> {
    Resolved { index: Option<usize>, value: O },
    Failed(Error),
}

// ── Run ───────────────────────────────────────────────────────────────────────

/// The per-invocation coordinator, handed to every request handler.
///
/// A request handler must do exactly one of:
///
/// - [`resolve`](Run::resolve) the run with a value,
/// - [`reject`](Run::reject) it with an error,
/// - await [`advance`](Run::advance) to delegate to the next layer.
///
/// It may do so right away or later, from another task: `Run` is a cheap
/// handle and can be cloned and moved freely. A handler that does none of
/// these while keeping its handle stalls the run forever.
pub struct Run<I, O = I> {
    inner: Arc<Inner<I, O>>,
}

struct Inner<I, O> {
    id: u64,
    steps: Arc<Steps<I, O>>,
    max: usize,
    state: Mutex<State<I, O>>,
}

struct State<I, O> {
    /// `None` until the first `advance`.
    index: Option<usize>,
    settled: bool,
    input: Option<I>,
    settle: Option<oneshot::Sender<Settlement<O>>>,
}

impl<I, O> Run<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    pub(crate) fn new(steps: Steps<I, O>, input: I) -> (Self, oneshot::Receiver<Settlement<O>>) {
        let (tx, rx) = oneshot::channel();
        let id = NEXT_RUN_ID.fetch_add(1, Ordering::Relaxed);
        let [request, request_error, response, response_error] = steps.census();

        debug!(
            run = id,
            layers = steps.len(),
            request,
            request_error,
            response,
            response_error,
            "run created"
        );

        let run = Self {
            inner: Arc::new(Inner {
                id,
                max: steps.len(),
                steps: Arc::new(steps),
                state: Mutex::new(State {
                    index: None,
                    settled: false,
                    input: Some(input),
                    settle: Some(tx),
                }),
            }),
        };

        (run, rx)
    }

    pub(crate) fn steps(&self) -> Arc<Steps<I, O>> {
        Arc::clone(&self.inner.steps)
    }

    /// Process-unique identifier, also recorded on the run's tracing span.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// A clone of the request value. `None` once the run has settled.
    pub fn input(&self) -> Option<I>
    where
        I: Clone,
    {
        self.inner.state.lock().input.clone()
    }

    /// Swaps the request value seen by the layers after this one.
    ///
    /// Returns `Ok` with the previous value on a swap. Once the run has
    /// settled nothing is swapped and `value` comes back as `Err`.
    pub fn replace_input(&self, value: I) -> Result<Option<I>, I> {
        let mut state = self.inner.state.lock();
        if state.settled {
            return Err(value);
        }
        Ok(state.input.replace(value))
    }

    /// The position of the layer currently holding the run, `None` before the
    /// walk starts. Equals [`max`](Run::max) once the chain is exhausted.
    pub fn index(&self) -> Option<usize> {
        self.inner.state.lock().index
    }

    /// Number of positions in the chain this run walks, present request
    /// handler or not.
    pub fn max(&self) -> usize {
        self.inner.max
    }

    pub fn is_settled(&self) -> bool {
        self.inner.state.lock().settled
    }

    /// Settles the run successfully with `value`.
    ///
    /// Response handlers of this layer and every layer before it then
    /// transform the value on its way back to the caller. No-op if the run
    /// has already settled.
    pub fn resolve(&self, value: O) {
        let state = self.inner.state.lock();
        self.end(state, Ok(value));
    }

    /// Settles the run with `error`, handed to the caller unchanged.
    ///
    /// No-op if the run has already settled.
    pub fn reject(&self, error: impl Into<BoxError>) {
        let state = self.inner.state.lock();
        self.end(state, Err(Error::Rejected(error.into())));
    }

    /// Delegates to the next layer.
    ///
    /// Moves the cursor forward and runs the request handler found there,
    /// skipping positions without one. Moving past the last position settles
    /// the run with [`Error::Exhausted`]. No-op once the run has settled.
    ///
    /// The returned future must be awaited (or spawned) for anything to happen.
    /// Once the run settles the outcome stops polling this future, so code a
    /// layer has after `advance().await` never runs if a later layer settles
    /// the run and then keeps the walk suspended.
    #[doc(alias = "next")]
    #[must_use = "the next layer only runs when the returned future is awaited"]
    pub fn advance(&self) -> BoxFuture<'static, ()> {
        let run = self.clone();

        Box::pin(async move {
            loop {
                let (index, handler) = {
                    let mut state = run.inner.state.lock();
                    if state.settled {
                        return;
                    }

                    let index = state.index.map_or(0, |i| i + 1);
                    state.index = Some(index);

                    if index >= run.inner.max {
                        run.end(state, Err(Error::Exhausted));
                        return;
                    }

                    (index, run.inner.steps.request[index].clone())
                };

                match handler {
                    Some(handler) => {
                        trace!(run = run.id(), index, "request handler");
                        handler.call(run.clone()).await;
                        return;
                    }
                    None => trace!(run = run.id(), index, "no request handler, moving on"),
                }
            }
        })
    }

    /// The latch. Runs with the state lock held so exhaustion and a late
    /// `resolve` from another task cannot both settle.
    fn end(&self, mut state: MutexGuard<'_, State<I, O>>, verdict: Result<O, Error>) {
        if state.settled {
            trace!(run = self.id(), "run already settled, dropping late settlement");
            return;
        }

        state.settled = true;
        state.input = None;

        let settlement = match verdict {
            Ok(value) => {
                debug!(run = self.id(), index = ?state.index, "run resolved");
                Settlement::Resolved { index: state.index, value }
            }
            Err(error) => {
                debug!(run = self.id(), index = ?state.index, %error, "run failed");
                Settlement::Failed(error)
            }
        };

        if let Some(tx) = state.settle.take() {
            // The caller may have dropped its outcome; nobody is left to tell.
            let _ = tx.send(settlement);
        }
    }
}

impl<I, O> Clone for Run<I, O> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<I, O> fmt::Debug for Run<I, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Run")
            .field("id", &self.inner.id)
            .field("index", &state.index)
            .field("max", &self.inner.max)
            .field("settled", &state.settled)
            .finish()
    }
}

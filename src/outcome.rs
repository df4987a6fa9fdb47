//! The deferred result of one invocation.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::oneshot;
use tracing::{Instrument, Span};

use crate::error::Error;
use crate::handler::BoxFuture;
use crate::run::{Run, Settlement};

/// The settled result of a [`Chain::invoke`](crate::Chain::invoke).
///
/// Await it to get the response-processed value or the error the run
/// settled with. Like any future it is lazy: the first layer runs on the
/// first poll.
#[must_use = "the chain does nothing until the outcome is awaited"]
pub struct Outcome<O> {
    fut: BoxFuture<'static, Result<O, Error>>,
}

impl<O> Outcome<O>
where
    O: Send + 'static,
{
    /// Drives `run` from its first layer to settlement, then through the
    /// response phase.
    pub(crate) fn drive<I>(run: Run<I, O>, mut settled: oneshot::Receiver<Settlement<O>>, span: Span) -> Self
    where
        I: Send + 'static,
    {
        let steps = run.steps();

        let fut = async move {
            // Only the forward walk and the layers may hold the run from here
            // on, so the sender drops (and `settled` errors) once they all let
            // go without settling.
            let mut forward = run.advance();
            drop(run);

            // A layer may settle and keep working, or hand the run to another
            // task and return early. Whichever happens first decides.
            let early = tokio::select! {
                biased;
                settlement = &mut settled => Some(settlement),
                () = &mut forward => None,
            };
            drop(forward);

            let settlement = match early {
                Some(settlement) => settlement,
                None => settled.await,
            };

            match settlement {
                Ok(Settlement::Resolved { index, value }) => Ok(steps.respond(index, value).await),
                Ok(Settlement::Failed(error)) => Err(error),
                Err(_) => Err(Error::Abandoned),
            }
        };

        Self { fut: Box::pin(fut.instrument(span)) }
    }
}

impl<O> Future for Outcome<O> {
    type Output = Result<O, Error>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.get_mut().fut.as_mut().poll(cx)
    }
}

impl<O> fmt::Debug for Outcome<O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Outcome").finish_non_exhaustive()
    }
}

//! Handler traits and type erasure.
//!
//! # How layer capabilities are stored
//!
//! A chain holds layers whose capabilities are closures of *different*
//! concrete types. Rust collections can only hold one concrete type, so each
//! capability is hidden behind a trait object (`dyn ErasedRequest`,
//! `dyn ErasedResponse`) and every layer is stored uniformly.
//!
//! The chain from user code to vtable call is:
//!
//! ```text
//! .on_request(|run| async move { … })   ← user writes this
//!        ↓ RequestHandler blanket impl
//! Arc::new(FnRequest(f))                 ← heap-allocated wrapper
//!        ↓  stored as BoxedRequest = Arc<dyn ErasedRequest>
//! handler.call(run)  at step time        ← one vtable dispatch
//!        ↓
//! Box::pin(async { f(run).await.into_step(&run) })  ← BoxFuture
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::error::{BoxError, Error};
use crate::run::Run;

// ── Internal types ────────────────────────────────────────────────────────────

/// A heap-allocated, type-erased future.
///
/// `Send` lets a layer hand its run to another task; the forward walk is a
/// chain of these, one per delegating layer.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

#[doc(hidden)]
pub trait ErasedRequest<I, O> {
    fn call(&self, run: Run<I, O>) -> BoxFuture<'static, ()>;
}

#[doc(hidden)]
pub type BoxedRequest<I, O> = Arc<dyn ErasedRequest<I, O> + Send + Sync + 'static>;

#[doc(hidden)]
pub trait ErasedResponse<O> {
    fn call(&self, value: O) -> BoxFuture<'static, O>;
}

#[doc(hidden)]
pub type BoxedResponse<O> = Arc<dyn ErasedResponse<O> + Send + Sync + 'static>;

#[doc(hidden)]
pub type BoxedErrorHandler = Arc<dyn Fn(&Error) + Send + Sync + 'static>;

// ── Request handler return values ─────────────────────────────────────────────

/// What a request handler may return.
///
/// `()` leaves the run alone: the handler is expected to have resolved,
/// rejected or delegated. `Result<(), E>` additionally rejects the run with
/// `E` when it is `Err`, so `?` works inside request handlers.
pub trait IntoStep: Send + 'static {
    fn into_step<I, O>(self, run: &Run<I, O>)
    where
        I: Send + 'static,
        O: Send + 'static;
}

impl IntoStep for () {
    fn into_step<I, O>(self, _run: &Run<I, O>)
    where
        I: Send + 'static,
        O: Send + 'static,
    {
    }
}

impl<E> IntoStep for Result<(), E>
where
    E: Into<BoxError> + Send + 'static,
{
    fn into_step<I, O>(self, run: &Run<I, O>)
    where
        I: Send + 'static,
        O: Send + 'static,
    {
        if let Err(e) = self {
            run.reject(e);
        }
    }
}

// ── Public handler traits ─────────────────────────────────────────────────────

/// Implemented for every valid request handler.
///
/// You never implement this yourself. It is satisfied by any closure or
/// function of the shape:
///
/// ```text
/// async fn name(run: Run<I, O>) -> ()            // or Result<(), E>
/// ```
///
/// Sealed, so only the blanket impl below can satisfy it.
pub trait RequestHandler<I, O>: private::SealedRequest<I, O> + Send + Sync + 'static {
    #[doc(hidden)]
    fn into_boxed_request(self) -> BoxedRequest<I, O>;
}

/// Implemented for every valid response handler: any `Fn(O) -> impl Future<Output = O>`.
pub trait ResponseHandler<O>: private::SealedResponse<O> + Send + Sync + 'static {
    #[doc(hidden)]
    fn into_boxed_response(self) -> BoxedResponse<O>;
}

mod private {
    pub trait SealedRequest<I, O> {}
    pub trait SealedResponse<O> {}
}

// ── Blanket implementations ───────────────────────────────────────────────────

impl<F, Fut, R, I, O> private::SealedRequest<I, O> for F
where
    F: Fn(Run<I, O>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoStep,
    I: Send + 'static,
    O: Send + 'static,
{
}

impl<F, Fut, R, I, O> RequestHandler<I, O> for F
where
    F: Fn(Run<I, O>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoStep,
    I: Send + 'static,
    O: Send + 'static,
{
    fn into_boxed_request(self) -> BoxedRequest<I, O> {
        Arc::new(FnRequest(self))
    }
}

impl<F, Fut, O> private::SealedResponse<O> for F
where
    F: Fn(O) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = O> + Send + 'static,
    O: Send + 'static,
{
}

impl<F, Fut, O> ResponseHandler<O> for F
where
    F: Fn(O) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = O> + Send + 'static,
    O: Send + 'static,
{
    fn into_boxed_response(self) -> BoxedResponse<O> {
        Arc::new(FnResponse(self))
    }
}

// ── Concrete wrappers ─────────────────────────────────────────────────────────

struct FnRequest<F>(F);

impl<F, Fut, R, I, O> ErasedRequest<I, O> for FnRequest<F>
where
    F: Fn(Run<I, O>) -> Fut + Send + Sync,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoStep,
    I: Send + 'static,
    O: Send + 'static,
{
    fn call(&self, run: Run<I, O>) -> BoxFuture<'static, ()> {
        // The handler gets its own handle; ours stays behind so a returned
        // `Err` can still reject the run.
        let fut = (self.0)(run.clone());
        Box::pin(async move { fut.await.into_step(&run) })
    }
}

struct FnResponse<F>(F);

impl<F, Fut, O> ErasedResponse<O> for FnResponse<F>
where
    F: Fn(O) -> Fut + Send + Sync,
    Fut: Future<Output = O> + Send + 'static,
    O: Send + 'static,
{
    fn call(&self, value: O) -> BoxFuture<'static, O> {
        Box::pin((self.0)(value))
    }
}

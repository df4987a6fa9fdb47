//! # layerline
//!
//! A bidirectional middleware chain for Rust.
//! Requests walk the layers forward. Results walk them back.
//!
//! ## The contract
//!
//! Every [`Layer`] may handle the request, the response, both, or neither.
//! A request handler gets the [`Run`] and does exactly one thing with it:
//!
//! - **resolve** — produce the result here; later layers never see the request
//! - **reject** — fail the run with an error, handed to the caller unchanged
//! - **advance** — delegate to the next layer
//!
//! Once a layer resolves, the response handlers of that layer and every
//! layer before it transform the result, nearest first, outermost last.
//! Layers after the resolving one are never involved.
//!
//! What layerline intentionally leaves to you:
//!
//! - **Transport, serialization** — the payload is opaque
//! - **Retries, timeouts** — invoke the chain again, wrap the outcome in
//!   `tokio::time::timeout`
//! - **Ordering** — layers run in registration order, full stop
//!
//! ## Quick start
//!
//! ```rust
//! use layerline::{Chain, Layer, Run};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), layerline::Error> {
//!     let chain = Chain::new()
//!         .register(
//!             Layer::new()
//!                 .on_request(|run: Run<i32>| async move { run.advance().await })
//!                 .on_response(|v: i32| async move { v * 10 }),
//!         )
//!         .register(
//!             Layer::new()
//!                 .on_request(|run: Run<i32>| async move {
//!                     let input = run.input().unwrap_or_default();
//!                     run.resolve(input + 1);
//!                 }),
//!         );
//!
//!     // 1 → +1 at the inner layer → ×10 on the way back out.
//!     assert_eq!(chain.invoke(1)?.await?, 20);
//!     Ok(())
//! }
//! ```

mod chain;
mod error;
mod handler;
mod layer;
mod outcome;
mod run;

pub mod middleware;

pub use chain::Chain;
pub use error::{BoxError, Error};
pub use handler::{BoxFuture, IntoStep, RequestHandler, ResponseHandler};
pub use layer::Layer;
pub use outcome::Outcome;
pub use run::Run;

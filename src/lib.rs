//! Rivulet: composable, thread-safe asynchronous values and streams.
//!
//! # Overview
//!
//! Rivulet provides three primary primitives and the machinery that makes
//! them safe to share across threads:
//!
//! - [`Future`] / [`Promise`]: a value that completes exactly once
//! - [`Channel`] / [`Producer`]: a stream of updates followed by exactly one
//!   terminal completion, with a bounded replay buffer for late subscribers
//! - [`ExecutionContext`]: a host object whose lifetime bounds dependent
//!   work, failing it when the host dies
//!
//! plus [`Executor`] dispatch strategies, [`CancelToken`] fan-out
//! cancellation, and the transformation combinators (`map`, `flat_map`,
//! `filter_update`, `merge`, `zip`, `debounce`, `distinct_until_changed`)
//! that compose them.
//!
//! # Core Guarantees
//!
//! - **Completion uniqueness**: exactly one writer completes a value, no
//!   matter how many race
//! - **Delivery uniqueness**: every subscriber sees exactly one completion
//! - **Per-subscriber ordering**: a subscriber's event sequence is a prefix
//!   of the true stream plus the terminal completion, never reordered
//! - **Late subscription**: subscribing to a completed value never hangs
//! - **Bounded lifetime**: producers stay alive while someone is watching
//!   downstream, and retainer cycles are severed on completion
//!
//! # Module Structure
//!
//! - [`types`]: the [`Fallible`] completion value
//! - [`error`]: the error taxonomy ([`ErrorKind::Cancelled`],
//!   [`ErrorKind::ContextDropped`], user failures)
//! - [`executor`]: dispatch strategies and delayed execution
//! - [`future`]: single-completion values
//! - [`channel`]: multi-update streams and the two-way binding proxy
//! - [`cancel`]: cancellation tokens
//! - [`context`]: execution contexts
//! - [`release_pool`]: one-shot keep-alive containers
//!
//! # Example
//!
//! ```
//! use rivulet::{Executor, Future};
//!
//! let tripled = Future::value(1).map(&Executor::utility(), |v| v * 3);
//! assert_eq!(tripled.wait().success_ref(), Some(&3));
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::module_name_repetitions)]

pub mod cancel;
pub mod channel;
mod combinator;
pub mod context;
pub mod error;
pub mod executor;
pub mod future;
mod handler;
mod head;
pub mod release_pool;
pub mod tracing_compat;
pub mod types;

pub use cancel::{CancelToken, Cancellable, Completable};
pub use channel::proxy::{NonePolicy, ProducerProxy};
pub use channel::{Channel, Event, Producer, DEFAULT_BUFFER_CAPACITY};
pub use context::{ContextCore, ExecutionContext};
pub use error::{Error, ErrorKind, Result, ResultExt};
pub use executor::{Executor, Lane, PoolOptions, TimerHandle};
pub use future::{Future, Promise, WaitTimedOut};
pub use handler::Subscription;
pub use release_pool::ReleasePool;
pub use types::{Fallible, Transferable};

//! Transformation combinators.
//!
//! Every combinator is built on the same mechanism: a derived
//! promise/producer, a subscription on the source whose handler forwards
//! transformed events into it, and two ownership links that make the chain
//! live exactly as long as someone is watching the downstream end:
//!
//! - the subscription is retained in the *derived* value's release pool, so
//!   it is dropped the moment the derived value completes;
//! - the handler's owner back-reference keeps the *source* alive while the
//!   derived value is;
//! - the forwarding closure captures the derived value weakly, so dropping
//!   every downstream handle tears the whole chain down without waiting for
//!   the source to complete.
//!
//! Future combinators live in [`future`], channel combinators in
//! [`channel`]; both are exposed as inherent methods on the handle types.

mod channel;
mod future;

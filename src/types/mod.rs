//! Core value types.

pub mod fallible;

pub use fallible::Fallible;

/// Marker for values that can flow through asynchronous values.
///
/// Completions and updates are delivered to an arbitrary number of
/// subscribers on arbitrary threads, so payloads must be cloneable and
/// shareable. Implemented automatically for every eligible type.
pub trait Transferable: Clone + Send + Sync + 'static {}

impl<T: Clone + Send + Sync + 'static> Transferable for T {}

//! Two-armed completion value.
//!
//! [`Fallible`] is the payload of every completion: either a success value or
//! a failure [`Error`]. It is created once by the completing writer and
//! delivered (by clone) to an arbitrary number of subscribers, so both arms
//! are cheap to clone.

use crate::error::{Error, Result};

/// The result of a completed asynchronous value.
///
/// Unlike `std::result::Result`, the failure arm is always the crate
/// [`Error`]: user failures ride in [`ErrorKind::User`](crate::ErrorKind::User)
/// with the original error attached as a shared source, which lets a single
/// completion fan out to many subscribers without re-boxing.
#[derive(Debug, Clone)]
pub enum Fallible<T> {
    /// Completed with a value.
    Success(T),
    /// Completed with a failure.
    Failure(Error),
}

impl<T> Fallible<T> {
    /// Creates a success.
    #[must_use]
    pub const fn success(value: T) -> Self {
        Self::Success(value)
    }

    /// Creates a failure.
    #[must_use]
    pub const fn failure(error: Error) -> Self {
        Self::Failure(error)
    }

    /// Returns true if this is a success.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// Returns true if this is a failure.
    #[must_use]
    pub const fn is_failure(&self) -> bool {
        matches!(self, Self::Failure(_))
    }

    /// Returns a reference to the success value, if any.
    #[must_use]
    pub const fn success_ref(&self) -> Option<&T> {
        match self {
            Self::Success(v) => Some(v),
            Self::Failure(_) => None,
        }
    }

    /// Returns a reference to the failure, if any.
    #[must_use]
    pub const fn failure_ref(&self) -> Option<&Error> {
        match self {
            Self::Success(_) => None,
            Self::Failure(e) => Some(e),
        }
    }

    /// Maps the success arm, forwarding failures unchanged.
    pub fn map_success<U, F: FnOnce(T) -> U>(self, f: F) -> Fallible<U> {
        match self {
            Self::Success(v) => Fallible::Success(f(v)),
            Self::Failure(e) => Fallible::Failure(e),
        }
    }

    /// Maps the success arm through a fallible transform.
    pub fn and_then<U, F: FnOnce(T) -> Fallible<U>>(self, f: F) -> Fallible<U> {
        match self {
            Self::Success(v) => f(v),
            Self::Failure(e) => Fallible::Failure(e),
        }
    }

    /// Collapses the failure arm into a value.
    pub fn recover<F: FnOnce(Error) -> T>(self, f: F) -> T {
        match self {
            Self::Success(v) => v,
            Self::Failure(e) => f(e),
        }
    }

    /// Maps the failure arm through a fallible recovery, leaving successes
    /// untouched.
    pub fn try_recover<F: FnOnce(Error) -> Result<T>>(self, f: F) -> Self {
        match self {
            Self::Success(v) => Self::Success(v),
            Self::Failure(e) => match f(e) {
                Ok(v) => Self::Success(v),
                Err(e) => Self::Failure(e),
            },
        }
    }

    /// Converts into a standard `Result`.
    pub fn into_result(self) -> Result<T> {
        match self {
            Self::Success(v) => Ok(v),
            Self::Failure(e) => Err(e),
        }
    }
}

impl<T, E: Into<Error>> From<core::result::Result<T, E>> for Fallible<T> {
    fn from(result: core::result::Result<T, E>) -> Self {
        match result {
            Ok(v) => Self::Success(v),
            Err(e) => Self::Failure(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn map_success_transforms_value() {
        let doubled = Fallible::success(21).map_success(|v| v * 2);
        assert_eq!(doubled.success_ref(), Some(&42));
    }

    #[test]
    fn map_success_forwards_failure() {
        let failed: Fallible<i32> = Fallible::failure(Error::cancelled());
        let mapped = failed.map_success(|v| v * 2);
        assert!(mapped.failure_ref().expect("failure expected").is_cancelled());
    }

    #[test]
    fn and_then_chains() {
        let chained = Fallible::success(2).and_then(|v| Fallible::success(v + 1));
        assert_eq!(chained.success_ref(), Some(&3));

        let failed = Fallible::success(2)
            .and_then(|_: i32| Fallible::<i32>::failure(Error::context_dropped()));
        assert!(failed.is_failure());
    }

    #[test]
    fn recover_collapses_failure() {
        let failed: Fallible<i32> = Fallible::failure(Error::cancelled());
        assert_eq!(failed.recover(|_| 7), 7);
        assert_eq!(Fallible::success(1).recover(|_| 7), 1);
    }

    #[test]
    fn try_recover_may_fail_again() {
        let failed: Fallible<i32> = Fallible::failure(Error::cancelled());
        let recovered = failed.try_recover(|e| {
            assert!(e.is_cancelled());
            Ok(9)
        });
        assert_eq!(recovered.success_ref(), Some(&9));

        let still_failed: Fallible<i32> =
            Fallible::failure(Error::cancelled()).try_recover(|_| Err(Error::context_dropped()));
        assert_eq!(
            still_failed.failure_ref().expect("failure expected").kind(),
            ErrorKind::ContextDropped
        );
    }

    #[test]
    fn from_result_round_trip() {
        let ok: Fallible<i32> = Ok::<_, Error>(5).into();
        assert_eq!(ok.into_result().expect("should be success"), 5);

        let err: Fallible<i32> = Err::<i32, _>(Error::cancelled()).into();
        assert!(err.into_result().is_err());
    }
}

/// Terminal observation of a future.
///
/// Cancellation is not an error: a cancelled future yields neither a value
/// nor an error. Observers that need to tell "cancelled" apart from
/// "completed with nothing useful" match on this enum or ask the handle's
/// `is_cancelled`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<T, E> {
    /// The computation finished first and published its result.
    Ready(Result<T, E>),
    /// The cancellation signal won the race; the result slot stays empty.
    Cancelled,
}

impl<T, E> Outcome<T, E> {
    #[inline]
    pub fn is_ready(&self) -> bool {
        matches!(self, Outcome::Ready(_))
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Outcome::Cancelled)
    }

    /// The published result, or `None` when cancelled.
    #[inline]
    pub fn into_ready(self) -> Option<Result<T, E>> {
        match self {
            Outcome::Ready(result) => Some(result),
            Outcome::Cancelled => None,
        }
    }

    /// The published value, or `None` when cancelled or failed.
    pub fn value(self) -> Option<T> {
        match self {
            Outcome::Ready(Ok(value)) => Some(value),
            _ => None,
        }
    }

    /// The published error, or `None` when cancelled or succeeded.
    pub fn error(self) -> Option<E> {
        match self {
            Outcome::Ready(Err(err)) => Some(err),
            _ => None,
        }
    }
}

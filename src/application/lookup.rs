//! Outcome of probing a single storage tier.

/// `Miss` from the durable tier is authoritative; from the cache it only means "try further".
#[derive(Debug)]
pub enum Tier<T, E> {
    Hit(T),
    Miss,
    Failure(E),
}

impl<T, E> From<Result<Option<T>, E>> for Tier<T, E> {
    fn from(result: Result<Option<T>, E>) -> Self {
        match result {
            Ok(Some(value)) => Self::Hit(value),
            Ok(None) => Self::Miss,
            Err(err) => Self::Failure(err),
        }
    }
}

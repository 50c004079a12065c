//! The `password` authentication method.

use subtle::ConstantTimeEq;

/// The response to the authentication request.
#[derive(Debug, PartialEq, Eq)]
pub enum Response {
    /// _Accept_ the authentication request.
    Accept,

    /// _Reject_ the authentication request.
    Reject,
}

/// An interface to the `password` authentication method.
pub trait Password: Send + Sync {
    /// Process the authentication request.
    fn process(&mut self, user: String, password: String) -> Response;
}

impl<T: FnMut(String, String) -> Response + Send + Sync> Password for T {
    fn process(&mut self, user: String, password: String) -> Response {
        (self)(user, password)
    }
}

/// A default implementation of the method that rejects all requests.
impl Password for () {
    fn process(&mut self, _: String, _: String) -> Response {
        Response::Reject
    }
}

/// Compare two secrets without leaking their content through timing.
///
/// Differing lengths return early; crypt-style verifiers compare hashes
/// of predictable equal length, so only the content is sensitive.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && bool::from(a.ct_eq(b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equality_by_content() {
        assert!(constant_time_eq(b"$6$salt$hash", b"$6$salt$hash"));
        assert!(!constant_time_eq(b"$6$salt$hash", b"$6$salt$hasi"));
        assert!(!constant_time_eq(b"short", b"longer than that"));
        assert!(constant_time_eq(b"", b""));
    }
}

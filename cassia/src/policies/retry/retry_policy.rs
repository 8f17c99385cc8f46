//! The interface between the request executor and the retry policies.
//!
//! A [`RetryPolicy`] is given to the session once. For each request the
//! executor opens a [`RetrySession`], which sees every failed attempt of that
//! request and nothing else, so policies can keep per-request budgets in it.

use crate::errors::QueryError;
use crate::frame::types::Consistency;

/// A failed attempt, as shown to [`RetrySession::decide`].
#[derive(Debug, Clone, Copy)]
pub struct RequestInfo<'a> {
    /// Why the attempt failed.
    pub error: &'a QueryError,
    /// Whether the statement was marked idempotent. Statements are not
    /// idempotent unless marked so, and only idempotent ones may be sent
    /// again after the server could have applied them.
    pub is_idempotent: bool,
    /// Consistency the failed attempt was sent with.
    pub consistency: Consistency,
    /// Number of attempts made for the request, the failed one included.
    pub attempt: usize,
}

/// What the executor does after a failed attempt.
///
/// The consistency carried by the retry variants replaces the one of the
/// failed attempt; `None` keeps it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RetryDecision {
    /// Send the request again to the node that failed it.
    RetrySameNode(Option<Consistency>),
    /// Move on to the next node of the load balancing plan.
    RetryNextNode(Option<Consistency>),
    /// Return the error of the failed attempt to the caller.
    Rethrow,
    /// Pretend the request succeeded with an empty result.
    Ignore,
}

impl RetryDecision {
    /// Whether the request is sent again.
    pub fn is_retry(&self) -> bool {
        matches!(self, Self::RetrySameNode(_) | Self::RetryNextNode(_))
    }
}

/// Creates a [`RetrySession`] for every request the session executes.
pub trait RetryPolicy: std::fmt::Debug + Send + Sync {
    /// Starts deciding about the retries of a new request.
    fn new_session(&self) -> Box<dyn RetrySession>;
}

/// Per-request state of a [`RetryPolicy`].
pub trait RetrySession: Send + Sync {
    /// Called once per failed attempt.
    fn decide(&mut self, request_info: RequestInfo) -> RetryDecision;

    /// Forgets the attempts seen so far, so the session can serve another request.
    fn reset(&mut self);
}

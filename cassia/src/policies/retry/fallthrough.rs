use super::{RequestInfo, RetryDecision, RetryPolicy, RetrySession};

/// Never retries: every request gets exactly one attempt, and its error is
/// returned as is. Useful when the caller retries on its own terms.
#[derive(Debug, Default)]
pub struct FallthroughRetryPolicy;

/// The stateless [RetrySession] of [FallthroughRetryPolicy].
pub struct FallthroughRetrySession;

impl FallthroughRetryPolicy {
    pub fn new() -> FallthroughRetryPolicy {
        FallthroughRetryPolicy
    }
}

impl RetryPolicy for FallthroughRetryPolicy {
    fn new_session(&self) -> Box<dyn RetrySession> {
        Box::new(FallthroughRetrySession)
    }
}

impl RetrySession for FallthroughRetrySession {
    fn decide(&mut self, _request_info: RequestInfo) -> RetryDecision {
        RetryDecision::Rethrow
    }

    fn reset(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::FallthroughRetryPolicy;
    use crate::errors::{ConnectionError, DbError, QueryError};
    use crate::frame::types::Consistency;
    use crate::policies::retry::{RequestInfo, RetryDecision, RetryPolicy};

    #[test]
    fn retriable_errors_are_returned_too() {
        let errors = [
            QueryError::ConnectionError(ConnectionError::ConnectionClosed),
            QueryError::ConnectionError(ConnectionError::UnableToAllocStreamId),
            QueryError::DbError(DbError::IsBootstrapping, String::new()),
        ];
        let mut session = FallthroughRetryPolicy::new().new_session();
        for error in &errors {
            let decision = session.decide(RequestInfo {
                error,
                is_idempotent: true,
                consistency: Consistency::One,
                attempt: 1,
            });
            assert_eq!(decision, RetryDecision::Rethrow);
        }
    }
}

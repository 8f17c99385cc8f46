use crate::errors::{ConnectionError, DbError, QueryError, WriteType};

use super::{RequestInfo, RetryDecision, RetryPolicy, RetrySession};

/// The retry policy sessions use unless configured otherwise.
///
/// A request is sent again at most once. The retry happens only when the
/// failure says something about where a new attempt could succeed:
///
/// | failure | retry |
/// |---|---|
/// | `Unavailable` | next node |
/// | `ReadTimeout` with enough replies but no data | same node |
/// | `WriteTimeout` of the batch log, idempotent statement | same node |
/// | transport errors, client timeout, `Overloaded`, `ServerError`, `TruncateError`, `ReadFailure`, `WriteFailure` | next node, idempotent statement only |
/// | `IsBootstrapping`, no stream id or connection available | next node |
///
/// Any other failure, any second failure and any failure at a serial
/// consistency is returned to the caller.
#[derive(Debug, Default)]
pub struct DefaultRetryPolicy;

impl DefaultRetryPolicy {
    /// Creates a new instance of [DefaultRetryPolicy].
    pub fn new() -> DefaultRetryPolicy {
        DefaultRetryPolicy
    }
}

impl RetryPolicy for DefaultRetryPolicy {
    fn new_session(&self) -> Box<dyn RetrySession> {
        Box::new(DefaultRetrySession::new())
    }
}

/// Implementation of [RetrySession] for [DefaultRetryPolicy].
#[derive(Debug, Default)]
pub struct DefaultRetrySession {
    retried: bool,
}

impl DefaultRetrySession {
    /// Creates a new instance of [DefaultRetrySession].
    pub fn new() -> DefaultRetrySession {
        DefaultRetrySession::default()
    }
}

/// Where a new attempt could succeed after `error`, if anywhere.
fn retry_target(error: &QueryError, is_idempotent: bool) -> Option<RetryDecision> {
    let next_node = Some(RetryDecision::RetryNextNode(None));
    let same_node = Some(RetryDecision::RetrySameNode(None));

    match error {
        // Never written to the socket, so the statement was not applied anywhere.
        QueryError::ConnectionError(
            ConnectionError::UnableToAllocStreamId | ConnectionError::NoWorkingConnection { .. },
        )
        | QueryError::DbError(DbError::IsBootstrapping, _) => next_node,

        // The coordinator sees too few live replicas. Another one may see more.
        QueryError::DbError(DbError::Unavailable { .. }, _) => next_node,

        // Enough replicas answered, but only with digests: the replica asked
        // for the data was slow, and the coordinator will pick another one.
        QueryError::DbError(
            DbError::ReadTimeout {
                received,
                required,
                data_present: false,
                ..
            },
            _,
        ) if received >= required => same_node,

        // Writing the batch log timed out, nothing from the batch was applied yet.
        QueryError::DbError(
            DbError::WriteTimeout {
                write_type: WriteType::BatchLog,
                ..
            },
            _,
        ) if is_idempotent => same_node,

        // The node is in trouble, and the statement may have been applied.
        QueryError::ConnectionError(_)
        | QueryError::RequestTimeout(_)
        | QueryError::DbError(
            DbError::Overloaded
            | DbError::ServerError
            | DbError::TruncateError
            | DbError::ReadFailure { .. }
            | DbError::WriteFailure { .. },
            _,
        ) if is_idempotent => next_node,

        _ => None,
    }
}

impl RetrySession for DefaultRetrySession {
    fn decide(&mut self, request_info: RequestInfo) -> RetryDecision {
        // Lightweight transactions are left to the caller.
        if request_info.consistency.is_serial() || self.retried {
            return RetryDecision::Rethrow;
        }
        match retry_target(request_info.error, request_info.is_idempotent) {
            Some(decision) => {
                self.retried = true;
                decision
            }
            None => RetryDecision::Rethrow,
        }
    }

    fn reset(&mut self) {
        self.retried = false;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use bytes::Bytes;

    use super::{DefaultRetryPolicy, RequestInfo, RetryDecision, RetryPolicy};
    use crate::errors::{
        BadQuery, BrokenConnectionErrorKind, ConnectionError, DbError, QueryError, WriteType,
    };
    use crate::frame::types::Consistency;
    use crate::test_utils::setup_tracing;

    fn db_error(error: DbError) -> QueryError {
        QueryError::DbError(error, String::new())
    }

    fn unavailable() -> QueryError {
        db_error(DbError::Unavailable {
            consistency: Consistency::Two,
            required: 2,
            alive: 1,
        })
    }

    fn read_timeout(received: i32, required: i32, data_present: bool) -> QueryError {
        db_error(DbError::ReadTimeout {
            consistency: Consistency::Two,
            received,
            required,
            data_present,
        })
    }

    fn write_timeout(write_type: WriteType) -> QueryError {
        db_error(DbError::WriteTimeout {
            consistency: Consistency::Two,
            received: 1,
            required: 2,
            write_type,
        })
    }

    /// Decisions of a fresh session for consecutive failures of one request.
    fn decisions(errors: &[QueryError], is_idempotent: bool) -> Vec<RetryDecision> {
        let mut session = DefaultRetryPolicy::new().new_session();
        errors
            .iter()
            .enumerate()
            .map(|(i, error)| {
                session.decide(RequestInfo {
                    error,
                    is_idempotent,
                    consistency: Consistency::One,
                    attempt: i + 1,
                })
            })
            .collect()
    }

    fn first_decision(error: QueryError, is_idempotent: bool) -> RetryDecision {
        decisions(&[error], is_idempotent).remove(0)
    }

    #[test]
    fn errors_telling_nothing_about_other_nodes_are_returned() {
        setup_tracing();
        let errors = [
            db_error(DbError::SyntaxError),
            db_error(DbError::Invalid),
            db_error(DbError::AlreadyExists {
                keyspace: "ks".to_owned(),
                table: "t".to_owned(),
            }),
            db_error(DbError::Unauthorized),
            db_error(DbError::Unprepared {
                statement_id: Bytes::from_static(b"deadbeef"),
            }),
            db_error(DbError::Other(0x124816)),
            read_timeout(2, 2, true),
            read_timeout(1, 2, false),
            write_timeout(WriteType::Simple),
            QueryError::BadQuery(BadQuery::EmptyBatch),
            QueryError::ProtocolError("bad frame".to_owned()),
        ];
        for error in errors {
            for is_idempotent in [false, true] {
                assert_eq!(
                    first_decision(error.clone(), is_idempotent),
                    RetryDecision::Rethrow,
                    "{error}"
                );
            }
        }
    }

    #[test]
    fn possibly_applied_statements_are_retried_only_when_idempotent() {
        setup_tracing();
        let errors = [
            db_error(DbError::Overloaded),
            db_error(DbError::ServerError),
            db_error(DbError::TruncateError),
            db_error(DbError::WriteFailure {
                consistency: Consistency::Two,
                received: 1,
                required: 2,
                numfailures: 1,
                write_type: WriteType::Simple,
            }),
            QueryError::ConnectionError(ConnectionError::Broken(
                BrokenConnectionErrorKind::TooManyOrphanedStreamIds(5).into(),
            )),
            QueryError::ConnectionError(ConnectionError::ConnectionClosed),
            QueryError::RequestTimeout(Duration::from_millis(300)),
        ];
        for error in errors {
            assert_eq!(first_decision(error.clone(), false), RetryDecision::Rethrow);
            assert_eq!(
                first_decision(error, true),
                RetryDecision::RetryNextNode(None)
            );
        }
    }

    #[test]
    fn unsent_requests_move_to_the_next_node() {
        setup_tracing();
        let errors = [
            db_error(DbError::IsBootstrapping),
            QueryError::ConnectionError(ConnectionError::UnableToAllocStreamId),
            QueryError::ConnectionError(ConnectionError::NoWorkingConnection { last_error: None }),
            unavailable(),
        ];
        for error in errors {
            for is_idempotent in [false, true] {
                assert_eq!(
                    first_decision(error.clone(), is_idempotent),
                    RetryDecision::RetryNextNode(None)
                );
            }
        }
    }

    #[test]
    fn timeouts_retried_on_the_same_node() {
        setup_tracing();
        assert_eq!(
            first_decision(read_timeout(2, 2, false), false),
            RetryDecision::RetrySameNode(None)
        );
        assert_eq!(
            first_decision(write_timeout(WriteType::BatchLog), true),
            RetryDecision::RetrySameNode(None)
        );
        assert_eq!(
            first_decision(write_timeout(WriteType::BatchLog), false),
            RetryDecision::Rethrow
        );
    }

    #[test]
    fn second_failure_is_returned() {
        setup_tracing();
        let closed = || QueryError::ConnectionError(ConnectionError::ConnectionClosed);
        assert_eq!(
            decisions(&[closed(), closed(), closed(), closed()], true),
            [
                RetryDecision::RetryNextNode(None),
                RetryDecision::Rethrow,
                RetryDecision::Rethrow,
                RetryDecision::Rethrow,
            ]
        );

        // The budget is shared by all kinds of failures.
        assert_eq!(
            decisions(&[read_timeout(2, 2, false), unavailable()], true),
            [RetryDecision::RetrySameNode(None), RetryDecision::Rethrow]
        );
        assert_eq!(
            decisions(
                &[db_error(DbError::IsBootstrapping), db_error(DbError::IsBootstrapping)],
                false
            ),
            [RetryDecision::RetryNextNode(None), RetryDecision::Rethrow]
        );
    }

    #[test]
    fn serial_consistency_is_never_retried() {
        setup_tracing();
        let error = db_error(DbError::Overloaded);
        let mut session = DefaultRetryPolicy::new().new_session();
        let decision = session.decide(RequestInfo {
            error: &error,
            is_idempotent: true,
            consistency: Consistency::Serial,
            attempt: 1,
        });
        assert_eq!(decision, RetryDecision::Rethrow);
    }

    #[test]
    fn reset_restores_the_budget() {
        setup_tracing();
        let error = unavailable();
        let info = RequestInfo {
            error: &error,
            is_idempotent: false,
            consistency: Consistency::Quorum,
            attempt: 1,
        };
        let mut session = DefaultRetryPolicy::new().new_session();
        assert!(session.decide(info).is_retry());
        assert!(!session.decide(info).is_retry());
        session.reset();
        assert!(session.decide(info).is_retry());
    }
}

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cassia_cql::frame::request::RequestOpcode;
use cassia_cql::frame::response::error::DbError;
use rand::Rng;

/// Specifies when an associated [`Reaction`] will be performed.
/// Conditions are subject to logic, with `not()`, `and()` and `or()`
/// convenience functions.
#[derive(Debug, Clone)]
pub enum Condition {
    True,

    False,

    Not(Box<Condition>),

    And(Box<Condition>, Box<Condition>),

    Or(Box<Condition>, Box<Condition>),

    /// True iff the request has come in the n-th connection accepted by the node
    /// (counting from 0).
    ConnectionSeqNo(usize),

    /// True iff the request has the given opcode.
    RequestOpcode(RequestOpcode),

    /// True iff the request body contains the given byte slice, with case-sensitive comparison.
    BodyContainsCaseSensitive(Box<[u8]>),

    /// True iff the request body contains the given byte slice, with case-insensitive comparison (ASCII only).
    BodyContainsCaseInsensitive(Box<[u8]>),

    /// True with the given probability.
    RandomWithProbability(f64),

    /// True for the first n evaluations, then false. Clones share the counter.
    TrueForLimitedTimes(Arc<AtomicUsize>),
}

/// The context in which [`Conditions`](Condition) are evaluated.
pub(crate) struct EvaluationContext<'a> {
    pub(crate) connection_seq_no: usize,
    pub(crate) opcode: RequestOpcode,
    pub(crate) frame_body: &'a [u8],
}

impl Condition {
    pub(crate) fn eval(&self, ctx: &EvaluationContext<'_>) -> bool {
        match self {
            Condition::True => true,

            Condition::False => false,

            Condition::Not(c) => !c.eval(ctx),

            Condition::And(c1, c2) => c1.eval(ctx) && c2.eval(ctx),

            Condition::Or(c1, c2) => c1.eval(ctx) || c2.eval(ctx),

            Condition::ConnectionSeqNo(no) => *no == ctx.connection_seq_no,

            Condition::RequestOpcode(op) => *op == ctx.opcode,

            Condition::BodyContainsCaseSensitive(pattern) => ctx
                .frame_body
                .windows(pattern.len())
                .any(|window| *window == **pattern),

            Condition::BodyContainsCaseInsensitive(pattern) => ctx
                .frame_body
                .windows(pattern.len())
                .any(|window| window.eq_ignore_ascii_case(pattern)),

            Condition::RandomWithProbability(probability) => {
                rand::rng().random_bool(*probability)
            }

            Condition::TrueForLimitedTimes(remaining) => remaining
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
                .is_ok(),
        }
    }

    /// A convenience function for creating [Condition::Not] variant.
    #[allow(clippy::should_implement_trait)]
    pub fn not(c: Self) -> Self {
        Condition::Not(Box::new(c))
    }

    /// A convenience function for creating [Condition::And] variant.
    pub fn and(self, c2: Self) -> Self {
        Self::And(Box::new(self), Box::new(c2))
    }

    /// A convenience function for creating [Condition::Or] variant.
    pub fn or(self, c2: Self) -> Self {
        Self::Or(Box::new(self), Box::new(c2))
    }

    /// A convenience function for creating [Condition::TrueForLimitedTimes] variant.
    pub fn true_for_limited_times(times: usize) -> Self {
        Self::TrueForLimitedTimes(Arc::new(AtomicUsize::new(times)))
    }

    /// A condition matching statements whose text contains `pattern`.
    /// Matches QUERY and PREPARE bodies, not EXECUTE ones.
    pub fn query_contains(pattern: &str) -> Self {
        Condition::BodyContainsCaseSensitive(pattern.as_bytes().into())
    }
}

/// What a node does with a request matched by a [`RequestRule`].
#[derive(Debug, Clone)]
pub enum Reaction {
    /// Waits, then serves the request as usual.
    Delay(Duration),
    /// Swallows the request. The connection stays open.
    NoResponse,
    /// Drops the connection the request came in.
    CloseConnection,
    /// Answers with the given error instead of serving the request.
    Error(DbError),
    /// Waits, then answers with the given error.
    DelayedError(Duration, DbError),
}

/// A rule describing what a node should do with the received request
/// and on what conditions. Rules are tried in order; the first one whose
/// condition holds is applied, and requests no rule matches are served normally.
#[derive(Debug, Clone)]
pub struct RequestRule(pub Condition, pub Reaction);

impl RequestRule {
    pub fn new(condition: Condition, reaction: Reaction) -> Self {
        Self(condition, reaction)
    }
}

/// Ready-made errors for rules.
pub mod example_db_errors {
    use cassia_cql::frame::response::error::{DbError, WriteType};
    use cassia_cql::Consistency;

    pub fn overloaded() -> DbError {
        DbError::Overloaded
    }

    pub fn is_bootstrapping() -> DbError {
        DbError::IsBootstrapping
    }

    pub fn server_error() -> DbError {
        DbError::ServerError
    }

    pub fn unavailable() -> DbError {
        DbError::Unavailable {
            consistency: Consistency::Quorum,
            required: 2,
            alive: 1,
        }
    }

    pub fn read_timeout(data_present: bool) -> DbError {
        DbError::ReadTimeout {
            consistency: Consistency::Quorum,
            received: 2,
            required: 2,
            data_present,
        }
    }

    pub fn write_timeout(write_type: WriteType) -> DbError {
        DbError::WriteTimeout {
            consistency: Consistency::Quorum,
            received: 1,
            required: 2,
            write_type,
        }
    }

    pub fn syntax_error() -> DbError {
        DbError::SyntaxError
    }

    pub fn unauthorized() -> DbError {
        DbError::Unauthorized
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(body: &[u8]) -> EvaluationContext<'_> {
        EvaluationContext {
            connection_seq_no: 42,
            opcode: RequestOpcode::Query,
            frame_body: body,
        }
    }

    #[test]
    fn condition_case_insensitive_matching() {
        let condition_matching =
            Condition::BodyContainsCaseInsensitive(Box::new(*b"cassandra'sInefficiency"));
        let condition_nonmatching =
            Condition::BodyContainsCaseInsensitive(Box::new(*b"cassandrasInefficiency"));
        let body = b"\0\0x{0x223}Cassandra'sINEFFICIENCY\x12\x31";

        assert!(condition_matching.eval(&ctx(body)));
        assert!(!condition_nonmatching.eval(&ctx(body)));
    }

    #[test]
    fn logic_combinators() {
        let body = b"SELECT * FROM users";
        let is_query = Condition::RequestOpcode(RequestOpcode::Query);
        let on_users = Condition::query_contains("users");

        assert!(is_query.clone().and(on_users.clone()).eval(&ctx(body)));
        assert!(!Condition::not(is_query.clone()).eval(&ctx(body)));
        assert!(Condition::False.or(on_users).eval(&ctx(body)));
        assert!(!Condition::ConnectionSeqNo(0).eval(&ctx(body)));
        assert!(Condition::ConnectionSeqNo(42).and(is_query).eval(&ctx(body)));
    }

    #[test]
    fn limited_times_condition_expires() {
        let condition = Condition::true_for_limited_times(2);
        let shared = condition.clone();
        assert!(condition.eval(&ctx(b"")));
        assert!(shared.eval(&ctx(b"")));
        assert!(!condition.eval(&ctx(b"")));
        assert!(!shared.eval(&ctx(b"")));
    }

    #[test]
    fn probability_bounds() {
        assert!(Condition::RandomWithProbability(1.0).eval(&ctx(b"")));
        assert!(!Condition::RandomWithProbability(0.0).eval(&ctx(b"")));
    }
}

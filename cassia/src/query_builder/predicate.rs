use std::fmt;

use super::{QueryWriter, Term};

/// Comparison operator of a [`Predicate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    Lt,
    Lte,
    Gt,
    Gte,
    In,
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Operator::Eq => "=",
            Operator::Lt => "<",
            Operator::Lte => "<=",
            Operator::Gt => ">",
            Operator::Gte => ">=",
            Operator::In => "IN",
        })
    }
}

/// A condition on a single column, used in `WHERE` clauses.
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    column: String,
    operator: Operator,
    terms: Vec<Term>,
}

impl Predicate {
    fn new(column: impl Into<String>, operator: Operator, terms: Vec<Term>) -> Self {
        Self {
            column: column.into(),
            operator,
            terms,
        }
    }

    /// The column the predicate restricts.
    pub fn column(&self) -> &str {
        &self.column
    }

    /// The comparison operator.
    pub fn operator(&self) -> Operator {
        self.operator
    }

    pub(super) fn write(&self, writer: &mut QueryWriter) {
        writer.push_identifier(&self.column);
        writer.push(format_args!(" {} ", self.operator));
        match (self.operator, self.terms.as_slice()) {
            // `IN ?` binds the whole list to one marker.
            (Operator::In, [term @ (Term::BindMarker | Term::NamedMarker(_))]) => {
                writer.push_term(term)
            }
            (Operator::In, terms) => {
                writer.push("(");
                writer.push_terms(terms);
                writer.push(")");
            }
            (_, [term]) => writer.push_term(term),
            (_, terms) => writer.push_terms(terms),
        }
    }
}

/// `column = term`
pub fn eq(column: impl Into<String>, term: impl Into<Term>) -> Predicate {
    Predicate::new(column, Operator::Eq, vec![term.into()])
}

/// `column < term`
pub fn lt(column: impl Into<String>, term: impl Into<Term>) -> Predicate {
    Predicate::new(column, Operator::Lt, vec![term.into()])
}

/// `column <= term`
pub fn lte(column: impl Into<String>, term: impl Into<Term>) -> Predicate {
    Predicate::new(column, Operator::Lte, vec![term.into()])
}

/// `column > term`
pub fn gt(column: impl Into<String>, term: impl Into<Term>) -> Predicate {
    Predicate::new(column, Operator::Gt, vec![term.into()])
}

/// `column >= term`
pub fn gte(column: impl Into<String>, term: impl Into<Term>) -> Predicate {
    Predicate::new(column, Operator::Gte, vec![term.into()])
}

/// `column IN (terms...)`. A single bind marker binds the whole list: `column IN ?`.
pub fn in_<T: Into<Term>>(column: impl Into<String>, terms: impl IntoIterator<Item = T>) -> Predicate {
    Predicate::new(
        column,
        Operator::In,
        terms.into_iter().map(Into::into).collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query_builder::{bind_marker, select_all};
    use crate::value::BoundValue;

    #[test]
    fn operators_are_rendered() {
        let built = select_all()
            .from_table("events")
            .where_(eq("kind", bind_marker()))
            .and(gt("at", 10))
            .and(lte("at", 20))
            .and(lt("seq", bind_marker()))
            .and(gte("seq", 1i64))
            .build();
        assert_eq!(
            built.text(),
            "SELECT * FROM events WHERE kind = ? AND at > ? AND at <= ? AND seq < ? AND seq >= ?"
        );
        assert_eq!(
            built.values(),
            &[
                None,
                Some(BoundValue::from(10)),
                Some(BoundValue::from(20)),
                None,
                Some(BoundValue::from(1i64)),
            ]
        );
    }

    #[test]
    fn in_lists() {
        let built = select_all()
            .from_table("users")
            .where_(in_("city", ["Austin", "Boston"]))
            .build();
        assert_eq!(built.text(), "SELECT * FROM users WHERE city IN (?, ?)");
        assert_eq!(built.values().len(), 2);

        let built = select_all()
            .from_table("users")
            .where_(in_("city", [bind_marker()]))
            .build();
        assert_eq!(built.text(), "SELECT * FROM users WHERE city IN ?");
        assert_eq!(built.bind_marker_count(), 1);
    }
}

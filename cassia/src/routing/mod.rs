//! Entities that make it possible to route requests to the nodes owning the data:
//! the token representation and the partitioner which computes tokens from
//! partition keys. Replica computation lives in [`crate::cluster::state`].

pub mod partitioner;

/// Token is a result of computing a hash of a partition key.
///
/// It is basically an i64 with one caveat: i64::MIN is not
/// a valid token. It is used to represent the minimum of the ring.
/// For this reason tokens are normalized - i64::MIN
/// is replaced with i64::MAX when created with [`Token::new`].
#[derive(PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Debug, Hash)]
pub struct Token {
    value: i64,
}

impl Token {
    /// Creates a new token with given value, normalizing the value if necessary
    #[inline]
    pub fn new(value: i64) -> Self {
        Self {
            value: if value == i64::MIN { i64::MAX } else { value },
        }
    }

    #[inline]
    pub fn value(&self) -> i64 {
        self.value
    }
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.value)
    }
}

#[cfg(test)]
mod tests {
    use super::Token;

    #[test]
    fn min_token_is_normalized() {
        assert_eq!(Token::new(i64::MIN).value(), i64::MAX);
        assert_eq!(Token::new(-5).value(), -5);
        assert!(Token::new(1) < Token::new(2));
    }
}

//! Partitioner computing tokens from partition keys.
//!
//! Only Murmur3 is supported. The variant implemented here is the one used
//! by Cassandra, which differs from the reference algorithm in how the tail
//! bytes are mixed: they are sign-extended before being shifted into place.

use std::num::Wrapping;

use bytes::Buf;
use thiserror::Error;

use crate::routing::Token;

/// An error that occurred while building a routing key.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum TokenCalculationError {
    /// A component of a composite partition key does not fit its u16 length prefix.
    #[error("Value of a partition key component is too long: {0} bytes, at most 65535 allowed")]
    ValueTooLong(usize),
}

/// Builds the bytes hashed by the partitioner from serialized partition key components.
///
/// A single component is used as-is. A composite key is encoded as
/// `u16 length | bytes | 0x00` for each component, in partition key order.
pub fn routing_key<'a>(
    components: impl ExactSizeIterator<Item = &'a [u8]>,
) -> Result<Vec<u8>, TokenCalculationError> {
    if components.len() == 1 {
        return Ok(components.into_iter().flatten().copied().collect());
    }

    let mut key = Vec::new();
    for component in components {
        let len: u16 = component
            .len()
            .try_into()
            .map_err(|_| TokenCalculationError::ValueTooLong(component.len()))?;
        key.extend_from_slice(&len.to_be_bytes());
        key.extend_from_slice(component);
        key.push(0);
    }
    Ok(key)
}

/// Computes the token of the given serialized partition key components.
pub fn calculate_token<'a>(
    components: impl ExactSizeIterator<Item = &'a [u8]>,
) -> Result<Token, TokenCalculationError> {
    let key = routing_key(components)?;
    Ok(Murmur3Partitioner::hash(&key))
}

/// The Murmur3 partitioner, default for CQL clusters.
#[derive(Debug, Clone, Copy, Default)]
pub struct Murmur3Partitioner;

const C1: Wrapping<i64> = Wrapping(0x87c3_7b91_1142_53d5_u64 as i64);
const C2: Wrapping<i64> = Wrapping(0x4cf5_ad43_2745_937f_u64 as i64);

impl Murmur3Partitioner {
    /// Name under which servers report this partitioner.
    pub const NAME: &'static str = "org.apache.cassandra.dht.Murmur3Partitioner";

    /// Hashes a routing key into a token.
    pub fn hash(mut data: &[u8]) -> Token {
        let total_len = data.len();
        let mut h1 = Wrapping(0_i64);
        let mut h2 = Wrapping(0_i64);

        while data.len() >= 16 {
            let mut k1 = Wrapping(data.get_i64_le());
            let mut k2 = Wrapping(data.get_i64_le());

            k1 = mix_k1(k1);
            h1 ^= k1;
            h1 = rotl64(h1, 27);
            h1 += h2;
            h1 = h1 * Wrapping(5) + Wrapping(0x52dce729);

            k2 = mix_k2(k2);
            h2 ^= k2;
            h2 = rotl64(h2, 31);
            h2 += h1;
            h2 = h2 * Wrapping(5) + Wrapping(0x38495ab5);
        }

        let tail = data;
        let mut k1 = Wrapping(0_i64);
        let mut k2 = Wrapping(0_i64);

        if tail.len() > 8 {
            for i in (8..tail.len()).rev() {
                k2 ^= Wrapping(tail[i] as i8 as i64) << ((i - 8) * 8);
            }
            h2 ^= mix_k2(k2);
        }

        if !tail.is_empty() {
            for i in (0..tail.len().min(8)).rev() {
                k1 ^= Wrapping(tail[i] as i8 as i64) << (i * 8);
            }
            h1 ^= mix_k1(k1);
        }

        h1 ^= Wrapping(total_len as i64);
        h2 ^= Wrapping(total_len as i64);

        h1 += h2;
        h2 += h1;

        h1 = fmix(h1);
        h2 = fmix(h2);

        h1 += h2;

        Token::new(h1.0)
    }
}

#[inline]
fn mix_k1(mut k1: Wrapping<i64>) -> Wrapping<i64> {
    k1 *= C1;
    k1 = rotl64(k1, 31);
    k1 * C2
}

#[inline]
fn mix_k2(mut k2: Wrapping<i64>) -> Wrapping<i64> {
    k2 *= C2;
    k2 = rotl64(k2, 33);
    k2 * C1
}

#[inline]
fn rotl64(v: Wrapping<i64>, n: u32) -> Wrapping<i64> {
    Wrapping(v.0.rotate_left(n))
}

#[inline]
fn fmix(mut k: Wrapping<i64>) -> Wrapping<i64> {
    k ^= Wrapping((k.0 as u64 >> 33) as i64);
    k *= Wrapping(0xff51afd7ed558ccd_u64 as i64);
    k ^= Wrapping((k.0 as u64 >> 33) as i64);
    k *= Wrapping(0xc4ceb9fe1a85ec53_u64 as i64);
    k ^= Wrapping((k.0 as u64 >> 33) as i64);

    k
}

#[cfg(test)]
mod tests {
    use super::{calculate_token, routing_key, Murmur3Partitioner, TokenCalculationError};
    use crate::test_utils::setup_tracing;

    #[test]
    fn test_murmur3_partitioner() {
        setup_tracing();
        for (pk, expected) in [
            ("test", -6017608668500074083),
            ("xd", 4507812186440344727),
            ("primary_key", -1632642444691073360),
            ("kremówki", 4354931215268080151),
        ] {
            assert_eq!(Murmur3Partitioner::hash(pk.as_bytes()).value(), expected);
        }
    }

    #[test]
    fn long_keys_cover_both_blocks_and_tail() {
        setup_tracing();
        // 16 bytes per block plus a 9 byte tail exercises both tail words.
        let key = b"0123456789abcdef012345678";
        let token = Murmur3Partitioner::hash(key);
        assert_eq!(token, Murmur3Partitioner::hash(key));
        assert_ne!(token, Murmur3Partitioner::hash(&key[..24]));
    }

    #[test]
    fn single_component_key_is_raw_bytes() {
        let key = routing_key([&b"Jones"[..]].into_iter()).unwrap();
        assert_eq!(key, b"Jones");
        assert_eq!(
            calculate_token([&b"test"[..]].into_iter()).unwrap().value(),
            -6017608668500074083
        );
    }

    #[test]
    fn composite_key_is_length_prefixed_and_terminated() {
        let key = routing_key([&b"ab"[..], &[0, 0, 0, 7][..]].into_iter()).unwrap();
        assert_eq!(key, vec![0, 2, b'a', b'b', 0, 0, 4, 0, 0, 0, 7, 0]);
    }

    #[test]
    fn too_long_component_is_rejected() {
        let big = vec![0_u8; 70000];
        let err = routing_key([&big[..], &b"x"[..]].into_iter()).unwrap_err();
        assert_eq!(err, TokenCalculationError::ValueTooLong(70000));
    }
}

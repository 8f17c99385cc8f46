//! Defines CQL protocol-level types used by the `cassia` driver.
//!
//! Mainly intended to be used by the driver itself, but the frame codec, the request
//! and response types and [`value::CqlValue`] are also useful for other applications
//! that need to speak the CQL native protocol (v4), e.g. test servers.

pub mod frame;

pub mod value;

pub use crate::frame::types::{Consistency, SerialConsistency};
pub use crate::frame::Compression;

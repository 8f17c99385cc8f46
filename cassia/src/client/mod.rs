//! This module holds entities that represent the whole configurable
//! driver session with the cluster.
//! The following abstractions are involved:
//! - [Session](session::Session) - the main entity of the driver. It:
//!   - contains and manages all driver configuration,
//!   - launches and communicates with the cluster worker, which keeps
//!     the metadata and the connection pools up to date,
//!   - executes requests along the load balancing plan, with retries.
//! - [QueryPager](pager::QueryPager) - a stream over the rows of a paged request.

pub mod pager;

pub mod session;

pub mod session_builder;

pub use crate::frame::Compression;

pub use crate::network::PoolSize;

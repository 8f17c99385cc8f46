//! Async Rust driver for partitioned, replicated column stores speaking the CQL native protocol v4.
//!
//! # Driver overview
//! ### Connecting
//! All driver activity revolves around the [Session].\
//! `Session` is created by specifying a few known nodes and connecting to them:
//!
//! ```rust,no_run
//! use cassia::{Session, SessionBuilder};
//! use std::error::Error;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn Error>> {
//!    let session: Session = SessionBuilder::new()
//!         .known_node("127.0.0.1:9042")
//!         .known_node("1.2.3.4:9876")
//!         .use_keyspace("demo", false)
//!         .build()
//!         .await?;
//!
//!    Ok(())
//! }
//! ```
//! `Session` is usually created using the [SessionBuilder].\
//! All configuration options for a `Session` can be specified while building.
//!
//! ### Making queries
//! After successfully connecting to the cluster we can make queries.\
//! The driver supports multiple statement kinds:
//! * [Simple](crate::statement::Statement), executed with [Session::execute]
//! * [Prepared](crate::statement::prepared::PreparedStatement), created by [Session::prepare]
//!   and bound into a [BoundStatement](crate::statement::prepared::BoundStatement)
//! * [Batch](crate::statement::batch::Batch), executed with [Session::execute_batch]
//! * [Built](crate::query_builder::BuiltStatement) with the [query builder](crate::query_builder)
//!
//! The easiest way to specify bound values is using a tuple:
//! ```rust
//! # use cassia::Session;
//! # use std::error::Error;
//! # async fn check_only_compiles(session: &Session) -> Result<(), Box<dyn Error>> {
//! let prepared = session
//!     .prepare("INSERT INTO users (lastname, age, city) VALUES (?, ?, ?)")
//!     .await?;
//! session.execute(prepared.bind(("Jones", 35, "Austin"))?).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ### Receiving results
//! [Session::execute] returns a [QueryPager](crate::client::pager::QueryPager),
//! a stream of rows which fetches the following pages as it is consumed.
//! Rows are accessed by column name:
//!
//! ```rust
//! # use cassia::Session;
//! # use std::error::Error;
//! # async fn check_only_compiles(session: &Session) -> Result<(), Box<dyn Error>> {
//! use futures::TryStreamExt;
//!
//! let mut pager = session.execute("SELECT lastname, age FROM users").await?;
//! while let Some(row) = pager.try_next().await? {
//!     let lastname: String = row.get("lastname")?;
//!     let age: i32 = row.get_int("age")?;
//! }
//! # Ok(())
//! # }
//! ```

#![cfg_attr(docsrs, feature(doc_auto_cfg))]

pub mod frame {
    pub use cassia_cql::frame::{frame_errors, value, Authenticator, Compression};
    pub(crate) use cassia_cql::frame::{
        parse_response_body_extensions, read_response_frame, request, server_event_type,
        FrameParams, SerializedRequest,
    };

    pub mod types {
        pub use cassia_cql::frame::types::{Consistency, SerialConsistency};
    }

    pub mod response {
        pub(crate) use cassia_cql::frame::response::*;

        pub mod result {
            pub(crate) use cassia_cql::frame::response::result::*;
            pub use cassia_cql::frame::response::result::{
                ColumnSpec, ColumnType, PartitionKeyIndex, TableSpec,
            };
        }
    }
}

/// Values sent to and received from the database.
pub mod value {
    pub use cassia_cql::frame::value::{BoundValue, Unset, ValueList};
    pub use cassia_cql::value::*;
}

pub mod authentication;
pub mod client;
pub mod cluster;
pub mod errors;
pub mod network;
pub mod policies;
pub mod query_builder;
pub mod response;
pub mod routing;
pub mod statement;

#[cfg(test)]
pub(crate) mod test_utils;

pub use client::session::Session;
pub use client::session_builder::SessionBuilder;
pub use statement::Consistency;

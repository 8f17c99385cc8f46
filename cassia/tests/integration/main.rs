mod authenticate;
mod batch;
mod load_balancing;
mod new_session;
mod paging_query;
mod query_builder;
mod retries;
mod statement;
pub(crate) mod utils;

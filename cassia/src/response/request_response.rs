use std::collections::HashMap;

use bytes::Bytes;
use tracing::error;
use uuid::Uuid;

use crate::errors::QueryError;
use crate::frame::response::{self, result, NonErrorResponse, Response};
use crate::response::query_result::QueryResult;
use crate::response::PagingStateResponse;

pub(crate) struct QueryResponse {
    pub(crate) response: Response,
    pub(crate) tracing_id: Option<Uuid>,
    pub(crate) warnings: Vec<String>,
    // Not exposed to users.
    #[allow(dead_code)]
    pub(crate) custom_payload: Option<HashMap<String, Bytes>>,
}

// A QueryResponse in which response can not be Response::Error
pub(crate) struct NonErrorQueryResponse {
    pub(crate) response: NonErrorResponse,
    pub(crate) tracing_id: Option<Uuid>,
    pub(crate) warnings: Vec<String>,
}

impl QueryResponse {
    pub(crate) fn into_non_error_query_response(self) -> Result<NonErrorQueryResponse, QueryError> {
        Ok(NonErrorQueryResponse {
            response: self.response.into_non_error_response()?,
            tracing_id: self.tracing_id,
            warnings: self.warnings,
        })
    }

    pub(crate) fn into_query_result(self) -> Result<QueryResult, QueryError> {
        self.into_non_error_query_response()?.into_query_result()
    }
}

impl NonErrorQueryResponse {
    pub(crate) fn as_set_keyspace(&self) -> Option<&result::SetKeyspace> {
        match &self.response {
            NonErrorResponse::Result(result::Result::SetKeyspace(sk)) => Some(sk),
            _ => None,
        }
    }

    pub(crate) fn as_schema_change(&self) -> Option<&result::SchemaChange> {
        match &self.response {
            NonErrorResponse::Result(result::Result::SchemaChange(sc)) => Some(sc),
            _ => None,
        }
    }

    /// Converts the response into a [QueryResult] holding a single page,
    /// and tells whether more pages are left.
    pub(crate) fn into_query_result_and_paging_state(
        self,
    ) -> Result<(QueryResult, PagingStateResponse), QueryError> {
        let Self {
            response,
            tracing_id,
            warnings,
        } = self;
        let (rows, paging_state_response) = match response {
            NonErrorResponse::Result(result::Result::Rows(mut rs)) => {
                let paging = PagingStateResponse::new_from_raw_bytes(rs.paging_state.take());
                (Some(rs), paging)
            }
            NonErrorResponse::Result(_) => (None, PagingStateResponse::NoMorePages),
            _ => {
                return Err(QueryError::ProtocolError(format!(
                    "Unexpected response to a query: {}",
                    response.to_response_kind()
                )))
            }
        };

        Ok((
            QueryResult::new(rows, tracing_id, warnings),
            paging_state_response,
        ))
    }

    /// Converts the response into a [QueryResult]. Meant for requests
    /// sent without paging, so leftover pages are reported as a server bug.
    pub(crate) fn into_query_result(self) -> Result<QueryResult, QueryError> {
        let (result, paging_state) = self.into_query_result_and_paging_state()?;

        if !paging_state.finished() {
            error!(
                "Server returned a paging state for a request that did not ask for paging; \
                the remaining pages would be discarded"
            );
            return Err(QueryError::ProtocolError(
                "Unexpected paging state in an unpaged response".to_owned(),
            ));
        }

        Ok(result)
    }
}

pub(crate) enum NonErrorStartupResponse {
    Ready,
    Authenticate(response::authenticate::Authenticate),
}

pub(crate) enum NonErrorAuthResponse {
    AuthChallenge(response::authenticate::AuthChallenge),
    AuthSuccess(response::authenticate::AuthSuccess),
}

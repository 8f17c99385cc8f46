//! Responses of the database, as seen by users of the driver.

pub mod query_result;
mod request_response;

use std::ops::ControlFlow;
use std::sync::Arc;

use bytes::Bytes;

pub(crate) use request_response::{
    NonErrorAuthResponse, NonErrorQueryResponse, NonErrorStartupResponse, QueryResponse,
};

/// Opaque token telling the server where to resume a paged query.
///
/// `PagingState::start()` asks for the first page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PagingState(Option<Arc<[u8]>>);

impl PagingState {
    /// A paging state that starts from the first page.
    #[inline]
    pub fn start() -> Self {
        Self(None)
    }

    /// Restores a paging state previously obtained with [`PagingState::as_bytes_slice`].
    pub fn new_from_raw_bytes(raw_paging_state: impl Into<Arc<[u8]>>) -> Self {
        Self(Some(raw_paging_state.into()))
    }

    /// Returns the raw bytes of the state, or `None` for the first page.
    pub fn as_bytes_slice(&self) -> Option<&Arc<[u8]>> {
        self.0.as_ref()
    }

    pub(crate) fn to_bytes(&self) -> Option<Bytes> {
        self.0.as_deref().map(Bytes::copy_from_slice)
    }
}

/// What the server said about the pages left after the one it returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PagingStateResponse {
    /// There are more pages. Pass `state` to fetch the next one.
    HasMorePages {
        /// Where to resume.
        state: PagingState,
    },
    /// This was the last page.
    NoMorePages,
}

impl PagingStateResponse {
    pub(crate) fn new_from_raw_bytes(raw: Option<Bytes>) -> Self {
        match raw {
            Some(bytes) => Self::HasMorePages {
                state: PagingState::new_from_raw_bytes(&bytes[..]),
            },
            None => Self::NoMorePages,
        }
    }

    /// Whether no more pages are left.
    #[inline]
    pub fn finished(&self) -> bool {
        matches!(self, Self::NoMorePages)
    }

    /// Converts the response into [`ControlFlow`], handy in a `loop` over pages.
    pub fn into_paging_control_flow(self) -> ControlFlow<(), PagingState> {
        match self {
            Self::HasMorePages { state } => ControlFlow::Continue(state),
            Self::NoMorePages => ControlFlow::Break(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::ops::ControlFlow;

    use bytes::Bytes;

    use super::{PagingState, PagingStateResponse};

    #[test]
    fn paging_state_response_from_server_bytes() {
        let resp = PagingStateResponse::new_from_raw_bytes(Some(Bytes::from_static(b"\x01\x02")));
        assert!(!resp.finished());
        match resp.into_paging_control_flow() {
            ControlFlow::Continue(state) => {
                assert_eq!(state.as_bytes_slice().map(|s| &s[..]), Some(&[1u8, 2][..]));
                assert_eq!(state.to_bytes(), Some(Bytes::from_static(b"\x01\x02")));
            }
            ControlFlow::Break(()) => panic!("expected more pages"),
        }

        let resp = PagingStateResponse::new_from_raw_bytes(None);
        assert!(resp.finished());
        assert_eq!(PagingState::start().to_bytes(), None);
    }
}

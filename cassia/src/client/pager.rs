//! Entities that provide automated transparent paging of a query.
//! They enable consuming result of a paged query as a stream over rows,
//! which abstracts over page boundaries.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::ops::ControlFlow;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::future::RemoteHandle;
use futures::{FutureExt, Stream};
use tokio::sync::mpsc;
use tracing::{trace, trace_span, Instrument};
use uuid::Uuid;

use super::session::RequestExecutor;
use crate::cluster::ClusterState;
use crate::errors::PagerError;
use crate::network::Connection;
use crate::response::query_result::{QueryResult, Row};
use crate::response::{PagingState, PagingStateResponse};
use crate::statement::{Consistency, Executable};

// Like std::task::ready!, but handles the whole stack of Poll<Option<Result<>>>.
// If it matches Poll::Ready(Some(Ok(_))), then it returns the innermost value,
// otherwise it returns from the surrounding function.
macro_rules! ready_some_ok {
    ($e:expr) => {
        match $e {
            Poll::Ready(Some(Ok(x))) => x,
            Poll::Ready(Some(Err(err))) => return Poll::Ready(Some(Err(err.into()))),
            Poll::Ready(None) => return Poll::Ready(None),
            Poll::Pending => return Poll::Pending,
        }
    };
}

struct ReceivedPage {
    rows: Vec<Row>,
    tracing_id: Option<Uuid>,
    warnings: Vec<String>,
    has_more_pages: bool,
}

type ResultPage = Result<ReceivedPage, PagerError>;

// A separate module is used here so that the parent module cannot construct
// SendAttemptedProof directly.
mod checked_channel_sender {
    use std::marker::PhantomData;
    use tokio::sync::mpsc;

    /// A value whose existence proves that there was an attempt
    /// to send an item of type T through a channel.
    /// Can only be constructed by ProvingSender::send.
    pub(super) struct SendAttemptedProof<T>(PhantomData<T>);

    /// An mpsc::Sender which returns proofs that it attempted to send items.
    pub(super) struct ProvingSender<T>(mpsc::Sender<T>);

    impl<T> From<mpsc::Sender<T>> for ProvingSender<T> {
        fn from(s: mpsc::Sender<T>) -> Self {
            Self(s)
        }
    }

    impl<T> ProvingSender<T> {
        pub(super) async fn send(
            &self,
            value: T,
        ) -> (SendAttemptedProof<T>, Result<(), mpsc::error::SendError<T>>) {
            (SendAttemptedProof(PhantomData), self.0.send(value).await)
        }
    }
}

use checked_channel_sender::{ProvingSender, SendAttemptedProof};

type PageSendAttemptedProof = SendAttemptedProof<ResultPage>;

// PagerWorker works in the background to fetch pages
// QueryPager receives them through a channel
struct PagerWorker {
    sender: ProvingSender<ResultPage>,

    statement: Executable,
    executor: RequestExecutor,
    cluster_state: Arc<ClusterState>,
    // Keyspace of the session when the pager was created.
    session_keyspace: Option<String>,

    paging_state: PagingState,
}

impl PagerWorker {
    // Contract: this function MUST send at least one item through self.sender
    async fn work(mut self) -> PageSendAttemptedProof {
        loop {
            let (page, paging_state_response) = match self.fetch_page().await {
                Ok(fetched) => fetched,
                Err(err) => {
                    trace!(error = %err, "Page fetch failed, stopping");
                    return self.sender.send(Err(err)).await.0;
                }
            };

            let (proof, send_result) = self.sender.send(Ok(page)).await;
            if send_result.is_err() {
                // The pager was dropped, nobody wants more rows.
                trace!("Pager dropped, stopping");
                return proof;
            }

            match paging_state_response.into_paging_control_flow() {
                ControlFlow::Continue(paging_state) => self.paging_state = paging_state,
                ControlFlow::Break(()) => return proof,
            }
        }
    }

    async fn fetch_page(&self) -> Result<(ReceivedPage, PagingStateResponse), PagerError> {
        let statement = &self.statement;
        let routing_info = self.executor.routing_info(
            statement.config(),
            statement.token(),
            statement.keyspace().or(self.session_keyspace.as_deref()),
        );
        let serial_consistency = routing_info.serial_consistency;
        let page_size = statement.page_size();
        let paging_state = &self.paging_state;

        let (response, coordinator) = self
            .executor
            .run(
                &self.cluster_state,
                &routing_info,
                statement.config(),
                |connection: Arc<Connection>, consistency: Consistency| {
                    let paging_state = paging_state.clone();
                    async move {
                        connection
                            .send_executable(
                                statement,
                                consistency,
                                serial_consistency,
                                Some(page_size),
                                paging_state,
                            )
                            .await
                    }
                },
            )
            .instrument(trace_span!("Fetching page", statement = statement.contents()))
            .await?;

        // A result of another kind than Rows is an empty, last page.
        let (result, paging_state_response) = response
            .into_query_result_and_paging_state()
            .map_err(PagerError::RequestFailure)?;
        trace!(
            coordinator = %coordinator,
            rows = result.rows_num(),
            finished = paging_state_response.finished(),
            "Received page"
        );

        let page = ReceivedPage {
            tracing_id: result.tracing_id(),
            warnings: result.warnings().map(ToOwned::to_owned).collect(),
            rows: result.into_rows(),
            has_more_pages: !paging_state_response.finished(),
        };
        Ok((page, paging_state_response))
    }
}

/// The result set of a statement: a stream of rows, paged in the background.
///
/// Holds the rows of the first page when returned by [`Session::execute`](crate::Session::execute).
/// Rows are returned in the order of the server, across page boundaries.
/// The next page is fetched while the current one is consumed, and never
/// more than one page ahead. Dropping the pager stops fetching, and the
/// server keeps no state to release.
///
/// ```rust
/// # use cassia::Session;
/// # use std::error::Error;
/// # async fn check_only_compiles(session: &Session) -> Result<(), Box<dyn Error>> {
/// use futures::TryStreamExt;
///
/// let mut rows = session.execute("SELECT lastname, age FROM users").await?;
/// while let Some(row) = rows.try_next().await? {
///     println!("{}", row.get_string("lastname")?);
/// }
/// # Ok(())
/// # }
/// ```
pub struct QueryPager {
    current_page: VecDeque<Row>,
    // None once the last page or an error has been received.
    page_receiver: Option<mpsc::Receiver<ResultPage>>,
    is_fully_fetched: bool,
    tracing_ids: Vec<Uuid>,
    warnings: Vec<String>,
    request_coordinator: Option<SocketAddr>,
    // No worker when the first page was the last one.
    _worker_handle: Option<RemoteHandle<PageSendAttemptedProof>>,
}

impl std::fmt::Debug for QueryPager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryPager")
            .field("available_without_fetching", &self.current_page.len())
            .field("is_fully_fetched", &self.is_fully_fetched)
            .field("tracing_ids", &self.tracing_ids)
            .field("request_coordinator", &self.request_coordinator)
            .finish_non_exhaustive()
    }
}

impl QueryPager {
    /// Builds the pager from the first page, already fetched by the session.
    /// The following pages, if any, are fetched by a worker task starting
    /// from the paging state the first page came with.
    pub(crate) fn new(
        first_page: QueryResult,
        paging_state_response: PagingStateResponse,
        statement: Executable,
        executor: RequestExecutor,
        cluster_state: Arc<ClusterState>,
        session_keyspace: Option<String>,
    ) -> Self {
        let request_coordinator = first_page.request_coordinator();
        let warnings: Vec<String> = first_page.warnings().map(ToOwned::to_owned).collect();
        let tracing_ids: Vec<Uuid> = first_page.tracing_id().into_iter().collect();
        let current_page: VecDeque<Row> = first_page.into_rows().into();

        let mut pager = match paging_state_response.into_paging_control_flow() {
            ControlFlow::Break(()) => Self {
                current_page,
                page_receiver: None,
                is_fully_fetched: true,
                tracing_ids: Vec::new(),
                warnings: Vec::new(),
                request_coordinator: None,
                _worker_handle: None,
            },
            ControlFlow::Continue(paging_state) => {
                // Capacity of one: the worker fetches a page and waits
                // until the previous one is taken.
                let (sender, receiver) = mpsc::channel(1);
                let worker = PagerWorker {
                    sender: sender.into(),
                    statement,
                    executor,
                    cluster_state,
                    session_keyspace,
                    paging_state,
                };
                let (worker_task, worker_handle) = worker.work().remote_handle();
                tokio::task::spawn(worker_task);

                let mut pager = Self::new_from_receiver(receiver, worker_handle);
                pager.current_page = current_page;
                pager
            }
        };
        pager.request_coordinator = request_coordinator;
        pager.warnings = warnings;
        pager.tracing_ids = tracing_ids;
        pager
    }

    fn new_from_receiver(
        receiver: mpsc::Receiver<ResultPage>,
        worker_handle: RemoteHandle<PageSendAttemptedProof>,
    ) -> Self {
        Self {
            current_page: VecDeque::new(),
            page_receiver: Some(receiver),
            is_fully_fetched: false,
            tracing_ids: Vec::new(),
            warnings: Vec::new(),
            request_coordinator: None,
            _worker_handle: Some(worker_handle),
        }
    }

    /// Address of the node that served the first page.
    #[inline]
    pub fn request_coordinator(&self) -> Option<SocketAddr> {
        self.request_coordinator
    }

    /// Warnings emitted by the database for the pages received so far.
    pub fn warnings(&self) -> impl Iterator<Item = &str> {
        self.warnings.iter().map(String::as_str)
    }

    /// Number of rows which can be returned without fetching another page.
    #[inline]
    pub fn available_without_fetching(&self) -> usize {
        self.current_page.len()
    }

    /// Whether the last page has been received.
    ///
    /// Once it is true, the remaining rows are all available without fetching.
    #[inline]
    pub fn is_fully_fetched(&self) -> bool {
        self.is_fully_fetched
    }

    /// Waits for the next page and appends its rows to the ones available
    /// without fetching. Does nothing if all pages were received.
    pub async fn fetch_more(&mut self) -> Result<(), PagerError> {
        futures::future::poll_fn(|cx| match self.poll_next_page(cx) {
            Poll::Ready(Some(Err(err))) => Poll::Ready(Err(err)),
            Poll::Ready(_) => Poll::Ready(Ok(())),
            Poll::Pending => Poll::Pending,
        })
        .await
    }

    /// If tracing was enabled, returns tracing ids of all finished page queries.
    #[inline]
    pub fn tracing_ids(&self) -> &[Uuid] {
        &self.tracing_ids
    }

    /// Makes an attempt to acquire the next page (which may be empty).
    ///
    /// On success, returns Some(Ok()).
    /// On failure, returns Some(Err()).
    /// If there are no more pages, returns None.
    fn poll_next_page(&mut self, cx: &mut Context<'_>) -> Poll<Option<Result<(), PagerError>>> {
        let Some(receiver) = self.page_receiver.as_mut() else {
            return Poll::Ready(None);
        };

        let received = match receiver.poll_recv(cx) {
            Poll::Pending => return Poll::Pending,
            Poll::Ready(received) => received,
        };

        match received {
            Some(Ok(page)) => {
                if let Some(tracing_id) = page.tracing_id {
                    self.tracing_ids.push(tracing_id);
                }
                self.warnings.extend(page.warnings);
                self.current_page.extend(page.rows);
                if !page.has_more_pages {
                    self.is_fully_fetched = true;
                    self.page_receiver = None;
                }
                Poll::Ready(Some(Ok(())))
            }
            Some(Err(err)) => {
                self.page_receiver = None;
                Poll::Ready(Some(Err(err)))
            }
            // The worker always sends the last page or an error before stopping.
            None => {
                self.page_receiver = None;
                Poll::Ready(Some(Err(PagerError::WorkerStopped)))
            }
        }
    }
}

impl Stream for QueryPager {
    type Item = Result<Row, PagerError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            if let Some(row) = this.current_page.pop_front() {
                return Poll::Ready(Some(Ok(row)));
            }
            // Empty pages are skipped.
            ready_some_ok!(this.poll_next_page(cx));
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let available = self.current_page.len();
        if self.is_fully_fetched {
            (available, Some(available))
        } else {
            (available, None)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use assert_matches::assert_matches;
    use futures::{FutureExt, Stream, StreamExt, TryStreamExt};
    use tokio::sync::mpsc;

    use super::{QueryPager, ReceivedPage, ResultPage};
    use crate::errors::{PagerError, QueryError};
    use crate::frame::response::result::{ColumnSpec, ColumnType, TableSpec};
    use crate::response::query_result::{ColumnSpecs, Row};
    use crate::test_utils::setup_tracing;
    use crate::value::CqlValue;

    fn page(ids: std::ops::Range<i32>, has_more_pages: bool) -> ResultPage {
        let specs = Arc::new(ColumnSpecs::new(vec![ColumnSpec::new(
            "id",
            ColumnType::Int,
            TableSpec::new("ks", "t"),
        )]));
        Ok(ReceivedPage {
            rows: ids
                .map(|id| Row::new(vec![Some(CqlValue::Int(id))], specs.clone()))
                .collect(),
            tracing_id: None,
            warnings: Vec::new(),
            has_more_pages,
        })
    }

    // A pager fed by the test instead of a worker.
    fn pager_with_pages(pages: Vec<ResultPage>) -> QueryPager {
        let (sender, receiver) = mpsc::channel(pages.len().max(1));
        for page in pages {
            sender.try_send(page).unwrap();
        }
        let (idle, handle) = futures::future::pending().remote_handle();
        tokio::spawn(idle);
        QueryPager::new_from_receiver(receiver, handle)
    }

    fn ids(rows: Vec<Row>) -> Vec<i32> {
        rows.iter().map(|r| r.get_int("id").unwrap()).collect()
    }

    #[tokio::test]
    async fn rows_are_concatenated_across_pages() {
        setup_tracing();
        let pager = pager_with_pages(vec![
            page(0..2, true),
            page(2..2, true),
            page(2..5, true),
            page(5..6, false),
        ]);

        let rows: Vec<Row> = pager.try_collect().await.unwrap();
        assert_eq!(ids(rows), vec![0, 1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn manual_fetching() {
        setup_tracing();
        let mut pager = pager_with_pages(vec![page(0..2, true), page(2..3, false)]);
        assert_eq!(pager.available_without_fetching(), 0);
        assert!(!pager.is_fully_fetched());

        pager.fetch_more().await.unwrap();
        assert_eq!(pager.available_without_fetching(), 2);
        assert!(!pager.is_fully_fetched());

        pager.fetch_more().await.unwrap();
        assert_eq!(pager.available_without_fetching(), 3);
        assert!(pager.is_fully_fetched());

        // Nothing left to fetch.
        pager.fetch_more().await.unwrap();
        assert_eq!(pager.size_hint(), (3, Some(3)));
        let rows: Vec<Row> = pager.try_collect().await.unwrap();
        assert_eq!(ids(rows), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn error_ends_the_stream() {
        setup_tracing();
        let failure = Err(PagerError::RequestFailure(QueryError::ProtocolError(
            "broken page".to_owned(),
        )));
        let mut pager = pager_with_pages(vec![page(0..1, true), failure]);

        assert_eq!(pager.next().await.unwrap().unwrap().get_int("id").unwrap(), 0);
        assert_matches!(
            pager.next().await,
            Some(Err(PagerError::RequestFailure(QueryError::ProtocolError(_))))
        );
        assert!(pager.next().await.is_none());
        assert!(!pager.is_fully_fetched());
    }

    #[tokio::test]
    async fn stopped_worker_is_reported() {
        setup_tracing();
        let mut pager = pager_with_pages(vec![page(0..1, true)]);

        assert!(pager.next().await.unwrap().is_ok());
        assert_matches!(pager.next().await, Some(Err(PagerError::WorkerStopped)));
        assert!(pager.next().await.is_none());
    }
}

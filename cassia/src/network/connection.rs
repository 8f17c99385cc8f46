use crate::authentication::AuthenticatorProvider;
use crate::errors::{
    BadKeyspaceName, BadQuery, BrokenConnectionError, BrokenConnectionErrorKind, ConnectionError,
    DbError, FrameError, HandshakeError, QueryError,
};
use crate::frame::response::authenticate::Authenticate;
use crate::frame::response::{self, event::Event, result, NonErrorResponse, Response};
use crate::frame::types::{Consistency, SerialConsistency};
use crate::frame::{
    self,
    request::{self, options, SerializableRequest},
    server_event_type::EventType,
    Compression, FrameParams, SerializedRequest,
};
use crate::frame::response::ResponseOpcode;
use crate::response::{
    NonErrorAuthResponse, NonErrorStartupResponse, PagingState, QueryResponse,
};
use crate::statement::batch::{Batch, BatchStatement};
use crate::statement::prepared::{BoundStatement, PreparedStatement};
use crate::statement::unprepared::Statement;
use crate::statement::Executable;
use bytes::Bytes;
use futures::{future::RemoteHandle, FutureExt};
use socket2::{SockRef, TcpKeepalive};
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::io::{split, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Notify, Semaphore};
use tokio::time::Instant;
use tracing::{debug, error, trace, warn};

// The term "orphan" refers to stream ids, that were allocated for a {request, response} that no
// one is waiting anymore (due to cancellation of `Connection::send_request`, e.g. by a timeout).
// Old orphan refers to a stream id that is orphaned for a long time. This long time is defined
// below (`OLD_AGE_ORPHAN_THRESHOLD`). Connection that has a big number
// (`OLD_ORPHAN_COUNT_THRESHOLD`) of old orphans is shut down (and created again by the pool).
const OLD_ORPHAN_COUNT_THRESHOLD: usize = 1024;
const OLD_AGE_ORPHAN_THRESHOLD: std::time::Duration = std::time::Duration::from_secs(1);

// Stream ids 0..=32767 may be used by requests.
const STREAM_ID_COUNT: usize = i16::MAX as usize + 1;

pub(crate) struct Connection {
    _worker_handle: RemoteHandle<()>,

    connect_address: SocketAddr,
    config: ConnectionConfig,
    router_handle: Arc<RouterHandle>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("connect_address", &self.connect_address)
            .finish_non_exhaustive()
    }
}

struct RouterHandle {
    submit_channel: mpsc::Sender<Task>,

    // Each request send by `Connection::send_request` needs a unique request id.
    // This field is a monotonic generator of such ids.
    request_id_generator: AtomicU64,
    // If a `Connection::send_request` is cancelled, it sends notification
    // about orphaning via the sender below.
    // Also, this sender is unbounded, because only unbounded channels support
    // pushing values in a synchronous way (without an `.await`), which is
    // needed for pushing values in `Drop` implementations.
    orphan_notification_sender: mpsc::UnboundedSender<RequestId>,

    // One permit per stream id. Callers wait here when all ids are taken.
    stream_permits: Semaphore,
    in_flight: AtomicUsize,

    closer: Notify,
    is_closed: AtomicBool,
}

impl RouterHandle {
    fn allocate_request_id(&self) -> RequestId {
        self.request_id_generator
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed)
    }

    fn closed_or_broken(&self) -> QueryError {
        if self.is_closed.load(std::sync::atomic::Ordering::Acquire) {
            ConnectionError::ConnectionClosed.into()
        } else {
            ConnectionError::Broken(BrokenConnectionErrorKind::ChannelError.into()).into()
        }
    }

    async fn send_request(
        &self,
        request: &impl SerializableRequest,
        compression: Option<Compression>,
        tracing: bool,
    ) -> Result<TaskResponse, QueryError> {
        if self.is_closed.load(std::sync::atomic::Ordering::Acquire) {
            return Err(ConnectionError::ConnectionClosed.into());
        }

        let serialized_request =
            SerializedRequest::make(request, compression, tracing).map_err(frame_error_into)?;

        let _permit = self
            .stream_permits
            .acquire()
            .await
            .map_err(|_| self.closed_or_broken())?;
        let _in_flight = InFlightGuard::new(&self.in_flight);

        let request_id = self.allocate_request_id();

        let (response_sender, receiver) = oneshot::channel();
        let response_handler = ResponseHandler {
            response_sender,
            request_id,
        };

        // Dropping `notifier` (before calling `notifier.disable()`) will send a notification to
        // `Connection::router`. This notification is then used to mark a `stream_id` associated
        // with this request as orphaned and free associated resources.
        let notifier = OrphanhoodNotifier::new(request_id, &self.orphan_notification_sender);

        self.submit_channel
            .send(Task {
                serialized_request,
                response_handler,
            })
            .await
            .map_err(|_| self.closed_or_broken())?;

        let task_response = receiver.await.map_err(|_| self.closed_or_broken())?;

        // Response was successfully received, so it's time to disable
        // notification about orphaning.
        notifier.disable();

        task_response
    }
}

fn frame_error_into(err: FrameError) -> QueryError {
    match err {
        FrameError::RequestSerialization(e) => e.into(),
        other => QueryError::ProtocolError(other.to_string()),
    }
}

struct InFlightGuard<'a>(&'a AtomicUsize);

impl<'a> InFlightGuard<'a> {
    fn new(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        Self(counter)
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, std::sync::atomic::Ordering::Relaxed);
    }
}

type RequestId = u64;

#[derive(Debug)]
struct ResponseHandler {
    response_sender: oneshot::Sender<Result<TaskResponse, QueryError>>,
    request_id: RequestId,
}

// Used to notify `Connection::orphaner` about `Connection::send_request`
// future being dropped before receiving response.
struct OrphanhoodNotifier<'a> {
    enabled: bool,
    request_id: RequestId,
    notification_sender: &'a mpsc::UnboundedSender<RequestId>,
}

impl<'a> OrphanhoodNotifier<'a> {
    fn new(
        request_id: RequestId,
        notification_sender: &'a mpsc::UnboundedSender<RequestId>,
    ) -> Self {
        Self {
            enabled: true,
            request_id,
            notification_sender,
        }
    }

    fn disable(mut self) {
        self.enabled = false;
    }
}

impl Drop for OrphanhoodNotifier<'_> {
    fn drop(&mut self) {
        if self.enabled {
            let _ = self.notification_sender.send(self.request_id);
        }
    }
}

struct Task {
    serialized_request: SerializedRequest,
    response_handler: ResponseHandler,
}

#[derive(Debug)]
struct TaskResponse {
    params: FrameParams,
    opcode: ResponseOpcode,
    body: Bytes,
}

/// Options of a single connection, derived from the session configuration.
#[derive(Clone)]
pub(crate) struct ConnectionConfig {
    pub(crate) compression: Option<Compression>,
    pub(crate) tcp_nodelay: bool,
    pub(crate) tcp_keepalive_interval: Option<Duration>,
    // Bounds the TCP connect and the whole handshake.
    pub(crate) connect_timeout: Duration,
    pub(crate) request_timeout: Option<Duration>,
    pub(crate) event_sender: Option<mpsc::Sender<Event>>,
    pub(crate) default_consistency: Consistency,
    pub(crate) authenticator: Option<Arc<dyn AuthenticatorProvider>>,
    /// If Some, the connection sends OPTIONS requests in the given interval.
    pub(crate) keepalive_interval: Option<Duration>,
    /// If Some, a connection whose keepalive is not answered in time is broken.
    pub(crate) keepalive_timeout: Option<Duration>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            compression: None,
            tcp_nodelay: true,
            tcp_keepalive_interval: None,
            event_sender: None,
            connect_timeout: std::time::Duration::from_secs(5),
            request_timeout: None,
            default_consistency: Default::default(),
            authenticator: None,
            keepalive_interval: None,
            keepalive_timeout: None,
        }
    }
}

// Used to listen for fatal error in connection
pub(crate) type ErrorReceiver = tokio::sync::oneshot::Receiver<ConnectionError>;

impl Connection {
    // Returns new connection and ErrorReceiver which can be used to wait for a fatal error
    /// Opens a connection and makes it ready to send/receive CQL frames on it,
    /// but does not yet send any frames (no OPTIONS/STARTUP handshake nor REGISTER requests).
    async fn new(
        connect_address: SocketAddr,
        config: ConnectionConfig,
    ) -> Result<(Self, ErrorReceiver), ConnectionError> {
        let stream = TcpStream::connect(connect_address).await?;
        stream.set_nodelay(config.tcp_nodelay)?;

        if let Some(tcp_keepalive_interval) = config.tcp_keepalive_interval {
            Self::setup_tcp_keepalive(&stream, tcp_keepalive_interval)?;
        }

        let (sender, receiver) = mpsc::channel(1024);
        let (error_sender, error_receiver) = tokio::sync::oneshot::channel();
        // Unbounded because it allows for synchronous pushes
        let (orphan_notification_sender, orphan_notification_receiver) = mpsc::unbounded_channel();

        let router_handle = Arc::new(RouterHandle {
            submit_channel: sender,
            request_id_generator: AtomicU64::new(0),
            orphan_notification_sender,
            stream_permits: Semaphore::new(STREAM_ID_COUNT),
            in_flight: AtomicUsize::new(0),
            closer: Notify::new(),
            is_closed: AtomicBool::new(false),
        });

        let (task, _worker_handle) = Self::router(
            config.clone(),
            stream,
            receiver,
            error_sender,
            orphan_notification_receiver,
            router_handle.clone(),
            connect_address,
        )
        .remote_handle();
        tokio::task::spawn(task);

        let connection = Connection {
            _worker_handle,
            config,
            connect_address,
            router_handle,
        };

        Ok((connection, error_receiver))
    }

    fn setup_tcp_keepalive(
        stream: &TcpStream,
        tcp_keepalive_interval: Duration,
    ) -> std::io::Result<()> {
        // Our interval is the idle time before keepalives start (socket2 calls it "time");
        // their interval is the time between consecutive keepalive packets.
        let mut tcp_keepalive = TcpKeepalive::new().with_time(tcp_keepalive_interval);

        // These cfg values are taken from socket2 library, which uses the same constraints.
        #[cfg(any(
            target_os = "android",
            target_os = "dragonfly",
            target_os = "freebsd",
            target_os = "fuchsia",
            target_os = "illumos",
            target_os = "ios",
            target_os = "linux",
            target_os = "macos",
            target_os = "netbsd",
            target_os = "tvos",
            target_os = "watchos",
            target_os = "windows",
        ))]
        {
            tcp_keepalive = tcp_keepalive.with_interval(Duration::from_secs(1));
        }

        #[cfg(any(
            target_os = "android",
            target_os = "dragonfly",
            target_os = "freebsd",
            target_os = "fuchsia",
            target_os = "illumos",
            target_os = "ios",
            target_os = "linux",
            target_os = "macos",
            target_os = "netbsd",
            target_os = "tvos",
            target_os = "watchos",
        ))]
        {
            tcp_keepalive = tcp_keepalive.with_retries(10);
        }

        let sf = SockRef::from(&stream);
        sf.set_tcp_keepalive(&tcp_keepalive)
    }

    async fn get_options(&self) -> Result<response::supported::Supported, HandshakeError> {
        let response = self
            .send_request(&request::Options, false, false, None)
            .await
            .and_then(QueryResponse::into_non_error_query_response)
            .map_err(setup_request_failed("OPTIONS"))?;

        match response.response {
            NonErrorResponse::Supported(supported) => Ok(supported),
            other => Err(HandshakeError::UnexpectedResponse {
                request: "OPTIONS",
                response: other.to_response_kind(),
            }),
        }
    }

    async fn startup(
        &self,
        options: HashMap<String, String>,
    ) -> Result<NonErrorStartupResponse, HandshakeError> {
        let response = self
            .send_request(&request::Startup { options }, false, false, None)
            .await
            .and_then(QueryResponse::into_non_error_query_response)
            .map_err(setup_request_failed("STARTUP"))?;

        match response.response {
            NonErrorResponse::Ready => Ok(NonErrorStartupResponse::Ready),
            NonErrorResponse::Authenticate(auth) => Ok(NonErrorStartupResponse::Authenticate(auth)),
            other => Err(HandshakeError::UnexpectedResponse {
                request: "STARTUP",
                response: other.to_response_kind(),
            }),
        }
    }

    async fn perform_authenticate(&self, authenticate: &Authenticate) -> Result<(), HandshakeError> {
        let authenticator = &authenticate.authenticator_name as &str;

        let authenticator_provider = match self.config.authenticator {
            Some(ref provider) => provider,
            None => {
                return Err(HandshakeError::MissingAuthentication(
                    authenticator.to_owned(),
                ))
            }
        };

        let (mut response, mut auth_session) = authenticator_provider
            .start_authentication_session(authenticator)
            .await
            .map_err(HandshakeError::Authentication)?;

        loop {
            match self.authenticate_response(response).await? {
                NonErrorAuthResponse::AuthChallenge(challenge) => {
                    response = auth_session
                        .evaluate_challenge(challenge.authenticate_message.as_deref())
                        .await
                        .map_err(HandshakeError::Authentication)?;
                }
                NonErrorAuthResponse::AuthSuccess(success) => {
                    auth_session
                        .success(success.success_message.as_deref())
                        .await
                        .map_err(HandshakeError::Authentication)?;
                    break;
                }
            }
        }

        Ok(())
    }

    async fn authenticate_response(
        &self,
        response: Option<Vec<u8>>,
    ) -> Result<NonErrorAuthResponse, HandshakeError> {
        let response = self
            .send_request(&request::AuthResponse { response }, false, false, None)
            .await
            .and_then(QueryResponse::into_non_error_query_response)
            .map_err(setup_request_failed("AUTH_RESPONSE"))?;

        match response.response {
            NonErrorResponse::AuthSuccess(auth_success) => {
                Ok(NonErrorAuthResponse::AuthSuccess(auth_success))
            }
            NonErrorResponse::AuthChallenge(auth_challenge) => {
                Ok(NonErrorAuthResponse::AuthChallenge(auth_challenge))
            }
            other => Err(HandshakeError::UnexpectedResponse {
                request: "AUTH_RESPONSE",
                response: other.to_response_kind(),
            }),
        }
    }

    async fn register(&self, event_types_to_register_for: Vec<EventType>) -> Result<(), HandshakeError> {
        let register_frame = request::Register {
            event_types_to_register_for,
        };

        let response = self
            .send_request(&register_frame, true, false, None)
            .await
            .and_then(QueryResponse::into_non_error_query_response)
            .map_err(setup_request_failed("REGISTER"))?;

        match response.response {
            NonErrorResponse::Ready => Ok(()),
            other => Err(HandshakeError::UnexpectedResponse {
                request: "REGISTER",
                response: other.to_response_kind(),
            }),
        }
    }

    pub(crate) async fn prepare(&self, statement: &Statement) -> Result<PreparedStatement, QueryError> {
        let query_response = self
            .send_request(
                &request::Prepare {
                    query: statement.contents.clone(),
                },
                true,
                statement.config.tracing,
                statement.config.request_timeout,
            )
            .await?;

        let tracing_id = query_response.tracing_id;
        let mut prepared_statement = match query_response.response {
            Response::Error(err) => return Err(err.into()),
            Response::Result(result::Result::Prepared(p)) => PreparedStatement::new(
                p.id,
                p.prepared_metadata,
                Arc::new(p.result_metadata),
                statement.contents.clone(),
                statement.get_page_size(),
                statement.config.clone(),
            )
            .with_preset_values(statement.preset_values.clone()),
            other => {
                return Err(QueryError::ProtocolError(format!(
                    "PREPARE: Unexpected server response: {:?}",
                    other.opcode()
                )))
            }
        };
        prepared_statement.prepare_tracing_id = tracing_id;

        Ok(prepared_statement)
    }

    async fn reprepare(&self, previous_prepared: &PreparedStatement) -> Result<(), QueryError> {
        let reprepare_query = Statement::new(previous_prepared.get_statement());
        let reprepared = self.prepare(&reprepare_query).await?;
        // Reprepared statement should keep its id - it's the md5 sum
        // of statement contents
        if reprepared.get_id() != previous_prepared.get_id() {
            Err(BadQuery::PreparedStatementIdsMismatch.into())
        } else {
            Ok(())
        }
    }

    /// Runs a statement without paging. Used for internal queries.
    pub(crate) async fn query_unpaged(
        &self,
        statement: impl Into<Statement>,
    ) -> Result<crate::response::query_result::QueryResult, QueryError> {
        let statement: Statement = statement.into();

        self.query_raw_with_consistency(
            &statement,
            statement
                .config
                .determine_consistency(self.config.default_consistency),
            statement.config.serial_consistency,
            None,
            PagingState::start(),
        )
        .await?
        .into_query_result()
    }

    pub(crate) async fn query_raw_with_consistency(
        &self,
        statement: &Statement,
        consistency: Consistency,
        serial_consistency: Option<SerialConsistency>,
        page_size: Option<i32>,
        paging_state: PagingState,
    ) -> Result<QueryResponse, QueryError> {
        let query_frame = request::Query {
            contents: statement.contents.clone(),
            parameters: request::query::QueryParameters {
                consistency,
                serial_consistency,
                values: statement.serialized_values()?,
                page_size,
                paging_state: paging_state.to_bytes(),
                skip_metadata: false,
                timestamp: statement.config.timestamp,
            },
        };

        self.send_request(
            &query_frame,
            true,
            statement.config.tracing,
            statement.config.request_timeout,
        )
        .await
    }

    pub(crate) async fn execute_raw_with_consistency(
        &self,
        bound: &BoundStatement,
        consistency: Consistency,
        serial_consistency: Option<SerialConsistency>,
        page_size: Option<i32>,
        paging_state: PagingState,
    ) -> Result<QueryResponse, QueryError> {
        let prepared = bound.prepared();
        let execute_frame = request::Execute {
            id: prepared.get_id().clone(),
            parameters: request::query::QueryParameters {
                consistency,
                serial_consistency,
                values: bound.values().clone(),
                page_size,
                paging_state: paging_state.to_bytes(),
                skip_metadata: false,
                timestamp: prepared.config.timestamp,
            },
        };

        let query_response = self
            .send_request(
                &execute_frame,
                true,
                prepared.config.tracing,
                prepared.config.request_timeout,
            )
            .await?;

        match &query_response.response {
            Response::Error(response::Error {
                error: DbError::Unprepared { statement_id },
                ..
            }) => {
                debug!(
                    "Connection::execute: Got DbError::Unprepared - repreparing statement with id {:?}",
                    statement_id
                );
                // Repreparation of a statement is needed
                self.reprepare(prepared).await?;
                self.send_request(
                    &execute_frame,
                    true,
                    prepared.config.tracing,
                    prepared.config.request_timeout,
                )
                .await
            }
            _ => Ok(query_response),
        }
    }

    /// Sends a simple or a bound statement, asking for one page of `page_size` rows.
    pub(crate) async fn send_executable(
        &self,
        statement: &Executable,
        consistency: Consistency,
        serial_consistency: Option<SerialConsistency>,
        page_size: Option<i32>,
        paging_state: PagingState,
    ) -> Result<QueryResponse, QueryError> {
        match statement {
            Executable::Simple(s) => {
                self.query_raw_with_consistency(
                    s,
                    consistency,
                    serial_consistency,
                    page_size,
                    paging_state,
                )
                .await
            }
            Executable::Bound(b) => {
                self.execute_raw_with_consistency(
                    b,
                    consistency,
                    serial_consistency,
                    page_size,
                    paging_state,
                )
                .await
            }
        }
    }

    pub(crate) async fn batch_with_consistency(
        &self,
        batch: &Batch,
        consistency: Consistency,
        serial_consistency: Option<SerialConsistency>,
    ) -> Result<QueryResponse, QueryError> {
        if batch.statements.is_empty() {
            return Err(BadQuery::EmptyBatch.into());
        }

        let mut statements = Vec::with_capacity(batch.statements.len());
        let mut values = Vec::with_capacity(batch.statements.len());
        for statement in &batch.statements {
            match statement {
                BatchStatement::Simple(s) => {
                    statements.push(request::batch::BatchStatement::Query {
                        text: s.contents.clone(),
                    });
                    values.push(s.serialized_values()?);
                }
                BatchStatement::Bound(b) => {
                    statements.push(request::batch::BatchStatement::Prepared {
                        id: b.prepared().get_id().clone(),
                    });
                    values.push(b.values().clone());
                }
            }
        }

        let batch_frame = request::Batch {
            statements,
            values,
            batch_type: batch.get_type(),
            consistency,
            serial_consistency,
            timestamp: batch.config.timestamp,
        };

        let mut reprepared = HashSet::<Bytes>::new();
        loop {
            let query_response = self
                .send_request(
                    &batch_frame,
                    true,
                    batch.config.tracing,
                    batch.config.request_timeout,
                )
                .await?;

            return match &query_response.response {
                Response::Error(response::Error {
                    error: DbError::Unprepared { statement_id },
                    ..
                }) if !reprepared.contains(statement_id) => {
                    debug!(
                        "Connection::batch: got DbError::Unprepared - repreparing statement with id {:?}",
                        statement_id
                    );
                    let prepared_statement = batch.statements.iter().find_map(|s| match s {
                        BatchStatement::Bound(b) if b.prepared().get_id() == statement_id => {
                            Some(b.prepared())
                        }
                        _ => None,
                    });
                    match prepared_statement {
                        Some(p) => {
                            self.reprepare(p).await?;
                            reprepared.insert(statement_id.clone());
                            continue;
                        }
                        None => Ok(query_response),
                    }
                }
                _ => Ok(query_response),
            };
        }
    }

    pub(crate) async fn use_keyspace(
        &self,
        keyspace_name: &VerifiedKeyspaceName,
    ) -> Result<(), QueryError> {
        // Trying to pass keyspace_name as bound value doesn't work
        // We have to send "USE " + keyspace_name
        let query: Statement = match keyspace_name.is_case_sensitive {
            true => format!("USE \"{}\"", keyspace_name.as_str()).into(),
            false => format!("USE {}", keyspace_name.as_str()).into(),
        };

        let query_response = self
            .query_raw_with_consistency(
                &query,
                self.config.default_consistency,
                None,
                None,
                PagingState::start(),
            )
            .await?
            .into_non_error_query_response()?;

        match query_response.as_set_keyspace() {
            Some(set_keyspace) => {
                if !set_keyspace
                    .keyspace_name
                    .eq_ignore_ascii_case(keyspace_name.as_str())
                {
                    return Err(QueryError::ProtocolError(format!(
                        "USE {} returned keyspace name {}",
                        keyspace_name.as_str(),
                        set_keyspace.keyspace_name
                    )));
                }
                Ok(())
            }
            None => Err(QueryError::ProtocolError(format!(
                "Unexpected response to USE: {}",
                query_response.response.to_response_kind()
            ))),
        }
    }

    /// Closes the connection. Requests in flight fail with `ConnectionClosed`.
    pub(crate) fn close(&self) {
        self.router_handle
            .is_closed
            .store(true, std::sync::atomic::Ordering::Release);
        self.router_handle.closer.notify_one();
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.router_handle
            .is_closed
            .load(std::sync::atomic::Ordering::Acquire)
    }

    /// Number of requests sent and not yet answered, used to pick the least busy connection.
    pub(crate) fn in_flight_requests(&self) -> usize {
        self.router_handle
            .in_flight
            .load(std::sync::atomic::Ordering::Relaxed)
    }

    pub(crate) fn get_connect_address(&self) -> SocketAddr {
        self.connect_address
    }

    async fn send_request(
        &self,
        request: &impl SerializableRequest,
        compress: bool,
        tracing: bool,
        request_timeout: Option<Duration>,
    ) -> Result<QueryResponse, QueryError> {
        let compression = if compress {
            self.config.compression
        } else {
            None
        };

        let send = self
            .router_handle
            .send_request(request, compression, tracing);

        // Dropping `send` on timeout orphans its stream id; the id is reclaimed
        // when the late response arrives or the connection dies.
        let task_response = match request_timeout.or(self.config.request_timeout) {
            Some(timeout) => tokio::time::timeout(timeout, send)
                .await
                .map_err(|_| QueryError::RequestTimeout(timeout))??,
            None => send.await?,
        };

        Self::parse_response(task_response, self.config.compression)
    }

    fn parse_response(
        task_response: TaskResponse,
        compression: Option<Compression>,
    ) -> Result<QueryResponse, QueryError> {
        let body_with_ext = frame::parse_response_body_extensions(
            task_response.params.flags,
            compression,
            task_response.body,
        )
        .map_err(frame_error_into)?;

        for warn_description in &body_with_ext.warnings {
            warn!(
                warning = warn_description.as_str(),
                "Response from the database contains a warning",
            );
        }

        let response =
            Response::deserialize(task_response.opcode, &mut &body_with_ext.body[..], None)?;

        Ok(QueryResponse {
            response,
            warnings: body_with_ext.warnings,
            tracing_id: body_with_ext.trace_id,
            custom_payload: body_with_ext.custom_payload,
        })
    }

    async fn router(
        config: ConnectionConfig,
        stream: impl AsyncRead + AsyncWrite,
        receiver: mpsc::Receiver<Task>,
        error_sender: tokio::sync::oneshot::Sender<ConnectionError>,
        orphan_notification_receiver: mpsc::UnboundedReceiver<RequestId>,
        router_handle: Arc<RouterHandle>,
        node_address: SocketAddr,
    ) {
        let (read_half, write_half) = split(stream);
        // The handler_map is shared between reader and writer futures, which
        // run on the same task and never hold the lock across .await points,
        // so the mutex is uncontended. A RefCell would make the future !Sync.
        let handler_map = StdMutex::new(ResponseHandlerMap::new());

        let error: ConnectionError = {
            let k = Self::keepaliver(
                router_handle.clone(),
                config.keepalive_interval,
                config.keepalive_timeout,
                node_address,
            );

            let r = Self::reader(
                BufReader::with_capacity(8192, read_half),
                &handler_map,
                config.event_sender,
                config.compression,
            );
            let w = Self::writer(
                BufWriter::with_capacity(8192, write_half),
                &handler_map,
                receiver,
            );
            let o = Self::orphaner(&handler_map, orphan_notification_receiver);

            let work = futures::future::try_join4(r, w, o, k);

            tokio::select! {
                result = work => match result {
                    Ok(_) => return, // Connection was dropped, we can return
                    Err(err) => {
                        error!("Connection to {} broke: {}", node_address, err);
                        ConnectionError::Broken(err)
                    }
                },
                _ = router_handle.closer.notified() => {
                    debug!("Closing connection to {}", node_address);
                    ConnectionError::ConnectionClosed
                }
            }
        };

        router_handle
            .is_closed
            .store(true, std::sync::atomic::Ordering::Release);
        router_handle.stream_permits.close();

        // Respond to all pending requests with the error
        let response_handlers: HashMap<i16, ResponseHandler> = handler_map
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
            .into_handlers();

        for (_, handler) in response_handlers {
            // Ignore sending error, request was dropped
            let _ = handler.response_sender.send(Err(error.clone().into()));
        }

        // If someone is listening for connection errors notify them
        let _ = error_sender.send(error);
    }

    async fn reader(
        mut read_half: impl AsyncRead + Unpin,
        handler_map: &StdMutex<ResponseHandlerMap>,
        event_sender: Option<mpsc::Sender<Event>>,
        compression: Option<Compression>,
    ) -> Result<(), BrokenConnectionError> {
        loop {
            let (params, opcode, body) = frame::read_response_frame(&mut read_half)
                .await
                .map_err(BrokenConnectionErrorKind::FrameError)?;
            let response = TaskResponse {
                params,
                opcode,
                body,
            };

            match params.stream.cmp(&-1) {
                Ordering::Less => {
                    // Negative-numbered streams other than -1 are reserved and
                    // not used by servers, ignore them.
                    continue;
                }
                Ordering::Equal => {
                    if let Some(event_sender) = event_sender.as_ref() {
                        Self::handle_event(response, compression, event_sender)
                            .await
                            .map_err(BrokenConnectionErrorKind::EventHandlingError)?
                    }
                    continue;
                }
                _ => {}
            }

            let handler_lookup_res = lock(handler_map).lookup(params.stream);

            use HandlerLookupResult::*;
            match handler_lookup_res {
                Handler(handler) => {
                    // Don't care if sending of the response fails. This must
                    // mean that the receiver side was impatient and is not
                    // waiting for the result anymore.
                    let _ = handler.response_sender.send(Ok(response));
                }
                Missing => {
                    // Unsolicited frame. This should not happen and indicates
                    // a bug either in the driver, or in the database
                    debug!(
                        "Received response with unexpected StreamId {}",
                        params.stream
                    );
                    return Err(BrokenConnectionErrorKind::UnexpectedStreamId(params.stream).into());
                }
                Orphaned => {
                    // Do nothing, handler was freed because this stream_id has
                    // been marked as orphaned
                }
            }
        }
    }

    fn alloc_stream_id(
        handler_map: &StdMutex<ResponseHandlerMap>,
        response_handler: ResponseHandler,
    ) -> Option<i16> {
        match lock(handler_map).allocate(response_handler) {
            Ok(stream_id) => Some(stream_id),
            Err(response_handler) => {
                error!("Could not allocate stream id");
                let _ = response_handler
                    .response_sender
                    .send(Err(ConnectionError::UnableToAllocStreamId.into()));
                None
            }
        }
    }

    async fn writer(
        mut write_half: impl AsyncWrite + Unpin,
        handler_map: &StdMutex<ResponseHandlerMap>,
        mut task_receiver: mpsc::Receiver<Task>,
    ) -> Result<(), BrokenConnectionError> {
        // When the Connection object is dropped, the sender half
        // of the channel will be dropped, this task will return an error
        // and the whole worker will be stopped
        while let Some(mut task) = task_receiver.recv().await {
            let mut num_requests = 0;
            let mut total_sent = 0;
            while let Some(stream_id) = Self::alloc_stream_id(handler_map, task.response_handler) {
                let mut req = task.serialized_request;
                req.set_stream(stream_id);
                let req_data: &[u8] = req.get_data();
                total_sent += req_data.len();
                num_requests += 1;
                write_half
                    .write_all(req_data)
                    .await
                    .map_err(BrokenConnectionErrorKind::WriteError)?;
                task = match task_receiver.try_recv() {
                    Ok(t) => t,
                    Err(_) => break,
                }
            }
            trace!("Sending {} requests; {} bytes", num_requests, total_sent);
            write_half
                .flush()
                .await
                .map_err(BrokenConnectionErrorKind::WriteError)?;
        }

        Ok(())
    }

    // This task receives notifications from `OrphanhoodNotifier`s and tries to
    // mark streams as orphaned. It also checks count of old orphans periodically.
    // After an old orphan threshold is reached, `orphaner` returns an error
    // causing the connection to break.
    async fn orphaner(
        handler_map: &StdMutex<ResponseHandlerMap>,
        mut orphan_receiver: mpsc::UnboundedReceiver<RequestId>,
    ) -> Result<(), BrokenConnectionError> {
        let mut interval = tokio::time::interval(OLD_AGE_ORPHAN_THRESHOLD);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let old_orphan_count = lock(handler_map).old_orphans_count();
                    if old_orphan_count > OLD_ORPHAN_COUNT_THRESHOLD {
                        warn!(
                            "Too many old orphaned stream ids: {}",
                            old_orphan_count,
                        );
                        return Err(BrokenConnectionErrorKind::TooManyOrphanedStreamIds(old_orphan_count as u16).into())
                    }
                }
                Some(request_id) = orphan_receiver.recv() => {
                    trace!(
                        "Trying to orphan stream id associated with request_id = {}",
                        request_id,
                    );
                    lock(handler_map).orphan(request_id);
                }
                else => { break }
            }
        }

        Ok(())
    }

    async fn keepaliver(
        router_handle: Arc<RouterHandle>,
        keepalive_interval: Option<Duration>,
        keepalive_timeout: Option<Duration>,
        node_address: SocketAddr, // This address is only used to enrich the log messages
    ) -> Result<(), BrokenConnectionError> {
        async fn issue_keepalive_query(
            router_handle: &RouterHandle,
        ) -> Result<(), BrokenConnectionError> {
            router_handle
                .send_request(&request::Options, None, false)
                .await
                .map(|_| ())
                .map_err(|req_err| BrokenConnectionErrorKind::KeepaliveRequestError(req_err).into())
        }

        if let Some(keepalive_interval) = keepalive_interval {
            let mut interval = tokio::time::interval(keepalive_interval);
            interval.tick().await; // Use up the first, instant tick.

            // Default behaviour (Burst) is not suitable for sending keepalives.
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                interval.tick().await;

                let keepalive_query = issue_keepalive_query(&router_handle);
                let query_result = if let Some(timeout) = keepalive_timeout {
                    match tokio::time::timeout(timeout, keepalive_query).await {
                        Ok(res) => res,
                        Err(_) => {
                            warn!(
                                "Timed out while waiting for response to keepalive request on connection to node {}",
                                node_address
                            );
                            return Err(
                                BrokenConnectionErrorKind::KeepaliveTimeout(node_address).into()
                            );
                        }
                    }
                } else {
                    keepalive_query.await
                };
                if let Err(err) = query_result {
                    warn!(
                        "Failed to execute keepalive request on connection to node {} - {}",
                        node_address, err
                    );
                    return Err(err);
                }

                trace!(
                    "Keepalive request successful on connection to node {}",
                    node_address
                );
            }
        } else {
            // No keepalives are to be sent.
            Ok(())
        }
    }

    async fn handle_event(
        task_response: TaskResponse,
        compression: Option<Compression>,
        event_sender: &mpsc::Sender<Event>,
    ) -> Result<(), String> {
        let response = Self::parse_response(task_response, compression)
            .map_err(|err| err.to_string())?
            .response;
        let event = match response {
            Response::Event(event) => event,
            other => {
                error!("Expected to receive Event response, got {:?}", other);
                return Err(format!("Expected EVENT, got {:?}", other.opcode()));
            }
        };

        event_sender
            .send(event)
            .await
            .map_err(|_| "Event receiver is gone".to_owned())
    }
}

fn setup_request_failed(request: &'static str) -> impl Fn(QueryError) -> HandshakeError {
    move |error| HandshakeError::RequestFailed {
        request,
        error: Box::new(error),
    }
}

fn lock(handler_map: &StdMutex<ResponseHandlerMap>) -> MutexGuard<'_, ResponseHandlerMap> {
    handler_map.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Opens a connection and performs the OPTIONS/STARTUP (and, if needed,
/// authentication and REGISTER) handshake, all within the connect timeout.
pub(crate) async fn open_connection(
    addr: SocketAddr,
    config: &ConnectionConfig,
) -> Result<(Connection, ErrorReceiver), ConnectionError> {
    tokio::time::timeout(config.connect_timeout, open_connection_inner(addr, config))
        .await
        .map_err(|_| ConnectionError::ConnectTimeout)?
}

async fn open_connection_inner(
    addr: SocketAddr,
    config: &ConnectionConfig,
) -> Result<(Connection, ErrorReceiver), ConnectionError> {
    let (mut connection, error_receiver) = Connection::new(addr, config.clone()).await?;

    // Get OPTIONS SUPPORTED by the cluster.
    let mut supported = connection.get_options().await?;

    let supported_compression = supported
        .options
        .remove(options::COMPRESSION)
        .unwrap_or_default();

    let mut options = HashMap::new();
    options.insert(
        options::CQL_VERSION.to_string(),
        options::DEFAULT_CQL_PROTOCOL_VERSION.to_string(),
    );
    options.insert(
        options::DRIVER_NAME.to_string(),
        options::DEFAULT_DRIVER_NAME.to_string(),
    );
    options.insert(
        options::DRIVER_VERSION.to_string(),
        options::DEFAULT_DRIVER_VERSION.to_string(),
    );
    if let Some(compression) = &config.compression {
        let compression_str = compression.as_str();
        if supported_compression.iter().any(|c| c == compression_str) {
            // Compression is reported to be supported by the server,
            // request it from the server
            options.insert(options::COMPRESSION.to_string(), compression_str.to_owned());
        } else {
            // Fall back to no compression
            warn!(
                "Requested compression <{}> is not supported by the cluster. Falling back to no compression",
                compression_str
            );
            connection.config.compression = None;
        }
    }

    let result = connection.startup(options).await?;
    match result {
        NonErrorStartupResponse::Ready => {}
        NonErrorStartupResponse::Authenticate(authenticate) => {
            connection.perform_authenticate(&authenticate).await?;
        }
    }

    if connection.config.event_sender.is_some() {
        let all_event_types = vec![
            EventType::TopologyChange,
            EventType::StatusChange,
            EventType::SchemaChange,
        ];
        connection.register(all_event_types).await?;
    }

    debug!("Opened connection to {}", addr);
    Ok((connection, error_receiver))
}

struct OrphanageTracker {
    orphans: HashMap<i16, Instant>,
    by_orphaning_times: BTreeSet<(Instant, i16)>,
}

impl OrphanageTracker {
    fn new() -> Self {
        Self {
            orphans: HashMap::new(),
            by_orphaning_times: BTreeSet::new(),
        }
    }

    fn insert(&mut self, stream_id: i16) {
        let now = Instant::now();
        self.orphans.insert(stream_id, now);
        self.by_orphaning_times.insert((now, stream_id));
    }

    fn remove(&mut self, stream_id: i16) {
        if let Some(time) = self.orphans.remove(&stream_id) {
            self.by_orphaning_times.remove(&(time, stream_id));
        }
    }

    fn contains(&self, stream_id: i16) -> bool {
        self.orphans.contains_key(&stream_id)
    }

    fn orphans_older_than(&self, age: std::time::Duration) -> usize {
        let minimal_age = Instant::now() - age;
        // Linear in the number of old orphans only.
        self.by_orphaning_times
            .range(..(minimal_age, i16::MAX))
            .count()
    }
}

struct ResponseHandlerMap {
    stream_set: StreamIdSet,
    handlers: HashMap<i16, ResponseHandler>,

    request_to_stream: HashMap<RequestId, i16>,
    orphanage_tracker: OrphanageTracker,
}

#[derive(Debug)]
enum HandlerLookupResult {
    Orphaned,
    Handler(ResponseHandler),
    Missing,
}

impl ResponseHandlerMap {
    fn new() -> Self {
        Self {
            stream_set: StreamIdSet::new(),
            handlers: HashMap::new(),
            request_to_stream: HashMap::new(),
            orphanage_tracker: OrphanageTracker::new(),
        }
    }

    fn allocate(&mut self, response_handler: ResponseHandler) -> Result<i16, ResponseHandler> {
        if let Some(stream_id) = self.stream_set.allocate() {
            self.request_to_stream
                .insert(response_handler.request_id, stream_id);
            let prev_handler = self.handlers.insert(stream_id, response_handler);
            debug_assert!(prev_handler.is_none());

            Ok(stream_id)
        } else {
            Err(response_handler)
        }
    }

    // Orphan stream_id (associated with this request_id) by moving it to
    // `orphanage_tracker`, and freeing its handler
    fn orphan(&mut self, request_id: RequestId) {
        if let Some(stream_id) = self.request_to_stream.get(&request_id) {
            debug!(
                "Orphaning stream_id = {} associated with request_id = {}",
                stream_id, request_id
            );
            self.orphanage_tracker.insert(*stream_id);
            self.handlers.remove(stream_id);
            self.request_to_stream.remove(&request_id);
        }
    }

    fn old_orphans_count(&self) -> usize {
        self.orphanage_tracker
            .orphans_older_than(OLD_AGE_ORPHAN_THRESHOLD)
    }

    fn lookup(&mut self, stream_id: i16) -> HandlerLookupResult {
        self.stream_set.free(stream_id);

        if self.orphanage_tracker.contains(stream_id) {
            self.orphanage_tracker.remove(stream_id);
            // This `stream_id` had been orphaned, so its handler got removed.
            // This is a valid state (as opposed to missing handler)
            return HandlerLookupResult::Orphaned;
        }

        if let Some(handler) = self.handlers.remove(&stream_id) {
            // A mapping `request_id` -> `stream_id` must be removed, to
            // prevent marking this `stream_id` as orphaned by some late
            // orphan notification.
            self.request_to_stream.remove(&handler.request_id);

            HandlerLookupResult::Handler(handler)
        } else {
            HandlerLookupResult::Missing
        }
    }

    // Retrieves the map of handlers, used after connection breaks
    // and we have to respond to all of them with an error
    fn into_handlers(self) -> HashMap<i16, ResponseHandler> {
        self.handlers
    }
}

struct StreamIdSet {
    used_bitmap: Box<[u64]>,
}

impl StreamIdSet {
    fn new() -> Self {
        const BITMAP_SIZE: usize = STREAM_ID_COUNT / 64;
        Self {
            used_bitmap: vec![0; BITMAP_SIZE].into_boxed_slice(),
        }
    }

    fn allocate(&mut self) -> Option<i16> {
        for (block_id, block) in self.used_bitmap.iter_mut().enumerate() {
            if *block != !0 {
                let off = block.trailing_ones();
                *block |= 1u64 << off;
                let stream_id = off as i16 + block_id as i16 * 64;
                return Some(stream_id);
            }
        }
        None
    }

    fn free(&mut self, stream_id: i16) {
        if stream_id < 0 {
            return;
        }
        let block_id = stream_id as usize / 64;
        let off = stream_id as usize % 64;
        self.used_bitmap[block_id] &= !(1 << off);
    }
}

/// This type can only hold a valid keyspace name
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct VerifiedKeyspaceName {
    name: Arc<String>,
    pub(crate) is_case_sensitive: bool,
}

impl VerifiedKeyspaceName {
    pub(crate) fn new(
        keyspace_name: String,
        case_sensitive: bool,
    ) -> Result<Self, BadKeyspaceName> {
        Self::verify_keyspace_name_is_valid(&keyspace_name)?;

        Ok(VerifiedKeyspaceName {
            name: Arc::new(keyspace_name),
            is_case_sensitive: case_sensitive,
        })
    }

    pub(crate) fn as_str(&self) -> &str {
        self.name.as_str()
    }

    // Keyspace names can have up to 48 alphanumeric characters and underscores.
    // Servers accept an underscore as the first character, so we do too.
    fn verify_keyspace_name_is_valid(keyspace_name: &str) -> Result<(), BadKeyspaceName> {
        if keyspace_name.is_empty() {
            return Err(BadKeyspaceName::Empty);
        }

        // Verify that length <= 48
        let keyspace_name_len: usize = keyspace_name.chars().count(); // Only ascii allowed so it's equal to .len()
        if keyspace_name_len > 48 {
            return Err(BadKeyspaceName::TooLong(
                keyspace_name.to_string(),
                keyspace_name_len,
            ));
        }

        // Verify all chars are alphanumeric or underscore
        for character in keyspace_name.chars() {
            match character {
                'a'..='z' | 'A'..='Z' | '0'..='9' | '_' => {}
                _ => {
                    return Err(BadKeyspaceName::IllegalCharacter(
                        keyspace_name.to_string(),
                        character,
                    ));
                }
            };
        }

        Ok(())
    }
}

use std::collections::HashMap;
use std::net::SocketAddr;
use std::pin::pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use cassia_cql::frame::request::batch::BatchStatement;
use cassia_cql::frame::request::{options, Batch, Request};
use cassia_cql::frame::response::authenticate::{AuthSuccess, Authenticate};
use cassia_cql::frame::response::error::{DbError, Error};
use cassia_cql::frame::response::event::{Event, StatusChangeEvent};
use cassia_cql::frame::response::result;
use cassia_cql::frame::response::supported::Supported;
use cassia_cql::frame::response::Response;
use cassia_cql::frame::server_event_type::EventType;
use cassia_cql::frame::Compression;
use futures::stream::{self, FuturesUnordered, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::actions::{EvaluationContext, Reaction, RequestRule};
use crate::cluster::ClusterShared;
use crate::engine::{BatchEntry, Outcome, Topology};
use crate::errors::{ConnectionError, MockError};
use crate::frame::{RequestFrame, ResponseFrame};

const PASSWORD_AUTHENTICATOR: &str = "org.apache.cassandra.auth.PasswordAuthenticator";
const CQL_VERSION: &str = "3.4.5";

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Clone)]
struct PreparedEntry {
    text: String,
    keyspace: Option<String>,
}

/// One fake node of a [`MockCluster`](crate::MockCluster).
///
/// A node listens on its own loopback address at the default CQL port, serves
/// requests from the data shared by the whole cluster, and can be told to
/// misbehave with [`RequestRule`]s.
pub struct MockNode {
    index: usize,
    address: SocketAddr,
    cluster: Arc<ClusterShared>,
    rules: Arc<Mutex<Vec<RequestRule>>>,
    prepared: Arc<Mutex<HashMap<Bytes, PreparedEntry>>>,
    requests: Arc<Mutex<Vec<RequestFrame>>>,
    connection_seq_no: Arc<AtomicUsize>,
    acceptor: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for MockNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockNode")
            .field("address", &self.address)
            .field("running", &self.is_running())
            .finish()
    }
}

impl MockNode {
    pub(crate) fn new(index: usize, address: SocketAddr, cluster: Arc<ClusterShared>) -> Self {
        Self {
            index,
            address,
            cluster,
            rules: Default::default(),
            prepared: Default::default(),
            requests: Default::default(),
            connection_seq_no: Default::default(),
            acceptor: Mutex::new(None),
        }
    }

    /// Address drivers connect to.
    pub fn address(&self) -> SocketAddr {
        self.address
    }

    pub fn host_id(&self) -> Uuid {
        self.cluster.nodes[self.index].host_id
    }

    pub fn datacenter(&self) -> &str {
        &self.cluster.nodes[self.index].datacenter
    }

    /// Tokens owned by this node.
    pub fn tokens(&self) -> &[i64] {
        &self.cluster.nodes[self.index].tokens
    }

    pub fn is_running(&self) -> bool {
        lock(&self.acceptor).is_some()
    }

    /// Replaces the rules applied to requests received from now on.
    pub fn set_rules(&self, rules: Vec<RequestRule>) {
        *lock(&self.rules) = rules;
    }

    pub fn clear_rules(&self) {
        lock(&self.rules).clear();
    }

    /// All requests received since start or the last [`clear_requests`](Self::clear_requests).
    pub fn requests(&self) -> Vec<RequestFrame> {
        lock(&self.requests).clone()
    }

    pub fn clear_requests(&self) {
        lock(&self.requests).clear();
    }

    /// Makes the node answer EXECUTE of any statement prepared so far with UNPREPARED.
    pub fn forget_prepared_statements(&self) {
        lock(&self.prepared).clear();
    }

    /// Starts accepting connections. Other nodes' connections announce the node as up.
    pub async fn start(&self) -> Result<(), MockError> {
        if self.is_running() {
            return Err(MockError::AlreadyRunning(self.address));
        }
        let listener = TcpListener::bind(self.address)
            .await
            .map_err(|err| MockError::Listen(self.address, err))?;
        info!("Mock node {} is listening.", self.address);

        let acceptor = Acceptor {
            listener,
            server: self.server(),
        };
        let handle = tokio::spawn(acceptor.run());
        let previous = lock(&self.acceptor).replace(handle);
        if let Some(previous) = previous {
            previous.abort();
        }

        self.cluster
            .publish(Event::StatusChange(StatusChangeEvent::Up(self.address)));
        Ok(())
    }

    /// Stops listening and drops all connections to the node.
    /// Other nodes' connections announce the node as down.
    pub async fn stop(&self) {
        let handle = lock(&self.acceptor).take();
        let Some(handle) = handle else {
            return;
        };
        handle.abort();
        let _ = handle.await;
        info!("Mock node {} stopped.", self.address);

        self.cluster
            .publish(Event::StatusChange(StatusChangeEvent::Down(self.address)));
    }

    fn server(&self) -> Server {
        Server {
            index: self.index,
            address: self.address,
            cluster: self.cluster.clone(),
            rules: self.rules.clone(),
            prepared: self.prepared.clone(),
            requests: self.requests.clone(),
            connection_seq_no: self.connection_seq_no.clone(),
        }
    }
}

impl Drop for MockNode {
    fn drop(&mut self) {
        if let Some(handle) = lock(&self.acceptor).take() {
            handle.abort();
        }
    }
}

/// Accepts connections until aborted. Aborting drops the set of
/// connection tasks, which closes all the connections.
struct Acceptor {
    listener: TcpListener,
    server: Server,
}

impl Acceptor {
    async fn run(self) {
        let mut connections = JoinSet::new();
        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, driver_addr)) => {
                        let seq_no = self.server.connection_seq_no.fetch_add(1, Ordering::Relaxed);
                        debug!(
                            "Node {} accepted connection no. {} from {}.",
                            self.server.address, seq_no, driver_addr
                        );
                        connections.spawn(self.server.clone().serve(stream, driver_addr, seq_no));
                    }
                    Err(err) => {
                        warn!("Node {} failed to accept a connection: {}", self.server.address, err);
                    }
                },
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
            }
        }
    }
}

/// What the connection does after a request was handled.
enum Reply {
    Frame(ResponseFrame),
    Nothing,
    Close,
}

/// State negotiated on a single connection.
#[derive(Default)]
struct ConnectionState {
    compression: Mutex<Option<Compression>>,
    started: Mutex<bool>,
    authenticated: Mutex<bool>,
    keyspace: Mutex<Option<String>>,
    registered: Mutex<Vec<EventType>>,
}

impl ConnectionState {
    fn compression(&self) -> Option<Compression> {
        *lock(&self.compression)
    }

    fn keyspace(&self) -> Option<String> {
        lock(&self.keyspace).clone()
    }

    fn wants(&self, event: &Event) -> bool {
        let event_type = match event {
            Event::TopologyChange(_) => EventType::TopologyChange,
            Event::StatusChange(_) => EventType::StatusChange,
            Event::SchemaChange(_) => EventType::SchemaChange,
        };
        lock(&self.registered).contains(&event_type)
    }
}

/// Everything a connection task needs from its node.
#[derive(Clone)]
struct Server {
    index: usize,
    address: SocketAddr,
    cluster: Arc<ClusterShared>,
    rules: Arc<Mutex<Vec<RequestRule>>>,
    prepared: Arc<Mutex<HashMap<Bytes, PreparedEntry>>>,
    requests: Arc<Mutex<Vec<RequestFrame>>>,
    connection_seq_no: Arc<AtomicUsize>,
}

impl Server {
    fn topology(&self) -> Topology<'_> {
        Topology {
            local: &self.cluster.nodes[self.index],
            nodes: &self.cluster.nodes,
        }
    }

    async fn serve(self, stream: TcpStream, driver_addr: SocketAddr, seq_no: usize) {
        match self.serve_connection(stream, seq_no).await {
            Ok(()) | Err(ConnectionError::Closed) => {
                debug!("Connection from {} to {} closed.", driver_addr, self.address);
            }
            Err(err) => debug!(
                "Connection from {} to {} dropped: {}",
                driver_addr, self.address, err
            ),
        }
    }

    async fn serve_connection(&self, stream: TcpStream, seq_no: usize) -> Result<(), ConnectionError> {
        let _ = stream.set_nodelay(true);
        let (read_half, mut write_half) = stream.into_split();
        let state = ConnectionState::default();

        // Frames are read by a stream so that a read in progress survives
        // the other select branches completing. Decompression waits until the
        // frame arrives, as compression is negotiated by a request being handled.
        let frames = stream::unfold(read_half, |mut read_half| async move {
            let frame = RequestFrame::read_raw(&mut read_half).await;
            Some((frame, read_half))
        });
        let mut frames = pin!(frames);
        let mut handlers = FuturesUnordered::new();
        let mut events = self.cluster.subscribe();
        let mut events_open = true;

        loop {
            tokio::select! {
                frame = frames.next() => {
                    let frame = match frame {
                        Some(Ok(frame)) => frame.decompressed(state.compression())?,
                        Some(Err(ConnectionError::Read(_))) | None => return Err(ConnectionError::Closed),
                        Some(Err(err)) => return Err(err),
                    };
                    handlers.push(self.handle(&state, seq_no, frame));
                }
                Some(reply) = handlers.next(), if !handlers.is_empty() => match reply? {
                    Reply::Frame(response) => response.write(&mut write_half, state.compression()).await?,
                    Reply::Nothing => {}
                    Reply::Close => {
                        debug!("Closing connection no. {} to {} as a rule says.", seq_no, self.address);
                        return Ok(());
                    }
                },
                event = events.recv(), if events_open => match event {
                    Ok(event) if state.wants(&event) => {
                        ResponseFrame::event(&event)?
                            .write(&mut write_half, state.compression())
                            .await?;
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Connection no. {} to {} missed {} events.", seq_no, self.address, skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => events_open = false,
                },
            }
        }
    }

    fn matching_reaction(&self, seq_no: usize, frame: &RequestFrame) -> Option<Reaction> {
        let ctx = EvaluationContext {
            connection_seq_no: seq_no,
            opcode: frame.opcode,
            frame_body: &frame.body,
        };
        lock(&self.rules)
            .iter()
            .find(|rule| rule.0.eval(&ctx))
            .map(|rule| rule.1.clone())
    }

    async fn handle(
        &self,
        state: &ConnectionState,
        seq_no: usize,
        frame: RequestFrame,
    ) -> Result<Reply, ConnectionError> {
        lock(&self.requests).push(frame.clone());

        match self.matching_reaction(seq_no, &frame) {
            None => {}
            Some(Reaction::Delay(delay)) => tokio::time::sleep(delay).await,
            Some(Reaction::NoResponse) => return Ok(Reply::Nothing),
            Some(Reaction::CloseConnection) => return Ok(Reply::Close),
            Some(Reaction::Error(error)) => {
                return Ok(Reply::Frame(ResponseFrame::forged_error(frame.params, error, None)?));
            }
            Some(Reaction::DelayedError(delay, error)) => {
                tokio::time::sleep(delay).await;
                return Ok(Reply::Frame(ResponseFrame::forged_error(frame.params, error, None)?));
            }
        }

        let (response, warnings) = match self.respond(state, &frame) {
            Ok(Outcome { result, warnings }) => (Response::Result(result), warnings),
            Err(Handled::Response(response)) => (response, Vec::new()),
            Err(Handled::Error(error)) => {
                debug!("Node {} answers {:?} with error: {}", self.address, frame.opcode, error.reason);
                (Response::Error(error), Vec::new())
            }
        };
        let tracing_id = frame.is_traced().then(Uuid::new_v4);
        Ok(Reply::Frame(ResponseFrame::from_response(
            frame.params,
            &response,
            tracing_id,
            &warnings,
        )?))
    }

    /// Serves a request. Requests answered with something other than a RESULT
    /// come back as `Err(Handled::Response)`.
    fn respond(&self, state: &ConnectionState, frame: &RequestFrame) -> Result<Outcome, Handled> {
        let request = frame
            .deserialize()
            .map_err(|err| protocol_error(format!("Malformed request: {}", err)))?;

        match request {
            Request::Options => Err(Handled::Response(Response::Supported(supported()))),
            Request::Startup(startup) => {
                let compression = match startup.options.get(options::COMPRESSION).map(String::as_str) {
                    None => None,
                    Some("lz4") => Some(Compression::Lz4),
                    Some("snappy") => Some(Compression::Snappy),
                    Some(other) => {
                        return Err(protocol_error(format!("Unknown compression algorithm: {}", other)))
                    }
                };
                *lock(&state.compression) = compression;
                *lock(&state.started) = true;
                if self.cluster.credentials.is_some() {
                    Err(Handled::Response(Response::Authenticate(Authenticate {
                        authenticator_name: PASSWORD_AUTHENTICATOR.to_owned(),
                    })))
                } else {
                    *lock(&state.authenticated) = true;
                    Err(Handled::Response(Response::Ready))
                }
            }
            Request::AuthResponse(auth) => {
                let Some((username, password)) = &self.cluster.credentials else {
                    return Err(protocol_error("Unexpected AUTH_RESPONSE, authentication is not enabled"));
                };
                let token = auth.response.unwrap_or_default();
                let mut parts = token.split(|b| *b == 0).skip(1);
                let given_username = parts.next().unwrap_or_default();
                let given_password = parts.next().unwrap_or_default();
                if given_username == username.as_bytes() && given_password == password.as_bytes() {
                    *lock(&state.authenticated) = true;
                    Err(Handled::Response(Response::AuthSuccess(AuthSuccess {
                        success_message: None,
                    })))
                } else {
                    Err(Handled::Error(Error {
                        error: DbError::AuthenticationError,
                        reason: "Provided username and/or password are incorrect".to_owned(),
                    }))
                }
            }
            _ if !*lock(&state.started) => Err(protocol_error(
                "Unexpected message, expecting STARTUP or OPTIONS",
            )),
            _ if !*lock(&state.authenticated) => Err(protocol_error(
                "Unexpected message, expecting AUTH_RESPONSE",
            )),
            Request::Register(register) => {
                *lock(&state.registered) = register.event_types_to_register_for;
                Err(Handled::Response(Response::Ready))
            }
            Request::Query(query) => {
                let keyspace = state.keyspace();
                let outcome = self.cluster.engine.execute(
                    &query.contents,
                    keyspace.as_deref(),
                    &query.parameters,
                    self.topology(),
                )?;
                Ok(self.after_execution(state, outcome))
            }
            Request::Prepare(prepare) => {
                let keyspace = state.keyspace();
                let prepared =
                    self.cluster
                        .engine
                        .prepare(&prepare.query, keyspace.as_deref(), self.topology())?;
                lock(&self.prepared).insert(
                    prepared.id.clone(),
                    PreparedEntry {
                        text: prepare.query,
                        keyspace,
                    },
                );
                Ok(Outcome {
                    result: result::Result::Prepared(prepared),
                    warnings: Vec::new(),
                })
            }
            Request::Execute(execute) => {
                let entry = self.prepared_entry(&execute.id)?;
                let keyspace = entry.keyspace.or_else(|| state.keyspace());
                let outcome = self.cluster.engine.execute(
                    &entry.text,
                    keyspace.as_deref(),
                    &execute.parameters,
                    self.topology(),
                )?;
                Ok(self.after_execution(state, outcome))
            }
            Request::Batch(batch) => self.batch(state, batch),
            _ => unreachable!("all request kinds are handled above"),
        }
    }

    fn prepared_entry(&self, id: &Bytes) -> Result<PreparedEntry, Handled> {
        lock(&self.prepared).get(id).cloned().ok_or_else(|| {
            Handled::Error(Error {
                error: DbError::Unprepared {
                    statement_id: id.clone(),
                },
                reason: format!("Prepared query with ID {:02x?} not found", &id[..]),
            })
        })
    }

    fn batch(&self, state: &ConnectionState, batch: Batch) -> Result<Outcome, Handled> {
        if batch.statements.len() != batch.values.len() {
            return Err(protocol_error(format!(
                "Batch has {} statements but {} lists of values",
                batch.statements.len(),
                batch.values.len()
            )));
        }

        let connection_keyspace = state.keyspace();
        let mut resolved = Vec::with_capacity(batch.statements.len());
        for statement in &batch.statements {
            resolved.push(match statement {
                BatchStatement::Query { text } => PreparedEntry {
                    text: text.clone(),
                    keyspace: connection_keyspace.clone(),
                },
                BatchStatement::Prepared { id } => {
                    let entry = self.prepared_entry(id)?;
                    PreparedEntry {
                        keyspace: entry.keyspace.or_else(|| connection_keyspace.clone()),
                        ..entry
                    }
                }
            });
        }

        let entries: Vec<BatchEntry<'_>> = resolved
            .iter()
            .zip(&batch.values)
            .map(|(entry, values)| BatchEntry {
                text: &entry.text,
                keyspace: entry.keyspace.as_deref(),
                values,
            })
            .collect();
        Ok(self.cluster.engine.batch(&entries, self.topology())?)
    }

    fn after_execution(&self, state: &ConnectionState, outcome: Outcome) -> Outcome {
        if let result::Result::SetKeyspace(set_keyspace) = &outcome.result {
            *lock(&state.keyspace) = Some(set_keyspace.keyspace_name.clone());
        }
        if let Some(change) = outcome.schema_change_event() {
            self.cluster.publish(Event::SchemaChange(change.clone()));
        }
        outcome
    }
}

enum Handled {
    Response(Response),
    Error(Error),
}

impl From<Error> for Handled {
    fn from(error: Error) -> Self {
        Handled::Error(error)
    }
}

fn protocol_error(reason: impl Into<String>) -> Handled {
    Handled::Error(Error {
        error: DbError::ProtocolError,
        reason: reason.into(),
    })
}

fn supported() -> Supported {
    let mut options = HashMap::new();
    options.insert(
        options::COMPRESSION.to_owned(),
        vec![
            Compression::Lz4.as_str().to_owned(),
            Compression::Snappy.as_str().to_owned(),
        ],
    );
    options.insert(options::CQL_VERSION.to_owned(), vec![CQL_VERSION.to_owned()]);
    options.insert("PROTOCOL_VERSIONS".to_owned(), vec!["4/v4".to_owned()]);
    Supported { options }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use assert_matches::assert_matches;
    use cassia_cql::frame::request::query::{Query, QueryParameters};
    use cassia_cql::frame::request::{
        AuthResponse, Execute, Options, Prepare, Register, SerializableRequest, Startup,
    };
    use cassia_cql::frame::response::event::{SchemaChangeEvent, SchemaChangeType};
    use cassia_cql::frame::value::{SerializedValues, ValueList};
    use cassia_cql::frame::{
        parse_response_body_extensions, read_response_frame, SerializedRequest,
    };
    use cassia_cql::value::CqlValue;
    use tokio::io::AsyncWriteExt;

    use super::*;
    use crate::{setup_tracing, Condition, MockCluster, RequestOpcode};

    struct TestClient {
        stream: TcpStream,
        compression: Option<Compression>,
        next_stream: i16,
    }

    impl TestClient {
        async fn connect(address: SocketAddr) -> Self {
            Self {
                stream: TcpStream::connect(address).await.unwrap(),
                compression: None,
                next_stream: 0,
            }
        }

        async fn send(&mut self, request: &impl SerializableRequest) -> i16 {
            let mut serialized = SerializedRequest::make(request, self.compression, false).unwrap();
            let stream = self.next_stream;
            self.next_stream += 1;
            serialized.set_stream(stream);
            self.stream.write_all(serialized.get_data()).await.unwrap();
            stream
        }

        async fn receive(&mut self) -> (i16, Response) {
            let (params, opcode, body) = read_response_frame(&mut self.stream).await.unwrap();
            let ext = parse_response_body_extensions(params.flags, self.compression, body).unwrap();
            let response = Response::deserialize(opcode, &mut &ext.body[..], None).unwrap();
            (params.stream, response)
        }

        /// Sends a request and returns its response, skipping pushed events.
        async fn request(&mut self, request: &impl SerializableRequest) -> Response {
            let stream = self.send(request).await;
            self.response_to(stream).await
        }

        async fn response_to(&mut self, stream: i16) -> Response {
            loop {
                let (received_stream, response) = self.receive().await;
                if received_stream == stream {
                    return response;
                }
            }
        }

        async fn startup(&mut self, compression: Option<Compression>) -> Response {
            let mut options = HashMap::new();
            options.insert(options::CQL_VERSION.to_owned(), "4.0.0".to_owned());
            if let Some(compression) = compression {
                options.insert(options::COMPRESSION.to_owned(), compression.as_str().to_owned());
            }
            let stream = self.send(&Startup { options }).await;
            // READY is already compressed with the negotiated algorithm.
            self.compression = compression;
            self.response_to(stream).await
        }

        async fn query(&mut self, text: &str, values: impl ValueList) -> Response {
            let parameters = QueryParameters {
                values: SerializedValues::from_bound_values(&values.bound_values()).unwrap(),
                ..Default::default()
            };
            self.request(&Query {
                contents: text.to_owned(),
                parameters,
            })
            .await
        }
    }

    fn rows(response: Response) -> Vec<Vec<Option<CqlValue>>> {
        match response {
            Response::Result(result::Result::Rows(rows)) => {
                rows.rows.into_iter().map(|row| row.columns).collect()
            }
            other => panic!("expected rows, got {:?}", other),
        }
    }

    fn db_error(response: Response) -> DbError {
        match response {
            Response::Error(error) => error.error,
            other => panic!("expected an error, got {:?}", other),
        }
    }

    #[tokio::test]
    #[ntest::timeout(10000)]
    async fn handshake_and_query_with_every_compression() {
        setup_tracing();
        let cluster = MockCluster::builder().nodes(1).build().await.unwrap();

        for compression in [None, Some(Compression::Lz4), Some(Compression::Snappy)] {
            let mut client = TestClient::connect(cluster.node(0).address()).await;
            assert_matches!(
                client.request(&Options).await,
                Response::Supported(supported)
                    if supported.options[options::COMPRESSION].contains(&"lz4".to_owned())
            );
            assert_matches!(client.startup(compression).await, Response::Ready);
            assert_eq!(
                rows(client.query("SELECT data_center FROM system.local", ()).await),
                vec![vec![Some(CqlValue::Text("dc1".to_owned()))]]
            );
        }
    }

    #[tokio::test]
    #[ntest::timeout(10000)]
    async fn password_authentication() {
        setup_tracing();
        let cluster = MockCluster::builder()
            .nodes(1)
            .credentials("cassandra", "cassandra")
            .build()
            .await
            .unwrap();
        let mut client = TestClient::connect(cluster.node(0).address()).await;

        assert_matches!(
            client.startup(None).await,
            Response::Authenticate(auth) if auth.authenticator_name == PASSWORD_AUTHENTICATOR
        );
        assert_eq!(
            db_error(client.query("SELECT * FROM system.local", ()).await),
            DbError::ProtocolError
        );
        assert_eq!(
            db_error(client.request(&AuthResponse::plain_text("cassandra", "nope")).await),
            DbError::AuthenticationError
        );
        assert_matches!(
            client.request(&AuthResponse::plain_text("cassandra", "cassandra")).await,
            Response::AuthSuccess(_)
        );
        assert_eq!(rows(client.query("SELECT key FROM system.local", ()).await).len(), 1);
    }

    #[tokio::test]
    #[ntest::timeout(10000)]
    async fn prepared_statements_are_per_node() {
        setup_tracing();
        let cluster = MockCluster::builder().nodes(2).build().await.unwrap();
        let mut first = TestClient::connect(cluster.node(0).address()).await;
        let mut second = TestClient::connect(cluster.node(1).address()).await;
        first.startup(None).await;
        second.startup(None).await;

        first
            .query(
                "CREATE KEYSPACE ks WITH replication = {'class': 'SimpleStrategy', 'replication_factor': 2}",
                (),
            )
            .await;
        first.query("CREATE TABLE ks.t (a int PRIMARY KEY, b text)", ()).await;
        assert_matches!(
            first.query("USE ks", ()).await,
            Response::Result(result::Result::SetKeyspace(_))
        );

        let Response::Result(result::Result::Prepared(prepared)) = first
            .request(&Prepare {
                query: "INSERT INTO t (a, b) VALUES (?, ?)".to_owned(),
            })
            .await
        else {
            panic!("expected a prepared statement");
        };
        assert_eq!(prepared.prepared_metadata.col_count, 2);

        let execute = Execute {
            id: prepared.id.clone(),
            parameters: QueryParameters {
                values: SerializedValues::from_bound_values(&(7, "seven").bound_values()).unwrap(),
                ..Default::default()
            },
        };
        assert_matches!(
            first.request(&execute).await,
            Response::Result(result::Result::Void)
        );
        // The other node shares the data but has not seen the statement.
        assert_eq!(
            db_error(second.request(&execute).await),
            DbError::Unprepared {
                statement_id: prepared.id.clone()
            }
        );
        assert_eq!(
            rows(second.query("SELECT b FROM ks.t WHERE a = 7", ()).await),
            vec![vec![Some(CqlValue::Text("seven".to_owned()))]]
        );

        cluster.node(0).forget_prepared_statements();
        assert_matches!(
            db_error(first.request(&execute).await),
            DbError::Unprepared { .. }
        );
    }

    #[tokio::test]
    #[ntest::timeout(10000)]
    async fn rules_shape_responses() {
        setup_tracing();
        let cluster = MockCluster::builder().nodes(1).build().await.unwrap();
        let node = cluster.node(0);
        let mut client = TestClient::connect(node.address()).await;
        client.startup(None).await;

        node.set_rules(vec![
            RequestRule::new(
                Condition::query_contains("boom"),
                Reaction::Error(DbError::Overloaded),
            ),
            RequestRule::new(
                Condition::query_contains("late"),
                Reaction::DelayedError(Duration::from_millis(20), DbError::ServerError),
            ),
        ]);
        assert_eq!(
            db_error(client.query("SELECT 'boom' FROM system.local", ()).await),
            DbError::Overloaded
        );
        assert_eq!(
            db_error(client.query("SELECT 'late' FROM system.local", ()).await),
            DbError::ServerError
        );
        assert_eq!(rows(client.query("SELECT key FROM system.local", ()).await).len(), 1);

        let queries = node
            .requests()
            .into_iter()
            .filter(|frame| frame.opcode == RequestOpcode::Query)
            .count();
        assert_eq!(queries, 3);
        node.clear_requests();
        assert!(node.requests().is_empty());

        node.set_rules(vec![RequestRule::new(
            Condition::RequestOpcode(RequestOpcode::Query),
            Reaction::CloseConnection,
        )]);
        client.send(&Query {
            contents: "SELECT key FROM system.local".to_owned(),
            parameters: Default::default(),
        })
        .await;
        assert!(read_response_frame(&mut client.stream).await.is_err());
    }

    #[tokio::test]
    #[ntest::timeout(10000)]
    async fn events_reach_registered_connections_on_all_nodes() {
        setup_tracing();
        let cluster = MockCluster::builder().nodes(2).build().await.unwrap();
        let mut listener = TestClient::connect(cluster.node(1).address()).await;
        listener.startup(None).await;
        assert_matches!(
            listener
                .request(&Register {
                    event_types_to_register_for: vec![
                        EventType::SchemaChange,
                        EventType::StatusChange
                    ],
                })
                .await,
            Response::Ready
        );

        let mut writer = TestClient::connect(cluster.node(0).address()).await;
        writer.startup(None).await;
        writer
            .query(
                "CREATE KEYSPACE ks WITH replication = {'class': 'SimpleStrategy', 'replication_factor': 1}",
                (),
            )
            .await;

        assert_eq!(
            listener.receive().await,
            (
                -1,
                Response::Event(Event::SchemaChange(SchemaChangeEvent::KeyspaceChange {
                    change_type: SchemaChangeType::Created,
                    keyspace_name: "ks".to_owned(),
                }))
            )
        );

        cluster.node(0).stop().await;
        assert!(!cluster.node(0).is_running());
        assert!(read_response_frame(&mut writer.stream).await.is_err());
        assert_eq!(
            listener.receive().await,
            (
                -1,
                Response::Event(Event::StatusChange(StatusChangeEvent::Down(
                    cluster.node(0).address()
                )))
            )
        );

        cluster.node(0).start().await.unwrap();
        assert_matches!(
            cluster.node(0).start().await,
            Err(MockError::AlreadyRunning(_))
        );
        assert_eq!(
            listener.receive().await,
            (
                -1,
                Response::Event(Event::StatusChange(StatusChangeEvent::Up(
                    cluster.node(0).address()
                )))
            )
        );
        let mut reconnected = TestClient::connect(cluster.node(0).address()).await;
        assert_matches!(reconnected.startup(None).await, Response::Ready);
    }
}

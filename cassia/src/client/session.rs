//! `Session` is the main object used in the driver.\
//! It manages all connections to the cluster and allows to execute CQL requests.

use std::borrow::Borrow;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use dashmap::DashMap;
use futures::future::join_all;
use tracing::{debug, error, trace, trace_span, Instrument};

use super::pager::QueryPager;
use crate::authentication::AuthenticatorProvider;
use crate::cluster::{Cluster, ClusterNeatDebug, ClusterState, KnownNode};
use crate::errors::{
    BadQuery, InvalidState, MetadataError, NewSessionError, NoHostAvailable, QueryError,
};
use crate::frame::response::{result, NonErrorResponse};
use crate::frame::Compression;
use crate::network::{Connection, ConnectionConfig, PoolConfig, PoolSize, VerifiedKeyspaceName};
use crate::policies::load_balancing::{
    LoadBalancingPolicy, RoundRobinPolicy, RoutingInfo, TokenAwarePolicy,
};
use crate::policies::retry::{DefaultRetryPolicy, RequestInfo, RetryDecision, RetryPolicy};
use crate::response::query_result::QueryResult;
use crate::response::{NonErrorQueryResponse, PagingState, PagingStateResponse, QueryResponse};
use crate::routing::Token;
use crate::statement::batch::{Batch, BatchStatement};
use crate::statement::{
    validate_page_size, Consistency, Executable, PreparedStatement, SerialConsistency, Statement,
    StatementConfig,
};

/// `Session` manages connections to the cluster and allows to execute CQL requests.
pub struct Session {
    cluster: Cluster,
    executor: RequestExecutor,
    keyspace_name: ArcSwapOption<String>,
    // Prepared statements by their text. The server assigns the same id to the
    // same text, so a statement is prepared once per session.
    prepared_cache: DashMap<String, PreparedStatement>,
    is_closed: AtomicBool,
}

/// This implementation deliberately omits some details from Cluster in order
/// to avoid cluttering the print with much information of little usability.
impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("cluster", &ClusterNeatDebug(&self.cluster))
            .field(
                "load_balancing_policy",
                &self.executor.load_balancing_policy.name(),
            )
            .field("retry_policy", &self.executor.retry_policy)
            .field("default_consistency", &self.executor.default_consistency)
            .field("keyspace_name", &self.keyspace_name)
            .field("is_closed", &self.is_closed)
            .finish_non_exhaustive()
    }
}

/// Configuration options for [`Session`].
/// Can be created manually, but usually it's easier to use
/// [SessionBuilder](super::session_builder::SessionBuilder)
#[derive(Clone)]
#[non_exhaustive]
pub struct SessionConfig {
    /// List of database servers known on Session startup.
    /// Session will connect to these nodes to retrieve information about other nodes in the cluster.
    /// Each node can be represented as a hostname or an IP address.
    pub known_nodes: Vec<KnownNode>,

    /// Preferred compression algorithm to use on connections.
    /// If it's not supported by database server Session will fall back to no compression.
    pub compression: Option<Compression>,

    /// Whether to set the nodelay TCP flag.
    pub tcp_nodelay: bool,

    /// TCP keepalive interval, which means how often keepalive messages
    /// are sent **on TCP layer** when a connection is idle.
    /// If `None`, no TCP keepalive messages are sent.
    pub tcp_keepalive_interval: Option<Duration>,

    /// Keyspace to be used on all connections.
    /// Each connection will send `"USE <keyspace_name>"` before sending any requests.
    /// This can be later changed with [`Session::use_keyspace`].
    pub used_keyspace: Option<String>,

    /// Whether the keyspace name is case-sensitive.
    /// If it is, the name is enclosed in double quotes when sent to the server.
    pub keyspace_case_sensitive: bool,

    /// Custom authenticator provider to create an authenticator instance
    /// upon connection setup.
    pub authenticator: Option<Arc<dyn AuthenticatorProvider>>,

    /// Timeout for establishing connections to a node, handshake included.
    pub connect_timeout: Duration,

    /// Client-side timeout of a single attempt of a request, unless the statement
    /// sets its own. `None` means no timeout.
    pub request_timeout: Option<Duration>,

    /// Size of the per-node connection pool, i.e. how many connections the driver should keep to each node.
    pub connection_pool_size: PoolSize,

    /// Interval of sending keepalive requests.
    /// If `None`, keepalives are never sent, so `Self::keepalive_timeout` has no effect.
    pub keepalive_interval: Option<Duration>,

    /// Controls after what time of not receiving response to keepalives a connection is closed.
    /// If `None`, connections are never closed due to lack of response to a keepalive message.
    pub keepalive_timeout: Option<Duration>,

    /// Consistency of statements that do not set their own.
    pub default_consistency: Consistency,

    /// Serial consistency of statements that do not set their own.
    pub default_serial_consistency: Option<SerialConsistency>,

    /// Decides which nodes are contacted for each request, and in which order.
    pub load_balancing_policy: Arc<dyn LoadBalancingPolicy>,

    /// Decides what to do after a failed attempt of a request.
    pub retry_policy: Arc<dyn RetryPolicy>,

    /// Interval between refreshing cluster metadata.
    pub cluster_metadata_refresh_interval: Duration,

    /// Whether the control connection registers for topology, status and schema
    /// change events, which trigger an immediate metadata refresh.
    pub register_for_events: bool,
}

impl SessionConfig {
    /// Creates a [`SessionConfig`] with default configuration
    /// # Default configuration
    /// * Compression: None
    /// * Load balancing policy: Token-aware Round-robin
    /// * Retry policy: [`DefaultRetryPolicy`]
    /// * Consistency: `LocalQuorum`
    ///
    /// # Example
    /// ```
    /// # use cassia::client::session::SessionConfig;
    /// let config = SessionConfig::new();
    /// ```
    pub fn new() -> Self {
        SessionConfig {
            known_nodes: Vec::new(),
            compression: None,
            tcp_nodelay: true,
            tcp_keepalive_interval: None,
            used_keyspace: None,
            keyspace_case_sensitive: false,
            authenticator: None,
            connect_timeout: Duration::from_secs(5),
            request_timeout: Some(Duration::from_secs(30)),
            connection_pool_size: Default::default(),
            keepalive_interval: Some(Duration::from_secs(30)),
            keepalive_timeout: Some(Duration::from_secs(30)),
            default_consistency: Consistency::LocalQuorum,
            default_serial_consistency: Some(SerialConsistency::LocalSerial),
            load_balancing_policy: Arc::new(TokenAwarePolicy::new(RoundRobinPolicy::new())),
            retry_policy: Arc::new(DefaultRetryPolicy::new()),
            cluster_metadata_refresh_interval: Duration::from_secs(60),
            register_for_events: true,
        }
    }

    /// Adds a known database server with a hostname.
    /// If the port is not explicitly specified, 9042 is used as default
    /// # Example
    /// ```
    /// # use cassia::client::session::SessionConfig;
    /// let mut config = SessionConfig::new();
    /// config.add_known_node("127.0.0.1");
    /// config.add_known_node("db1.example.com:9042");
    /// ```
    pub fn add_known_node(&mut self, hostname: impl AsRef<str>) {
        self.known_nodes
            .push(KnownNode::Hostname(hostname.as_ref().to_string()));
    }

    /// Adds a known database server with an IP address
    pub fn add_known_node_addr(&mut self, node_addr: SocketAddr) {
        self.known_nodes.push(KnownNode::Address(node_addr));
    }

    /// Adds a list of known database server with hostnames.
    pub fn add_known_nodes(&mut self, hostnames: impl IntoIterator<Item = impl AsRef<str>>) {
        for hostname in hostnames {
            self.add_known_node(hostname);
        }
    }

    /// Adds a list of known database servers with IP addresses
    pub fn add_known_nodes_addr(
        &mut self,
        node_addrs: impl IntoIterator<Item = impl Borrow<SocketAddr>>,
    ) {
        for address in node_addrs {
            self.add_known_node_addr(*address.borrow());
        }
    }
}

/// Creates default [`SessionConfig`], same as [`SessionConfig::new`]
impl Default for SessionConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs requests along the load balancing plan, consulting the retry policy
/// after each failed attempt.
///
/// Shared by the session and the page fetching tasks of its pagers.
#[derive(Clone)]
pub(crate) struct RequestExecutor {
    load_balancing_policy: Arc<dyn LoadBalancingPolicy>,
    retry_policy: Arc<dyn RetryPolicy>,
    default_consistency: Consistency,
    default_serial_consistency: Option<SerialConsistency>,
}

impl RequestExecutor {
    pub(crate) fn routing_info<'a>(
        &self,
        config: &StatementConfig,
        token: Option<Token>,
        keyspace: Option<&'a str>,
    ) -> RoutingInfo<'a> {
        RoutingInfo {
            consistency: config.determine_consistency(self.default_consistency),
            serial_consistency: config
                .serial_consistency
                .or(self.default_serial_consistency),
            token,
            keyspace,
        }
    }

    /// Sends the request with `run_request_once` to the nodes of the plan until one
    /// of them succeeds or the retry policy gives up.
    ///
    /// Returns the response and the address of the node that served it. When the
    /// plan is exhausted, the error of every attempt is returned in [`NoHostAvailable`].
    pub(crate) async fn run<QueryFut>(
        &self,
        cluster_state: &ClusterState,
        routing_info: &RoutingInfo<'_>,
        statement_config: &StatementConfig,
        run_request_once: impl Fn(Arc<Connection>, Consistency) -> QueryFut,
    ) -> Result<(NonErrorQueryResponse, SocketAddr), QueryError>
    where
        QueryFut: Future<Output = Result<QueryResponse, QueryError>>,
    {
        let mut retry_session = self.retry_policy.new_session();
        let mut current_consistency = routing_info.consistency;
        let mut errors: Vec<(SocketAddr, QueryError)> = Vec::new();
        let mut attempt: usize = 0;

        let plan = self.load_balancing_policy.plan(routing_info, cluster_state);

        'nodes_in_plan: for node in plan {
            let span = trace_span!("Executing request", node = %node.address);
            'same_node_retries: loop {
                let connection = match node.connection() {
                    Ok(connection) => connection,
                    Err(e) => {
                        trace!(parent: &span, error = %e, "Choosing connection failed");
                        errors.push((node.address, e.into()));
                        continue 'nodes_in_plan;
                    }
                };

                attempt += 1;
                trace!(
                    parent: &span,
                    connection = %connection.get_connect_address(),
                    attempt,
                    "Sending"
                );
                let request_result = run_request_once(connection, current_consistency)
                    .instrument(span.clone())
                    .await
                    .and_then(QueryResponse::into_non_error_query_response);

                let request_error = match request_result {
                    Ok(response) => {
                        trace!(parent: &span, "Request succeeded");
                        return Ok((response, node.address));
                    }
                    Err(e) => {
                        trace!(parent: &span, error = %e, "Request failed");
                        e
                    }
                };

                let retry_decision = retry_session.decide(RequestInfo {
                    error: &request_error,
                    is_idempotent: statement_config.is_idempotent,
                    consistency: current_consistency,
                    attempt,
                });
                trace!(parent: &span, retry_decision = ?retry_decision);

                match retry_decision {
                    RetryDecision::RetrySameNode(cl) => {
                        errors.push((node.address, request_error));
                        current_consistency = cl.unwrap_or(current_consistency);
                        continue 'same_node_retries;
                    }
                    RetryDecision::RetryNextNode(cl) => {
                        errors.push((node.address, request_error));
                        current_consistency = cl.unwrap_or(current_consistency);
                        continue 'nodes_in_plan;
                    }
                    RetryDecision::Rethrow => return Err(request_error),
                    RetryDecision::Ignore => {
                        debug!(error = %request_error, "Ignoring a failed request");
                        let ignored = NonErrorQueryResponse {
                            response: NonErrorResponse::Result(result::Result::Void),
                            tracing_id: None,
                            warnings: Vec::new(),
                        };
                        return Ok((ignored, node.address));
                    }
                }
            }
        }

        Err(NoHostAvailable { errors }.into())
    }
}

/// Represents a CQL session, which can be used to communicate
/// with the database
impl Session {
    /// Estabilishes a CQL session with the database
    ///
    /// Usually it's easier to use [SessionBuilder](crate::client::session_builder::SessionBuilder)
    /// instead of calling `Session::connect` directly
    /// # Arguments
    /// * `config` - Connection configuration - known nodes, Compression, etc.
    ///   Must contain at least one known node.
    ///
    /// # Example
    /// ```rust,no_run
    /// # use std::error::Error;
    /// # async fn check_only_compiles() -> Result<(), Box<dyn Error>> {
    /// use cassia::client::session::{Session, SessionConfig};
    ///
    /// let mut config = SessionConfig::new();
    /// config.add_known_node("127.0.0.1:9042");
    ///
    /// let session: Session = Session::connect(config).await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn connect(config: SessionConfig) -> Result<Self, NewSessionError> {
        let connection_config = ConnectionConfig {
            compression: config.compression,
            tcp_nodelay: config.tcp_nodelay,
            tcp_keepalive_interval: config.tcp_keepalive_interval,
            connect_timeout: config.connect_timeout,
            request_timeout: config.request_timeout,
            event_sender: None,
            default_consistency: config.default_consistency,
            authenticator: config.authenticator,
            keepalive_interval: config.keepalive_interval,
            keepalive_timeout: config.keepalive_timeout,
        };

        let pool_config = PoolConfig {
            connection_config,
            pool_size: config.connection_pool_size,
        };

        let cluster = Cluster::new(
            config.known_nodes,
            pool_config,
            config.cluster_metadata_refresh_interval,
            config.register_for_events,
        )
        .await?;

        let session = Self {
            cluster,
            executor: RequestExecutor {
                load_balancing_policy: config.load_balancing_policy,
                retry_policy: config.retry_policy,
                default_consistency: config.default_consistency,
                default_serial_consistency: config.default_serial_consistency,
            },
            keyspace_name: ArcSwapOption::default(), // will be set by use_keyspace
            prepared_cache: DashMap::new(),
            is_closed: AtomicBool::new(false),
        };

        if let Some(keyspace_name) = config.used_keyspace {
            session
                .use_keyspace(keyspace_name, config.keyspace_case_sensitive)
                .await
                .map_err(NewSessionError::UseKeyspace)?;
        }

        Ok(session)
    }

    /// Executes a statement and returns its result set, paged by the
    /// statement's page size.
    ///
    /// Only the first page is fetched before returning, so a failing request
    /// fails this call. The following pages are fetched in the background as
    /// the rows of the returned [`QueryPager`] are consumed.
    ///
    /// Accepts a query string, a [`Statement`], a [`BoundStatement`](crate::statement::BoundStatement)
    /// or a statement built with the [query builder](crate::query_builder).
    ///
    /// ```rust
    /// # use cassia::Session;
    /// # use std::error::Error;
    /// # async fn check_only_compiles(session: &Session) -> Result<(), Box<dyn Error>> {
    /// use futures::TryStreamExt;
    /// use cassia::query_builder::{eq, update};
    /// use cassia::statement::Statement;
    ///
    /// session
    ///     .execute("INSERT INTO users (lastname, age) VALUES ('Jones', 35)")
    ///     .await?;
    /// session
    ///     .execute(update("demo", "users").set("age", 36).where_(eq("lastname", "Jones")).build())
    ///     .await?;
    ///
    /// let mut rows = session
    ///     .execute(Statement::new("SELECT lastname, age FROM users").with_page_size(2))
    ///     .await?;
    /// while let Some(row) = rows.try_next().await? {
    ///     println!("{} is {}", row.get_string("lastname")?, row.get_int("age")?);
    /// }
    /// # Ok(())
    /// # }
    /// ```
    pub async fn execute(
        &self,
        statement: impl Into<Executable>,
    ) -> Result<QueryPager, QueryError> {
        let statement = statement.into();
        let page_size = validate_page_size(statement.page_size())?;
        let (first_page, paging_state_response) = self
            .do_execute(&statement, Some(page_size), PagingState::start())
            .await?;

        Ok(QueryPager::new(
            first_page,
            paging_state_response,
            statement,
            self.executor.clone(),
            self.cluster.get_state(),
            self.get_keyspace().map(|ks| ks.as_str().to_owned()),
        ))
    }

    /// Same as [`Session::execute`].
    pub async fn execute_iter(
        &self,
        statement: impl Into<Executable>,
    ) -> Result<QueryPager, QueryError> {
        self.execute(statement).await
    }

    /// Executes a statement in a single request, without paging.
    ///
    /// The page size of the statement is ignored and the whole result is
    /// returned at once, with the address of the node that served it.
    pub async fn execute_unpaged(
        &self,
        statement: impl Into<Executable>,
    ) -> Result<QueryResult, QueryError> {
        let statement = statement.into();
        let (result, paging_state_response) = self
            .do_execute(&statement, None, PagingState::start())
            .await?;
        if !paging_state_response.finished() {
            error!("Unpaged request returned a paging state; this is a server-side bug");
            return Err(QueryError::ProtocolError(
                "Unexpected paging state in an unpaged response".to_owned(),
            ));
        }
        Ok(result)
    }

    /// Fetches a single page of the result, starting from `paging_state`.
    ///
    /// The page size is the statement's. The returned [`PagingStateResponse`]
    /// tells whether there are more pages and how to ask for the next one.
    ///
    /// ```rust
    /// # use cassia::Session;
    /// # use std::error::Error;
    /// # async fn check_only_compiles(session: &Session) -> Result<(), Box<dyn Error>> {
    /// use std::ops::ControlFlow;
    /// use cassia::response::PagingState;
    /// use cassia::statement::Statement;
    ///
    /// let statement = Statement::new("SELECT lastname FROM users").with_page_size(2);
    /// let mut paging_state = PagingState::start();
    /// loop {
    ///     let (result, paging_state_response) = session
    ///         .execute_single_page(&statement, paging_state)
    ///         .await?;
    ///     println!("{} rows", result.rows_num());
    ///     match paging_state_response.into_paging_control_flow() {
    ///         ControlFlow::Break(()) => break,
    ///         ControlFlow::Continue(new_paging_state) => paging_state = new_paging_state,
    ///     }
    /// }
    /// # Ok(())
    /// # }
    /// ```
    pub async fn execute_single_page(
        &self,
        statement: impl Into<Executable>,
        paging_state: PagingState,
    ) -> Result<(QueryResult, PagingStateResponse), QueryError> {
        let statement = statement.into();
        let page_size = validate_page_size(statement.page_size())?;
        self.do_execute(&statement, Some(page_size), paging_state)
            .await
    }

    async fn do_execute(
        &self,
        statement: &Executable,
        page_size: Option<i32>,
        paging_state: PagingState,
    ) -> Result<(QueryResult, PagingStateResponse), QueryError> {
        self.ensure_open()?;

        let session_keyspace = self.get_keyspace();
        let routing_info = self.executor.routing_info(
            statement.config(),
            statement.token(),
            statement
                .keyspace()
                .or(session_keyspace.as_deref().map(String::as_str)),
        );
        let serial_consistency = routing_info.serial_consistency;
        trace!(statement = statement.contents(), "Executing statement");

        let cluster_state = self.cluster.get_state();
        let (response, coordinator) = self
            .executor
            .run(
                &cluster_state,
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
                                page_size,
                                paging_state,
                            )
                            .await
                    }
                },
            )
            .await?;

        self.handle_set_keyspace_response(&response).await?;

        let (result, paging_state_response) = response.into_query_result_and_paging_state()?;
        Ok((result.with_coordinator(coordinator), paging_state_response))
    }

    // A `USE ks` sent as a statement only changes the keyspace of one connection;
    // the session follows it on all of them.
    async fn handle_set_keyspace_response(
        &self,
        response: &NonErrorQueryResponse,
    ) -> Result<(), QueryError> {
        if let Some(set_keyspace) = response.as_set_keyspace() {
            debug!(
                "Detected USE KEYSPACE query, setting session's keyspace to {}",
                set_keyspace.keyspace_name
            );
            self.use_keyspace(set_keyspace.keyspace_name.clone(), true)
                .await?;
        }

        Ok(())
    }

    /// Executes a batch in a single request.
    ///
    /// The batch is routed like its first bound statement. An empty batch is
    /// rejected without contacting any node.
    pub async fn execute_batch(&self, batch: &Batch) -> Result<QueryResult, QueryError> {
        self.ensure_open()?;
        if batch.statements.is_empty() {
            return Err(BadQuery::EmptyBatch.into());
        }

        let first_bound = batch.statements.iter().find_map(|s| match s {
            BatchStatement::Bound(b) => Some(b),
            BatchStatement::Simple(_) => None,
        });
        let session_keyspace = self.get_keyspace();
        let routing_info = self.executor.routing_info(
            &batch.config,
            first_bound.and_then(|b| b.token()),
            first_bound
                .and_then(|b| b.prepared().get_keyspace_name())
                .or(session_keyspace.as_deref().map(String::as_str)),
        );
        let serial_consistency = routing_info.serial_consistency;

        let cluster_state = self.cluster.get_state();
        let (response, coordinator) = self
            .executor
            .run(
                &cluster_state,
                &routing_info,
                &batch.config,
                |connection: Arc<Connection>, consistency: Consistency| async move {
                    connection
                        .batch_with_consistency(batch, consistency, serial_consistency)
                        .await
                },
            )
            .await?;

        Ok(response.into_query_result()?.with_coordinator(coordinator))
    }

    /// Prepares a statement on the server side and returns a prepared statement,
    /// which can later be bound with values and executed.
    ///
    /// The statement is prepared on every node concurrently. It is enough for one
    /// node to succeed; the others prepare it again when they first see it.
    /// Statements are cached by their text, so preparing the same text again
    /// does not contact the cluster.
    ///
    /// ```rust
    /// # use cassia::Session;
    /// # use std::error::Error;
    /// # async fn check_only_compiles(session: &Session) -> Result<(), Box<dyn Error>> {
    /// let prepared = session
    ///     .prepare("SELECT age FROM users WHERE lastname = ?")
    ///     .await?;
    /// let result = session.execute_unpaged(prepared.bind(("Jones",))?).await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn prepare(
        &self,
        statement: impl Into<Statement>,
    ) -> Result<PreparedStatement, QueryError> {
        let statement = statement.into();
        self.prepare_nongeneric(&statement).await
    }

    // Introduced to avoid monomorphisation of this large function.
    async fn prepare_nongeneric(
        &self,
        statement: &Statement,
    ) -> Result<PreparedStatement, QueryError> {
        self.ensure_open()?;

        if let Some(cached) = self.prepared_cache.get(&statement.contents) {
            trace!(statement = statement.contents, "Prepared statement cache hit");
            return Ok(with_statement_options(cached.clone(), statement));
        }

        let cluster_state = self.cluster.get_state();
        let mut errors: Vec<(SocketAddr, QueryError)> = Vec::new();
        let mut connections: Vec<Arc<Connection>> = Vec::new();
        for node in cluster_state.get_nodes_info() {
            match node.connection() {
                Ok(connection) => connections.push(connection),
                Err(e) => errors.push((node.address, e.into())),
            }
        }

        let results = join_all(connections.iter().map(|c| c.prepare(statement))).await;

        let mut prepared: Option<PreparedStatement> = None;
        for (connection, result) in connections.iter().zip(results) {
            match result {
                Ok(another) => match &prepared {
                    None => prepared = Some(another),
                    Some(first) if first.get_id() != another.get_id() => {
                        error!(
                            "Got differing ids upon statement preparation: statement \"{}\", id1: {:?}, id2: {:?}",
                            statement.contents,
                            first.get_id(),
                            another.get_id()
                        );
                        return Err(BadQuery::PreparedStatementIdsMismatch.into());
                    }
                    Some(_) => {}
                },
                Err(e) => errors.push((connection.get_connect_address(), e)),
            }
        }

        match prepared {
            Some(prepared) => {
                self.prepared_cache
                    .insert(statement.contents.clone(), prepared.clone());
                Ok(prepared)
            }
            None => Err(prepare_error(errors)),
        }
    }

    /// Sends `USE <keyspace_name>` request on all connections\
    /// This allows to write `SELECT * FROM table` instead of `SELECT * FROM keyspace.table`\
    ///
    /// Note that even failed `use_keyspace` can change currently used keyspace - the request is sent on all connections and
    /// can overwrite previously used keyspace.
    ///
    /// Call only one `use_keyspace` at a time.\
    /// Trying to do two `use_keyspace` requests simultaneously with different names
    /// can end with some connections using one keyspace and the rest using the other.
    ///
    /// # Arguments
    ///
    /// * `keyspace_name` - keyspace name to use,
    ///   keyspace names can have up to 48 alphanumeric characters and contain underscores
    /// * `case_sensitive` - if set to true the generated request will put keyspace name in quotes
    pub async fn use_keyspace(
        &self,
        keyspace_name: impl Into<String>,
        case_sensitive: bool,
    ) -> Result<(), QueryError> {
        self.ensure_open()?;
        let keyspace_name = keyspace_name.into();

        // Trying to pass keyspace as bound value in "USE ?" doesn't work
        // So we have to create a string for query: "USE " + new_keyspace
        // To avoid any possible CQL injections it's good to verify that the name is valid
        let verified_ks_name = VerifiedKeyspaceName::new(keyspace_name.clone(), case_sensitive)?;

        self.cluster.use_keyspace(verified_ks_name).await?;

        // Unquoted names are case-insensitive and stored in lower case by the server.
        let stored_name = if case_sensitive {
            keyspace_name
        } else {
            keyspace_name.to_lowercase()
        };
        self.keyspace_name.store(Some(Arc::new(stored_name)));

        Ok(())
    }

    /// Manually trigger a metadata refresh\
    /// The driver will fetch current nodes in the cluster and update its metadata
    ///
    /// Normally this is not needed,
    /// the driver should automatically detect all metadata changes in the cluster
    pub async fn refresh_metadata(&self) -> Result<(), MetadataError> {
        self.ensure_open().map_err(MetadataError::Query)?;
        self.cluster.refresh_metadata().await
    }

    /// Access cluster state visible by the driver.
    ///
    /// Driver collects various information about network topology or schema.
    /// It can be read using this method.
    pub fn get_cluster_state(&self) -> Arc<ClusterState> {
        self.cluster.get_state()
    }

    /// Gets the name of the keyspace that is currently set, or `None` if no
    /// keyspace was set.
    #[inline]
    pub fn get_keyspace(&self) -> Option<Arc<String>> {
        self.keyspace_name.load_full()
    }

    /// Closes the session: stops the metadata refreshes and closes every
    /// connection. Requests in flight fail.
    ///
    /// Closing an already closed session does nothing. Any later call fails with
    /// [`InvalidState::SessionClosed`].
    pub fn close(&self) {
        if self.is_closed.swap(true, Ordering::AcqRel) {
            debug!("Session is already closed");
            return;
        }
        debug!("Closing session");
        self.prepared_cache.clear();
        self.cluster.close();
    }

    /// Whether [`Session::close`] was called.
    pub fn is_closed(&self) -> bool {
        self.is_closed.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> Result<(), QueryError> {
        if self.is_closed() {
            return Err(InvalidState::SessionClosed.into());
        }
        Ok(())
    }
}

// A cached statement, carrying the options of the statement it is asked for with.
fn with_statement_options(mut prepared: PreparedStatement, statement: &Statement) -> PreparedStatement {
    prepared.config = statement.config.clone();
    prepared.set_page_size(statement.get_page_size());
    prepared.prepare_tracing_id = None;
    prepared.with_preset_values(statement.preset_values.clone())
}

// A statement the server rejected fails the same way on every node, so its error
// is returned as is. Otherwise no node could be reached.
fn prepare_error(errors: Vec<(SocketAddr, QueryError)>) -> QueryError {
    match errors.iter().position(|(_, e)| !e.is_transport_error()) {
        Some(idx) => errors[idx].1.clone(),
        None => NoHostAvailable { errors }.into(),
    }
}

use super::connection::{
    open_connection, Connection, ConnectionConfig, ErrorReceiver, VerifiedKeyspaceName,
};

use crate::cluster::node::NodeStatus;
use crate::errors::{BrokenConnectionErrorKind, ConnectionError, QueryError};

use arc_swap::ArcSwap;
use futures::{future::RemoteHandle, stream::FuturesUnordered, Future, FutureExt, StreamExt};
use std::net::SocketAddr;
use std::num::NonZeroUsize;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, Notify};
use tracing::{debug, trace, warn, Instrument};

/// The target size of a per-node connection pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolSize {
    /// Indicates that the pool should establish given number of connections to the node.
    PerHost(NonZeroUsize),
}

impl Default for PoolSize {
    fn default() -> Self {
        PoolSize::PerHost(NonZeroUsize::new(2).unwrap_or(NonZeroUsize::MIN))
    }
}

impl PoolSize {
    fn target(&self) -> usize {
        match self {
            PoolSize::PerHost(target) => target.get(),
        }
    }
}

#[derive(Clone, Default)]
pub(crate) struct PoolConfig {
    pub(crate) connection_config: ConnectionConfig,
    pub(crate) pool_size: PoolSize,
}

enum MaybePoolConnections {
    // The pool is being filled for the first time
    Initializing,

    // The pool is empty because either initial filling failed or all connections
    // became broken; will be asynchronously refilled. Contains an error
    // from the last connection attempt.
    Broken(ConnectionError),

    // The pool has some connections which are usable (or will be removed soon)
    Ready(Vec<Arc<Connection>>),
}

impl std::fmt::Debug for MaybePoolConnections {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MaybePoolConnections::Initializing => write!(f, "Initializing"),
            MaybePoolConnections::Broken(err) => write!(f, "Broken({err:?})"),
            MaybePoolConnections::Ready(conns) => {
                write!(f, "{:?}", ConnectionVectorWrapper(conns))
            }
        }
    }
}

struct ConnectionVectorWrapper<'a>(&'a [Arc<Connection>]);
impl std::fmt::Debug for ConnectionVectorWrapper<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(
                self.0
                    .iter()
                    .map(|conn| (conn.get_connect_address(), conn.in_flight_requests())),
            )
            .finish()
    }
}

/// The connections of a single node.
///
/// Connections are opened and replaced by a background refiller task, which is the
/// only writer of the shared connection list. Readers load a snapshot and never wait.
#[derive(Clone)]
pub(crate) struct NodeConnectionPool {
    conns: Arc<ArcSwap<MaybePoolConnections>>,
    use_keyspace_request_sender: mpsc::Sender<UseKeyspaceRequest>,
    _refiller_handle: Arc<RemoteHandle<()>>,
    pool_updated_notify: Arc<Notify>,
    refill_requested: Arc<Notify>,
    closer: Arc<Notify>,
    pool_size: PoolSize,
    address: SocketAddr,
}

impl std::fmt::Debug for NodeConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeConnectionPool")
            .field("conns", &self.conns)
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

impl NodeConnectionPool {
    pub(crate) fn new(
        address: SocketAddr,
        pool_config: &PoolConfig,
        current_keyspace: Option<VerifiedKeyspaceName>,
    ) -> Self {
        let (use_keyspace_request_sender, use_keyspace_request_receiver) = mpsc::channel(1);
        let pool_updated_notify = Arc::new(Notify::new());
        let refill_requested = Arc::new(Notify::new());
        let closer = Arc::new(Notify::new());

        let refiller = PoolRefiller::new(
            address,
            pool_config.clone(),
            current_keyspace,
            pool_updated_notify.clone(),
        );

        let conns = refiller.get_shared_connections();
        let (fut, refiller_handle) = refiller
            .run(
                use_keyspace_request_receiver,
                refill_requested.clone(),
                closer.clone(),
            )
            .instrument(tracing::debug_span!("pool_refiller", node = %address))
            .remote_handle();
        tokio::spawn(fut);

        Self {
            conns,
            use_keyspace_request_sender,
            _refiller_handle: Arc::new(refiller_handle),
            pool_updated_notify,
            refill_requested,
            closer,
            pool_size: pool_config.pool_size,
            address,
        }
    }

    pub(crate) fn is_connected(&self) -> bool {
        matches!(**self.conns.load(), MaybePoolConnections::Ready(_))
    }

    /// Up with at least one connection, Down when the last attempt failed,
    /// Unknown until the first attempt finishes.
    pub(crate) fn status(&self) -> NodeStatus {
        match **self.conns.load() {
            MaybePoolConnections::Initializing => NodeStatus::Unknown,
            MaybePoolConnections::Broken(_) => NodeStatus::Down,
            MaybePoolConnections::Ready(_) => NodeStatus::Up,
        }
    }

    /// Returns the connection with the fewest requests in flight.
    ///
    /// A pool below its target size asks its refiller to open more connections.
    pub(crate) fn connection(&self) -> Result<Arc<Connection>, ConnectionError> {
        let conns = self.conns.load();
        match &**conns {
            MaybePoolConnections::Ready(conns) => {
                if conns.len() < self.pool_size.target() {
                    self.refill_requested.notify_one();
                }
                trace!(
                    connections = ?ConnectionVectorWrapper(conns),
                    "[{}] Available",
                    self.address
                );
                conns
                    .iter()
                    .filter(|conn| !conn.is_closed())
                    .min_by_key(|conn| conn.in_flight_requests())
                    .cloned()
                    .ok_or(ConnectionError::NoWorkingConnection { last_error: None })
            }
            MaybePoolConnections::Initializing => {
                Err(ConnectionError::NoWorkingConnection { last_error: None })
            }
            MaybePoolConnections::Broken(err) => Err(ConnectionError::NoWorkingConnection {
                last_error: Some(Box::new(err.clone())),
            }),
        }
    }

    pub(crate) async fn use_keyspace(
        &self,
        keyspace_name: VerifiedKeyspaceName,
    ) -> Result<(), QueryError> {
        let (response_sender, response_receiver) = oneshot::channel();

        self.use_keyspace_request_sender
            .send(UseKeyspaceRequest {
                keyspace_name,
                response_sender,
            })
            .await
            .map_err(|_| ConnectionError::ConnectionClosed)?;

        response_receiver
            .await
            .map_err(|_| ConnectionError::ConnectionClosed)?
    }

    // Waits until the pool becomes initialized.
    // The pool is considered initialized either if the first connection has been
    // established or after first filling ends, whichever comes first.
    pub(crate) async fn wait_until_initialized(&self) {
        // First, register for the notification
        // so that we don't miss it
        let notified = self.pool_updated_notify.notified();

        if let MaybePoolConnections::Initializing = **self.conns.load() {
            // If the pool is not initialized yet, wait until we get a notification
            notified.await;
        }
    }

    pub(crate) fn get_working_connections(&self) -> Result<Vec<Arc<Connection>>, ConnectionError> {
        match &**self.conns.load() {
            MaybePoolConnections::Ready(conns) => Ok(conns.clone()),
            MaybePoolConnections::Initializing => {
                Err(ConnectionError::NoWorkingConnection { last_error: None })
            }
            MaybePoolConnections::Broken(err) => Err(ConnectionError::NoWorkingConnection {
                last_error: Some(Box::new(err.clone())),
            }),
        }
    }

    /// Stops the refiller and closes every connection of the pool.
    pub(crate) fn close(&self) {
        self.closer.notify_one();
    }
}

const MIN_FILL_BACKOFF: Duration = Duration::from_millis(50);
const MAX_FILL_BACKOFF: Duration = Duration::from_secs(10);
const FILL_BACKOFF_MULTIPLIER: u32 = 2;

// A simple exponential strategy for pool fill backoffs.
struct RefillDelayStrategy {
    current_delay: Duration,
}

impl RefillDelayStrategy {
    fn new() -> Self {
        Self {
            current_delay: MIN_FILL_BACKOFF,
        }
    }

    fn get_delay(&self) -> Duration {
        self.current_delay
    }

    fn on_successful_fill(&mut self) {
        self.current_delay = MIN_FILL_BACKOFF;
    }

    fn on_fill_error(&mut self) {
        self.current_delay = std::cmp::min(
            MAX_FILL_BACKOFF,
            self.current_delay * FILL_BACKOFF_MULTIPLIER,
        );
    }
}

struct PoolRefiller {
    address: SocketAddr,
    pool_config: PoolConfig,

    // `shared_conns` is updated only after `conns` change
    shared_conns: Arc<ArcSwap<MaybePoolConnections>>,
    conns: Vec<Arc<Connection>>,

    // Set to true if there was an error since the last refill,
    // set to false when refilling starts.
    had_error_since_last_refill: bool,

    refill_delay_strategy: RefillDelayStrategy,

    // Receives information about connections becoming ready, i.e. newly connected
    // or after its keyspace was correctly set.
    ready_connections:
        FuturesUnordered<Pin<Box<dyn Future<Output = OpenedConnectionEvent> + Send + 'static>>>,

    // Receives information about breaking connections
    connection_errors:
        FuturesUnordered<Pin<Box<dyn Future<Output = BrokenConnectionEvent> + Send + 'static>>>,

    current_keyspace: Option<VerifiedKeyspaceName>,

    // Signaled when the connection pool is updated
    pool_updated_notify: Arc<Notify>,
}

#[derive(Debug)]
struct UseKeyspaceRequest {
    keyspace_name: VerifiedKeyspaceName,
    response_sender: oneshot::Sender<Result<(), QueryError>>,
}

impl PoolRefiller {
    fn new(
        address: SocketAddr,
        pool_config: PoolConfig,
        current_keyspace: Option<VerifiedKeyspaceName>,
        pool_updated_notify: Arc<Notify>,
    ) -> Self {
        let shared_conns = Arc::new(ArcSwap::new(Arc::new(MaybePoolConnections::Initializing)));

        Self {
            address,
            pool_config,

            shared_conns,
            conns: Vec::new(),

            had_error_since_last_refill: false,
            refill_delay_strategy: RefillDelayStrategy::new(),

            ready_connections: FuturesUnordered::new(),
            connection_errors: FuturesUnordered::new(),

            current_keyspace,

            pool_updated_notify,
        }
    }

    fn get_shared_connections(&self) -> Arc<ArcSwap<MaybePoolConnections>> {
        self.shared_conns.clone()
    }

    // The main loop of the pool refiller
    async fn run(
        mut self,
        mut use_keyspace_request_receiver: mpsc::Receiver<UseKeyspaceRequest>,
        refill_requested: Arc<Notify>,
        closer: Arc<Notify>,
    ) {
        debug!("[{}] Started asynchronous pool worker", self.address);

        let mut next_refill_time = tokio::time::Instant::now();
        let mut refill_scheduled = true;

        loop {
            tokio::select! {
                _ = tokio::time::sleep_until(next_refill_time), if refill_scheduled => {
                    self.had_error_since_last_refill = false;
                    self.start_filling();
                    refill_scheduled = false;
                }

                evt = self.ready_connections.select_next_some(), if !self.ready_connections.is_empty() => {
                    self.handle_ready_connection(evt);
                }

                evt = self.connection_errors.select_next_some(), if !self.connection_errors.is_empty() => {
                    if let Some(conn) = evt.connection.upgrade() {
                        debug!("[{}] Got error for connection {:p}: {:?}", self.address, Arc::as_ptr(&conn), evt.error);
                        self.remove_connection(conn, evt.error);
                    }
                }

                _ = refill_requested.notified() => {
                    trace!("[{}] Refill requested", self.address);
                }

                _ = closer.notified() => {
                    self.close();
                    return;
                }

                req = use_keyspace_request_receiver.recv() => {
                    if let Some(req) = req {
                        debug!("[{}] Requested keyspace change: {}", self.address, req.keyspace_name.as_str());
                        self.use_keyspace(req.keyspace_name, req.response_sender);
                    } else {
                        // The keyspace request channel is dropped.
                        // This means that the corresponding pool is dropped.
                        // We can stop here.
                        trace!("[{}] Keyspace request channel dropped, stopping asynchronous pool worker", self.address);
                        return;
                    }
                }
            }
            trace!(pool_state = ?ConnectionVectorWrapper(&self.conns));

            // Schedule refilling here
            if !refill_scheduled && self.need_filling() {
                if self.had_error_since_last_refill {
                    self.refill_delay_strategy.on_fill_error();
                } else {
                    self.refill_delay_strategy.on_successful_fill();
                }
                let delay = self.refill_delay_strategy.get_delay();
                debug!(
                    "[{}] Scheduling next refill in {} ms",
                    self.address,
                    delay.as_millis(),
                );

                next_refill_time = tokio::time::Instant::now() + delay;
                refill_scheduled = true;
            }
        }
    }

    fn is_filling(&self) -> bool {
        !self.ready_connections.is_empty()
    }

    fn is_full(&self) -> bool {
        self.conns.len() >= self.pool_config.pool_size.target()
    }

    fn is_empty(&self) -> bool {
        self.conns.is_empty()
    }

    fn need_filling(&self) -> bool {
        !self.is_filling() && !self.is_full()
    }

    // Begins opening a number of connections in order to fill the connection pool.
    // Futures which open the connections are pushed to the `ready_connections`
    // FuturesUnordered structure, and their results are processed in the main loop.
    fn start_filling(&mut self) {
        if self.is_empty() {
            // If the pool is empty, it might mean that the node is not alive.
            // It is more likely than not that the next connection attempt will
            // fail, so there is no use in opening more than one connection now.
            trace!("[{}] Will open the first connection to the node", self.address);
            self.start_opening_connection();
            return;
        }

        let to_open_count = self
            .pool_config
            .pool_size
            .target()
            .saturating_sub(self.conns.len());
        trace!("[{}] Will open {} connections", self.address, to_open_count);
        for _ in 0..to_open_count {
            self.start_opening_connection();
        }
    }

    fn handle_ready_connection(&mut self, evt: OpenedConnectionEvent) {
        match evt.result {
            Err(err) => {
                self.had_error_since_last_refill = true;
                debug!("[{}] Failed to open connection: {}", self.address, err);

                if !self.is_filling() && self.is_empty() {
                    self.update_shared_conns(Some(err));
                }
            }
            Ok((connection, error_receiver)) => {
                if let Some(keyspace) = &self.current_keyspace {
                    if evt.keyspace_name.as_ref() != Some(keyspace) {
                        self.start_setting_keyspace_for_connection(connection, error_receiver);
                        return;
                    }
                }

                if self.is_full() {
                    debug!(
                        "[{}] Pool is already full, closing surplus connection",
                        self.address
                    );
                    connection.close();
                    return;
                }

                let conn = Arc::new(connection);
                trace!(
                    "[{}] Adding connection {:p} to the pool, now there are {}",
                    self.address,
                    Arc::as_ptr(&conn),
                    self.conns.len() + 1,
                );

                self.connection_errors
                    .push(wait_for_error(Arc::downgrade(&conn), error_receiver).boxed());
                self.conns.push(conn);

                self.update_shared_conns(None);
            }
        }
    }

    fn start_opening_connection(&self) {
        let cfg = self.pool_config.connection_config.clone();
        let address = self.address;

        let fut = async move {
            let result = open_connection(address, &cfg).await;
            OpenedConnectionEvent {
                result,
                keyspace_name: None,
            }
        }
        .boxed();
        self.ready_connections.push(fut);
    }

    fn update_shared_conns(&mut self, last_error: Option<ConnectionError>) {
        let new_conns = if self.is_empty() {
            Arc::new(MaybePoolConnections::Broken(
                last_error.unwrap_or(ConnectionError::NoWorkingConnection { last_error: None }),
            ))
        } else {
            Arc::new(MaybePoolConnections::Ready(self.conns.clone()))
        };

        self.shared_conns.store(new_conns);

        self.pool_updated_notify.notify_waiters();
    }

    fn remove_connection(&mut self, connection: Arc<Connection>, last_error: ConnectionError) {
        let ptr = Arc::as_ptr(&connection);

        match self
            .conns
            .iter()
            .position(|other_conn| Arc::ptr_eq(&connection, other_conn))
        {
            Some(idx) => {
                self.conns.swap_remove(idx);
                trace!(
                    "[{}] Connection {:p} removed from the pool, now there are {}",
                    self.address,
                    ptr,
                    self.conns.len(),
                );
                self.update_shared_conns(Some(last_error));
            }
            None => trace!("[{}] Connection {:p} was already removed", self.address, ptr),
        }
    }

    fn close(&mut self) {
        debug!("[{}] Closing pool with {} connections", self.address, self.conns.len());
        for conn in self.conns.drain(..) {
            conn.close();
        }
        self.shared_conns.store(Arc::new(MaybePoolConnections::Broken(
            ConnectionError::ConnectionClosed,
        )));
        self.pool_updated_notify.notify_waiters();
    }

    fn use_keyspace(
        &mut self,
        keyspace_name: VerifiedKeyspaceName,
        response_sender: oneshot::Sender<Result<(), QueryError>>,
    ) {
        self.current_keyspace = Some(keyspace_name.clone());

        let conns = self.conns.clone();
        let address = self.address;
        let connect_timeout = self.pool_config.connection_config.connect_timeout;

        let fut = async move {
            let use_keyspace_futures = conns.iter().map(|conn| conn.use_keyspace(&keyspace_name));

            let use_keyspace_results: Vec<Result<(), QueryError>> = tokio::time::timeout(
                connect_timeout,
                futures::future::join_all(use_keyspace_futures),
            )
            .await
            .map_err(|_| QueryError::RequestTimeout(connect_timeout))?;

            crate::cluster::use_keyspace_result(use_keyspace_results.into_iter())
        };

        tokio::task::spawn(async move {
            let res = fut.await;
            match &res {
                Ok(()) => debug!("[{}] Successfully changed current keyspace", address),
                Err(err) => warn!("[{}] Failed to change keyspace: {}", address, err),
            }
            let _ = response_sender.send(res);
        });
    }

    fn start_setting_keyspace_for_connection(
        &mut self,
        connection: Connection,
        error_receiver: ErrorReceiver,
    ) {
        // Only called when a keyspace is set.
        let Some(keyspace_name) = self.current_keyspace.clone() else {
            return;
        };
        self.ready_connections.push(
            async move {
                let result = connection.use_keyspace(&keyspace_name).await;
                if let Err(err) = result {
                    warn!(
                        "[{}] Failed to set keyspace for new connection: {}",
                        connection.get_connect_address().ip(),
                        err,
                    );
                }
                OpenedConnectionEvent {
                    result: Ok((connection, error_receiver)),
                    keyspace_name: Some(keyspace_name),
                }
            }
            .boxed(),
        );
    }
}

struct BrokenConnectionEvent {
    connection: Weak<Connection>,
    error: ConnectionError,
}

async fn wait_for_error(
    connection: Weak<Connection>,
    error_receiver: ErrorReceiver,
) -> BrokenConnectionEvent {
    BrokenConnectionEvent {
        connection,
        error: error_receiver.await.unwrap_or_else(|_| {
            ConnectionError::Broken(BrokenConnectionErrorKind::ChannelError.into())
        }),
    }
}

struct OpenedConnectionEvent {
    result: Result<(Connection, ErrorReceiver), ConnectionError>,
    keyspace_name: Option<VerifiedKeyspaceName>,
}

#[cfg(test)]
mod tests {
    use std::num::NonZeroUsize;
    use std::time::Duration;

    use assert_matches::assert_matches;
    use cassia_mock::MockCluster;

    use super::{NodeConnectionPool, PoolConfig, PoolSize, RefillDelayStrategy};
    use crate::cluster::node::NodeStatus;
    use crate::errors::ConnectionError;
    use crate::network::VerifiedKeyspaceName;
    use crate::test_utils::setup_tracing;

    async fn wait_for(mut condition: impl FnMut() -> bool) {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[test]
    fn refill_backoff_doubles_up_to_a_limit() {
        let mut strategy = RefillDelayStrategy::new();
        assert_eq!(strategy.get_delay(), Duration::from_millis(50));
        strategy.on_fill_error();
        assert_eq!(strategy.get_delay(), Duration::from_millis(100));
        for _ in 0..20 {
            strategy.on_fill_error();
        }
        assert_eq!(strategy.get_delay(), Duration::from_secs(10));
        strategy.on_successful_fill();
        assert_eq!(strategy.get_delay(), Duration::from_millis(50));
    }

    #[test]
    fn default_pool_size() {
        assert_eq!(
            PoolSize::default(),
            PoolSize::PerHost(NonZeroUsize::new(2).unwrap())
        );
    }

    #[tokio::test]
    #[ntest::timeout(20000)]
    async fn pool_fills_to_target_size() {
        setup_tracing();
        let cluster = MockCluster::builder().nodes(1).build().await.unwrap();
        let config = PoolConfig {
            pool_size: PoolSize::PerHost(NonZeroUsize::new(3).unwrap()),
            ..Default::default()
        };
        let pool = NodeConnectionPool::new(cluster.node(0).address(), &config, None);
        pool.wait_until_initialized().await;
        assert_eq!(pool.status(), NodeStatus::Up);

        wait_for(|| pool.get_working_connections().map_or(0, |c| c.len()) == 3).await;
        let conn = pool.connection().unwrap();
        assert_eq!(conn.get_connect_address(), cluster.node(0).address());
    }

    #[tokio::test]
    #[ntest::timeout(20000)]
    async fn least_busy_connection_is_chosen() {
        setup_tracing();
        let cluster = MockCluster::builder().nodes(1).build().await.unwrap();
        let node = cluster.node(0);
        let pool = NodeConnectionPool::new(node.address(), &PoolConfig::default(), None);
        wait_for(|| pool.get_working_connections().map_or(0, |c| c.len()) == 2).await;

        node.set_rules(vec![cassia_mock::RequestRule::new(
            cassia_mock::Condition::RequestOpcode(cassia_mock::RequestOpcode::Query),
            cassia_mock::Reaction::NoResponse,
        )]);

        let busy = pool.connection().unwrap();
        let pending = {
            let busy = busy.clone();
            tokio::spawn(async move { busy.query_unpaged("SELECT host_id FROM system.local").await })
        };
        wait_for(|| busy.in_flight_requests() == 1).await;

        let chosen = pool.connection().unwrap();
        assert!(!std::sync::Arc::ptr_eq(&busy, &chosen));
        assert_eq!(chosen.in_flight_requests(), 0);
        pending.abort();
    }

    #[tokio::test]
    #[ntest::timeout(30000)]
    async fn node_goes_down_and_comes_back() {
        setup_tracing();
        let cluster = MockCluster::builder().nodes(1).build().await.unwrap();
        let node = cluster.node(0);
        let pool = NodeConnectionPool::new(node.address(), &PoolConfig::default(), None);
        pool.wait_until_initialized().await;
        assert_eq!(pool.status(), NodeStatus::Up);

        node.stop().await;
        wait_for(|| pool.status() == NodeStatus::Down).await;
        assert_matches!(
            pool.connection(),
            Err(ConnectionError::NoWorkingConnection { last_error: Some(_) })
        );

        node.start().await.unwrap();
        wait_for(|| pool.status() == NodeStatus::Up).await;
        pool.connection().unwrap();
    }

    #[tokio::test]
    #[ntest::timeout(20000)]
    async fn new_connections_use_the_current_keyspace() {
        setup_tracing();
        let cluster = MockCluster::builder().nodes(1).build().await.unwrap();
        let node = cluster.node(0);
        let pool = NodeConnectionPool::new(node.address(), &PoolConfig::default(), None);
        pool.wait_until_initialized().await;

        pool.connection()
            .unwrap()
            .query_unpaged(
                "CREATE KEYSPACE ks WITH replication = {'class': 'SimpleStrategy', 'replication_factor': 1}",
            )
            .await
            .unwrap();
        pool.connection()
            .unwrap()
            .query_unpaged("CREATE TABLE ks.t (a int PRIMARY KEY)")
            .await
            .unwrap();

        let keyspace = VerifiedKeyspaceName::new("ks".to_owned(), false).unwrap();
        pool.use_keyspace(keyspace).await.unwrap();

        // Unqualified table names now resolve on every connection.
        for _ in 0..4 {
            pool.connection()
                .unwrap()
                .query_unpaged("SELECT a FROM t")
                .await
                .unwrap();
        }

        let missing = VerifiedKeyspaceName::new("missing".to_owned(), false).unwrap();
        assert!(pool.use_keyspace(missing).await.is_err());
    }

    #[tokio::test]
    #[ntest::timeout(20000)]
    async fn closed_pool_has_no_connections() {
        setup_tracing();
        let cluster = MockCluster::builder().nodes(1).build().await.unwrap();
        let pool = NodeConnectionPool::new(cluster.node(0).address(), &PoolConfig::default(), None);
        pool.wait_until_initialized().await;
        let conn = pool.connection().unwrap();

        pool.close();
        wait_for(|| conn.is_closed()).await;
        assert_matches!(
            pool.connection(),
            Err(ConnectionError::NoWorkingConnection { .. })
        );
    }
}

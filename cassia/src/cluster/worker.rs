//! The background task keeping the [`ClusterState`] current, and the
//! [`Cluster`] handle the session talks to it through.

use crate::cluster::KnownNode;
use crate::errors::{ConnectionError, InvalidState, MetadataError, NewSessionError, QueryError};
use crate::frame::response::event::Event;
use crate::network::{PoolConfig, VerifiedKeyspaceName};

use arc_swap::ArcSwap;
use futures::future::join_all;
use futures::{future::RemoteHandle, FutureExt};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Notify};
use tokio::time::Instant;
use tracing::{debug, warn};

use super::metadata_reader::MetadataReader;
use super::state::{ClusterState, ClusterStateNeatDebug};

// Refresh period while the control connection is down.
const CONTROL_CONNECTION_REPAIR_INTERVAL: Duration = Duration::from_secs(1);

/// Handle to the cluster worker.
///
/// The worker publishes every new [`ClusterState`] as a whole, so a snapshot
/// taken with [`Cluster::get_state`] never changes under its reader.
/// Dropping the handle stops the worker.
pub(crate) struct Cluster {
    state: Arc<ArcSwap<ClusterState>>,

    refresh_requests: mpsc::Sender<RefreshRequest>,
    use_keyspace_requests: mpsc::Sender<UseKeyspaceRequest>,
    closer: Arc<Notify>,

    _worker_handle: RemoteHandle<()>,
}

/// Prints the current [`ClusterState`] of a [`Cluster`], without its channels.
pub(crate) struct ClusterNeatDebug<'a>(pub(crate) &'a Cluster);
impl std::fmt::Debug for ClusterNeatDebug<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cluster")
            .field("data", &ClusterStateNeatDebug(&self.0.state.load_full()))
            .finish_non_exhaustive()
    }
}

struct ClusterWorker {
    state: Arc<ArcSwap<ClusterState>>,

    metadata_reader: MetadataReader,
    pool_config: PoolConfig,

    refresh_requests: mpsc::Receiver<RefreshRequest>,
    use_keyspace_requests: mpsc::Receiver<UseKeyspaceRequest>,
    events: mpsc::Receiver<Event>,
    // False when the control connection does not REGISTER for events.
    listens_for_events: bool,
    closer: Arc<Notify>,

    // Sent as "USE <keyspace>" by every connection opened from now on.
    used_keyspace: Option<VerifiedKeyspaceName>,
    refresh_interval: Duration,
}

#[derive(Debug)]
struct RefreshRequest {
    response_chan: oneshot::Sender<Result<(), MetadataError>>,
}

#[derive(Debug)]
struct UseKeyspaceRequest {
    keyspace_name: VerifiedKeyspaceName,
    response_chan: oneshot::Sender<Result<(), QueryError>>,
}

/// What woke the worker up.
#[derive(Debug)]
enum Wakeup {
    RefreshDue,
    Refresh(RefreshRequest),
    Event(Event),
    UseKeyspace(UseKeyspaceRequest),
    ControlConnectionBroken,
    /// The session was closed, or dropped its handle.
    Stop,
}

impl Cluster {
    /// Reads the topology through the first reachable contact point, opens
    /// the pools of every node and starts the worker.
    pub(crate) async fn new(
        known_nodes: Vec<KnownNode>,
        pool_config: PoolConfig,
        refresh_interval: Duration,
        register_for_events: bool,
    ) -> Result<Cluster, NewSessionError> {
        let (refresh_sender, refresh_receiver) = mpsc::channel(32);
        let (use_keyspace_sender, use_keyspace_receiver) = mpsc::channel(32);
        let (event_sender, event_receiver) = mpsc::channel(32);

        let mut metadata_reader = MetadataReader::new(
            known_nodes,
            pool_config.connection_config.clone(),
            register_for_events.then_some(event_sender),
        )
        .await?;

        let metadata = metadata_reader.read_metadata(true).await?;
        let initial_state = ClusterState::new(
            metadata,
            &pool_config,
            &HashMap::new(),
            &None,
            Some(metadata_reader.first_contact_point()),
        );
        initial_state.wait_until_all_pools_are_initialized().await;

        let state = Arc::new(ArcSwap::from_pointee(initial_state));
        let closer = Arc::new(Notify::new());

        let worker = ClusterWorker {
            state: state.clone(),
            metadata_reader,
            pool_config,
            refresh_requests: refresh_receiver,
            use_keyspace_requests: use_keyspace_receiver,
            events: event_receiver,
            listens_for_events: register_for_events,
            closer: closer.clone(),
            used_keyspace: None,
            refresh_interval,
        };

        let (work, worker_handle) = worker.work().remote_handle();
        tokio::spawn(work);

        Ok(Cluster {
            state,
            refresh_requests: refresh_sender,
            use_keyspace_requests: use_keyspace_sender,
            closer,
            _worker_handle: worker_handle,
        })
    }

    pub(crate) fn get_state(&self) -> Arc<ClusterState> {
        self.state.load_full()
    }

    /// Makes the worker refresh now, and waits for the new state to be published.
    pub(crate) async fn refresh_metadata(&self) -> Result<(), MetadataError> {
        let worker_gone = || MetadataError::NoControlConnection(ConnectionError::ConnectionClosed);
        let (response_chan, response) = oneshot::channel();

        self.refresh_requests
            .send(RefreshRequest { response_chan })
            .await
            .map_err(|_| worker_gone())?;

        response.await.map_err(|_| worker_gone())?
    }

    /// Switches every open connection to the keyspace, and makes connections
    /// opened later start in it.
    pub(crate) async fn use_keyspace(
        &self,
        keyspace_name: VerifiedKeyspaceName,
    ) -> Result<(), QueryError> {
        let (response_chan, response) = oneshot::channel();

        self.use_keyspace_requests
            .send(UseKeyspaceRequest {
                keyspace_name,
                response_chan,
            })
            .await
            .map_err(|_| InvalidState::SessionClosed)?;

        response.await.map_err(|_| InvalidState::SessionClosed)?
    }

    /// Closes every pool now and stops the worker, which closes the control
    /// connection.
    pub(crate) fn close(&self) {
        for node in self.state.load().get_nodes_info() {
            node.close();
        }
        // Stored if the worker is busy, so it stops after the current step.
        self.closer.notify_one();
    }
}

impl ClusterWorker {
    async fn work(mut self) {
        let mut next_refresh = Instant::now().checked_add(self.refresh_interval);

        loop {
            let requested_by = match self.wait(next_refresh).await {
                Wakeup::Stop => break,
                Wakeup::UseKeyspace(request) => {
                    // Connections opened by later refreshes must use it too.
                    self.used_keyspace = Some(request.keyspace_name.clone());
                    tokio::spawn(Self::handle_use_keyspace_request(
                        self.state.load_full(),
                        request,
                    ));
                    continue;
                }
                Wakeup::Refresh(request) => Some(request),
                Wakeup::Event(event) => {
                    debug!(?event, "Server event, refreshing cluster metadata");
                    None
                }
                Wakeup::ControlConnectionBroken => {
                    debug!("Control connection broken, reopening it");
                    None
                }
                Wakeup::RefreshDue => None,
            };

            let started = Instant::now();
            let result = self.perform_refresh().await;
            let delay = match &result {
                Ok(()) => self.refresh_interval,
                Err(error) => {
                    warn!(%error, "Failed to refresh cluster metadata");
                    CONTROL_CONNECTION_REPAIR_INTERVAL
                }
            };
            next_refresh = started.checked_add(delay);

            if let Some(request) = requested_by {
                // The requester may have given up waiting.
                let _ = request.response_chan.send(result);
            }
        }

        debug!("Cluster worker stopped");
        self.metadata_reader.close();
        for node in self.state.load().get_nodes_info() {
            node.close();
        }
    }

    /// Waits for the next thing to do. No deadline means no periodic refresh.
    async fn wait(&mut self, deadline: Option<Instant>) -> Wakeup {
        let refresh_due = async move {
            match deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            () = refresh_due => Wakeup::RefreshDue,
            request = self.refresh_requests.recv() => request.map_or(Wakeup::Stop, Wakeup::Refresh),
            event = self.events.recv(), if self.listens_for_events => {
                // The sender lives in the metadata reader, which outlives the loop.
                event.map_or(Wakeup::Stop, Wakeup::Event)
            }
            request = self.use_keyspace_requests.recv() => {
                request.map_or(Wakeup::Stop, Wakeup::UseKeyspace)
            }
            () = self.metadata_reader.control_connection_broken() => Wakeup::ControlConnectionBroken,
            () = self.closer.notified() => Wakeup::Stop,
        }
    }

    async fn handle_use_keyspace_request(state: Arc<ClusterState>, request: UseKeyspaceRequest) {
        let results = join_all(
            state
                .get_nodes_info()
                .iter()
                .map(|node| node.use_keyspace(request.keyspace_name.clone())),
        )
        .await;

        let _ = request
            .response_chan
            .send(use_keyspace_result(results.into_iter()));
    }

    /// Reads the metadata and publishes a state built from it, reusing the
    /// pools of nodes that are still there.
    async fn perform_refresh(&mut self) -> Result<(), MetadataError> {
        let metadata = self.metadata_reader.read_metadata(false).await?;
        let previous = self.state.load_full();

        let next = ClusterState::new(
            metadata,
            &self.pool_config,
            &previous.known_peers,
            &self.used_keyspace,
            Some(self.metadata_reader.first_contact_point()),
        );
        next.wait_until_all_pools_are_initialized().await;

        self.state.store(Arc::new(next));
        Ok(())
    }
}

/// Merges the results of setting the keyspace on many connections into one.
///
/// Succeeds if at least one connection succeeded and the others failed only
/// because of transport problems: the keyspace name is correct and broken
/// connections will use it once reopened. A non-transport error is returned as is.
pub(crate) fn use_keyspace_result(
    use_keyspace_results: impl Iterator<Item = Result<(), QueryError>>,
) -> Result<(), QueryError> {
    let mut was_ok: bool = false;
    let mut transport_error: Option<QueryError> = None;

    for result in use_keyspace_results {
        match result {
            Ok(()) => was_ok = true,
            Err(err) if err.is_transport_error() => transport_error = Some(err),
            Err(err) => return Err(err),
        }
    }

    match transport_error {
        Some(err) if !was_ok => Err(err),
        _ => Ok(()),
    }
}

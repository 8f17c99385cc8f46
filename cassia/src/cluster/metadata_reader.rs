use std::net::SocketAddr;

use rand::rng;
use rand::seq::SliceRandom;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use crate::cluster::metadata::{query_metadata, Metadata};
use crate::cluster::node::{resolve_contact_points, KnownNode};
use crate::errors::{ConnectionError, MetadataError, NewSessionError};
use crate::frame::response::event::Event;
use crate::network::{open_connection, Connection, ConnectionConfig, ErrorReceiver};

struct WorkingControlConnection {
    connection: Connection,
    error_channel: ErrorReceiver,
}

enum ControlConnectionState {
    Working(WorkingControlConnection),
    Broken { last_error: ConnectionError },
}

/// Allows to read current metadata from the cluster
pub(crate) struct MetadataReader {
    control_connection_config: ConnectionConfig,

    control_connection_address: SocketAddr,
    control_connection_state: ControlConnectionState,

    // when control connection fails, MetadataReader tries to connect to one of known_peers
    known_peers: Vec<SocketAddr>,

    // The first contact point, whose datacenter is the default local one.
    first_contact_point: SocketAddr,

    // When no known peer is reachable, initial known nodes are resolved once again as a fallback
    // and establishing control connection to them is attempted.
    initial_known_nodes: Vec<KnownNode>,
}

impl MetadataReader {
    /// Creates new MetadataReader, opening the control connection to the first contact point.
    pub(crate) async fn new(
        initial_known_nodes: Vec<KnownNode>,
        mut connection_config: ConnectionConfig,
        server_event_sender: Option<mpsc::Sender<Event>>,
    ) -> Result<Self, NewSessionError> {
        if initial_known_nodes.is_empty() {
            return Err(NewSessionError::EmptyKnownNodesList);
        }

        let (initial_peers, resolved_hostnames) =
            resolve_contact_points(&initial_known_nodes, None).await;
        // Ensure there is at least one resolved node
        let Some(first_contact_point) = initial_peers.first().copied() else {
            return Err(NewSessionError::FailedToResolveAnyHostname(
                resolved_hostnames,
            ));
        };

        // setting event_sender field in connection config will cause control connection to
        // - send REGISTER message to receive server events
        // - send received events via server_event_sender
        connection_config.event_sender = server_event_sender;

        let control_connection_state =
            Self::make_control_connection(first_contact_point, &connection_config).await;

        Ok(MetadataReader {
            control_connection_config: connection_config,
            control_connection_address: first_contact_point,
            control_connection_state,
            known_peers: initial_peers,
            first_contact_point,
            initial_known_nodes,
        })
    }

    pub(crate) fn first_contact_point(&self) -> SocketAddr {
        self.first_contact_point
    }

    /// Fetches current metadata from the cluster
    pub(crate) async fn read_metadata(&mut self, initial: bool) -> Result<Metadata, MetadataError> {
        let mut result = self.fetch_metadata(initial).await;
        let prev_err = match result {
            Ok(metadata) => {
                debug!("Fetched new metadata");
                self.update_known_peers(&metadata);
                return Ok(metadata);
            }
            Err(err) => err,
        };

        // At this point, we known that fetching metadata on current control connection failed.
        // Therefore, we try to fetch metadata from other known peers, in random order.
        self.known_peers.shuffle(&mut rng());
        debug!("Known peers: {:?}", self.known_peers);

        let address_of_failed_control_connection = self.control_connection_address;
        let filtered_known_peers: Vec<SocketAddr> = self
            .known_peers
            .iter()
            .copied()
            .filter(|peer| *peer != address_of_failed_control_connection)
            .collect();

        // if fetching metadata on current control connection failed,
        // try to fetch metadata from other known peer
        result = self
            .retry_fetch_metadata_on_nodes(initial, filtered_known_peers, prev_err)
            .await;

        if let Err(prev_err) = result {
            if !initial {
                // If no known peer is reachable, try falling back to initial contact points, in hope that
                // there are some hostnames there which will resolve to reachable new addresses.
                warn!("Failed to establish control connection and fetch metadata on all known peers. Falling back to initial contact points.");
                let (initial_peers, _hostnames) =
                    resolve_contact_points(&self.initial_known_nodes, None).await;
                result = self
                    .retry_fetch_metadata_on_nodes(initial, initial_peers, prev_err)
                    .await;
            } else {
                // No point in falling back as this is an initial connection attempt.
                result = Err(prev_err);
            }
        }

        match &result {
            Ok(metadata) => {
                self.update_known_peers(metadata);
                debug!("Fetched new metadata");
            }
            Err(error) => error!(
                error = %error,
                target = %self.control_connection_address,
                "Could not fetch metadata"
            ),
        }

        result
    }

    async fn retry_fetch_metadata_on_nodes(
        &mut self,
        initial: bool,
        nodes: Vec<SocketAddr>,
        prev_err: MetadataError,
    ) -> Result<Metadata, MetadataError> {
        let mut result = Err(prev_err);
        for peer in nodes {
            let err = match result {
                Ok(_) => break,
                Err(err) => err,
            };

            warn!(
                control_connection_address = %self.control_connection_address,
                error = %err,
                "Failed to fetch metadata using current control connection"
            );

            self.close_control_connection();
            self.control_connection_address = peer;
            debug!(
                "Retrying to establish the control connection on {}",
                self.control_connection_address
            );
            self.control_connection_state =
                Self::make_control_connection(peer, &self.control_connection_config).await;
            result = self.fetch_metadata(initial).await;
        }
        result
    }

    async fn fetch_metadata(&self, initial: bool) -> Result<Metadata, MetadataError> {
        let conn = match &self.control_connection_state {
            ControlConnectionState::Working(working_connection) => &working_connection.connection,
            ControlConnectionState::Broken { last_error } => {
                return Err(MetadataError::NoControlConnection(last_error.clone()));
            }
        };

        let res = query_metadata(conn).await;

        if initial {
            if let Err(err) = res {
                warn!(
                    error = %err,
                    "Initial metadata read failed, proceeding with metadata \
                    consisting only of the initial peer list and dummy tokens. \
                    This might result in suboptimal routing."
                );
                return Ok(Metadata::new_dummy(&self.known_peers));
            }
        }

        res
    }

    fn update_known_peers(&mut self, metadata: &Metadata) {
        self.known_peers = metadata.peers.iter().map(|peer| peer.address).collect();
    }

    fn close_control_connection(&self) {
        if let ControlConnectionState::Working(working) = &self.control_connection_state {
            working.connection.close();
        }
    }

    pub(crate) fn close(&self) {
        self.close_control_connection();
    }

    /// Resolves once the working control connection breaks.
    ///
    /// The state is then switched to broken, so that the next read reconnects.
    /// Never resolves while the control connection is already broken.
    pub(crate) async fn control_connection_broken(&mut self) {
        let ControlConnectionState::Working(working) = &mut self.control_connection_state else {
            return futures::future::pending().await;
        };
        let last_error = (&mut working.error_channel)
            .await
            .unwrap_or(ConnectionError::ConnectionClosed);
        debug!(
            "Control connection to {} broke: {}",
            self.control_connection_address, last_error
        );
        self.control_connection_state = ControlConnectionState::Broken { last_error };
    }

    async fn make_control_connection(
        address: SocketAddr,
        config: &ConnectionConfig,
    ) -> ControlConnectionState {
        match open_connection(address, config).await {
            Ok((connection, error_channel)) => {
                ControlConnectionState::Working(WorkingControlConnection {
                    connection,
                    error_channel,
                })
            }
            Err(last_error) => {
                debug!(
                    "Failed to open control connection to {}: {}",
                    address, last_error
                );
                ControlConnectionState::Broken { last_error }
            }
        }
    }
}

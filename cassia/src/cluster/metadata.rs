//! Topology and schema metadata read from the system tables.
//!
//! Only what routing needs is kept: the peers with their tokens, and the
//! replication strategy of every keyspace.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

use futures::future::try_join;
use uuid::Uuid;

use super::node::{Peer, DEFAULT_PORT};
use crate::errors::{MetadataError, QueryError};
use crate::network::Connection;
use crate::response::query_result::Row;
use crate::routing::Token;
use crate::statement::Statement;

const LOCAL_QUERY: &str =
    "SELECT host_id, rpc_address, data_center, rack, tokens FROM system.local WHERE key='local'";
const PEERS_QUERY: &str =
    "SELECT host_id, rpc_address, data_center, rack, tokens FROM system.peers";
const KEYSPACES_QUERY: &str = "SELECT keyspace_name, replication FROM system_schema.keyspaces";

/// Describes all metadata retrieved from the cluster
#[derive(Debug, Clone)]
pub(crate) struct Metadata {
    pub(crate) peers: Vec<Peer>,
    pub(crate) keyspaces: HashMap<String, Keyspace>,
}

/// Schema of a keyspace, as far as routing is concerned.
#[derive(Clone, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub struct Keyspace {
    /// How the keyspace places replicas.
    pub strategy: Strategy,
}

/// Replication strategy of a keyspace.
#[derive(Clone, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum Strategy {
    /// Replicas are the next `replication_factor` distinct nodes on the ring.
    SimpleStrategy {
        /// Number of copies of each row.
        replication_factor: usize,
    },
    /// Replicas are chosen per datacenter, preferring distinct racks.
    NetworkTopologyStrategy {
        /// Replication factors of datacenters with given names
        datacenter_repfactors: HashMap<String, usize>,
    },
    /// Data stays on the node which owns it (replication factor 1).
    LocalStrategy,
    /// Any other strategy. Routed to the primary owner only.
    Other {
        /// Class name of the strategy.
        name: String,
        /// Remaining options of the replication map.
        data: HashMap<String, String>,
    },
}

impl Metadata {
    /// Creates new, dummy metadata from a given list of contact points.
    ///
    /// Used in place of real metadata when the initial read fails, so that
    /// requests can still be sent to the contact points.
    pub(crate) fn new_dummy(initial_peers: &[SocketAddr]) -> Self {
        let peers = initial_peers
            .iter()
            .enumerate()
            .map(|(id, address)| {
                // Given N nodes, divide the ring into N roughly equal parts
                // and assign them to each node.
                let token = ((id as u128) << 64) / initial_peers.len() as u128;

                Peer {
                    address: *address,
                    tokens: vec![Token::new(token as i64)],
                    datacenter: None,
                    rack: None,
                    host_id: Uuid::new_v4(),
                }
            })
            .collect();

        Metadata {
            peers,
            keyspaces: HashMap::new(),
        }
    }
}

/// Reads peers and keyspaces over `conn`.
pub(crate) async fn query_metadata(conn: &Connection) -> Result<Metadata, MetadataError> {
    let (peers, keyspaces) = try_join(query_peers(conn), query_keyspaces(conn)).await?;

    // There must be at least one peer
    if peers.is_empty() {
        return Err(MetadataError::BadPeer(
            "system.local and system.peers returned no nodes".to_owned(),
        ));
    }

    Ok(Metadata { peers, keyspaces })
}

async fn query_rows(conn: &Connection, text: &str) -> Result<Vec<Row>, MetadataError> {
    conn.query_unpaged(Statement::new(text))
        .await
        .map(|result| result.into_rows())
        .map_err(MetadataError::Query)
}

async fn query_peers(conn: &Connection) -> Result<Vec<Peer>, MetadataError> {
    let (local, peers) = try_join(query_rows(conn, LOCAL_QUERY), query_rows(conn, PEERS_QUERY)).await?;

    let connect_address = conn.get_connect_address();
    let mut result = Vec::with_capacity(local.len() + peers.len());
    for row in &local {
        // The local node is reachable through the address we connected to,
        // whatever it advertises.
        result.push(peer_from_row(row, Some(connect_address))?);
    }
    for row in &peers {
        let peer = peer_from_row(row, None)?;
        // Peers advertising the control node's address would duplicate it.
        if peer.address != connect_address {
            result.push(peer);
        }
    }

    Ok(result)
}

fn peer_from_row(row: &Row, address_override: Option<SocketAddr>) -> Result<Peer, MetadataError> {
    let bad_peer = |err: &dyn std::fmt::Display| MetadataError::BadPeer(err.to_string());

    let host_id: Uuid = row.get("host_id").map_err(|e| bad_peer(&e))?;
    let address = match address_override {
        Some(address) => address,
        None => {
            let ip: IpAddr = row.get("rpc_address").map_err(|e| bad_peer(&e))?;
            SocketAddr::new(ip, DEFAULT_PORT)
        }
    };
    let datacenter: Option<String> = row.get("data_center").map_err(|e| bad_peer(&e))?;
    let rack: Option<String> = row.get("rack").map_err(|e| bad_peer(&e))?;
    let token_strings: Option<Vec<String>> = row.get("tokens").map_err(|e| bad_peer(&e))?;

    let tokens = token_strings
        .unwrap_or_default()
        .iter()
        .map(|t| {
            i64::from_str(t)
                .map(Token::new)
                .map_err(|e| MetadataError::BadPeer(format!("bad token {:?} of {}: {}", t, address, e)))
        })
        .collect::<Result<Vec<Token>, MetadataError>>()?;

    Ok(Peer {
        host_id,
        address,
        datacenter,
        rack,
        tokens,
    })
}

async fn query_keyspaces(conn: &Connection) -> Result<HashMap<String, Keyspace>, MetadataError> {
    let rows = query_rows(conn, KEYSPACES_QUERY).await?;

    let mut keyspaces = HashMap::with_capacity(rows.len());
    for row in &rows {
        let keyspace_name: String = row
            .get("keyspace_name")
            .map_err(|e| MetadataError::Query(QueryError::ProtocolError(e.to_string())))?;
        let replication: HashMap<String, String> =
            row.get("replication")
                .map_err(|e| MetadataError::BadKeyspaceReplication {
                    keyspace: keyspace_name.clone(),
                    error: e.to_string(),
                })?;

        let strategy = strategy_from_string_map(replication).map_err(|error| {
            MetadataError::BadKeyspaceReplication {
                keyspace: keyspace_name.clone(),
                error,
            }
        })?;

        keyspaces.insert(keyspace_name, Keyspace { strategy });
    }

    Ok(keyspaces)
}

fn strategy_from_string_map(mut strategy_map: HashMap<String, String>) -> Result<Strategy, String> {
    let strategy_name: String = strategy_map
        .remove("class")
        .ok_or("Missing 'class' in the replication map")?;

    let strategy: Strategy = match strategy_name.as_str() {
        "org.apache.cassandra.locator.SimpleStrategy" | "SimpleStrategy" => {
            let rep_factor_str: String = strategy_map
                .remove("replication_factor")
                .ok_or("Missing 'replication_factor' for SimpleStrategy")?;

            let replication_factor: usize = usize::from_str(&rep_factor_str)
                .map_err(|e| format!("Bad replication factor {:?}: {}", rep_factor_str, e))?;

            Strategy::SimpleStrategy { replication_factor }
        }
        "org.apache.cassandra.locator.NetworkTopologyStrategy" | "NetworkTopologyStrategy" => {
            let mut datacenter_repfactors: HashMap<String, usize> =
                HashMap::with_capacity(strategy_map.len());

            for (key, value) in strategy_map.drain() {
                // We only expect 'class' (which is resolved above)
                // and replication factors per dc.
                let rep_factor: usize = usize::from_str(&value).map_err(|_| {
                    format!("Unexpected NetworkTopologyStrategy option {:?}: {:?}", key, value)
                })?;

                datacenter_repfactors.insert(key, rep_factor);
            }

            Strategy::NetworkTopologyStrategy {
                datacenter_repfactors,
            }
        }
        "org.apache.cassandra.locator.LocalStrategy" | "LocalStrategy" => Strategy::LocalStrategy,
        _ => Strategy::Other {
            name: strategy_name,
            data: strategy_map,
        },
    };

    Ok(strategy)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::net::SocketAddr;

    use super::{strategy_from_string_map, Metadata, Strategy};

    fn map(entries: &[(&str, &str)]) -> HashMap<String, String> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn replication_maps_are_parsed() {
        assert_eq!(
            strategy_from_string_map(map(&[
                ("class", "org.apache.cassandra.locator.SimpleStrategy"),
                ("replication_factor", "3"),
            ])),
            Ok(Strategy::SimpleStrategy {
                replication_factor: 3
            })
        );
        assert_eq!(
            strategy_from_string_map(map(&[
                ("class", "NetworkTopologyStrategy"),
                ("dc1", "3"),
                ("dc2", "1"),
            ])),
            Ok(Strategy::NetworkTopologyStrategy {
                datacenter_repfactors: [("dc1".to_owned(), 3), ("dc2".to_owned(), 1)]
                    .into_iter()
                    .collect()
            })
        );
        assert_eq!(
            strategy_from_string_map(map(&[("class", "LocalStrategy")])),
            Ok(Strategy::LocalStrategy)
        );
        assert!(matches!(
            strategy_from_string_map(map(&[("class", "EverywhereStrategy")])),
            Ok(Strategy::Other { name, .. }) if name == "EverywhereStrategy"
        ));
    }

    #[test]
    fn bad_replication_maps_are_rejected() {
        assert!(strategy_from_string_map(map(&[("replication_factor", "3")])).is_err());
        assert!(strategy_from_string_map(map(&[("class", "SimpleStrategy")])).is_err());
        assert!(strategy_from_string_map(map(&[
            ("class", "SimpleStrategy"),
            ("replication_factor", "three"),
        ]))
        .is_err());
        assert!(strategy_from_string_map(map(&[
            ("class", "NetworkTopologyStrategy"),
            ("dc1", "x"),
        ]))
        .is_err());
    }

    #[test]
    fn dummy_metadata_splits_the_ring() {
        let addrs: Vec<SocketAddr> = (1..=4u8)
            .map(|i| SocketAddr::from(([127, 0, 0, i], 9042)))
            .collect();
        let metadata = Metadata::new_dummy(&addrs);
        let tokens: Vec<i64> = metadata
            .peers
            .iter()
            .map(|p| p.tokens[0].value())
            .collect();
        // i64::MIN is not a valid token and becomes i64::MAX.
        assert_eq!(tokens, vec![0, 1 << 62, i64::MAX, -(1 << 62)]);
        assert!(metadata.keyspaces.is_empty());
    }
}

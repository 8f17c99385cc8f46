//! Virtual tables of the `system` and `system_schema` keyspaces, generated on
//! every read from the cluster layout and the current schema.

use std::net::IpAddr;

use cassia_cql::frame::response::result::ColumnType;
use cassia_cql::value::CqlValue;
use uuid::Uuid;

use super::storage::{Cells, ColumnDef, Storage, Table};

pub(super) const SYSTEM_KEYSPACES: [&str; 2] = ["system", "system_schema"];

const RELEASE_VERSION: &str = "4.0.11";

/// How one node describes itself in `system.local` and `system.peers`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct NodeInfo {
    pub(crate) host_id: Uuid,
    pub(crate) address: IpAddr,
    pub(crate) datacenter: String,
    pub(crate) rack: String,
    pub(crate) tokens: Vec<i64>,
}

/// The cluster as seen by the node answering a request.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Topology<'a> {
    pub(crate) local: &'a NodeInfo,
    pub(crate) nodes: &'a [NodeInfo],
}

impl Topology<'_> {
    fn peers(&self) -> impl Iterator<Item = &NodeInfo> + '_ {
        let local = self.local.host_id;
        self.nodes.iter().filter(move |node| node.host_id != local)
    }
}

pub(super) fn is_system_keyspace(keyspace: &str) -> bool {
    SYSTEM_KEYSPACES.contains(&keyspace)
}

/// Materializes a system table, or returns `None` if there is no such table.
pub(super) fn table(
    keyspace: &str,
    name: &str,
    storage: &Storage,
    topology: Topology<'_>,
) -> Option<Table> {
    match (keyspace, name) {
        ("system", "local") => Some(local(topology)),
        ("system", "peers") => Some(peers(topology)),
        ("system_schema", "keyspaces") => Some(keyspaces(storage)),
        ("system_schema", "tables") => Some(tables(storage)),
        _ => None,
    }
}

fn column(name: &str, typ: ColumnType) -> ColumnDef {
    ColumnDef {
        name: name.to_owned(),
        typ,
    }
}

fn text(s: &str) -> Option<CqlValue> {
    Some(CqlValue::Text(s.to_owned()))
}

fn tokens(node: &NodeInfo) -> Option<CqlValue> {
    Some(CqlValue::Set(
        node.tokens
            .iter()
            .map(|token| CqlValue::Text(token.to_string()))
            .collect(),
    ))
}

fn text_set() -> ColumnType {
    ColumnType::Set(Box::new(ColumnType::Text))
}

fn local(topology: Topology<'_>) -> Table {
    let node = topology.local;
    let columns = vec![
        column("key", ColumnType::Text),
        column("data_center", ColumnType::Text),
        column("host_id", ColumnType::Uuid),
        column("rack", ColumnType::Text),
        column("release_version", ColumnType::Text),
        column("rpc_address", ColumnType::Inet),
        column("tokens", text_set()),
    ];
    let row = vec![
        text("local"),
        text(&node.datacenter),
        Some(CqlValue::Uuid(node.host_id)),
        text(&node.rack),
        text(RELEASE_VERSION),
        Some(CqlValue::Inet(node.address)),
        tokens(node),
    ];
    Table::with_rows(columns, 1, vec![row])
}

fn peers(topology: Topology<'_>) -> Table {
    let columns = vec![
        column("peer", ColumnType::Inet),
        column("data_center", ColumnType::Text),
        column("host_id", ColumnType::Uuid),
        column("rack", ColumnType::Text),
        column("release_version", ColumnType::Text),
        column("rpc_address", ColumnType::Inet),
        column("tokens", text_set()),
    ];
    let rows = topology
        .peers()
        .map(|node| {
            vec![
                Some(CqlValue::Inet(node.address)),
                text(&node.datacenter),
                Some(CqlValue::Uuid(node.host_id)),
                text(&node.rack),
                text(RELEASE_VERSION),
                Some(CqlValue::Inet(node.address)),
                tokens(node),
            ]
        })
        .collect();
    Table::with_rows(columns, 1, rows)
}

fn replication_map(replication: &[(String, String)]) -> Option<CqlValue> {
    Some(CqlValue::Map(
        replication
            .iter()
            .map(|(k, v)| (CqlValue::Text(k.clone()), CqlValue::Text(v.clone())))
            .collect(),
    ))
}

fn keyspaces(storage: &Storage) -> Table {
    let columns = vec![
        column("keyspace_name", ColumnType::Text),
        column("durable_writes", ColumnType::Boolean),
        column(
            "replication",
            ColumnType::Map(Box::new(ColumnType::Text), Box::new(ColumnType::Text)),
        ),
    ];

    let local_strategy = [(
        "class".to_owned(),
        "org.apache.cassandra.locator.LocalStrategy".to_owned(),
    )];
    let mut rows: Vec<Cells> = SYSTEM_KEYSPACES
        .iter()
        .map(|name| {
            vec![
                text(name),
                Some(CqlValue::Boolean(true)),
                replication_map(&local_strategy),
            ]
        })
        .collect();
    rows.extend(storage.keyspaces().map(|(name, keyspace)| {
        vec![
            text(name),
            Some(CqlValue::Boolean(keyspace.durable_writes)),
            replication_map(&keyspace.replication),
        ]
    }));

    Table::with_rows(columns, 1, rows)
}

fn tables(storage: &Storage) -> Table {
    let columns = vec![
        column("keyspace_name", ColumnType::Text),
        column("table_name", ColumnType::Text),
    ];
    let rows = storage
        .keyspaces()
        .flat_map(|(keyspace, ks)| {
            ks.tables
                .keys()
                .map(move |table| vec![text(keyspace), text(table)])
        })
        .collect();
    Table::with_rows(columns, 2, rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(last_octet: u8, tokens: Vec<i64>) -> NodeInfo {
        NodeInfo {
            host_id: Uuid::new_v4(),
            address: IpAddr::from([127, 0, 0, last_octet]),
            datacenter: "dc1".to_owned(),
            rack: "rack1".to_owned(),
            tokens,
        }
    }

    #[test]
    fn local_and_peers_split_the_cluster() {
        let nodes = vec![node(1, vec![-10, 10]), node(2, vec![0]), node(3, vec![20])];
        let topology = Topology {
            local: &nodes[1],
            nodes: &nodes,
        };
        let storage = Storage::default();

        let local = table("system", "local", &storage, topology).unwrap();
        assert_eq!(local.rows.len(), 1);
        let host_id = local.column("host_id").unwrap().0;
        assert_eq!(local.rows[0][host_id], Some(CqlValue::Uuid(nodes[1].host_id)));
        let tokens_idx = local.column("tokens").unwrap().0;
        assert_eq!(
            local.rows[0][tokens_idx],
            Some(CqlValue::Set(vec![CqlValue::Text("0".to_owned())]))
        );

        let peers = table("system", "peers", &storage, topology).unwrap();
        let rpc_address = peers.column("rpc_address").unwrap().0;
        let addresses: Vec<_> = peers.rows.iter().map(|r| r[rpc_address].clone()).collect();
        assert_eq!(
            addresses,
            [
                Some(CqlValue::Inet(nodes[0].address)),
                Some(CqlValue::Inet(nodes[2].address))
            ]
        );

        assert!(table("system", "nope", &storage, topology).is_none());
    }

    #[test]
    fn system_keyspaces_are_listed() {
        let nodes = vec![node(1, vec![0])];
        let topology = Topology {
            local: &nodes[0],
            nodes: &nodes,
        };
        let keyspaces = table("system_schema", "keyspaces", &Storage::default(), topology).unwrap();
        assert_eq!(keyspaces.rows.len(), 2);
        assert!(is_system_keyspace("system_schema"));
        assert!(!is_system_keyspace("ks"));
    }
}

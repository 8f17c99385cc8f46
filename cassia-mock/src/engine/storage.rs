use std::cmp::Ordering;
use std::collections::BTreeMap;

use cassia_cql::frame::response::error::{DbError, Error};
use cassia_cql::frame::response::result::ColumnType;
use cassia_cql::value::CqlValue;

use super::parser::ColumnDefinition;
use super::values::compare_or_equal;
use super::{invalid, EngineResult};

const STRATEGY_PACKAGE: &str = "org.apache.cassandra.locator.";

pub(super) type Cells = Vec<Option<CqlValue>>;

#[derive(Debug, Clone, PartialEq)]
pub(super) struct ColumnDef {
    pub(super) name: String,
    pub(super) typ: ColumnType,
}

/// A table with its rows. Columns are ordered: partition key, clustering key,
/// then the regular columns by name. Rows are grouped by partition, partitions
/// in insertion order and rows within a partition by clustering key.
#[derive(Debug, Clone, PartialEq)]
pub(super) struct Table {
    pub(super) columns: Vec<ColumnDef>,
    pub(super) partition_key_len: usize,
    pub(super) clustering_key_len: usize,
    pub(super) rows: Vec<Cells>,
}

impl Table {
    pub(super) fn new(
        definitions: Vec<ColumnDefinition>,
        partition_key: &[String],
        clustering_key: &[String],
    ) -> EngineResult<Self> {
        let mut regular: Vec<ColumnDef> = Vec::new();
        for definition in definitions {
            if regular.iter().any(|c| c.name == definition.name) {
                return Err(invalid(format!(
                    "Multiple definition of identifier {}",
                    definition.name
                )));
            }
            regular.push(ColumnDef {
                name: definition.name,
                typ: definition.typ,
            });
        }

        let mut columns = Vec::with_capacity(regular.len());
        for key_column in partition_key.iter().chain(clustering_key) {
            let position = regular
                .iter()
                .position(|c| &c.name == key_column)
                .ok_or_else(|| {
                    invalid(format!(
                        "Unknown definition {} referenced in PRIMARY KEY",
                        key_column
                    ))
                })?;
            columns.push(regular.remove(position));
        }
        regular.sort_by(|a, b| a.name.cmp(&b.name));
        columns.extend(regular);

        Ok(Self {
            columns,
            partition_key_len: partition_key.len(),
            clustering_key_len: clustering_key.len(),
            rows: Vec::new(),
        })
    }

    /// Builds a read-only table out of ready rows. Used for the system tables.
    pub(super) fn with_rows(
        columns: Vec<ColumnDef>,
        partition_key_len: usize,
        rows: Vec<Cells>,
    ) -> Self {
        Self {
            columns,
            partition_key_len,
            clustering_key_len: 0,
            rows,
        }
    }

    pub(super) fn primary_key_len(&self) -> usize {
        self.partition_key_len + self.clustering_key_len
    }

    pub(super) fn is_partition_key(&self, index: usize) -> bool {
        index < self.partition_key_len
    }

    pub(super) fn is_primary_key(&self, index: usize) -> bool {
        index < self.primary_key_len()
    }

    pub(super) fn column(&self, name: &str) -> EngineResult<(usize, &ColumnDef)> {
        self.columns
            .iter()
            .enumerate()
            .find(|(_, c)| c.name == name)
            .ok_or_else(|| invalid(format!("Undefined column name {}", name)))
    }

    /// Position of the row with the given primary key.
    pub(super) fn find_row(&self, key: &[CqlValue]) -> Option<usize> {
        self.rows.iter().position(|row| row_has_key(row, key))
    }

    /// Returns the position of the row with the given primary key, creating
    /// an empty one if there is none.
    pub(super) fn row_for_update(&mut self, key: Vec<CqlValue>) -> usize {
        if let Some(position) = self.find_row(&key) {
            return position;
        }

        let position = self.insert_position(&key);
        let mut row: Cells = key.into_iter().map(Some).collect();
        row.resize(self.columns.len(), None);
        self.rows.insert(position, row);
        position
    }

    fn insert_position(&self, key: &[CqlValue]) -> usize {
        let partition = &key[..self.partition_key_len];
        let mut last_of_partition = None;
        for (position, row) in self.rows.iter().enumerate() {
            if !row_has_key(row, partition) {
                continue;
            }
            let clustering_cmp = row[self.partition_key_len..self.primary_key_len()]
                .iter()
                .zip(&key[self.partition_key_len..])
                .map(|(cell, value)| cell.as_ref().map_or(Ordering::Less, |c| compare_or_equal(c, value)))
                .find(|ordering| *ordering != Ordering::Equal)
                .unwrap_or(Ordering::Equal);
            if clustering_cmp == Ordering::Greater {
                return position;
            }
            last_of_partition = Some(position);
        }
        last_of_partition.map_or(self.rows.len(), |position| position + 1)
    }
}

fn row_has_key(row: &[Option<CqlValue>], key: &[CqlValue]) -> bool {
    row.iter()
        .zip(key)
        .all(|(cell, value)| cell.as_ref() == Some(value))
}

#[derive(Debug, Clone, PartialEq)]
pub(super) struct Keyspace {
    pub(super) replication: Vec<(String, String)>,
    pub(super) durable_writes: bool,
    pub(super) tables: BTreeMap<String, Table>,
}

/// Schema and data of user keyspaces. Cloned to apply batches atomically.
#[derive(Debug, Clone, Default, PartialEq)]
pub(super) struct Storage {
    keyspaces: BTreeMap<String, Keyspace>,
}

impl Storage {
    pub(super) fn keyspaces(&self) -> impl Iterator<Item = (&String, &Keyspace)> {
        self.keyspaces.iter()
    }

    pub(super) fn has_keyspace(&self, name: &str) -> bool {
        self.keyspaces.contains_key(name)
    }

    pub(super) fn table(&self, keyspace: &str, name: &str) -> EngineResult<&Table> {
        self.keyspaces
            .get(keyspace)
            .ok_or_else(|| missing_keyspace(keyspace))?
            .tables
            .get(name)
            .ok_or_else(|| unconfigured_table(keyspace, name))
    }

    pub(super) fn table_mut(&mut self, keyspace: &str, name: &str) -> EngineResult<&mut Table> {
        self.keyspaces
            .get_mut(keyspace)
            .ok_or_else(|| missing_keyspace(keyspace))?
            .tables
            .get_mut(name)
            .ok_or_else(|| unconfigured_table(keyspace, name))
    }

    /// Returns whether the keyspace was created.
    pub(super) fn create_keyspace(
        &mut self,
        name: &str,
        replication: &[(String, String)],
        durable_writes: bool,
        if_not_exists: bool,
    ) -> EngineResult<bool> {
        if self.keyspaces.contains_key(name) {
            return if if_not_exists {
                Ok(false)
            } else {
                Err(already_exists(name, ""))
            };
        }

        self.keyspaces.insert(
            name.to_owned(),
            Keyspace {
                replication: normalize_replication(replication)?,
                durable_writes,
                tables: BTreeMap::new(),
            },
        );
        Ok(true)
    }

    /// Returns whether the keyspace was dropped.
    pub(super) fn drop_keyspace(&mut self, name: &str, if_exists: bool) -> EngineResult<bool> {
        match self.keyspaces.remove(name) {
            Some(_) => Ok(true),
            None if if_exists => Ok(false),
            None => Err(invalid(format!(
                "Cannot drop non existing keyspace '{}'.",
                name
            ))),
        }
    }

    /// Returns whether the table was created.
    pub(super) fn create_table(
        &mut self,
        keyspace: &str,
        name: &str,
        table: Table,
        if_not_exists: bool,
    ) -> EngineResult<bool> {
        let tables = &mut self
            .keyspaces
            .get_mut(keyspace)
            .ok_or_else(|| missing_keyspace(keyspace))?
            .tables;
        if tables.contains_key(name) {
            return if if_not_exists {
                Ok(false)
            } else {
                Err(already_exists(keyspace, name))
            };
        }
        tables.insert(name.to_owned(), table);
        Ok(true)
    }

    /// Returns whether the table was dropped.
    pub(super) fn drop_table(
        &mut self,
        keyspace: &str,
        name: &str,
        if_exists: bool,
    ) -> EngineResult<bool> {
        let Some(ks) = self.keyspaces.get_mut(keyspace) else {
            return if if_exists {
                Ok(false)
            } else {
                Err(missing_keyspace(keyspace))
            };
        };
        match ks.tables.remove(name) {
            Some(_) => Ok(true),
            None if if_exists => Ok(false),
            None => Err(invalid(format!(
                "Cannot drop non existing table '{}' in keyspace '{}'.",
                name, keyspace
            ))),
        }
    }
}

/// Expands short strategy names and checks the options each strategy needs.
fn normalize_replication(replication: &[(String, String)]) -> EngineResult<Vec<(String, String)>> {
    let config_error = |reason: String| Error {
        error: DbError::ConfigError,
        reason,
    };

    let class = replication
        .iter()
        .find(|(key, _)| key == "class")
        .map(|(_, value)| value.as_str())
        .ok_or_else(|| config_error("Missing replication strategy class".to_owned()))?;
    let short_name = class.strip_prefix(STRATEGY_PACKAGE).unwrap_or(class);

    let options = replication.iter().filter(|(key, _)| key != "class");
    match short_name {
        "SimpleStrategy" => {
            let factor = replication
                .iter()
                .find(|(key, _)| key == "replication_factor")
                .ok_or_else(|| {
                    config_error(
                        "SimpleStrategy requires a replication_factor strategy option.".to_owned(),
                    )
                })?;
            check_factor(&factor.1).map_err(config_error)?;
        }
        "NetworkTopologyStrategy" => {
            for (_, factor) in options.clone() {
                check_factor(factor).map_err(config_error)?;
            }
        }
        other => {
            return Err(config_error(format!(
                "Unable to find replication strategy class '{}{}'",
                STRATEGY_PACKAGE, other
            )))
        }
    }

    let mut normalized = vec![(
        "class".to_owned(),
        format!("{}{}", STRATEGY_PACKAGE, short_name),
    )];
    normalized.extend(options.cloned());
    Ok(normalized)
}

fn check_factor(factor: &str) -> Result<(), String> {
    factor
        .parse::<usize>()
        .map(|_| ())
        .map_err(|_| format!("Replication factor must be non-negative; found {}", factor))
}

fn missing_keyspace(name: &str) -> Error {
    invalid(format!("Keyspace {} does not exist", name))
}

fn unconfigured_table(keyspace: &str, name: &str) -> Error {
    invalid(format!("unconfigured table {}.{}", keyspace, name))
}

fn already_exists(keyspace: &str, table: &str) -> Error {
    let reason = if table.is_empty() {
        format!("Cannot add existing keyspace \"{}\"", keyspace)
    } else {
        format!("Object {}.{} already exists", keyspace, table)
    };
    Error {
        error: DbError::AlreadyExists {
            keyspace: keyspace.to_owned(),
            table: table.to_owned(),
        },
        reason,
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn definition(name: &str, typ: ColumnType) -> ColumnDefinition {
        ColumnDefinition {
            name: name.to_owned(),
            typ,
        }
    }

    fn events_table() -> Table {
        Table::new(
            vec![
                definition("payload", ColumnType::Text),
                definition("seq", ColumnType::Int),
                definition("day", ColumnType::Int),
                definition("author", ColumnType::Text),
            ],
            &["day".to_owned()],
            &["seq".to_owned()],
        )
        .unwrap()
    }

    fn replication(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn columns_are_ordered_by_key_then_name() {
        let table = events_table();
        let names: Vec<&str> = table.columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["day", "seq", "author", "payload"]);
        assert_eq!(table.primary_key_len(), 2);
        assert!(table.is_partition_key(0));
        assert!(!table.is_partition_key(1));
        assert!(table.is_primary_key(1));
        assert_matches!(table.column("seq"), Ok((1, _)));
        assert_matches!(table.column("nope"), Err(_));

        assert!(Table::new(
            vec![definition("a", ColumnType::Int)],
            &["b".to_owned()],
            &[]
        )
        .is_err());
    }

    #[test]
    fn rows_are_grouped_by_partition_and_sorted_by_clustering_key() {
        let mut table = events_table();
        for (day, seq) in [(2, 5), (1, 3), (2, 1), (1, 7), (2, 3)] {
            table.row_for_update(vec![CqlValue::Int(day), CqlValue::Int(seq)]);
        }
        // Existing keys are not duplicated.
        table.row_for_update(vec![CqlValue::Int(2), CqlValue::Int(3)]);

        let keys: Vec<(i32, i32)> = table
            .rows
            .iter()
            .map(|row| {
                (
                    row[0].as_ref().and_then(CqlValue::as_int).unwrap(),
                    row[1].as_ref().and_then(CqlValue::as_int).unwrap(),
                )
            })
            .collect();
        assert_eq!(keys, [(2, 1), (2, 3), (2, 5), (1, 3), (1, 7)]);
        assert!(table.rows.iter().all(|row| row.len() == 4));
    }

    #[test]
    fn keyspace_lifecycle() {
        let mut storage = Storage::default();
        let simple = replication(&[("class", "SimpleStrategy"), ("replication_factor", "1")]);

        assert!(storage.create_keyspace("ks", &simple, true, false).unwrap());
        assert!(!storage.create_keyspace("ks", &simple, true, true).unwrap());
        assert_matches!(
            storage.create_keyspace("ks", &simple, true, false),
            Err(Error { error: DbError::AlreadyExists { .. }, .. })
        );
        assert_eq!(
            storage.keyspaces().next().unwrap().1.replication[0].1,
            "org.apache.cassandra.locator.SimpleStrategy"
        );

        assert!(storage
            .create_table("ks", "t", events_table(), false)
            .unwrap());
        assert_matches!(
            storage.create_table("ks", "t", events_table(), false),
            Err(Error { error: DbError::AlreadyExists { keyspace, table }, .. })
                if keyspace == "ks" && table == "t"
        );
        assert!(storage.table("ks", "t").is_ok());
        assert_matches!(
            storage.table("ks", "other"),
            Err(Error { error: DbError::Invalid, .. })
        );

        assert!(storage.drop_table("ks", "t", false).unwrap());
        assert!(!storage.drop_table("ks", "t", true).unwrap());
        assert!(storage.drop_keyspace("ks", false).unwrap());
        assert!(storage.drop_keyspace("ks", false).is_err());
        assert!(!storage.has_keyspace("ks"));
    }

    #[test]
    fn replication_is_validated() {
        let mut storage = Storage::default();
        assert_matches!(
            storage.create_keyspace(
                "ks",
                &replication(&[("class", "SimpleStrategy")]),
                true,
                false
            ),
            Err(Error { error: DbError::ConfigError, .. })
        );
        assert!(storage
            .create_keyspace(
                "ks",
                &replication(&[("class", "UnknownStrategy")]),
                true,
                false
            )
            .is_err());
        assert!(storage
            .create_keyspace(
                "ks",
                &replication(&[("class", "NetworkTopologyStrategy"), ("dc1", "3")]),
                true,
                false
            )
            .is_ok());
    }
}

//! An in-memory CQL engine understanding the subset of the language the driver
//! and its tests use: schema statements, INSERT/UPDATE/DELETE with lightweight
//! conditions, SELECT with filtering, ordering, limits and paging, and batches.

mod lexer;
mod parser;
mod storage;
mod system;
mod values;

use std::cmp::Ordering;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use cassia_cql::frame::request::query::QueryParameters;
use cassia_cql::frame::response::error::{DbError, Error};
use cassia_cql::frame::response::event::{SchemaChangeEvent, SchemaChangeType};
use cassia_cql::frame::response::result::{
    self, ColumnSpec, ColumnType, PartitionKeyIndex, Prepared, PreparedMetadata, ResultMetadata,
    Row, Rows, SchemaChange, SetKeyspace, TableSpec,
};
use cassia_cql::frame::types::RawValue;
use cassia_cql::frame::value::SerializedValues;
use cassia_cql::value::{Counter, CqlValue};
use tracing::trace;

use parser::{AssignOp, Assignment, Operator, Relation, Select, Selector, Statement, TableName, Term, Using};
use storage::{Cells, ColumnDef, Storage, Table};
use values::{compare, compare_cells, normalize, resolve, Resolved};

pub(crate) use system::{NodeInfo, Topology};

pub(crate) type EngineResult<T> = Result<T, Error>;

pub(crate) fn syntax_error(reason: impl Into<String>) -> Error {
    Error {
        error: DbError::SyntaxError,
        reason: reason.into(),
    }
}

pub(crate) fn invalid(reason: impl Into<String>) -> Error {
    Error {
        error: DbError::Invalid,
        reason: reason.into(),
    }
}

fn unauthorized(keyspace: &str) -> Error {
    Error {
        error: DbError::Unauthorized,
        reason: format!("{} keyspace is not user-modifiable.", keyspace),
    }
}

const COUNT_WITHOUT_PARTITION_KEY: &str = "Aggregation query used without partition key";

/// What executing a statement produced.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Outcome {
    pub(crate) result: result::Result,
    pub(crate) warnings: Vec<String>,
}

impl Outcome {
    fn new(result: result::Result) -> Self {
        Self {
            result,
            warnings: Vec::new(),
        }
    }

    fn void() -> Self {
        Self::new(result::Result::Void)
    }

    fn schema_change(event: SchemaChangeEvent) -> Self {
        Self::new(result::Result::SchemaChange(SchemaChange { event }))
    }

    /// The schema change to announce to event listeners, if any.
    pub(crate) fn schema_change_event(&self) -> Option<&SchemaChangeEvent> {
        match &self.result {
            result::Result::SchemaChange(change) => Some(&change.event),
            _ => None,
        }
    }
}

/// One statement of a BATCH request, already resolved to its text.
#[derive(Debug, Clone, Copy)]
pub(crate) struct BatchEntry<'a> {
    pub(crate) text: &'a str,
    pub(crate) keyspace: Option<&'a str>,
    pub(crate) values: &'a SerializedValues,
}

/// Schema and data shared by all nodes of a mock cluster.
#[derive(Debug, Default)]
pub(crate) struct Engine {
    storage: Mutex<Storage>,
}

impl Engine {
    fn storage(&self) -> MutexGuard<'_, Storage> {
        self.storage.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Executes a QUERY, or an EXECUTE of a statement with the given text.
    pub(crate) fn execute(
        &self,
        text: &str,
        keyspace: Option<&str>,
        params: &QueryParameters,
        topology: Topology<'_>,
    ) -> EngineResult<Outcome> {
        let parsed = parser::parse(text)?;
        let bound: Vec<RawValue<'_>> = params.values.iter().collect();
        check_marker_count(parsed.marker_count, &bound)?;

        trace!(statement = text, values = bound.len(), "Executing");
        let ctx = Context {
            keyspace,
            bound: &bound,
            topology,
        };
        let mut storage = self.storage();
        run(&mut storage, &ctx, &parsed.statement, Paging::from_params(params)?)
    }

    /// Applies all statements of a batch, or none of them.
    pub(crate) fn batch(
        &self,
        entries: &[BatchEntry<'_>],
        topology: Topology<'_>,
    ) -> EngineResult<Outcome> {
        let mut parsed = Vec::with_capacity(entries.len());
        for entry in entries {
            let statement = parser::parse(entry.text)?;
            if !statement.statement.is_modification() {
                return Err(invalid(
                    "Invalid statement in batch: only UPDATE, INSERT and DELETE statements are allowed.",
                ));
            }
            if is_conditional(&statement.statement) {
                return Err(invalid(
                    "Conditional statements are not supported in batches by this node",
                ));
            }
            let bound: Vec<RawValue<'_>> = entry.values.iter().collect();
            check_marker_count(statement.marker_count, &bound)?;
            parsed.push((statement.statement, entry.keyspace, bound));
        }

        let mut storage = self.storage();
        let mut scratch = storage.clone();
        for (statement, keyspace, bound) in &parsed {
            let ctx = Context {
                keyspace: *keyspace,
                bound,
                topology,
            };
            run(&mut scratch, &ctx, statement, Paging::default())?;
        }
        *storage = scratch;
        Ok(Outcome::void())
    }

    /// Parses `text` and describes its bind markers and result columns.
    pub(crate) fn prepare(
        &self,
        text: &str,
        keyspace: Option<&str>,
        topology: Topology<'_>,
    ) -> EngineResult<Prepared> {
        let parsed = parser::parse(text)?;
        let ctx = Context {
            keyspace,
            bound: &[],
            topology,
        };
        let storage = self.storage();
        let mut describer = MarkerDescriber {
            specs: vec![None; parsed.marker_count],
            pk_markers: Vec::new(),
        };
        let result_metadata = describer.statement(&storage, &ctx, &parsed.statement)?;

        let col_specs = describer
            .specs
            .into_iter()
            .enumerate()
            .map(|(index, spec)| {
                spec.ok_or_else(|| {
                    invalid(format!("Unable to determine the type of bind marker {}", index))
                })
            })
            .collect::<EngineResult<Vec<ColumnSpec>>>()?;

        Ok(Prepared {
            id: statement_id(keyspace, text),
            prepared_metadata: PreparedMetadata {
                col_count: col_specs.len(),
                pk_indexes: describer.pk_markers,
                col_specs,
            },
            result_metadata,
        })
    }
}

/// Deterministic id of a prepared statement, so that every node of the cluster
/// assigns the same id to the same statement.
pub(crate) fn statement_id(keyspace: Option<&str>, text: &str) -> Bytes {
    let mut id = Vec::with_capacity(16);
    for salt in [0_u8, 1] {
        let mut hasher = DefaultHasher::new();
        salt.hash(&mut hasher);
        keyspace.hash(&mut hasher);
        text.hash(&mut hasher);
        id.extend_from_slice(&hasher.finish().to_be_bytes());
    }
    id.into()
}

fn check_marker_count(markers: usize, bound: &[RawValue<'_>]) -> EngineResult<()> {
    if markers != bound.len() {
        return Err(invalid(format!(
            "There were {} markers(?) in CQL but {} bound variables",
            markers,
            bound.len()
        )));
    }
    Ok(())
}

fn is_conditional(statement: &Statement) -> bool {
    matches!(
        statement,
        Statement::Insert {
            if_not_exists: true,
            ..
        } | Statement::Update {
            if_exists: true,
            ..
        } | Statement::Delete {
            if_exists: true,
            ..
        }
    )
}

struct Context<'a> {
    keyspace: Option<&'a str>,
    bound: &'a [RawValue<'a>],
    topology: Topology<'a>,
}

impl<'a> Context<'a> {
    fn keyspace_of<'n>(&self, table: &'n TableName) -> EngineResult<&'n str>
    where
        'a: 'n,
    {
        table.keyspace.as_deref().or(self.keyspace).ok_or_else(|| {
            invalid(
                "No keyspace has been specified. USE a keyspace, or explicitly specify keyspace.tablename",
            )
        })
    }

    fn writable_keyspace<'n>(&self, table: &'n TableName) -> EngineResult<&'n str>
    where
        'a: 'n,
    {
        let keyspace = self.keyspace_of(table)?;
        if system::is_system_keyspace(keyspace) {
            return Err(unauthorized(keyspace));
        }
        Ok(keyspace)
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Paging {
    page_size: Option<usize>,
    offset: usize,
}

impl Paging {
    /// The paging state handed out to drivers is the offset of the next row.
    fn from_params(params: &QueryParameters) -> EngineResult<Self> {
        let offset = match &params.paging_state {
            Some(state) => {
                let bytes: [u8; 4] = state[..].try_into().map_err(|_| Error {
                    error: DbError::ProtocolError,
                    reason: format!("Invalid paging state of {} bytes", state.len()),
                })?;
                u32::from_be_bytes(bytes) as usize
            }
            None => 0,
        };
        let page_size = params
            .page_size
            .and_then(|size| usize::try_from(size).ok())
            .filter(|size| *size > 0);
        Ok(Self { page_size, offset })
    }

    fn page(self, rows: Vec<Cells>) -> EngineResult<(Vec<Cells>, Option<Bytes>)> {
        let mut rows: Vec<Cells> = rows.into_iter().skip(self.offset).collect();
        match self.page_size {
            Some(size) if rows.len() > size => {
                rows.truncate(size);
                let next = u32::try_from(self.offset + size)
                    .map_err(|_| invalid("Result too large to be paged"))?;
                Ok((rows, Some(Bytes::copy_from_slice(&next.to_be_bytes()))))
            }
            _ => Ok((rows, None)),
        }
    }
}

fn run(
    storage: &mut Storage,
    ctx: &Context<'_>,
    statement: &Statement,
    paging: Paging,
) -> EngineResult<Outcome> {
    match statement {
        Statement::Select(select) => select_rows(storage, ctx, select, paging),
        Statement::Insert {
            table,
            columns,
            values,
            if_not_exists,
            using,
        } => insert(storage, ctx, table, columns, values, *if_not_exists, using),
        Statement::Update {
            table,
            using,
            assignments,
            relations,
            if_exists,
        } => update(storage, ctx, table, using, assignments, relations, *if_exists),
        Statement::Delete {
            columns,
            table,
            using,
            relations,
            if_exists,
        } => delete(storage, ctx, columns, table, using, relations, *if_exists),
        Statement::Batch(statements) => {
            let mut scratch = storage.clone();
            for statement in statements {
                run(&mut scratch, ctx, statement, Paging::default())?;
            }
            *storage = scratch;
            Ok(Outcome::void())
        }
        Statement::Use { keyspace } => {
            if !storage.has_keyspace(keyspace) && !system::is_system_keyspace(keyspace) {
                return Err(invalid(format!("Keyspace '{}' does not exist", keyspace)));
            }
            Ok(Outcome::new(result::Result::SetKeyspace(SetKeyspace {
                keyspace_name: keyspace.clone(),
            })))
        }
        Statement::CreateKeyspace {
            name,
            if_not_exists,
            replication,
            durable_writes,
        } => {
            if system::is_system_keyspace(name) {
                return Err(unauthorized(name));
            }
            let created =
                storage.create_keyspace(name, replication, *durable_writes, *if_not_exists)?;
            Ok(keyspace_change(created, SchemaChangeType::Created, name))
        }
        Statement::DropKeyspace { name, if_exists } => {
            if system::is_system_keyspace(name) {
                return Err(unauthorized(name));
            }
            let dropped = storage.drop_keyspace(name, *if_exists)?;
            Ok(keyspace_change(dropped, SchemaChangeType::Dropped, name))
        }
        Statement::CreateTable {
            table,
            if_not_exists,
            columns,
            partition_key,
            clustering_key,
        } => {
            let keyspace = ctx.writable_keyspace(table)?;
            let new_table = Table::new(columns.clone(), partition_key, clustering_key)?;
            let created = storage.create_table(keyspace, &table.name, new_table, *if_not_exists)?;
            Ok(table_change(created, SchemaChangeType::Created, keyspace, &table.name))
        }
        Statement::DropTable { table, if_exists } => {
            let keyspace = ctx.writable_keyspace(table)?;
            let dropped = storage.drop_table(keyspace, &table.name, *if_exists)?;
            Ok(table_change(dropped, SchemaChangeType::Dropped, keyspace, &table.name))
        }
        Statement::Truncate { table } => {
            let keyspace = ctx.writable_keyspace(table)?;
            storage.table_mut(keyspace, &table.name)?.rows.clear();
            Ok(Outcome::void())
        }
    }
}

fn keyspace_change(changed: bool, change_type: SchemaChangeType, keyspace: &str) -> Outcome {
    if !changed {
        return Outcome::void();
    }
    Outcome::schema_change(SchemaChangeEvent::KeyspaceChange {
        change_type,
        keyspace_name: keyspace.to_owned(),
    })
}

fn table_change(
    changed: bool,
    change_type: SchemaChangeType,
    keyspace: &str,
    table: &str,
) -> Outcome {
    if !changed {
        return Outcome::void();
    }
    Outcome::schema_change(SchemaChangeEvent::TableChange {
        change_type,
        keyspace_name: keyspace.to_owned(),
        object_name: table.to_owned(),
    })
}

fn rows_outcome(col_specs: Vec<ColumnSpec>, rows: Vec<Cells>, paging_state: Option<Bytes>) -> Outcome {
    Outcome::new(result::Result::Rows(Rows {
        metadata: Arc::new(ResultMetadata::new(col_specs)),
        paging_state,
        rows_count: rows.len(),
        rows: rows.into_iter().map(|columns| Row { columns }).collect(),
        serialized_size: 0,
    }))
}

/// The single-row result of a conditional statement. When the condition
/// failed on an existing row, that row is returned alongside.
fn conditional_outcome(
    keyspace: &str,
    table_name: &str,
    table: &Table,
    applied: bool,
    existing: Option<&Cells>,
) -> Outcome {
    let table_spec = TableSpec::new(keyspace, table_name);
    let mut col_specs = vec![ColumnSpec::new(
        "[applied]",
        ColumnType::Boolean,
        table_spec.clone(),
    )];
    let mut row = vec![Some(CqlValue::Boolean(applied))];
    if let Some(existing) = existing {
        for (column, cell) in table.columns.iter().zip(existing) {
            col_specs.push(ColumnSpec::new(
                column.name.clone(),
                column.typ.clone(),
                table_spec.clone(),
            ));
            row.push(cell.clone());
        }
    }
    rows_outcome(col_specs, vec![row], None)
}

/// Restriction of one column in a WHERE clause, with its values resolved.
struct Filter {
    column: usize,
    operator: Operator,
    values: Vec<CqlValue>,
}

impl Filter {
    fn matches(&self, row: &[Option<CqlValue>]) -> bool {
        let Some(cell) = &row[self.column] else {
            return false;
        };
        let holds = |wanted: fn(Ordering) -> bool| {
            self.values
                .iter()
                .all(|value| compare(cell, value).map_or(false, wanted))
        };
        match self.operator {
            Operator::Eq | Operator::In => self
                .values
                .iter()
                .any(|value| cell == value || compare(cell, value) == Some(Ordering::Equal)),
            Operator::Lt => holds(Ordering::is_lt),
            Operator::Lte => holds(Ordering::is_le),
            Operator::Gt => holds(Ordering::is_gt),
            Operator::Gte => holds(Ordering::is_ge),
        }
    }
}

fn required(resolved: Resolved, column: &str) -> EngineResult<CqlValue> {
    match resolved {
        Resolved::Value(value) => Ok(value),
        Resolved::Null => Err(invalid(format!(
            "Invalid null value in condition for column {}",
            column
        ))),
        Resolved::Unset => Err(invalid(format!("Invalid unset value for column {}", column))),
    }
}

fn filters(table: &Table, relations: &[Relation], bound: &[RawValue<'_>]) -> EngineResult<Vec<Filter>> {
    relations
        .iter()
        .map(|relation| {
            let (index, column) = table.column(&relation.column)?;
            let values = match (relation.operator, &relation.value) {
                (Operator::In, Term::List(terms)) => terms
                    .iter()
                    .map(|term| required(resolve(term, &column.typ, &column.name, bound)?, &column.name))
                    .collect::<EngineResult<Vec<_>>>()?,
                (Operator::In, term) => {
                    let list_type = ColumnType::List(Box::new(column.typ.clone()));
                    match required(resolve(term, &list_type, &column.name, bound)?, &column.name)? {
                        CqlValue::List(values) => values,
                        _ => return Err(invalid(format!("Invalid IN value for column {}", column.name))),
                    }
                }
                (_, term) => vec![required(
                    resolve(term, &column.typ, &column.name, bound)?,
                    &column.name,
                )?],
            };
            Ok(Filter {
                column: index,
                operator: relation.operator,
                values,
            })
        })
        .collect()
}

enum Projection {
    Count { name: String },
    Columns(Vec<(usize, String)>),
}

fn projection(table: &Table, selectors: &[Selector]) -> EngineResult<Projection> {
    if selectors.is_empty() {
        return Ok(Projection::Columns(
            table
                .columns
                .iter()
                .enumerate()
                .map(|(index, column)| (index, column.name.clone()))
                .collect(),
        ));
    }

    let mut columns = Vec::with_capacity(selectors.len());
    for selector in selectors {
        match selector {
            Selector::CountAll { alias } if selectors.len() == 1 => {
                return Ok(Projection::Count {
                    name: alias.clone().unwrap_or_else(|| "count".to_owned()),
                });
            }
            Selector::CountAll { .. } => {
                return Err(invalid(
                    "COUNT(*) cannot be mixed with other selectors",
                ))
            }
            Selector::Column { name, alias } => {
                let (index, column) = table.column(name)?;
                columns.push((index, alias.clone().unwrap_or_else(|| column.name.clone())));
            }
        }
    }
    Ok(Projection::Columns(columns))
}

fn limit(term: &Term, bound: &[RawValue<'_>]) -> EngineResult<Option<usize>> {
    match resolve(term, &ColumnType::Int, "[limit]", bound)? {
        Resolved::Value(CqlValue::Int(n)) if n > 0 => Ok(usize::try_from(n).ok()),
        Resolved::Unset => Ok(None),
        _ => Err(invalid("LIMIT must be strictly positive")),
    }
}

fn select_rows(
    storage: &Storage,
    ctx: &Context<'_>,
    select: &Select,
    paging: Paging,
) -> EngineResult<Outcome> {
    let keyspace = ctx.keyspace_of(&select.table)?;
    let virtual_table;
    let table = if system::is_system_keyspace(keyspace) {
        virtual_table = system::table(keyspace, &select.table.name, storage, ctx.topology)
            .ok_or_else(|| invalid(format!("unconfigured table {}", select.table.name)))?;
        &virtual_table
    } else {
        storage.table(keyspace, &select.table.name)?
    };

    let filters = filters(table, &select.relations, ctx.bound)?;
    let mut rows: Vec<&Cells> = table
        .rows
        .iter()
        .filter(|row| filters.iter().all(|filter| filter.matches(row)))
        .collect();

    let mut order = Vec::with_capacity(select.order_by.len());
    for (name, descending) in &select.order_by {
        order.push((table.column(name)?.0, *descending));
    }
    if !order.is_empty() {
        rows.sort_by(|a, b| {
            order
                .iter()
                .map(|(index, descending)| {
                    let ordering = compare_cells(&a[*index], &b[*index]);
                    if *descending {
                        ordering.reverse()
                    } else {
                        ordering
                    }
                })
                .find(|ordering| ordering.is_ne())
                .unwrap_or(Ordering::Equal)
        });
    }

    let table_spec = TableSpec::new(keyspace, &select.table.name);
    let mut warnings = Vec::new();
    let (col_specs, mut result_rows) = match projection(table, &select.selectors)? {
        Projection::Count { name } => {
            let restricts_partition = (0..table.partition_key_len).all(|index| {
                filters.iter().any(|f| {
                    f.column == index && matches!(f.operator, Operator::Eq | Operator::In)
                })
            });
            if !restricts_partition {
                warnings.push(COUNT_WITHOUT_PARTITION_KEY.to_owned());
            }
            let count = i64::try_from(rows.len()).unwrap_or(i64::MAX);
            (
                vec![ColumnSpec::new(name, ColumnType::BigInt, table_spec)],
                vec![vec![Some(CqlValue::BigInt(count))]],
            )
        }
        Projection::Columns(columns) => {
            let specs = columns
                .iter()
                .map(|(index, name)| {
                    ColumnSpec::new(name.clone(), table.columns[*index].typ.clone(), table_spec.clone())
                })
                .collect();
            let projected = rows
                .iter()
                .map(|row| columns.iter().map(|(index, _)| row[*index].clone()).collect())
                .collect();
            (specs, projected)
        }
    };

    if select.distinct {
        let mut distinct: Vec<Cells> = Vec::with_capacity(result_rows.len());
        for row in result_rows {
            if !distinct.contains(&row) {
                distinct.push(row);
            }
        }
        result_rows = distinct;
    }
    if let Some(term) = &select.limit {
        if let Some(limit) = limit(term, ctx.bound)? {
            result_rows.truncate(limit);
        }
    }

    let (page, paging_state) = paging.page(result_rows)?;
    let mut outcome = rows_outcome(col_specs, page, paging_state);
    outcome.warnings = warnings;
    Ok(outcome)
}

/// TTL and timestamp are validated, then ignored: data never expires here.
fn check_using(using: &Using, bound: &[RawValue<'_>]) -> EngineResult<()> {
    if let Some(ttl) = &using.ttl {
        if let Resolved::Value(CqlValue::Int(ttl)) = resolve(ttl, &ColumnType::Int, "[ttl]", bound)? {
            if ttl < 0 {
                return Err(invalid("A TTL must be greater or equal to 0"));
            }
        }
    }
    if let Some(timestamp) = &using.timestamp {
        resolve(timestamp, &ColumnType::BigInt, "[timestamp]", bound)?;
    }
    Ok(())
}

/// Empty collections are not stored; reading them back yields null.
fn stored(cell: Option<CqlValue>) -> Option<CqlValue> {
    match cell {
        Some(CqlValue::List(v) | CqlValue::Set(v)) if v.is_empty() => None,
        Some(CqlValue::Map(v)) if v.is_empty() => None,
        other => other,
    }
}

fn missing_key_part(table: &Table, index: usize) -> Error {
    let name = &table.columns[index].name;
    if table.is_partition_key(index) {
        invalid(format!("Some partition key parts are missing: {}", name))
    } else {
        invalid(format!("Some clustering keys are missing: {}", name))
    }
}

fn insert(
    storage: &mut Storage,
    ctx: &Context<'_>,
    table_name: &TableName,
    columns: &[String],
    values: &[Term],
    if_not_exists: bool,
    using: &Using,
) -> EngineResult<Outcome> {
    let keyspace = ctx.writable_keyspace(table_name)?;
    check_using(using, ctx.bound)?;
    let table = storage.table_mut(keyspace, &table_name.name)?;

    let mut assigned: Vec<(usize, Resolved)> = Vec::with_capacity(columns.len());
    for (name, term) in columns.iter().zip(values) {
        let (index, column) = table.column(name)?;
        if assigned.iter().any(|(i, _)| *i == index) {
            return Err(invalid(format!("Multiple definitions found for column {}", name)));
        }
        assigned.push((index, resolve(term, &column.typ, &column.name, ctx.bound)?));
    }

    let mut key = Vec::with_capacity(table.primary_key_len());
    for index in 0..table.primary_key_len() {
        match assigned.iter().find(|(i, _)| *i == index) {
            Some((_, resolved)) => key.push(required(resolved.clone(), &table.columns[index].name)?),
            None => return Err(missing_key_part(table, index)),
        }
    }

    if if_not_exists {
        if let Some(position) = table.find_row(&key) {
            let existing = &table.rows[position];
            return Ok(conditional_outcome(keyspace, &table_name.name, table, false, Some(existing)));
        }
    }

    let position = table.row_for_update(key);
    for (index, value) in assigned {
        if table.is_primary_key(index) || value == Resolved::Unset {
            continue;
        }
        table.rows[position][index] = stored(value.into_cell());
    }

    if if_not_exists {
        Ok(conditional_outcome(keyspace, &table_name.name, table, true, None))
    } else {
        Ok(Outcome::void())
    }
}

/// For each primary key column, the values it is restricted to by the WHERE
/// clause of a modification, or `None` if it is not restricted.
fn key_restrictions(
    table: &Table,
    relations: &[Relation],
    bound: &[RawValue<'_>],
) -> EngineResult<Vec<Option<Vec<CqlValue>>>> {
    let mut restrictions = vec![None; table.primary_key_len()];
    for filter in filters(table, relations, bound)? {
        let name = &table.columns[filter.column].name;
        if !table.is_primary_key(filter.column) {
            return Err(invalid(format!(
                "Non PRIMARY KEY columns found in where clause: {}",
                name
            )));
        }
        if !matches!(filter.operator, Operator::Eq | Operator::In) {
            return Err(invalid(format!(
                "Invalid operator in where clause for PRIMARY KEY part {}",
                name
            )));
        }
        if restrictions[filter.column].is_some() {
            return Err(invalid(format!(
                "{} cannot be restricted by more than one relation if it includes an Equal",
                name
            )));
        }
        restrictions[filter.column] = Some(filter.values);
    }
    Ok(restrictions)
}

fn matches_restrictions(row: &[Option<CqlValue>], restrictions: &[Option<Vec<CqlValue>>]) -> bool {
    restrictions.iter().zip(row).all(|(restriction, cell)| match restriction {
        Some(values) => cell.as_ref().map_or(false, |cell| values.contains(cell)),
        None => true,
    })
}

/// All full primary keys a WHERE clause of an UPDATE designates.
fn full_keys(table: &Table, restrictions: Vec<Option<Vec<CqlValue>>>) -> EngineResult<Vec<Vec<CqlValue>>> {
    let mut keys: Vec<Vec<CqlValue>> = vec![Vec::new()];
    for (index, restriction) in restrictions.into_iter().enumerate() {
        let values = restriction.ok_or_else(|| missing_key_part(table, index))?;
        keys = keys
            .iter()
            .flat_map(|key| {
                values.iter().map(move |value| {
                    let mut key = key.clone();
                    key.push(value.clone());
                    key
                })
            })
            .collect();
    }
    Ok(keys)
}

fn combine(
    current: Option<CqlValue>,
    op: AssignOp,
    operand: Resolved,
    column: &ColumnDef,
) -> EngineResult<Option<CqlValue>> {
    let operand = match (operand, op) {
        (Resolved::Unset, _) => return Ok(current),
        (Resolved::Null, AssignOp::Set) => return Ok(None),
        (Resolved::Null, _) => {
            return Err(invalid(format!(
                "Invalid null value for operation on column {}",
                column.name
            )))
        }
        (Resolved::Value(value), _) => value,
    };

    let combined = match (op, current, operand) {
        (AssignOp::Set, _, value) => Some(value),
        (AssignOp::Add, current, CqlValue::Counter(delta)) => {
            let base = current.and_then(|c| c.as_counter()).map_or(0, |c| c.0);
            Some(CqlValue::Counter(Counter(base.wrapping_add(delta.0))))
        }
        (AssignOp::Sub, current, CqlValue::Counter(delta)) => {
            let base = current.and_then(|c| c.as_counter()).map_or(0, |c| c.0);
            Some(CqlValue::Counter(Counter(base.wrapping_sub(delta.0))))
        }
        (AssignOp::Add, Some(CqlValue::List(mut list)), CqlValue::List(more)) => {
            list.extend(more);
            Some(CqlValue::List(list))
        }
        (AssignOp::Add, Some(CqlValue::Set(mut set)), CqlValue::Set(more)) => {
            set.extend(more);
            Some(normalize(CqlValue::Set(set), &column.typ))
        }
        (AssignOp::Add, Some(CqlValue::Map(mut map)), CqlValue::Map(more)) => {
            for (key, value) in more {
                match map.iter_mut().find(|(k, _)| *k == key) {
                    Some(entry) => entry.1 = value,
                    None => map.push((key, value)),
                }
            }
            Some(normalize(CqlValue::Map(map), &column.typ))
        }
        (AssignOp::Add, None, value) => Some(value),
        (AssignOp::Sub, Some(CqlValue::List(mut list) | CqlValue::Set(mut list)), CqlValue::List(gone) | CqlValue::Set(gone)) => {
            list.retain(|element| !gone.contains(element));
            Some(normalize(CqlValue::List(list), &column.typ))
        }
        (AssignOp::Sub, Some(CqlValue::Map(mut map)), CqlValue::Set(gone)) => {
            map.retain(|(key, _)| !gone.contains(key));
            Some(CqlValue::Map(map))
        }
        (AssignOp::Sub, None, _) => None,
        _ => {
            return Err(invalid(format!(
                "Invalid operation for column {} of type {}",
                column.name, column.typ
            )))
        }
    };
    Ok(stored(combined))
}

fn update(
    storage: &mut Storage,
    ctx: &Context<'_>,
    table_name: &TableName,
    using: &Using,
    assignments: &[Assignment],
    relations: &[Relation],
    if_exists: bool,
) -> EngineResult<Outcome> {
    let keyspace = ctx.writable_keyspace(table_name)?;
    check_using(using, ctx.bound)?;
    let table = storage.table_mut(keyspace, &table_name.name)?;

    let mut operations = Vec::with_capacity(assignments.len());
    for assignment in assignments {
        let (index, column) = table.column(&assignment.column)?;
        if table.is_primary_key(index) {
            return Err(invalid(format!(
                "PRIMARY KEY part {} found in SET part",
                column.name
            )));
        }
        let operand_type = match (assignment.op, &column.typ) {
            (AssignOp::Sub, ColumnType::Map(key_type, _)) => ColumnType::Set(key_type.clone()),
            (_, typ) => typ.clone(),
        };
        let operand = resolve(&assignment.value, &operand_type, &column.name, ctx.bound)?;
        operations.push((index, assignment.op, operand));
    }

    let keys = full_keys(table, key_restrictions(table, relations, ctx.bound)?)?;
    if if_exists && !keys.iter().any(|key| table.find_row(key).is_some()) {
        return Ok(conditional_outcome(keyspace, &table_name.name, table, false, None));
    }

    for key in keys {
        let position = table.row_for_update(key);
        for (index, op, operand) in &operations {
            let current = table.rows[position][*index].take();
            table.rows[position][*index] =
                combine(current, *op, operand.clone(), &table.columns[*index])?;
        }
    }

    if if_exists {
        Ok(conditional_outcome(keyspace, &table_name.name, table, true, None))
    } else {
        Ok(Outcome::void())
    }
}

fn delete(
    storage: &mut Storage,
    ctx: &Context<'_>,
    columns: &[String],
    table_name: &TableName,
    using: &Using,
    relations: &[Relation],
    if_exists: bool,
) -> EngineResult<Outcome> {
    let keyspace = ctx.writable_keyspace(table_name)?;
    check_using(using, ctx.bound)?;
    let table = storage.table_mut(keyspace, &table_name.name)?;

    let restrictions = key_restrictions(table, relations, ctx.bound)?;
    let mut preceding_restricted = true;
    for (index, restriction) in restrictions.iter().enumerate() {
        match restriction {
            None if table.is_partition_key(index) => return Err(missing_key_part(table, index)),
            None => preceding_restricted = false,
            Some(_) if !preceding_restricted => {
                return Err(invalid(format!(
                    "PRIMARY KEY column \"{}\" cannot be restricted as preceding column is not restricted",
                    table.columns[index].name
                )))
            }
            Some(_) => {}
        }
    }

    let mut targets = Vec::with_capacity(columns.len());
    for name in columns {
        let (index, _) = table.column(name)?;
        if table.is_primary_key(index) {
            return Err(invalid(format!(
                "Invalid identifier {} for deletion (should not be a PRIMARY KEY part)",
                name
            )));
        }
        targets.push(index);
    }

    let exists = table
        .rows
        .iter()
        .any(|row| matches_restrictions(row, &restrictions));
    if if_exists && !exists {
        return Ok(conditional_outcome(keyspace, &table_name.name, table, false, None));
    }

    if targets.is_empty() {
        table
            .rows
            .retain(|row| !matches_restrictions(row, &restrictions));
    } else {
        for row in table
            .rows
            .iter_mut()
            .filter(|row| matches_restrictions(row, &restrictions))
        {
            for index in &targets {
                row[*index] = None;
            }
        }
    }

    if if_exists {
        Ok(conditional_outcome(keyspace, &table_name.name, table, true, None))
    } else {
        Ok(Outcome::void())
    }
}

/// Collects the types of bind markers while walking a statement being prepared.
struct MarkerDescriber {
    specs: Vec<Option<ColumnSpec>>,
    pk_markers: Vec<PartitionKeyIndex>,
}

impl MarkerDescriber {
    /// Returns the metadata of the rows the statement produces.
    fn statement(
        &mut self,
        storage: &Storage,
        ctx: &Context<'_>,
        statement: &Statement,
    ) -> EngineResult<ResultMetadata> {
        match statement {
            Statement::Select(select) => {
                let keyspace = ctx.keyspace_of(&select.table)?;
                let virtual_table;
                let table = if system::is_system_keyspace(keyspace) {
                    virtual_table =
                        system::table(keyspace, &select.table.name, storage, ctx.topology)
                            .ok_or_else(|| {
                                invalid(format!("unconfigured table {}", select.table.name))
                            })?;
                    &virtual_table
                } else {
                    storage.table(keyspace, &select.table.name)?
                };
                let table_spec = TableSpec::new(keyspace, &select.table.name);

                self.relations(table, &table_spec, &select.relations)?;
                if let Some(limit) = &select.limit {
                    self.term(limit, &ColumnType::Int, "[limit]", &table_spec);
                }

                let col_specs = match projection(table, &select.selectors)? {
                    Projection::Count { name } => {
                        vec![ColumnSpec::new(name, ColumnType::BigInt, table_spec)]
                    }
                    Projection::Columns(columns) => columns
                        .into_iter()
                        .map(|(index, name)| {
                            ColumnSpec::new(name, table.columns[index].typ.clone(), table_spec.clone())
                        })
                        .collect(),
                };
                Ok(ResultMetadata::new(col_specs))
            }
            Statement::Insert {
                table: table_name,
                columns,
                values,
                using,
                ..
            } => {
                let (table, table_spec) = self.target(storage, ctx, table_name)?;
                let mut pk_markers = Vec::new();
                for (name, term) in columns.iter().zip(values) {
                    let (index, column) = table.column(name)?;
                    self.term(term, &column.typ, &column.name, &table_spec);
                    if let (true, Term::Marker { index: marker, .. }) =
                        (table.is_partition_key(index), term)
                    {
                        pk_markers.push((index, *marker));
                    }
                }
                self.using(using, &table_spec);
                self.partition_key(table, pk_markers);
                Ok(ResultMetadata::default())
            }
            Statement::Update {
                table: table_name,
                using,
                assignments,
                relations,
                ..
            } => {
                let (table, table_spec) = self.target(storage, ctx, table_name)?;
                self.using(using, &table_spec);
                for assignment in assignments {
                    let (_, column) = table.column(&assignment.column)?;
                    let operand_type = match (assignment.op, &column.typ) {
                        (AssignOp::Sub, ColumnType::Map(key_type, _)) => {
                            ColumnType::Set(key_type.clone())
                        }
                        (_, typ) => typ.clone(),
                    };
                    self.term(&assignment.value, &operand_type, &column.name, &table_spec);
                }
                self.relations(table, &table_spec, relations)?;
                Ok(ResultMetadata::default())
            }
            Statement::Delete {
                table: table_name,
                using,
                relations,
                ..
            } => {
                let (table, table_spec) = self.target(storage, ctx, table_name)?;
                self.using(using, &table_spec);
                self.relations(table, &table_spec, relations)?;
                Ok(ResultMetadata::default())
            }
            Statement::Batch(statements) => {
                for statement in statements {
                    self.statement(storage, ctx, statement)?;
                }
                // Routing a batch by its first statement is up to the driver.
                self.pk_markers.clear();
                Ok(ResultMetadata::default())
            }
            _ => Ok(ResultMetadata::default()),
        }
    }

    fn target<'s>(
        &self,
        storage: &'s Storage,
        ctx: &Context<'_>,
        table_name: &TableName,
    ) -> EngineResult<(&'s Table, TableSpec)> {
        let keyspace = ctx.writable_keyspace(table_name)?;
        let table = storage.table(keyspace, &table_name.name)?;
        Ok((table, TableSpec::new(keyspace, &table_name.name)))
    }

    fn relations(
        &mut self,
        table: &Table,
        table_spec: &TableSpec,
        relations: &[Relation],
    ) -> EngineResult<()> {
        let mut pk_markers = Vec::new();
        for relation in relations {
            let (index, column) = table.column(&relation.column)?;
            match (relation.operator, &relation.value) {
                (Operator::In, Term::List(terms)) => {
                    for term in terms {
                        self.term(term, &column.typ, &column.name, table_spec);
                    }
                }
                (Operator::In, term) => {
                    let list_type = ColumnType::List(Box::new(column.typ.clone()));
                    self.term(term, &list_type, &format!("in({})", column.name), table_spec);
                }
                (operator, term) => {
                    self.term(term, &column.typ, &column.name, table_spec);
                    if let (Operator::Eq, true, Term::Marker { index: marker, .. }) =
                        (operator, table.is_partition_key(index), term)
                    {
                        pk_markers.push((index, *marker));
                    }
                }
            }
        }
        self.partition_key(table, pk_markers);
        Ok(())
    }

    fn using(&mut self, using: &Using, table_spec: &TableSpec) {
        if let Some(ttl) = &using.ttl {
            self.term(ttl, &ColumnType::Int, "[ttl]", table_spec);
        }
        if let Some(timestamp) = &using.timestamp {
            self.term(timestamp, &ColumnType::BigInt, "[timestamp]", table_spec);
        }
    }

    fn term(&mut self, term: &Term, typ: &ColumnType, name: &str, table_spec: &TableSpec) {
        match (term, typ) {
            (Term::Marker { index, name: marker_name }, _) => {
                if let Some(slot) = self.specs.get_mut(*index) {
                    let name = marker_name.clone().unwrap_or_else(|| name.to_owned());
                    *slot = Some(ColumnSpec::new(name, typ.clone(), table_spec.clone()));
                }
            }
            (Term::List(terms) | Term::Set(terms), ColumnType::List(element) | ColumnType::Set(element)) => {
                for term in terms {
                    self.term(term, element, name, table_spec);
                }
            }
            (Term::Map(entries), ColumnType::Map(key_type, value_type)) => {
                for (key, value) in entries {
                    self.term(key, key_type, name, table_spec);
                    self.term(value, value_type, name, table_spec);
                }
            }
            _ => {}
        }
    }

    /// Records routing information if every partition key column is bound to a marker.
    fn partition_key(&mut self, table: &Table, markers: Vec<(usize, usize)>) {
        if markers.len() != table.partition_key_len
            || (0..table.partition_key_len).any(|pk| !markers.iter().any(|(i, _)| *i == pk))
        {
            return;
        }
        let mut pk_indexes: Vec<PartitionKeyIndex> = markers
            .into_iter()
            .filter_map(|(sequence, marker)| {
                Some(PartitionKeyIndex {
                    index: u16::try_from(marker).ok()?,
                    sequence: u16::try_from(sequence).ok()?,
                })
            })
            .collect();
        pk_indexes.sort_by_key(|pk| pk.index);
        self.pk_markers = pk_indexes;
    }
}

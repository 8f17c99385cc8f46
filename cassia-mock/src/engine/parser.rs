use cassia_cql::frame::response::result::ColumnType;
use uuid::Uuid;

use super::lexer::{tokenize, Token};
use super::{syntax_error, EngineResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct TableName {
    pub(super) keyspace: Option<String>,
    pub(super) name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub(super) enum Term {
    Str(String),
    Number(String),
    Bool(bool),
    Uuid(Uuid),
    Blob(Vec<u8>),
    Null,
    List(Vec<Term>),
    Set(Vec<Term>),
    Map(Vec<(Term, Term)>),
    /// `?` or `:name`; both are bound by position.
    Marker { index: usize, name: Option<String> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Operator {
    Eq,
    Lt,
    Lte,
    Gt,
    Gte,
    /// The term is a `Term::List`, or a marker bound to a whole list.
    In,
}

#[derive(Debug, Clone, PartialEq)]
pub(super) struct Relation {
    pub(super) column: String,
    pub(super) operator: Operator,
    pub(super) value: Term,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum AssignOp {
    Set,
    /// `c = c + term`
    Add,
    /// `c = c - term`
    Sub,
}

#[derive(Debug, Clone, PartialEq)]
pub(super) struct Assignment {
    pub(super) column: String,
    pub(super) op: AssignOp,
    pub(super) value: Term,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub(super) struct Using {
    pub(super) ttl: Option<Term>,
    pub(super) timestamp: Option<Term>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) enum Selector {
    Column { name: String, alias: Option<String> },
    CountAll { alias: Option<String> },
}

#[derive(Debug, Clone, PartialEq)]
pub(super) struct Select {
    pub(super) distinct: bool,
    /// Empty means `*`.
    pub(super) selectors: Vec<Selector>,
    pub(super) table: TableName,
    pub(super) relations: Vec<Relation>,
    /// Column and whether the order is descending.
    pub(super) order_by: Vec<(String, bool)>,
    pub(super) limit: Option<Term>,
}

#[derive(Debug, Clone, PartialEq)]
pub(super) struct ColumnDefinition {
    pub(super) name: String,
    pub(super) typ: ColumnType,
}

#[derive(Debug, Clone, PartialEq)]
pub(super) enum Statement {
    CreateKeyspace {
        name: String,
        if_not_exists: bool,
        replication: Vec<(String, String)>,
        durable_writes: bool,
    },
    CreateTable {
        table: TableName,
        if_not_exists: bool,
        columns: Vec<ColumnDefinition>,
        partition_key: Vec<String>,
        clustering_key: Vec<String>,
    },
    DropKeyspace {
        name: String,
        if_exists: bool,
    },
    DropTable {
        table: TableName,
        if_exists: bool,
    },
    Truncate {
        table: TableName,
    },
    Use {
        keyspace: String,
    },
    Insert {
        table: TableName,
        columns: Vec<String>,
        values: Vec<Term>,
        if_not_exists: bool,
        using: Using,
    },
    Update {
        table: TableName,
        using: Using,
        assignments: Vec<Assignment>,
        relations: Vec<Relation>,
        if_exists: bool,
    },
    Delete {
        columns: Vec<String>,
        table: TableName,
        using: Using,
        relations: Vec<Relation>,
        if_exists: bool,
    },
    Select(Select),
    Batch(Vec<Statement>),
}

impl Statement {
    pub(super) fn is_modification(&self) -> bool {
        matches!(
            self,
            Statement::Insert { .. } | Statement::Update { .. } | Statement::Delete { .. }
        )
    }
}

/// A parsed statement with the number of its bind markers.
#[derive(Debug, Clone, PartialEq)]
pub(super) struct Parsed {
    pub(super) statement: Statement,
    pub(super) marker_count: usize,
}

pub(super) fn parse(text: &str) -> EngineResult<Parsed> {
    let mut parser = Parser {
        tokens: tokenize(text)?,
        pos: 0,
        markers: 0,
    };
    let statement = parser.statement()?;
    parser.symbol(";");
    if let Some(token) = parser.peek() {
        return Err(syntax_error(format!(
            "line 1: extraneous input {:?} after the end of the statement",
            token
        )));
    }
    Ok(Parsed {
        statement,
        marker_count: parser.markers,
    })
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    markers: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_at(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.pos + offset)
    }

    fn next(&mut self) -> EngineResult<Token> {
        let token = self
            .tokens
            .get(self.pos)
            .cloned()
            .ok_or_else(|| syntax_error("line 1: unexpected end of statement"))?;
        self.pos += 1;
        Ok(token)
    }

    fn is_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek(), Some(Token::Ident(ident)) if ident == keyword)
    }

    fn keyword(&mut self, keyword: &str) -> bool {
        let found = self.is_keyword(keyword);
        if found {
            self.pos += 1;
        }
        found
    }

    fn keywords(&mut self, keywords: &[&str]) -> bool {
        let found = keywords.iter().enumerate().all(
            |(i, kw)| matches!(self.peek_at(i), Some(Token::Ident(ident)) if ident == kw),
        );
        if found {
            self.pos += keywords.len();
        }
        found
    }

    fn expect_keyword(&mut self, keyword: &str) -> EngineResult<()> {
        if self.keyword(keyword) {
            Ok(())
        } else {
            Err(self.unexpected(&keyword.to_uppercase()))
        }
    }

    fn symbol(&mut self, symbol: &str) -> bool {
        let found = matches!(self.peek(), Some(Token::Symbol(s)) if *s == symbol);
        if found {
            self.pos += 1;
        }
        found
    }

    fn expect_symbol(&mut self, symbol: &str) -> EngineResult<()> {
        if self.symbol(symbol) {
            Ok(())
        } else {
            Err(self.unexpected(symbol))
        }
    }

    fn unexpected(&self, expected: &str) -> cassia_cql::frame::response::Error {
        match self.peek() {
            Some(token) => syntax_error(format!(
                "line 1: mismatched input {:?} expecting {}",
                token, expected
            )),
            None => syntax_error(format!("line 1: missing {} at end of statement", expected)),
        }
    }

    fn identifier(&mut self) -> EngineResult<String> {
        match self.peek() {
            Some(Token::Ident(ident)) | Some(Token::QuotedIdent(ident)) => {
                let ident = ident.clone();
                self.pos += 1;
                Ok(ident)
            }
            _ => Err(self.unexpected("an identifier")),
        }
    }

    fn table_name(&mut self) -> EngineResult<TableName> {
        let first = self.identifier()?;
        if self.symbol(".") {
            Ok(TableName {
                keyspace: Some(first),
                name: self.identifier()?,
            })
        } else {
            Ok(TableName {
                keyspace: None,
                name: first,
            })
        }
    }

    fn statement(&mut self) -> EngineResult<Statement> {
        match self.next()? {
            Token::Ident(kw) => match kw.as_str() {
                "select" => self.select().map(Statement::Select),
                "insert" => self.insert(),
                "update" => self.update(),
                "delete" => self.delete(),
                "create" => self.create(),
                "drop" => self.drop_statement(),
                "truncate" => {
                    self.keyword("table");
                    Ok(Statement::Truncate {
                        table: self.table_name()?,
                    })
                }
                "use" => Ok(Statement::Use {
                    keyspace: self.identifier()?,
                }),
                "begin" => self.batch(),
                other => Err(syntax_error(format!(
                    "line 1: no viable alternative at input '{}'",
                    other
                ))),
            },
            other => Err(syntax_error(format!(
                "line 1: no viable alternative at input {:?}",
                other
            ))),
        }
    }

    fn select(&mut self) -> EngineResult<Select> {
        let distinct = self.keyword("distinct");
        let mut selectors = Vec::new();
        if !self.symbol("*") {
            loop {
                selectors.push(self.selector()?);
                if !self.symbol(",") {
                    break;
                }
            }
        }
        self.expect_keyword("from")?;
        let table = self.table_name()?;
        let relations = self.where_clause()?;

        let mut order_by = Vec::new();
        if self.keywords(&["order", "by"]) {
            loop {
                let column = self.identifier()?;
                let descending = if self.keyword("desc") {
                    true
                } else {
                    self.keyword("asc");
                    false
                };
                order_by.push((column, descending));
                if !self.symbol(",") {
                    break;
                }
            }
        }

        let limit = if self.keyword("limit") {
            Some(self.term()?)
        } else {
            None
        };
        self.keywords(&["allow", "filtering"]);

        Ok(Select {
            distinct,
            selectors,
            table,
            relations,
            order_by,
            limit,
        })
    }

    fn selector(&mut self) -> EngineResult<Selector> {
        let is_count = self.is_keyword("count")
            && matches!(self.peek_at(1), Some(Token::Symbol("(")));
        let selector = if is_count {
            self.pos += 2;
            if !self.symbol("*") && !matches!(self.next()?, Token::Number(n) if n == "1") {
                return Err(syntax_error("only COUNT(*) and COUNT(1) are supported"));
            }
            self.expect_symbol(")")?;
            Selector::CountAll { alias: None }
        } else {
            Selector::Column {
                name: self.identifier()?,
                alias: None,
            }
        };

        if !self.keyword("as") {
            return Ok(selector);
        }
        let alias = Some(self.identifier()?);
        Ok(match selector {
            Selector::Column { name, .. } => Selector::Column { name, alias },
            Selector::CountAll { .. } => Selector::CountAll { alias },
        })
    }

    fn where_clause(&mut self) -> EngineResult<Vec<Relation>> {
        let mut relations = Vec::new();
        if self.keyword("where") {
            loop {
                relations.push(self.relation()?);
                if !self.keyword("and") {
                    break;
                }
            }
        }
        Ok(relations)
    }

    fn relation(&mut self) -> EngineResult<Relation> {
        let column = self.identifier()?;
        let operator = match self.next()? {
            Token::Symbol("=") => Operator::Eq,
            Token::Symbol("<") => Operator::Lt,
            Token::Symbol("<=") => Operator::Lte,
            Token::Symbol(">") => Operator::Gt,
            Token::Symbol(">=") => Operator::Gte,
            Token::Ident(kw) if kw == "in" => Operator::In,
            other => {
                return Err(syntax_error(format!(
                    "line 1: unsupported relation operator {:?} on column {}",
                    other, column
                )))
            }
        };

        let value = if operator == Operator::In && self.symbol("(") {
            Term::List(self.terms_until(")")?)
        } else {
            self.term()?
        };

        Ok(Relation {
            column,
            operator,
            value,
        })
    }

    fn terms_until(&mut self, closing: &str) -> EngineResult<Vec<Term>> {
        let mut terms = Vec::new();
        if self.symbol(closing) {
            return Ok(terms);
        }
        loop {
            terms.push(self.term()?);
            if self.symbol(closing) {
                return Ok(terms);
            }
            self.expect_symbol(",")?;
        }
    }

    fn term(&mut self) -> EngineResult<Term> {
        let term = match self.next()? {
            Token::Str(s) => Term::Str(s),
            Token::Number(n) => Term::Number(n),
            Token::Symbol("-") => match self.next()? {
                Token::Number(n) => Term::Number(format!("-{}", n)),
                other => {
                    return Err(syntax_error(format!(
                        "line 1: no viable alternative at input '-' {:?}",
                        other
                    )))
                }
            },
            Token::Uuid(uuid) => Term::Uuid(uuid),
            Token::Blob(blob) => Term::Blob(blob),
            Token::Ident(kw) if kw == "true" => Term::Bool(true),
            Token::Ident(kw) if kw == "false" => Term::Bool(false),
            Token::Ident(kw) if kw == "null" => Term::Null,
            Token::Marker => self.marker(None),
            Token::NamedMarker(name) => self.marker(Some(name)),
            Token::Symbol("[") => Term::List(self.terms_until("]")?),
            Token::Symbol("{") => self.braced()?,
            other => {
                return Err(syntax_error(format!(
                    "line 1: no viable alternative at input {:?}",
                    other
                )))
            }
        };
        Ok(term)
    }

    fn marker(&mut self, name: Option<String>) -> Term {
        let index = self.markers;
        self.markers += 1;
        Term::Marker { index, name }
    }

    /// A set or a map literal; `{}` is an empty map.
    fn braced(&mut self) -> EngineResult<Term> {
        if self.symbol("}") {
            return Ok(Term::Map(Vec::new()));
        }
        let first = self.term()?;
        if self.symbol(":") {
            let mut entries = vec![(first, self.term()?)];
            while self.symbol(",") {
                let key = self.term()?;
                self.expect_symbol(":")?;
                entries.push((key, self.term()?));
            }
            self.expect_symbol("}")?;
            Ok(Term::Map(entries))
        } else {
            let mut elements = vec![first];
            while self.symbol(",") {
                elements.push(self.term()?);
            }
            self.expect_symbol("}")?;
            Ok(Term::Set(elements))
        }
    }

    fn using(&mut self) -> EngineResult<Using> {
        let mut using = Using::default();
        if !self.keyword("using") {
            return Ok(using);
        }
        loop {
            if self.keyword("ttl") {
                using.ttl = Some(self.term()?);
            } else if self.keyword("timestamp") {
                using.timestamp = Some(self.term()?);
            } else {
                return Err(self.unexpected("TTL or TIMESTAMP"));
            }
            if !self.keyword("and") {
                return Ok(using);
            }
        }
    }

    fn insert(&mut self) -> EngineResult<Statement> {
        self.expect_keyword("into")?;
        let table = self.table_name()?;

        self.expect_symbol("(")?;
        let mut columns = vec![self.identifier()?];
        while self.symbol(",") {
            columns.push(self.identifier()?);
        }
        self.expect_symbol(")")?;

        self.expect_keyword("values")?;
        self.expect_symbol("(")?;
        let values = self.terms_until(")")?;
        if values.len() != columns.len() {
            return Err(syntax_error(format!(
                "Unmatched column names/values: {} columns, {} values",
                columns.len(),
                values.len()
            )));
        }

        let mut if_not_exists = self.keywords(&["if", "not", "exists"]);
        let using = self.using()?;
        if !if_not_exists {
            if_not_exists = self.keywords(&["if", "not", "exists"]);
        }

        Ok(Statement::Insert {
            table,
            columns,
            values,
            if_not_exists,
            using,
        })
    }

    fn update(&mut self) -> EngineResult<Statement> {
        let table = self.table_name()?;
        let using = self.using()?;
        self.expect_keyword("set")?;

        let mut assignments = Vec::new();
        loop {
            assignments.push(self.assignment()?);
            if !self.symbol(",") {
                break;
            }
        }

        let relations = self.where_clause()?;
        let if_exists = self.keywords(&["if", "exists"]);
        Ok(Statement::Update {
            table,
            using,
            assignments,
            relations,
            if_exists,
        })
    }

    fn assignment(&mut self) -> EngineResult<Assignment> {
        let column = self.identifier()?;
        self.expect_symbol("=")?;

        let refers_to_itself = matches!(
            (self.peek(), self.peek_at(1)),
            (Some(Token::Ident(c)) | Some(Token::QuotedIdent(c)), Some(Token::Symbol("+" | "-")))
                if *c == column
        );
        if refers_to_itself {
            self.pos += 1;
            let op = match self.next()? {
                Token::Symbol("+") => AssignOp::Add,
                _ => AssignOp::Sub,
            };
            return Ok(Assignment {
                column,
                op,
                value: self.term()?,
            });
        }

        Ok(Assignment {
            column,
            op: AssignOp::Set,
            value: self.term()?,
        })
    }

    fn delete(&mut self) -> EngineResult<Statement> {
        let mut columns = Vec::new();
        if !self.is_keyword("from") {
            loop {
                columns.push(self.identifier()?);
                if !self.symbol(",") {
                    break;
                }
            }
        }
        self.expect_keyword("from")?;
        let table = self.table_name()?;
        let using = self.using()?;
        let relations = self.where_clause()?;
        let if_exists = self.keywords(&["if", "exists"]);

        Ok(Statement::Delete {
            columns,
            table,
            using,
            relations,
            if_exists,
        })
    }

    fn create(&mut self) -> EngineResult<Statement> {
        if self.keyword("keyspace") {
            self.create_keyspace()
        } else if self.keyword("table") || self.keyword("columnfamily") {
            self.create_table()
        } else {
            Err(self.unexpected("KEYSPACE or TABLE"))
        }
    }

    fn create_keyspace(&mut self) -> EngineResult<Statement> {
        let if_not_exists = self.keywords(&["if", "not", "exists"]);
        let name = self.identifier()?;
        self.expect_keyword("with")?;

        let mut replication = None;
        let mut durable_writes = true;
        loop {
            let option = self.identifier()?;
            self.expect_symbol("=")?;
            match option.as_str() {
                "replication" => replication = Some(self.string_map()?),
                "durable_writes" => match self.term()? {
                    Term::Bool(value) => durable_writes = value,
                    other => {
                        return Err(syntax_error(format!(
                            "durable_writes must be a boolean, got {:?}",
                            other
                        )))
                    }
                },
                other => {
                    return Err(syntax_error(format!("Unknown keyspace property '{}'", other)))
                }
            }
            if !self.keyword("and") {
                break;
            }
        }

        let replication =
            replication.ok_or_else(|| syntax_error("Missing mandatory option 'replication'"))?;
        Ok(Statement::CreateKeyspace {
            name,
            if_not_exists,
            replication,
            durable_writes,
        })
    }

    fn string_map(&mut self) -> EngineResult<Vec<(String, String)>> {
        let entries = match self.term()? {
            Term::Map(entries) => entries,
            other => return Err(syntax_error(format!("expected a map, got {:?}", other))),
        };
        entries
            .into_iter()
            .map(|entry| match entry {
                (Term::Str(key), Term::Str(value) | Term::Number(value)) => Ok((key, value)),
                other => Err(syntax_error(format!("bad map entry {:?}", other))),
            })
            .collect()
    }

    fn create_table(&mut self) -> EngineResult<Statement> {
        let if_not_exists = self.keywords(&["if", "not", "exists"]);
        let table = self.table_name()?;
        self.expect_symbol("(")?;

        let mut columns = Vec::new();
        let mut primary_key: Option<(Vec<String>, Vec<String>)> = None;
        loop {
            if self.keywords(&["primary", "key"]) {
                primary_key = Some(self.primary_key_definition()?);
            } else {
                let name = self.identifier()?;
                let typ = self.cql_type()?;
                self.keyword("static");
                if self.keywords(&["primary", "key"]) {
                    primary_key = Some((vec![name.clone()], Vec::new()));
                }
                columns.push(ColumnDefinition { name, typ });
            }
            if self.symbol(")") {
                break;
            }
            self.expect_symbol(",")?;
        }

        // Table options (clustering order, compaction, ...) do not matter here.
        if self.keyword("with") {
            while self.peek().is_some() && !matches!(self.peek(), Some(Token::Symbol(";"))) {
                self.pos += 1;
            }
        }

        let (partition_key, clustering_key) = primary_key
            .ok_or_else(|| syntax_error("No PRIMARY KEY specified (exactly one required)"))?;
        Ok(Statement::CreateTable {
            table,
            if_not_exists,
            columns,
            partition_key,
            clustering_key,
        })
    }

    fn primary_key_definition(&mut self) -> EngineResult<(Vec<String>, Vec<String>)> {
        self.expect_symbol("(")?;
        let partition_key = if self.symbol("(") {
            let mut columns = vec![self.identifier()?];
            while self.symbol(",") {
                columns.push(self.identifier()?);
            }
            self.expect_symbol(")")?;
            columns
        } else {
            vec![self.identifier()?]
        };

        let mut clustering_key = Vec::new();
        while self.symbol(",") {
            clustering_key.push(self.identifier()?);
        }
        self.expect_symbol(")")?;
        Ok((partition_key, clustering_key))
    }

    fn cql_type(&mut self) -> EngineResult<ColumnType> {
        let name = self.identifier()?;
        let typ = match name.as_str() {
            "ascii" => ColumnType::Ascii,
            "bigint" => ColumnType::BigInt,
            "blob" => ColumnType::Blob,
            "boolean" => ColumnType::Boolean,
            "counter" => ColumnType::Counter,
            "date" => ColumnType::Date,
            "decimal" => ColumnType::Decimal,
            "double" => ColumnType::Double,
            "duration" => ColumnType::Duration,
            "float" => ColumnType::Float,
            "inet" => ColumnType::Inet,
            "int" => ColumnType::Int,
            "smallint" => ColumnType::SmallInt,
            "text" | "varchar" => ColumnType::Text,
            "time" => ColumnType::Time,
            "timestamp" => ColumnType::Timestamp,
            "timeuuid" => ColumnType::Timeuuid,
            "tinyint" => ColumnType::TinyInt,
            "uuid" => ColumnType::Uuid,
            "varint" => ColumnType::Varint,
            "frozen" => {
                self.expect_symbol("<")?;
                let inner = self.cql_type()?;
                self.expect_symbol(">")?;
                inner
            }
            "list" | "set" => {
                self.expect_symbol("<")?;
                let element = Box::new(self.cql_type()?);
                self.expect_symbol(">")?;
                if name == "list" {
                    ColumnType::List(element)
                } else {
                    ColumnType::Set(element)
                }
            }
            "map" => {
                self.expect_symbol("<")?;
                let key = Box::new(self.cql_type()?);
                self.expect_symbol(",")?;
                let value = Box::new(self.cql_type()?);
                self.expect_symbol(">")?;
                ColumnType::Map(key, value)
            }
            "tuple" => {
                self.expect_symbol("<")?;
                let mut elements = vec![self.cql_type()?];
                while self.symbol(",") {
                    elements.push(self.cql_type()?);
                }
                self.expect_symbol(">")?;
                ColumnType::Tuple(elements)
            }
            other => return Err(syntax_error(format!("Unknown type {}", other))),
        };
        Ok(typ)
    }

    fn drop_statement(&mut self) -> EngineResult<Statement> {
        if self.keyword("keyspace") {
            let if_exists = self.keywords(&["if", "exists"]);
            Ok(Statement::DropKeyspace {
                if_exists,
                name: self.identifier()?,
            })
        } else if self.keyword("table") || self.keyword("columnfamily") {
            let if_exists = self.keywords(&["if", "exists"]);
            Ok(Statement::DropTable {
                if_exists,
                table: self.table_name()?,
            })
        } else {
            Err(self.unexpected("KEYSPACE or TABLE"))
        }
    }

    fn batch(&mut self) -> EngineResult<Statement> {
        if !self.keyword("unlogged") {
            self.keyword("counter");
        }
        self.expect_keyword("batch")?;
        self.using()?;

        let mut statements = Vec::new();
        while !self.keywords(&["apply", "batch"]) {
            let statement = self.statement()?;
            if !statement.is_modification() {
                return Err(syntax_error(
                    "Only INSERT, UPDATE and DELETE statements are allowed in a batch",
                ));
            }
            statements.push(statement);
            self.symbol(";");
        }
        Ok(Statement::Batch(statements))
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn table(keyspace: Option<&str>, name: &str) -> TableName {
        TableName {
            keyspace: keyspace.map(ToOwned::to_owned),
            name: name.to_owned(),
        }
    }

    fn marker(index: usize) -> Term {
        Term::Marker { index, name: None }
    }

    #[test]
    fn select_with_everything() {
        let parsed = parse(
            "SELECT firstname, age AS years FROM demo.users WHERE lastname = ? AND age >= 30 \
             AND city IN ('Austin', :c) ORDER BY age DESC LIMIT 10 ALLOW FILTERING;",
        )
        .unwrap();
        assert_eq!(parsed.marker_count, 2);
        assert_eq!(
            parsed.statement,
            Statement::Select(Select {
                distinct: false,
                selectors: vec![
                    Selector::Column {
                        name: "firstname".to_owned(),
                        alias: None
                    },
                    Selector::Column {
                        name: "age".to_owned(),
                        alias: Some("years".to_owned())
                    },
                ],
                table: table(Some("demo"), "users"),
                relations: vec![
                    Relation {
                        column: "lastname".to_owned(),
                        operator: Operator::Eq,
                        value: marker(0),
                    },
                    Relation {
                        column: "age".to_owned(),
                        operator: Operator::Gte,
                        value: Term::Number("30".to_owned()),
                    },
                    Relation {
                        column: "city".to_owned(),
                        operator: Operator::In,
                        value: Term::List(vec![
                            Term::Str("Austin".to_owned()),
                            Term::Marker {
                                index: 1,
                                name: Some("c".to_owned())
                            },
                        ]),
                    },
                ],
                order_by: vec![("age".to_owned(), true)],
                limit: Some(Term::Number("10".to_owned())),
            })
        );
    }

    #[test]
    fn count_star() {
        let parsed = parse("select count(*) from t").unwrap();
        assert_matches!(
            parsed.statement,
            Statement::Select(Select { selectors, .. })
                if selectors == vec![Selector::CountAll { alias: None }]
        );
    }

    #[test]
    fn insert_with_options_in_either_order() {
        for text in [
            "INSERT INTO users (lastname, age) VALUES (?, 35) IF NOT EXISTS USING TTL 10",
            "INSERT INTO users (lastname, age) VALUES (?, 35) USING TTL 10 IF NOT EXISTS",
        ] {
            assert_eq!(
                parse(text).unwrap().statement,
                Statement::Insert {
                    table: table(None, "users"),
                    columns: vec!["lastname".to_owned(), "age".to_owned()],
                    values: vec![marker(0), Term::Number("35".to_owned())],
                    if_not_exists: true,
                    using: Using {
                        ttl: Some(Term::Number("10".to_owned())),
                        timestamp: None,
                    },
                }
            );
        }
        assert!(parse("INSERT INTO users (a, b) VALUES (1)").is_err());
    }

    #[test]
    fn update_and_delete() {
        assert_eq!(
            parse("UPDATE users USING TIMESTAMP 5 SET age = 36, visits = visits + 1 WHERE lastname = 'Jones' IF EXISTS")
                .unwrap()
                .statement,
            Statement::Update {
                table: table(None, "users"),
                using: Using {
                    ttl: None,
                    timestamp: Some(Term::Number("5".to_owned())),
                },
                assignments: vec![
                    Assignment {
                        column: "age".to_owned(),
                        op: AssignOp::Set,
                        value: Term::Number("36".to_owned()),
                    },
                    Assignment {
                        column: "visits".to_owned(),
                        op: AssignOp::Add,
                        value: Term::Number("1".to_owned()),
                    },
                ],
                relations: vec![Relation {
                    column: "lastname".to_owned(),
                    operator: Operator::Eq,
                    value: Term::Str("Jones".to_owned()),
                }],
                if_exists: true,
            }
        );

        assert_eq!(
            parse("DELETE email FROM users WHERE lastname = ?").unwrap().statement,
            Statement::Delete {
                columns: vec!["email".to_owned()],
                table: table(None, "users"),
                using: Using::default(),
                relations: vec![Relation {
                    column: "lastname".to_owned(),
                    operator: Operator::Eq,
                    value: marker(0),
                }],
                if_exists: false,
            }
        );
    }

    #[test]
    fn schema_statements() {
        assert_eq!(
            parse("CREATE KEYSPACE IF NOT EXISTS demo WITH replication = {'class': 'SimpleStrategy', 'replication_factor': 3} AND durable_writes = false")
                .unwrap()
                .statement,
            Statement::CreateKeyspace {
                name: "demo".to_owned(),
                if_not_exists: true,
                replication: vec![
                    ("class".to_owned(), "SimpleStrategy".to_owned()),
                    ("replication_factor".to_owned(), "3".to_owned()),
                ],
                durable_writes: false,
            }
        );

        assert_eq!(
            parse("CREATE TABLE demo.events (day date, seq int, tags set<text>, attrs frozen<map<text, int>>, PRIMARY KEY ((day), seq)) WITH CLUSTERING ORDER BY (seq DESC)")
                .unwrap()
                .statement,
            Statement::CreateTable {
                table: table(Some("demo"), "events"),
                if_not_exists: false,
                columns: vec![
                    ColumnDefinition { name: "day".to_owned(), typ: ColumnType::Date },
                    ColumnDefinition { name: "seq".to_owned(), typ: ColumnType::Int },
                    ColumnDefinition {
                        name: "tags".to_owned(),
                        typ: ColumnType::Set(Box::new(ColumnType::Text)),
                    },
                    ColumnDefinition {
                        name: "attrs".to_owned(),
                        typ: ColumnType::Map(Box::new(ColumnType::Text), Box::new(ColumnType::Int)),
                    },
                ],
                partition_key: vec!["day".to_owned()],
                clustering_key: vec!["seq".to_owned()],
            }
        );

        assert_matches!(
            parse("CREATE TABLE t (a int PRIMARY KEY, b text)").unwrap().statement,
            Statement::CreateTable { partition_key, clustering_key, .. }
                if partition_key == vec!["a".to_owned()] && clustering_key.is_empty()
        );
        assert!(parse("CREATE TABLE t (a int, b text)").is_err());
        assert_matches!(
            parse("DROP KEYSPACE IF EXISTS demo").unwrap().statement,
            Statement::DropKeyspace { if_exists: true, .. }
        );
        assert_matches!(
            parse(r#"USE "Demo""#).unwrap().statement,
            Statement::Use { keyspace } if keyspace == "Demo"
        );
    }

    #[test]
    fn batch_statement_counts_markers_across_children() {
        let parsed = parse(
            "BEGIN BATCH INSERT INTO t (a) VALUES (?); DELETE FROM t WHERE a = ?; APPLY BATCH",
        )
        .unwrap();
        assert_eq!(parsed.marker_count, 2);
        assert_matches!(parsed.statement, Statement::Batch(children) if children.len() == 2);
        assert!(parse("BEGIN BATCH SELECT * FROM t; APPLY BATCH").is_err());
    }

    #[test]
    fn trailing_garbage_is_rejected() {
        assert!(parse("SELECT * FROM t garbage").is_err());
        assert!(parse("SELEC * FROM t").is_err());
        assert!(parse("").is_err());
    }
}

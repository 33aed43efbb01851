//! Operation templates, prepared / bound statements and the frozen statement cache.

use crate::carrier::{GettableData, Row, SettableData, Slot};
use crate::entity::EntityClass;
use crate::error::MappingError;
use crate::schema::{SchemaStatement, TableMetadata};
use crate::wire::WireValue;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Static operations prepared for every managed entity during bootstrap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OperationKind {
    InsertAll,
    InsertIfNotExists,
    SelectByKey,
    DeleteByKey,
}

impl OperationKind {
    pub const ALL: [OperationKind; 4] =
        [OperationKind::InsertAll, OperationKind::InsertIfNotExists, OperationKind::SelectByKey, OperationKind::DeleteByKey];
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OperationKind::InsertAll => "insert",
            OperationKind::InsertIfNotExists => "insert_if_not_exists",
            OperationKind::SelectByKey => "select_by_key",
            OperationKind::DeleteByKey => "delete_by_key",
        };
        f.write_str(name)
    }
}

/// Query text plus the ordered bind variable names, ready to be prepared by a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatementTemplate {
    pub entity: EntityClass,
    pub kind: OperationKind,
    pub keyspace: Option<String>,
    pub table: String,
    pub cql: String,
    pub variables: Vec<String>,
    /// Columns returned by a select, empty otherwise.
    pub columns: Vec<String>,
}

impl StatementTemplate {
    pub fn for_table(entity: EntityClass, kind: OperationKind, table: &TableMetadata) -> Self {
        let qualified = table.qualified_name();
        let all: Vec<String> = table.columns.iter().map(|c| c.name.clone()).collect();
        let key: Vec<String> = table.primary_key().iter().map(|c| c.name.clone()).collect();
        let markers = |names: &[String]| names.iter().map(|n| format!(":{}", n)).collect::<Vec<_>>().join(", ");
        let restriction = key.iter().map(|n| format!("{} = :{}", n, n)).collect::<Vec<_>>().join(" AND ");

        let (cql, variables, columns) = match kind {
            OperationKind::InsertAll => {
                (format!("INSERT INTO {} ({}) VALUES ({})", qualified, all.join(", "), markers(&all)), all, Vec::new())
            }
            OperationKind::InsertIfNotExists => (
                format!("INSERT INTO {} ({}) VALUES ({}) IF NOT EXISTS", qualified, all.join(", "), markers(&all)),
                all,
                Vec::new(),
            ),
            OperationKind::SelectByKey => {
                (format!("SELECT {} FROM {} WHERE {}", all.join(", "), qualified, restriction), key, all)
            }
            OperationKind::DeleteByKey => (format!("DELETE FROM {} WHERE {}", qualified, restriction), key, Vec::new()),
        };
        StatementTemplate {
            entity,
            kind,
            keyspace: table.keyspace.clone(),
            table: table.name.clone(),
            cql,
            variables,
            columns,
        }
    }

    pub fn variable_index(&self, name: &str) -> Option<usize> {
        self.variables.iter().position(|v| v == name)
    }
}

#[derive(Debug, Clone)]
pub struct PreparedStatement {
    pub id: u64,
    template: Arc<StatementTemplate>,
}

impl PreparedStatement {
    pub fn new(id: u64, template: StatementTemplate) -> Self {
        PreparedStatement { id, template: Arc::new(template) }
    }

    pub fn template(&self) -> &StatementTemplate {
        &self.template
    }

    /// Fresh statement with every variable unset.
    pub fn bind(&self) -> BoundStatement {
        BoundStatement { statement_id: self.id, template: Arc::clone(&self.template), values: vec![None; self.template.variables.len()] }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BoundStatement {
    pub statement_id: u64,
    template: Arc<StatementTemplate>,
    values: Vec<Option<WireValue>>,
}

impl BoundStatement {
    pub fn template(&self) -> &StatementTemplate {
        &self.template
    }

    /// Variables and their values, unset ones skipped.
    pub fn bound_values(&self) -> impl Iterator<Item = (&str, &WireValue)> {
        self.template.variables.iter().zip(&self.values).filter_map(|(name, v)| v.as_ref().map(|v| (name.as_str(), v)))
    }

    pub fn is_set(&self, name: &str) -> bool {
        self.template.variable_index(name).and_then(|i| self.values[i].as_ref()).is_some()
    }

    fn index_of(&self, slot: Slot<'_>) -> Result<usize, MappingError> {
        match slot {
            Slot::Named(name) => self
                .template
                .variable_index(name)
                .ok_or_else(|| MappingError::UnknownColumn(format!("{} has no bind variable `{}`", self.template.kind, name))),
            Slot::Positional(i) if i < self.values.len() => Ok(i),
            other => Err(MappingError::UnknownColumn(format!("{} has no bind variable {}", self.template.kind, other))),
        }
    }
}

impl SettableData for BoundStatement {
    fn set_value(&mut self, slot: Slot<'_>, value: WireValue) -> Result<(), MappingError> {
        let idx = self.index_of(slot)?;
        self.values[idx] = Some(value);
        Ok(())
    }

    fn unset(&mut self, slot: Slot<'_>) -> Result<(), MappingError> {
        let idx = self.index_of(slot)?;
        self.values[idx] = None;
        Ok(())
    }
}

impl GettableData for BoundStatement {
    fn get_value(&self, slot: Slot<'_>) -> Result<Option<&WireValue>, MappingError> {
        let idx = self.index_of(slot)?;
        Ok(self.values[idx].as_ref())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Bound(BoundStatement),
    Schema(SchemaStatement),
    Simple(String),
}

impl Statement {
    pub fn cql(&self) -> &str {
        match self {
            Statement::Bound(b) => &b.template.cql,
            Statement::Schema(s) => &s.cql,
            Statement::Simple(cql) => cql,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResultSet {
    pub rows: Vec<Row>,
    /// False when a conditional write was not applied.
    pub applied: bool,
}

impl ResultSet {
    pub fn empty() -> Self {
        ResultSet { rows: Vec::new(), applied: true }
    }

    pub fn not_applied() -> Self {
        ResultSet { rows: Vec::new(), applied: false }
    }

    pub fn of(rows: Vec<Row>) -> Self {
        ResultSet { rows, applied: true }
    }

    pub fn first(&self) -> Option<&Row> {
        self.rows.first()
    }
}

/// Prepared statements keyed by (entity, operation). Immutable once bootstrap hands it out.
#[derive(Debug, Default)]
pub struct StatementCache {
    statements: HashMap<(EntityClass, OperationKind), PreparedStatement>,
}

impl StatementCache {
    pub(crate) fn builder() -> StatementCacheBuilder {
        StatementCacheBuilder { statements: HashMap::new() }
    }

    pub fn get(&self, entity: EntityClass, kind: OperationKind) -> Option<&PreparedStatement> {
        self.statements.get(&(entity, kind))
    }

    pub fn contains_entity(&self, entity: EntityClass) -> bool {
        self.statements.keys().any(|(e, _)| *e == entity)
    }

    pub fn len(&self) -> usize {
        self.statements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }
}

pub(crate) struct StatementCacheBuilder {
    statements: HashMap<(EntityClass, OperationKind), PreparedStatement>,
}

impl StatementCacheBuilder {
    pub fn insert(&mut self, prepared: PreparedStatement) {
        let key = (prepared.template().entity, prepared.template().kind);
        self.statements.insert(key, prepared);
    }

    pub fn freeze(self) -> Arc<StatementCache> {
        Arc::new(StatementCache { statements: self.statements })
    }
}

//! Session backed by process memory. Records every issued statement, useful for tests and embedding.

use crate::carrier::Row;
use crate::entity::EntityClass;
use crate::error::MappingError;
use crate::registry::CodecRegistry;
use crate::schema::{qualify, SchemaChange, TableMetadata};
use crate::session::{SchemaInspector, Session};
use crate::statement::{BoundStatement, OperationKind, PreparedStatement, ResultSet, Statement, StatementTemplate};
use crate::wire::{DataType, ProtocolVersion, UserType, WireValue};
use crate::{debug, trace};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Default)]
struct MemoryState {
    issued: Vec<String>,
    types: HashMap<String, UserType>,
    tables: HashMap<String, TableMetadata>,
    rows: HashMap<String, Vec<Row>>,
    prepared: Vec<(EntityClass, OperationKind)>,
    created_types: Vec<String>,
    created_tables: Vec<String>,
}

pub struct MemorySession {
    protocol_version: ProtocolVersion,
    registry: Arc<CodecRegistry>,
    state: Mutex<MemoryState>,
    next_id: AtomicU64,
    closed: AtomicBool,
    close_calls: AtomicUsize,
}

impl Default for MemorySession {
    fn default() -> Self {
        Self::new(ProtocolVersion::default())
    }
}

fn key_of(keyspace: Option<&str>, name: &str) -> String {
    qualify(keyspace, name).to_lowercase()
}

impl MemorySession {
    pub fn new(protocol_version: ProtocolVersion) -> Self {
        MemorySession {
            protocol_version,
            registry: Arc::new(CodecRegistry::new()),
            state: Mutex::new(MemoryState::default()),
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
            close_calls: AtomicUsize::new(0),
        }
    }

    /// Pre-existing table, as if created out of band.
    pub fn with_table(self, table: TableMetadata) -> Self {
        if let Ok(mut state) = self.state.lock() {
            let key = key_of(table.keyspace.as_deref(), &table.name);
            state.rows.entry(key.clone()).or_default();
            state.tables.insert(key, table);
        }
        self
    }

    pub fn with_type(self, user_type: UserType) -> Self {
        if let Ok(mut state) = self.state.lock() {
            state.types.insert(key_of(user_type.keyspace.as_deref(), &user_type.name), user_type);
        }
        self
    }

    fn state(&self) -> Result<MutexGuard<'_, MemoryState>, MappingError> {
        Ok(self.state.lock()?)
    }

    fn read<T>(&self, f: impl FnOnce(&MemoryState) -> T) -> T {
        match self.state.lock() {
            Ok(state) => f(&state),
            Err(poisoned) => f(&poisoned.into_inner()),
        }
    }

    /// Every statement text in execution order.
    pub fn issued(&self) -> Vec<String> {
        self.read(|s| s.issued.clone())
    }

    /// Qualified names of types created through this session.
    pub fn created_types(&self) -> Vec<String> {
        self.read(|s| s.created_types.clone())
    }

    pub fn created_tables(&self) -> Vec<String> {
        self.read(|s| s.created_tables.clone())
    }

    pub fn prepared(&self) -> Vec<(EntityClass, OperationKind)> {
        self.read(|s| s.prepared.clone())
    }

    pub fn rows(&self, keyspace: Option<&str>, table: &str) -> Vec<Row> {
        self.read(|s| s.rows.get(&key_of(keyspace, table)).cloned().unwrap_or_default())
    }

    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> Result<(), MappingError> {
        if self.is_closed() {
            Err(MappingError::Session("session is closed".to_string()))
        } else {
            Ok(())
        }
    }
}

impl MemoryState {
    fn missing_types(&self, data_type: &DataType, keyspace: Option<&str>, out: &mut Vec<String>) {
        match data_type {
            DataType::Udt { keyspace: ks, name } => {
                let key = key_of(ks.as_deref().or(keyspace), name);
                if !self.types.contains_key(&key) {
                    out.push(key);
                }
            }
            DataType::List(e) | DataType::Set(e) => self.missing_types(e, keyspace, out),
            DataType::Map(k, v) => {
                self.missing_types(k, keyspace, out);
                self.missing_types(v, keyspace, out);
            }
            DataType::Tuple(components) => components.iter().for_each(|c| self.missing_types(c, keyspace, out)),
            _ => {}
        }
    }

    fn apply_schema(&mut self, change: &SchemaChange) -> Result<(), MappingError> {
        match change {
            SchemaChange::CreateType(user_type) => {
                let mut missing = Vec::new();
                for (_, field_type) in &user_type.fields {
                    self.missing_types(field_type, user_type.keyspace.as_deref(), &mut missing);
                }
                if let Some(name) = missing.first() {
                    return Err(MappingError::Session(format!("unknown type {} in {}", name, user_type.qualified_name())));
                }
                let key = key_of(user_type.keyspace.as_deref(), &user_type.name);
                if !self.types.contains_key(&key) {
                    self.types.insert(key, user_type.as_ref().clone());
                    self.created_types.push(user_type.qualified_name());
                }
            }
            SchemaChange::CreateTable(table) => {
                let mut missing = Vec::new();
                for column in &table.columns {
                    self.missing_types(&column.data_type, table.keyspace.as_deref(), &mut missing);
                }
                if let Some(name) = missing.first() {
                    return Err(MappingError::Session(format!("unknown type {} in {}", name, table.qualified_name())));
                }
                let key = key_of(table.keyspace.as_deref(), &table.name);
                if !self.tables.contains_key(&key) {
                    self.rows.entry(key.clone()).or_default();
                    self.tables.insert(key, table.clone());
                    self.created_tables.push(table.qualified_name());
                }
            }
        }
        Ok(())
    }

    fn table_of(&self, bound: &BoundStatement) -> Result<(String, &TableMetadata), MappingError> {
        let template = bound.template();
        let key = key_of(template.keyspace.as_deref(), &template.table);
        let table = self
            .tables
            .get(&key)
            .ok_or_else(|| MappingError::Session(format!("unconfigured table {}", template.table)))?;
        Ok((key, table))
    }

    fn run_bound(&mut self, bound: &BoundStatement) -> Result<ResultSet, MappingError> {
        let (key, table) = self.table_of(bound)?;
        let key_columns: Vec<String> = table.primary_key().iter().map(|c| c.name.clone()).collect();
        let values: HashMap<&str, &WireValue> = bound.bound_values().collect();
        let mut key_values = Vec::with_capacity(key_columns.len());
        for column in &key_columns {
            match values.get(column.as_str()) {
                Some(value) if !value.is_null() => key_values.push((column.clone(), (*value).clone())),
                _ => return Err(MappingError::Session(format!("key column {} is not bound", column))),
            }
        }
        let kind = bound.template().kind;
        let rows = self.rows.entry(key).or_default();
        let position = rows.iter().position(|row| key_values.iter().all(|(c, v)| row.get(c) == Some(v)));
        trace!("{} on {} matched row {:?}", kind, bound.template().table, position);

        match kind {
            OperationKind::InsertIfNotExists if position.is_some() => Ok(ResultSet::not_applied()),
            OperationKind::InsertAll | OperationKind::InsertIfNotExists => {
                let row = match position {
                    Some(i) => &mut rows[i],
                    None => {
                        rows.push(Row::new());
                        let last = rows.len() - 1;
                        &mut rows[last]
                    }
                };
                // unset variables leave existing cells untouched
                for (column, value) in values {
                    row.put(column, value.clone());
                }
                Ok(ResultSet::empty())
            }
            OperationKind::SelectByKey => {
                let selected = position.map(|i| {
                    let stored = &rows[i];
                    bound
                        .template()
                        .columns
                        .iter()
                        .fold(Row::new(), |row, c| row.with(c, stored.get(c).cloned().unwrap_or(WireValue::Null)))
                });
                Ok(ResultSet::of(selected.into_iter().collect()))
            }
            OperationKind::DeleteByKey => {
                if let Some(i) = position {
                    rows.remove(i);
                }
                Ok(ResultSet::empty())
            }
        }
    }
}

#[async_trait]
impl SchemaInspector for MemorySession {
    async fn describe_table(&self, keyspace: Option<&str>, table: &str) -> Result<Option<TableMetadata>, MappingError> {
        self.ensure_open()?;
        Ok(self.state()?.tables.get(&key_of(keyspace, table)).cloned())
    }

    async fn describe_type(&self, keyspace: Option<&str>, name: &str) -> Result<Option<UserType>, MappingError> {
        self.ensure_open()?;
        Ok(self.state()?.types.get(&key_of(keyspace, name)).cloned())
    }
}

#[async_trait]
impl Session for MemorySession {
    fn protocol_version(&self) -> ProtocolVersion {
        self.protocol_version
    }

    fn codec_registry(&self) -> Arc<CodecRegistry> {
        Arc::clone(&self.registry)
    }

    async fn prepare(&self, template: StatementTemplate) -> Result<PreparedStatement, MappingError> {
        self.ensure_open()?;
        let mut state = self.state()?;
        if !state.tables.contains_key(&key_of(template.keyspace.as_deref(), &template.table)) {
            return Err(MappingError::Session(format!("cannot prepare `{}`: unconfigured table", template.cql)));
        }
        state.prepared.push((template.entity, template.kind));
        Ok(PreparedStatement::new(self.next_id.fetch_add(1, Ordering::SeqCst), template))
    }

    async fn execute(&self, statement: Statement) -> Result<ResultSet, MappingError> {
        self.ensure_open()?;
        let mut state = self.state()?;
        state.issued.push(statement.cql().to_string());
        debug!("Executing {}", statement.cql());
        match &statement {
            Statement::Schema(schema) => {
                state.apply_schema(&schema.change)?;
                Ok(ResultSet::empty())
            }
            Statement::Bound(bound) => state.run_bound(bound),
            Statement::Simple(_) => Ok(ResultSet::empty()),
        }
    }

    async fn close(&self) -> Result<(), MappingError> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

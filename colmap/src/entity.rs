//! Top-level descriptor of one mapped entity: its table, key layout and ordered properties.

use crate::carrier::{GettableData, Row, SettableData, Slot};
use crate::codec::InsertStrategy;
use crate::composite::CompositeMeta;
use crate::error::MappingError;
use crate::factory::{new_instance, BeanFactory, Bindings, Injectable, ObjectMapper, TupleTypeFactory, UserTypeFactory};
use crate::property::{ColumnKind, Property};
use crate::schema::{self, ColumnMetadata, TableMetadata};
use crate::statement::{OperationKind, StatementTemplate};
use crate::wire::WireValue;
use crate::{debug, trace};
use serde::Deserialize;
use std::any::{Any, TypeId};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

/// Identity of a mapped type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntityClass {
    pub id: TypeId,
    pub name: &'static str,
}

impl EntityClass {
    pub fn of<E: 'static>() -> Self {
        EntityClass { id: TypeId::of::<E>(), name: std::any::type_name::<E>() }
    }

    /// Type name without its module path or generic arguments.
    pub fn simple_name(&self) -> &'static str {
        let base = self.name.split('<').next().unwrap_or(self.name);
        base.rsplit("::").next().unwrap_or(base)
    }

    /// Configured names may be fully qualified or simple, compared case-insensitively.
    pub fn matches_name(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name) || self.simple_name().eq_ignore_ascii_case(name)
    }
}

impl fmt::Display for EntityClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.simple_name())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemaSync {
    #[default]
    Off,
    Create,
    Validate,
}

pub struct EntityProperty<E> {
    class: EntityClass,
    keyspace: Option<String>,
    table: String,
    sync: SchemaSync,
    properties: Vec<Property<E>>,
    ctor: fn() -> E,
    bindings: Bindings,
}

pub struct EntityPropertyBuilder<E> {
    keyspace: Option<String>,
    table: String,
    sync: SchemaSync,
    properties: Vec<Property<E>>,
    ctor: fn() -> E,
}

impl<E: Send + Sync + 'static> EntityPropertyBuilder<E> {
    pub fn keyspace(mut self, keyspace: &str) -> Self {
        self.keyspace = Some(keyspace.to_string());
        self
    }

    pub fn sync(mut self, sync: SchemaSync) -> Self {
        self.sync = sync;
        self
    }

    pub fn property(mut self, property: Property<E>) -> Self {
        self.properties.push(property);
        self
    }

    /// Rejects layouts the store could never accept: no partition key, duplicate columns or key ordinals.
    pub fn build(self) -> Result<Arc<EntityProperty<E>>, MappingError> {
        let class = EntityClass::of::<E>();
        let mut columns = HashSet::new();
        let mut partition = HashSet::new();
        let mut clustering = HashSet::new();
        for property in &self.properties {
            let column = property.column().to_lowercase();
            if !columns.insert(column) {
                return Err(MappingError::InvalidEntity(format!("{}: column `{}` mapped twice", class, property.column())));
            }
            let duplicate = match property.info().kind {
                ColumnKind::PartitionKey(ordinal) => !partition.insert(ordinal),
                ColumnKind::Clustering(ordinal, _) => !clustering.insert(ordinal),
                _ => false,
            };
            if duplicate {
                return Err(MappingError::InvalidEntity(format!("{}: key ordinal of `{}` is reused", class, property.column())));
            }
        }
        if partition.is_empty() {
            return Err(MappingError::InvalidEntity(format!("{} declares no partition key", class)));
        }
        Ok(Arc::new(EntityProperty {
            class,
            keyspace: self.keyspace,
            table: self.table,
            sync: self.sync,
            properties: self.properties,
            ctor: self.ctor,
            bindings: Bindings::default(),
        }))
    }
}

impl<E: Send + Sync + 'static> EntityProperty<E> {
    pub fn builder(table: &str, ctor: fn() -> E) -> EntityPropertyBuilder<E> {
        EntityPropertyBuilder { keyspace: None, table: table.to_string(), sync: SchemaSync::Off, properties: Vec::new(), ctor }
    }

    pub fn properties(&self) -> &[Property<E>] {
        &self.properties
    }

    fn ensure_bound(&self) -> Result<(), MappingError> {
        if EntityMeta::is_bound(self) {
            Ok(())
        } else {
            Err(MappingError::unbound(format!("entity {}", self.class)))
        }
    }

    /// Writes every column into `carrier`, addressed by column name.
    pub fn encode_to(&self, entity: &E, carrier: &mut dyn SettableData, strategy: InsertStrategy) -> Result<(), MappingError> {
        self.ensure_bound()?;
        for property in &self.properties {
            property.encode_to_carrier(entity, carrier, Slot::Named(property.column()), strategy)?;
        }
        Ok(())
    }

    pub fn encode_entity(&self, entity: &E, strategy: InsertStrategy) -> Result<Row, MappingError> {
        let mut row = Row::new();
        self.encode_to(entity, &mut row, strategy)?;
        trace!("Encoded {} into {} columns", self.class, row.len());
        Ok(row)
    }

    pub fn decode_entity(&self, row: &dyn GettableData) -> Result<E, MappingError> {
        self.ensure_bound()?;
        let mut entity = new_instance(self.bindings.bean_factory(self.class.name)?, self.class.name, self.ctor)?;
        for property in &self.properties {
            property.decode_from_carrier(&mut entity, row, Slot::Named(property.column()))?;
        }
        Ok(entity)
    }

    /// Primary key columns and their values, partition key first.
    pub fn extract_primary_key(&self, entity: &E) -> Result<Vec<(String, WireValue)>, MappingError> {
        self.ensure_bound()?;
        self.key_properties()
            .into_iter()
            .map(|p| Ok((p.column().to_string(), p.encode_field(entity, InsertStrategy::AllFields)?)))
            .collect()
    }

    fn key_properties(&self) -> Vec<&Property<E>> {
        let mut partition: Vec<(u8, &Property<E>)> = Vec::new();
        let mut clustering: Vec<(u8, &Property<E>)> = Vec::new();
        for property in &self.properties {
            match property.info().kind {
                ColumnKind::PartitionKey(ordinal) => partition.push((ordinal, property)),
                ColumnKind::Clustering(ordinal, _) => clustering.push((ordinal, property)),
                _ => {}
            }
        }
        partition.sort_by_key(|(o, _)| *o);
        clustering.sort_by_key(|(o, _)| *o);
        partition.into_iter().chain(clustering).map(|(_, p)| p).collect()
    }

    pub fn validate_schema(&self, remote: &TableMetadata) -> Result<(), MappingError> {
        self.ensure_bound()?;
        schema::validate_table(&EntityMeta::table_metadata(self), remote)
    }
}

/// Type-erased entity descriptor held by the manager factory.
pub trait EntityMeta: Injectable + Send + Sync + 'static {
    fn class(&self) -> EntityClass;
    fn keyspace(&self) -> Option<&str>;
    fn table(&self) -> &str;
    fn sync(&self) -> SchemaSync;
    fn is_bound(&self) -> bool;
    fn table_metadata(&self) -> TableMetadata;
    /// Composite nodes referenced directly by the entity's columns.
    fn composites(&self) -> Vec<Arc<dyn CompositeMeta>>;
    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;

    fn qualified_table_name(&self) -> String {
        schema::qualify(self.keyspace(), self.table())
    }

    fn static_templates(&self) -> Vec<StatementTemplate> {
        let table = self.table_metadata();
        OperationKind::ALL.iter().map(|kind| StatementTemplate::for_table(self.class(), *kind, &table)).collect()
    }
}

impl<E: Send + Sync + 'static> EntityMeta for EntityProperty<E> {
    fn class(&self) -> EntityClass {
        self.class
    }

    fn keyspace(&self) -> Option<&str> {
        self.keyspace.as_deref()
    }

    fn table(&self) -> &str {
        &self.table
    }

    fn sync(&self) -> SchemaSync {
        self.sync
    }

    fn is_bound(&self) -> bool {
        self.bindings.is_complete() && self.properties.iter().all(|p| p.shape().is_bound())
    }

    fn table_metadata(&self) -> TableMetadata {
        let columns = self.properties.iter().map(|p| ColumnMetadata::new(p.column(), p.data_type(), p.info().kind)).collect();
        TableMetadata::new(self.keyspace.as_deref(), &self.table, columns)
    }

    fn composites(&self) -> Vec<Arc<dyn CompositeMeta>> {
        self.properties.iter().flat_map(|p| p.shape().direct_composites()).collect()
    }

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

impl<E: Send + Sync + 'static> Injectable for EntityProperty<E> {
    fn inject_tuple_factory(&self, factory: &Arc<TupleTypeFactory>) -> Result<(), MappingError> {
        if self.bindings.tuple_factory.get().is_some() {
            return Ok(());
        }
        self.properties.iter().try_for_each(|p| p.inject_tuple_factory(factory))?;
        let _ = self.bindings.tuple_factory.set(Arc::clone(factory));
        Ok(())
    }

    fn inject_udt_factory(&self, factory: &Arc<UserTypeFactory>) -> Result<(), MappingError> {
        if self.bindings.udt_factory.get().is_some() {
            return Ok(());
        }
        self.properties.iter().try_for_each(|p| p.inject_udt_factory(factory))?;
        let _ = self.bindings.udt_factory.set(Arc::clone(factory));
        Ok(())
    }

    fn inject_object_mapper(&self, mapper: &Arc<ObjectMapper>) -> Result<(), MappingError> {
        if self.bindings.object_mapper.get().is_some() {
            return Ok(());
        }
        self.properties.iter().try_for_each(|p| p.inject_object_mapper(mapper))?;
        let _ = self.bindings.object_mapper.set(Arc::clone(mapper));
        Ok(())
    }

    fn inject_bean_factory(&self, factory: &Arc<dyn BeanFactory>) -> Result<(), MappingError> {
        if self.bindings.bean_factory.get().is_some() {
            return Ok(());
        }
        self.properties.iter().try_for_each(|p| p.inject_bean_factory(factory))?;
        let _ = self.bindings.bean_factory.set(Arc::clone(factory));
        debug!("Entity {} fully injected", self.class);
        Ok(())
    }
}

/// Entity descriptor registered at link time, discovered by the manager factory builder.
pub struct EntityRegistration {
    pub name: &'static str,
    pub build: fn() -> Result<Arc<dyn EntityMeta>, MappingError>,
}

inventory::collect!(EntityRegistration);

//! Per-field descriptors: a codec, an accessor pair and column metadata.

use crate::carrier::{GettableData, SettableData, Slot};
use crate::codec::{Codec, InsertStrategy};
use crate::composite::CompositeMeta;
use crate::error::MappingError;
use crate::factory::{BeanFactory, Injectable, ObjectMapper, TupleTypeFactory, UserTypeFactory};
use crate::trace;
use crate::wire::{DataType, TupleType, WireValue};
use once_cell::sync::OnceCell;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionKind {
    List,
    Set,
}

/// Closed set of value shapes. Injection, schema rendering and structured type
/// discovery all walk this tree.
/// Tuple type a registry-backed codec receives from the tuple factory.
pub type TupleSlot = Arc<OnceCell<Arc<TupleType>>>;

#[derive(Clone)]
pub enum Shape {
    Scalar { data_type: DataType, registry_key: Option<&'static str>, tuple: Option<TupleSlot> },
    Json(Arc<OnceCell<Arc<ObjectMapper>>>),
    Tuple(Arc<dyn CompositeMeta>),
    Udt(Arc<dyn CompositeMeta>),
    Collection { kind: CollectionKind, element: Box<Shape> },
    Map { key: Box<Shape>, value: Box<Shape> },
}

impl Shape {
    pub fn scalar(data_type: DataType) -> Self {
        Shape::Scalar { data_type, registry_key: None, tuple: None }
    }

    /// Scalar resolved through the codec registry.
    pub fn native(data_type: DataType, registry_key: &'static str) -> Self {
        Shape::Scalar { data_type, registry_key: Some(registry_key), tuple: None }
    }

    /// Registry-backed scalar carried as a tuple, bound to the factory's protocol version on injection.
    pub fn native_tuple(data_type: DataType, registry_key: &'static str, slot: TupleSlot) -> Self {
        Shape::Scalar { data_type, registry_key: Some(registry_key), tuple: Some(slot) }
    }

    pub fn data_type(&self) -> DataType {
        match self {
            Shape::Scalar { data_type, .. } => data_type.clone(),
            Shape::Json(_) => DataType::Text,
            Shape::Tuple(meta) | Shape::Udt(meta) => meta.data_type(),
            Shape::Collection { kind: CollectionKind::List, element } => DataType::list(element.data_type()),
            Shape::Collection { kind: CollectionKind::Set, element } => DataType::set(element.data_type()),
            Shape::Map { key, value } => DataType::map(key.data_type(), value.data_type()),
        }
    }

    pub fn is_bound(&self) -> bool {
        match self {
            Shape::Scalar { tuple: Some(slot), .. } => slot.get().is_some(),
            Shape::Scalar { .. } => true,
            Shape::Json(mapper) => mapper.get().is_some(),
            Shape::Tuple(meta) | Shape::Udt(meta) => meta.is_bound(),
            Shape::Collection { element, .. } => element.is_bound(),
            Shape::Map { key, value } => key.is_bound() && value.is_bound(),
        }
    }

    /// Nearest composite nodes below this shape, not descending into them.
    pub fn direct_composites(&self) -> Vec<Arc<dyn CompositeMeta>> {
        match self {
            Shape::Scalar { .. } | Shape::Json(_) => Vec::new(),
            Shape::Tuple(meta) | Shape::Udt(meta) => vec![Arc::clone(meta)],
            Shape::Collection { element, .. } => element.direct_composites(),
            Shape::Map { key, value } => {
                let mut found = key.direct_composites();
                found.extend(value.direct_composites());
                found
            }
        }
    }

    fn for_each_child(&self, f: &mut dyn FnMut(&Shape) -> Result<(), MappingError>) -> Result<(), MappingError> {
        match self {
            Shape::Collection { element, .. } => f(element),
            Shape::Map { key, value } => {
                f(key)?;
                f(value)
            }
            _ => Ok(()),
        }
    }
}

impl fmt::Debug for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Shape::Scalar { data_type, registry_key, .. } => write!(f, "Scalar({}, {:?})", data_type, registry_key),
            Shape::Json(_) => f.write_str("Json"),
            Shape::Tuple(meta) => write!(f, "Tuple({})", meta.class_name()),
            Shape::Udt(meta) => write!(f, "Udt({})", meta.class_name()),
            Shape::Collection { kind, element } => write!(f, "{:?}({:?})", kind, element),
            Shape::Map { key, value } => write!(f, "Map({:?}, {:?})", key, value),
        }
    }
}

impl Injectable for Shape {
    fn inject_tuple_factory(&self, factory: &Arc<TupleTypeFactory>) -> Result<(), MappingError> {
        match self {
            Shape::Scalar { registry_key: Some(key), tuple, .. } => {
                let registered = factory.registry().require(key)?;
                if let (Some(slot), DataType::Tuple(components)) = (tuple, registered) {
                    let _ = slot.set(factory.type_for(components));
                }
                Ok(())
            }
            Shape::Tuple(meta) | Shape::Udt(meta) => meta.inject_tuple_factory(factory),
            other => other.for_each_child(&mut |child| child.inject_tuple_factory(factory)),
        }
    }

    fn inject_udt_factory(&self, factory: &Arc<UserTypeFactory>) -> Result<(), MappingError> {
        match self {
            Shape::Tuple(meta) | Shape::Udt(meta) => meta.inject_udt_factory(factory),
            other => other.for_each_child(&mut |child| child.inject_udt_factory(factory)),
        }
    }

    fn inject_object_mapper(&self, mapper: &Arc<ObjectMapper>) -> Result<(), MappingError> {
        match self {
            Shape::Json(slot) => {
                let _ = slot.set(Arc::clone(mapper));
                Ok(())
            }
            Shape::Tuple(meta) | Shape::Udt(meta) => meta.inject_object_mapper(mapper),
            other => other.for_each_child(&mut |child| child.inject_object_mapper(mapper)),
        }
    }

    fn inject_bean_factory(&self, factory: &Arc<dyn BeanFactory>) -> Result<(), MappingError> {
        match self {
            Shape::Tuple(meta) | Shape::Udt(meta) => meta.inject_bean_factory(factory),
            other => other.for_each_child(&mut |child| child.inject_bean_factory(factory)),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ClusteringOrder {
    #[default]
    Asc,
    Desc,
}

impl fmt::Display for ClusteringOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClusteringOrder::Asc => f.write_str("ASC"),
            ClusteringOrder::Desc => f.write_str("DESC"),
        }
    }
}

/// Role of a column in its table. Ordinals order the key components.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    PartitionKey(u8),
    Clustering(u8, ClusteringOrder),
    Static,
    Normal,
}

impl ColumnKind {
    pub fn is_primary_key(&self) -> bool {
        matches!(self, ColumnKind::PartitionKey(_) | ColumnKind::Clustering(..))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldInfo {
    pub field_name: &'static str,
    pub column: String,
    pub kind: ColumnKind,
    pub mandatory: bool,
}

impl FieldInfo {
    pub fn new(field_name: &'static str, column: &str) -> Self {
        FieldInfo { field_name, column: column.to_string(), kind: ColumnKind::Normal, mandatory: false }
    }

    /// Column named after the field.
    pub fn field(field_name: &'static str) -> Self {
        Self::new(field_name, field_name)
    }

    pub fn partition_key(mut self, ordinal: u8) -> Self {
        self.kind = ColumnKind::PartitionKey(ordinal);
        self
    }

    pub fn clustering(mut self, ordinal: u8, order: ClusteringOrder) -> Self {
        self.kind = ColumnKind::Clustering(ordinal, order);
        self
    }

    pub fn static_column(mut self) -> Self {
        self.kind = ColumnKind::Static;
        self
    }

    pub fn mandatory(mut self) -> Self {
        self.mandatory = true;
        self
    }

    pub fn is_mandatory(&self) -> bool {
        self.mandatory || self.kind.is_primary_key()
    }
}

/// Codec-erased read / write of one field of `E`.
trait FieldAccess<E>: Send + Sync {
    fn encode(&self, entity: &E, strategy: InsertStrategy) -> Result<WireValue, MappingError>;
    fn decode(&self, entity: &mut E, wire: &WireValue) -> Result<(), MappingError>;
}

struct Accessor<E, C: Codec> {
    codec: C,
    get: fn(&E) -> &C::Value,
    set: fn(&mut E, C::Value),
}

impl<E: 'static, C: Codec> FieldAccess<E> for Accessor<E, C> {
    fn encode(&self, entity: &E, strategy: InsertStrategy) -> Result<WireValue, MappingError> {
        self.codec.encode((self.get)(entity), strategy)
    }

    fn decode(&self, entity: &mut E, wire: &WireValue) -> Result<(), MappingError> {
        let value = self.codec.decode(wire)?;
        (self.set)(entity, value);
        Ok(())
    }
}

/// One mapped field of `E`.
pub struct Property<E> {
    info: FieldInfo,
    shape: Shape,
    access: Box<dyn FieldAccess<E>>,
}

impl<E: 'static> Property<E> {
    pub fn new<F, C>(info: FieldInfo, codec: C, get: fn(&E) -> &F, set: fn(&mut E, F)) -> Self
    where
        C: Codec<Value = F>,
    {
        let shape = codec.shape();
        Property { info, shape, access: Box::new(Accessor { codec, get, set }) }
    }

    pub fn info(&self) -> &FieldInfo {
        &self.info
    }

    pub fn column(&self) -> &str {
        &self.info.column
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn data_type(&self) -> DataType {
        self.shape.data_type()
    }

    pub fn encode_field(&self, entity: &E, strategy: InsertStrategy) -> Result<WireValue, MappingError> {
        let wire = self.access.encode(entity, strategy)?;
        if wire.is_null() && self.info.is_mandatory() {
            return Err(MappingError::MissingMandatory(self.info.column.clone()));
        }
        trace!("Encoded {} -> {:?}", self.info.field_name, wire);
        Ok(wire)
    }

    pub fn decode_field(&self, entity: &mut E, wire: &WireValue) -> Result<(), MappingError> {
        trace!("Decoding {} <- {:?}", self.info.field_name, wire);
        self.access.decode(entity, wire)
    }

    /// Nulls become explicit null markers under `AllFields` and unset slots under `NotNullFields`.
    pub fn encode_to_carrier(
        &self,
        entity: &E,
        carrier: &mut dyn SettableData,
        slot: Slot<'_>,
        strategy: InsertStrategy,
    ) -> Result<(), MappingError> {
        let wire = self.encode_field(entity, strategy)?;
        if wire.is_null() && strategy == InsertStrategy::NotNullFields {
            carrier.unset(slot)
        } else {
            carrier.set_value(slot, wire)
        }
    }

    pub fn decode_from_carrier(&self, entity: &mut E, carrier: &dyn GettableData, slot: Slot<'_>) -> Result<(), MappingError> {
        match carrier.get_value(slot)? {
            Some(wire) => self.decode_field(entity, wire),
            None => self.decode_field(entity, &WireValue::Null),
        }
    }
}

impl<E> fmt::Debug for Property<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Property").field("info", &self.info).field("shape", &self.shape).finish()
    }
}

impl<E> Injectable for Property<E> {
    fn inject_tuple_factory(&self, factory: &Arc<TupleTypeFactory>) -> Result<(), MappingError> {
        self.shape.inject_tuple_factory(factory)
    }

    fn inject_udt_factory(&self, factory: &Arc<UserTypeFactory>) -> Result<(), MappingError> {
        self.shape.inject_udt_factory(factory)
    }

    fn inject_object_mapper(&self, mapper: &Arc<ObjectMapper>) -> Result<(), MappingError> {
        self.shape.inject_object_mapper(mapper)
    }

    fn inject_bean_factory(&self, factory: &Arc<dyn BeanFactory>) -> Result<(), MappingError> {
        self.shape.inject_bean_factory(factory)
    }
}

//! colmap maps strongly-typed Rust entities onto the rows, collections, tuples and user defined types of a
//! column-oriented store.
//!
//! Entities are described by [`EntityProperty`] trees built from [`Property`] leaves and nested
//! [`CompositeProperty`] nodes. A [`ManagerFactory`] bootstraps those trees against a [`Session`]: it registers the
//! native codecs, injects the type factories, creates or validates the schema and prepares the static statements
//! that [`EntityManager`] uses at request time.
//!

pub mod carrier;
pub mod codec;
pub mod composite;
pub mod context;
pub mod entity;
pub mod error;
pub mod factory;
pub mod logger;
pub mod manager;
pub mod memory;
pub mod property;
pub mod registry;
pub mod schema;
pub mod session;
pub mod settings;
pub mod statement;
pub mod wire;

pub use async_trait::async_trait;
pub use carrier::{GettableData, Row, SettableData, Slot};
pub use chrono;
pub use codec::{
    BigIntCodec, BlobCodec, BooleanCodec, Codec, DoubleArrayCodec, DoubleCodec, FloatArrayCodec, FloatCodec,
    InsertStrategy, InstantCodec, IntArrayCodec, IntCodec, JsonCodec, ListCodec, LocalDateCodec, LocalTimeCodec,
    LongArrayCodec, MapCodec, OptionalCodec, SetCodec, TextCodec, UuidCodec, ZonedDateTimeCodec,
};
pub use composite::{CompositeCodec, CompositeKind, CompositeMeta, CompositeProperty};
pub use context::ConfigurationContext;
pub use entity::{EntityClass, EntityMeta, EntityProperty, EntityRegistration, SchemaSync};
pub use error::MappingError;
pub use factory::{BeanFactory, DefaultBeanFactory, Dependencies, Injectable, ObjectMapper, TupleTypeFactory, UserTypeFactory};
pub use inventory;
pub use manager::{EntityManager, ManagerFactory, ManagerFactoryBuilder};
pub use memory::MemorySession;
pub use once_cell;
pub use property::{ClusteringOrder, ColumnKind, FieldInfo, Property, Shape};
pub use registry::CodecRegistry;
pub use schema::{ColumnMetadata, SchemaStatement, TableMetadata, UdtRegistry};
pub use serde;
pub use serde_json;
pub use session::{Executor, SchemaInspector, Session};
pub use settings::MapperSettings;
pub use statement::{OperationKind, PreparedStatement, ResultSet, Statement, StatementCache, StatementTemplate};
pub use uuid;
pub use wire::{DataType, ProtocolVersion, TupleType, UserType, WireValue};

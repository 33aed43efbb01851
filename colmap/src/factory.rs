//! Late-bound collaborators pushed through every property tree during bootstrap.

use crate::error::MappingError;
use crate::registry::CodecRegistry;
use crate::wire::{DataType, ProtocolVersion, TupleType, UserType};
use once_cell::sync::OnceCell;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::any::Any;
use std::sync::Arc;

/// Builds tuple type descriptors for the negotiated protocol.
#[derive(Debug)]
pub struct TupleTypeFactory {
    protocol_version: ProtocolVersion,
    registry: Arc<CodecRegistry>,
}

impl TupleTypeFactory {
    pub fn new(protocol_version: ProtocolVersion, registry: Arc<CodecRegistry>) -> Self {
        Self { protocol_version, registry }
    }

    pub fn type_for(&self, components: Vec<DataType>) -> Arc<TupleType> {
        Arc::new(TupleType::of(self.protocol_version, components))
    }

    pub fn registry(&self) -> &CodecRegistry {
        &self.registry
    }

    pub fn protocol_version(&self) -> ProtocolVersion {
        self.protocol_version
    }
}

/// Builds structured (user defined) type descriptors for the negotiated protocol.
#[derive(Debug)]
pub struct UserTypeFactory {
    protocol_version: ProtocolVersion,
    registry: Arc<CodecRegistry>,
}

impl UserTypeFactory {
    pub fn new(protocol_version: ProtocolVersion, registry: Arc<CodecRegistry>) -> Self {
        Self { protocol_version, registry }
    }

    pub fn type_for(&self, keyspace: Option<&str>, name: &str, fields: Vec<(String, DataType)>) -> Arc<UserType> {
        Arc::new(UserType {
            protocol_version: self.protocol_version,
            keyspace: keyspace.map(str::to_string),
            name: name.to_string(),
            fields,
        })
    }

    pub fn registry(&self) -> &CodecRegistry {
        &self.registry
    }

    pub fn protocol_version(&self) -> ProtocolVersion {
        self.protocol_version
    }
}

/// Serializes complex fields that are stored as a single json text column.
#[derive(Debug, Clone, Default)]
pub struct ObjectMapper {
    pretty: bool,
}

impl ObjectMapper {
    pub fn pretty() -> Self {
        Self { pretty: true }
    }

    pub fn to_json<T: Serialize>(&self, value: &T) -> Result<String, MappingError> {
        let json = if self.pretty { serde_json::to_string_pretty(value)? } else { serde_json::to_string(value)? };
        Ok(json)
    }

    pub fn from_json<T: DeserializeOwned>(&self, json: &str) -> Result<T, MappingError> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Instantiates decoded entities and structured values.
pub trait BeanFactory: Send + Sync {
    fn instantiate(
        &self,
        class: &str,
        ctor: &dyn Fn() -> Box<dyn Any + Send>,
    ) -> Result<Box<dyn Any + Send>, MappingError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultBeanFactory;

impl BeanFactory for DefaultBeanFactory {
    fn instantiate(
        &self,
        _class: &str,
        ctor: &dyn Fn() -> Box<dyn Any + Send>,
    ) -> Result<Box<dyn Any + Send>, MappingError> {
        Ok(ctor())
    }
}

pub fn new_instance<T: Send + 'static>(factory: &dyn BeanFactory, class: &str, ctor: fn() -> T) -> Result<T, MappingError> {
    let instance = factory.instantiate(class, &|| Box::new(ctor()) as Box<dyn Any + Send>)?;
    instance
        .downcast::<T>()
        .map(|boxed| *boxed)
        .map_err(|_| MappingError::Instantiation(format!("{}: bean factory returned another type", class)))
}

/// Receives the four bootstrap factories. Re-injecting an already bound factory is a no-op.
pub trait Injectable {
    fn inject_tuple_factory(&self, factory: &Arc<TupleTypeFactory>) -> Result<(), MappingError>;
    fn inject_udt_factory(&self, factory: &Arc<UserTypeFactory>) -> Result<(), MappingError>;
    fn inject_object_mapper(&self, mapper: &Arc<ObjectMapper>) -> Result<(), MappingError>;
    fn inject_bean_factory(&self, factory: &Arc<dyn BeanFactory>) -> Result<(), MappingError>;
}

/// Unbound → bound state of one tree node. Each cell is written at most once.
#[derive(Default)]
pub(crate) struct Bindings {
    pub tuple_factory: OnceCell<Arc<TupleTypeFactory>>,
    pub udt_factory: OnceCell<Arc<UserTypeFactory>>,
    pub object_mapper: OnceCell<Arc<ObjectMapper>>,
    pub bean_factory: OnceCell<Arc<dyn BeanFactory>>,
}

impl Bindings {
    pub fn is_complete(&self) -> bool {
        self.tuple_factory.get().is_some()
            && self.udt_factory.get().is_some()
            && self.object_mapper.get().is_some()
            && self.bean_factory.get().is_some()
    }

    pub fn bean_factory(&self, owner: &str) -> Result<&dyn BeanFactory, MappingError> {
        self.bean_factory
            .get()
            .map(|f| f.as_ref())
            .ok_or_else(|| MappingError::unbound(format!("bean factory of {}", owner)))
    }
}

/// The full set of injectable collaborators derived from one session.
#[derive(Clone)]
pub struct Dependencies {
    pub tuple_factory: Arc<TupleTypeFactory>,
    pub udt_factory: Arc<UserTypeFactory>,
    pub object_mapper: Arc<ObjectMapper>,
    pub bean_factory: Arc<dyn BeanFactory>,
}

impl Dependencies {
    pub fn new(
        protocol_version: ProtocolVersion,
        registry: Arc<CodecRegistry>,
        object_mapper: Arc<ObjectMapper>,
        bean_factory: Arc<dyn BeanFactory>,
    ) -> Self {
        Dependencies {
            tuple_factory: Arc::new(TupleTypeFactory::new(protocol_version, Arc::clone(&registry))),
            udt_factory: Arc::new(UserTypeFactory::new(protocol_version, registry)),
            object_mapper,
            bean_factory,
        }
    }

    pub fn inject_into<T: Injectable + ?Sized>(&self, target: &T) -> Result<(), MappingError> {
        target.inject_tuple_factory(&self.tuple_factory)?;
        target.inject_udt_factory(&self.udt_factory)?;
        target.inject_object_mapper(&self.object_mapper)?;
        target.inject_bean_factory(&self.bean_factory)
    }
}

use crate::codec::{
    Codec, DoubleArrayCodec, FloatArrayCodec, InstantCodec, IntArrayCodec, LocalDateCodec, LocalTimeCodec,
    LongArrayCodec, ZonedDateTimeCodec,
};
use crate::error::MappingError;
use crate::property::Shape;
use crate::wire::{DataType, ProtocolVersion, TupleType};
use crate::{debug, trace};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Connection-owned registry of the non-primitive codecs the wire layer can resolve.
#[derive(Debug, Default)]
pub struct CodecRegistry {
    codecs: RwLock<HashMap<&'static str, DataType>>,
}

impl CodecRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a codec under its registry key, replacing any previous registration.
    pub fn register<C: Codec>(&self, codec: &C) -> Result<(), MappingError> {
        match codec.shape() {
            Shape::Scalar { data_type, registry_key: Some(key), .. } => {
                trace!("Registering codec {} for {}", key, data_type);
                self.codecs.write()?.insert(key, data_type);
                Ok(())
            }
            other => Err(MappingError::Custom(format!(
                "codec for {} has no registry key and cannot be registered",
                other.data_type()
            ))),
        }
    }

    pub fn lookup(&self, key: &str) -> Result<Option<DataType>, MappingError> {
        Ok(self.codecs.read()?.get(key).cloned())
    }

    pub fn require(&self, key: &str) -> Result<DataType, MappingError> {
        self.lookup(key)?.ok_or_else(|| MappingError::CodecNotFound(key.to_string()))
    }

    pub fn len(&self) -> usize {
        self.codecs.read().map(|c| c.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Fixed-size numeric arrays and the extended temporal types.
pub fn register_native_codecs(registry: &CodecRegistry, protocol_version: ProtocolVersion) -> Result<(), MappingError> {
    let zoned_type = Arc::new(TupleType::of(protocol_version, vec![DataType::Timestamp, DataType::Text]));
    registry.register(&DoubleArrayCodec)?;
    registry.register(&FloatArrayCodec)?;
    registry.register(&IntArrayCodec)?;
    registry.register(&LongArrayCodec)?;
    registry.register(&InstantCodec)?;
    registry.register(&LocalDateCodec)?;
    registry.register(&LocalTimeCodec)?;
    registry.register(&ZonedDateTimeCodec::new(zoned_type))?;
    debug!("Registered native codecs, registry now holds {} codecs", registry.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::IntCodec;

    #[test]
    fn native_codecs_resolve_after_registration() {
        let registry = CodecRegistry::new();
        assert!(matches!(registry.require("int[]"), Err(MappingError::CodecNotFound(_))));

        register_native_codecs(&registry, ProtocolVersion::V4).unwrap();
        assert_eq!(registry.len(), 8);
        assert_eq!(registry.require("int[]").unwrap(), DataType::list(DataType::Int));
        assert_eq!(registry.require("instant").unwrap(), DataType::Timestamp);
        assert_eq!(
            registry.require("zoned_datetime").unwrap(),
            DataType::Tuple(vec![DataType::Timestamp, DataType::Text])
        );
    }

    #[test]
    fn registration_is_idempotent() {
        let registry = CodecRegistry::new();
        register_native_codecs(&registry, ProtocolVersion::V4).unwrap();
        register_native_codecs(&registry, ProtocolVersion::V5).unwrap();
        assert_eq!(registry.len(), 8);
    }

    #[test]
    fn primitive_codecs_are_not_registrable() {
        let registry = CodecRegistry::new();
        assert!(registry.register(&IntCodec).is_err());
    }
}

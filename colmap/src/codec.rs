use crate::carrier::{GettableData, SettableData, Slot};
use crate::error::MappingError;
use crate::factory::ObjectMapper;
use crate::property::{CollectionKind, Shape, TupleSlot};
use crate::wire::{DataType, TupleType, WireValue};
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime, Utc};
use once_cell::sync::OnceCell;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::marker::PhantomData;
use std::sync::Arc;
use uuid::Uuid;

/// Whether absent values are sent as explicit nulls or left unset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum InsertStrategy {
    #[default]
    AllFields,
    NotNullFields,
}

/// Bidirectional, stateless conversion between one field type and its wire value.
pub trait Codec: Send + Sync + 'static {
    type Value: Send + 'static;

    fn shape(&self) -> Shape;
    fn encode(&self, value: &Self::Value, strategy: InsertStrategy) -> Result<WireValue, MappingError>;
    fn decode(&self, wire: &WireValue) -> Result<Self::Value, MappingError>;

    fn data_type(&self) -> DataType {
        self.shape().data_type()
    }
}

macro_rules! scalar_codec {
    ($name:ident, $value:ty, $data_type:expr, $variant:ident) => {
        scalar_codec!(@impl $name, $value, $data_type, $variant, Shape::scalar($data_type));
    };
    ($name:ident, $value:ty, $data_type:expr, $variant:ident, $key:literal) => {
        scalar_codec!(@impl $name, $value, $data_type, $variant, Shape::native($data_type, $key));
    };
    (@impl $name:ident, $value:ty, $data_type:expr, $variant:ident, $shape:expr) => {
        #[derive(Debug, Clone, Copy, Default)]
        pub struct $name;

        impl Codec for $name {
            type Value = $value;

            fn shape(&self) -> Shape {
                $shape
            }

            fn encode(&self, value: &$value, _strategy: InsertStrategy) -> Result<WireValue, MappingError> {
                Ok(WireValue::$variant(value.clone()))
            }

            fn decode(&self, wire: &WireValue) -> Result<$value, MappingError> {
                match wire {
                    WireValue::$variant(v) => Ok(v.clone()),
                    other => Err(MappingError::mismatch($data_type, other.kind_name())),
                }
            }
        }
    };
}

scalar_codec!(BooleanCodec, bool, DataType::Boolean, Boolean);
scalar_codec!(IntCodec, i32, DataType::Int, Int);
scalar_codec!(BigIntCodec, i64, DataType::BigInt, BigInt);
scalar_codec!(FloatCodec, f32, DataType::Float, Float);
scalar_codec!(DoubleCodec, f64, DataType::Double, Double);
scalar_codec!(TextCodec, String, DataType::Text, Text);
scalar_codec!(UuidCodec, Uuid, DataType::Uuid, Uuid);
scalar_codec!(BlobCodec, Vec<u8>, DataType::Blob, Blob);
scalar_codec!(InstantCodec, DateTime<Utc>, DataType::Timestamp, Timestamp, "instant");
scalar_codec!(LocalDateCodec, NaiveDate, DataType::Date, Date, "local_date");
scalar_codec!(LocalTimeCodec, NaiveTime, DataType::Time, Time, "local_time");

macro_rules! array_codec {
    ($name:ident, $element:ty, $data_type:expr, $variant:ident, $key:literal) => {
        /// Fixed-size numeric array carried as a list.
        #[derive(Debug, Clone, Copy, Default)]
        pub struct $name;

        impl Codec for $name {
            type Value = Vec<$element>;

            fn shape(&self) -> Shape {
                Shape::native(DataType::list($data_type), $key)
            }

            fn encode(&self, value: &Vec<$element>, _strategy: InsertStrategy) -> Result<WireValue, MappingError> {
                Ok(WireValue::List(value.iter().map(|v| WireValue::$variant(*v)).collect()))
            }

            fn decode(&self, wire: &WireValue) -> Result<Vec<$element>, MappingError> {
                match wire {
                    WireValue::List(items) => items
                        .iter()
                        .map(|item| match item {
                            WireValue::$variant(v) => Ok(*v),
                            other => Err(MappingError::mismatch($data_type, other.kind_name())),
                        })
                        .collect(),
                    WireValue::Null => Ok(Vec::new()),
                    other => Err(MappingError::mismatch(DataType::list($data_type), other.kind_name())),
                }
            }
        }
    };
}

array_codec!(IntArrayCodec, i32, DataType::Int, Int, "int[]");
array_codec!(LongArrayCodec, i64, DataType::BigInt, BigInt, "long[]");
array_codec!(FloatArrayCodec, f32, DataType::Float, Float, "float[]");
array_codec!(DoubleArrayCodec, f64, DataType::Double, Double, "double[]");

/// Zoned timestamp carried as `tuple<timestamp, text>`, the text holding the utc offset.
/// A default codec takes its tuple type from the tuple factory during injection.
#[derive(Debug, Clone, Default)]
pub struct ZonedDateTimeCodec {
    tuple_type: TupleSlot,
}

impl ZonedDateTimeCodec {
    pub fn new(tuple_type: Arc<TupleType>) -> Self {
        Self { tuple_type: Arc::new(OnceCell::with_value(tuple_type)) }
    }

    fn components() -> Vec<DataType> {
        vec![DataType::Timestamp, DataType::Text]
    }

    fn bound_type(&self) -> Result<&Arc<TupleType>, MappingError> {
        self.tuple_type.get().ok_or_else(|| MappingError::unbound("zoned datetime codec"))
    }
}

fn parse_offset(text: &str) -> Option<FixedOffset> {
    if text.eq_ignore_ascii_case("z") {
        return FixedOffset::east_opt(0);
    }
    let (sign, rest) = match text.as_bytes().first()? {
        b'+' => (1, &text[1..]),
        b'-' => (-1, &text[1..]),
        _ => return None,
    };
    let mut parts = rest.split(':');
    let hours: i32 = parts.next()?.parse().ok()?;
    let minutes: i32 = parts.next().unwrap_or("0").parse().ok()?;
    let seconds: i32 = parts.next().unwrap_or("0").parse().ok()?;
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60 + seconds))
}

impl Codec for ZonedDateTimeCodec {
    type Value = DateTime<FixedOffset>;

    fn shape(&self) -> Shape {
        Shape::native_tuple(DataType::Tuple(Self::components()), "zoned_datetime", Arc::clone(&self.tuple_type))
    }

    fn encode(&self, value: &DateTime<FixedOffset>, _strategy: InsertStrategy) -> Result<WireValue, MappingError> {
        let mut tuple = self.bound_type()?.new_value();
        tuple.set_value(Slot::Positional(0), WireValue::Timestamp(value.with_timezone(&Utc)))?;
        tuple.set_value(Slot::Positional(1), WireValue::Text(value.offset().to_string()))?;
        Ok(WireValue::Tuple(tuple))
    }

    fn decode(&self, wire: &WireValue) -> Result<DateTime<FixedOffset>, MappingError> {
        let bound = self.bound_type()?;
        let expected = bound.data_type();
        let tuple = match wire {
            WireValue::Tuple(t) if t.tuple_type.same_shape(bound) => t,
            other => return Err(MappingError::mismatch(expected, other.kind_name())),
        };
        match (tuple.get_value(Slot::Positional(0))?, tuple.get_value(Slot::Positional(1))?) {
            (Some(WireValue::Timestamp(instant)), Some(WireValue::Text(zone))) => parse_offset(zone)
                .map(|offset| instant.with_timezone(&offset))
                .ok_or_else(|| MappingError::mismatch("utc offset", zone)),
            _ => Err(MappingError::mismatch(expected, "incomplete zoned timestamp")),
        }
    }
}

/// Maps `None` to an explicit null.
#[derive(Debug, Clone, Default)]
pub struct OptionalCodec<C>(pub C);

impl<C: Codec> Codec for OptionalCodec<C> {
    type Value = Option<C::Value>;

    fn shape(&self) -> Shape {
        self.0.shape()
    }

    fn encode(&self, value: &Option<C::Value>, strategy: InsertStrategy) -> Result<WireValue, MappingError> {
        match value {
            Some(v) => self.0.encode(v, strategy),
            None => Ok(WireValue::Null),
        }
    }

    fn decode(&self, wire: &WireValue) -> Result<Option<C::Value>, MappingError> {
        match wire {
            WireValue::Null => Ok(None),
            other => self.0.decode(other).map(Some),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ListCodec<C>(pub C);

impl<C: Codec> Codec for ListCodec<C> {
    type Value = Vec<C::Value>;

    fn shape(&self) -> Shape {
        Shape::Collection { kind: CollectionKind::List, element: Box::new(self.0.shape()) }
    }

    fn encode(&self, value: &Vec<C::Value>, strategy: InsertStrategy) -> Result<WireValue, MappingError> {
        let items = value.iter().map(|v| self.0.encode(v, strategy)).collect::<Result<Vec<_>, _>>()?;
        Ok(WireValue::List(items))
    }

    fn decode(&self, wire: &WireValue) -> Result<Vec<C::Value>, MappingError> {
        match wire {
            WireValue::List(items) => items.iter().map(|item| self.0.decode(item)).collect(),
            // empty collections come back as null
            WireValue::Null => Ok(Vec::new()),
            other => Err(MappingError::mismatch(self.data_type(), other.kind_name())),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SetCodec<C>(pub C);

impl<C: Codec> Codec for SetCodec<C>
where
    C::Value: Ord,
{
    type Value = BTreeSet<C::Value>;

    fn shape(&self) -> Shape {
        Shape::Collection { kind: CollectionKind::Set, element: Box::new(self.0.shape()) }
    }

    fn encode(&self, value: &BTreeSet<C::Value>, strategy: InsertStrategy) -> Result<WireValue, MappingError> {
        let items = value.iter().map(|v| self.0.encode(v, strategy)).collect::<Result<Vec<_>, _>>()?;
        Ok(WireValue::Set(items))
    }

    fn decode(&self, wire: &WireValue) -> Result<BTreeSet<C::Value>, MappingError> {
        match wire {
            WireValue::Set(items) => items.iter().map(|item| self.0.decode(item)).collect(),
            WireValue::Null => Ok(BTreeSet::new()),
            other => Err(MappingError::mismatch(self.data_type(), other.kind_name())),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MapCodec<K, V>(pub K, pub V);

impl<K: Codec, V: Codec> Codec for MapCodec<K, V>
where
    K::Value: Ord,
{
    type Value = BTreeMap<K::Value, V::Value>;

    fn shape(&self) -> Shape {
        Shape::Map { key: Box::new(self.0.shape()), value: Box::new(self.1.shape()) }
    }

    fn encode(&self, value: &BTreeMap<K::Value, V::Value>, strategy: InsertStrategy) -> Result<WireValue, MappingError> {
        let entries = value
            .iter()
            .map(|(k, v)| Ok((self.0.encode(k, strategy)?, self.1.encode(v, strategy)?)))
            .collect::<Result<Vec<_>, MappingError>>()?;
        Ok(WireValue::Map(entries))
    }

    fn decode(&self, wire: &WireValue) -> Result<BTreeMap<K::Value, V::Value>, MappingError> {
        match wire {
            WireValue::Map(entries) => entries.iter().map(|(k, v)| Ok((self.0.decode(k)?, self.1.decode(v)?))).collect(),
            WireValue::Null => Ok(BTreeMap::new()),
            other => Err(MappingError::mismatch(self.data_type(), other.kind_name())),
        }
    }
}

/// Stores any serde type as json text through the injected object mapper.
pub struct JsonCodec<T> {
    mapper: Arc<OnceCell<Arc<ObjectMapper>>>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonCodec<T> {
    pub fn new() -> Self {
        Self { mapper: Arc::new(OnceCell::new()), _marker: PhantomData }
    }

    fn mapper(&self) -> Result<&ObjectMapper, MappingError> {
        self.mapper
            .get()
            .map(|m| m.as_ref())
            .ok_or_else(|| MappingError::unbound(format!("json codec for {}", std::any::type_name::<T>())))
    }
}

impl<T> Default for JsonCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Codec for JsonCodec<T>
where
    T: Serialize + DeserializeOwned + Send + 'static,
{
    type Value = T;

    fn shape(&self) -> Shape {
        Shape::Json(Arc::clone(&self.mapper))
    }

    fn encode(&self, value: &T, _strategy: InsertStrategy) -> Result<WireValue, MappingError> {
        Ok(WireValue::Text(self.mapper()?.to_json(value)?))
    }

    fn decode(&self, wire: &WireValue) -> Result<T, MappingError> {
        match wire {
            WireValue::Text(json) => self.mapper()?.from_json(json),
            other => Err(MappingError::mismatch(DataType::Text, other.kind_name())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde::Deserialize;

    fn roundtrip<C: Codec>(codec: &C, value: C::Value) -> C::Value {
        let wire = codec.encode(&value, InsertStrategy::AllFields).unwrap();
        codec.decode(&wire).unwrap()
    }

    #[test]
    fn scalars_roundtrip() {
        assert!(roundtrip(&BooleanCodec, true));
        assert_eq!(roundtrip(&IntCodec, -7), -7);
        assert_eq!(roundtrip(&BigIntCodec, i64::MAX), i64::MAX);
        assert_eq!(roundtrip(&DoubleCodec, 2.5), 2.5);
        assert_eq!(roundtrip(&TextCodec, "héllo".to_string()), "héllo");
        let id = Uuid::new_v4();
        assert_eq!(roundtrip(&UuidCodec, id), id);
        assert_eq!(roundtrip(&BlobCodec, vec![0u8, 255]), vec![0u8, 255]);
    }

    #[test]
    fn decode_rejects_foreign_wire_types() {
        let err = IntCodec.decode(&WireValue::Text("1".into())).unwrap_err();
        match err {
            MappingError::CodecMismatch { expected, found } => {
                assert_eq!(expected, "int");
                assert_eq!(found, "text");
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert!(IntCodec.decode(&WireValue::Null).is_err());
    }

    #[test]
    fn optional_maps_none_to_null() {
        let codec = OptionalCodec(TextCodec);
        assert_eq!(codec.encode(&None, InsertStrategy::AllFields).unwrap(), WireValue::Null);
        assert_eq!(roundtrip(&codec, None), None);
        assert_eq!(roundtrip(&codec, Some("x".to_string())), Some("x".to_string()));
    }

    #[test]
    fn collections_roundtrip_and_accept_null_as_empty() {
        let list = ListCodec(IntCodec);
        assert_eq!(roundtrip(&list, vec![3, 1, 2]), vec![3, 1, 2]);
        assert_eq!(list.decode(&WireValue::Null).unwrap(), Vec::<i32>::new());
        assert_eq!(list.data_type(), DataType::list(DataType::Int));

        let set = SetCodec(TextCodec);
        let values: BTreeSet<String> = ["a", "b"].iter().map(|s| s.to_string()).collect();
        assert_eq!(roundtrip(&set, values.clone()), values);

        let map = MapCodec(TextCodec, ListCodec(BigIntCodec));
        let mut entries = BTreeMap::new();
        entries.insert("k".to_string(), vec![1i64, 2]);
        assert_eq!(roundtrip(&map, entries.clone()), entries);
        assert_eq!(map.data_type().to_string(), "map<text, list<bigint>>");
    }

    #[test]
    fn native_codecs_roundtrip() {
        assert_eq!(roundtrip(&IntArrayCodec, vec![1, 2, 3]), vec![1, 2, 3]);
        assert_eq!(roundtrip(&DoubleArrayCodec, vec![0.5]), vec![0.5]);
        let instant = Utc.with_ymd_and_hms(2024, 2, 29, 12, 30, 0).unwrap();
        assert_eq!(roundtrip(&InstantCodec, instant), instant);
        let date = NaiveDate::from_ymd_opt(1999, 12, 31).unwrap();
        assert_eq!(roundtrip(&LocalDateCodec, date), date);
        let time = NaiveTime::from_hms_milli_opt(23, 59, 59, 120).unwrap();
        assert_eq!(roundtrip(&LocalTimeCodec, time), time);
        assert!(IntArrayCodec.decode(&WireValue::List(vec![WireValue::BigInt(1)])).is_err());
    }

    #[test]
    fn zoned_datetime_keeps_offset() {
        let codec = ZonedDateTimeCodec::new(Arc::new(TupleType::of(
            crate::wire::ProtocolVersion::V4,
            vec![DataType::Timestamp, DataType::Text],
        )));
        let offset = FixedOffset::east_opt(-(5 * 3600 + 30 * 60)).unwrap();
        let value = offset.with_ymd_and_hms(2023, 6, 1, 8, 15, 0).unwrap();
        let wire = codec.encode(&value, InsertStrategy::AllFields).unwrap();
        match &wire {
            WireValue::Tuple(t) => {
                assert_eq!(t.values[0], Some(WireValue::Timestamp(value.with_timezone(&Utc))));
                assert_eq!(t.values[1], Some(WireValue::Text("-05:30".into())));
            }
            other => panic!("expected tuple, got {other:?}"),
        }
        let back = codec.decode(&wire).unwrap();
        assert_eq!(back, value);
        assert_eq!(back.offset(), value.offset());
    }

    #[test]
    fn offsets_parse() {
        assert_eq!(parse_offset("+02:00"), FixedOffset::east_opt(7200));
        assert_eq!(parse_offset("Z"), FixedOffset::east_opt(0));
        assert_eq!(parse_offset("-01"), FixedOffset::east_opt(-3600));
        assert_eq!(parse_offset("02:00"), None);
    }

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Preferences {
        theme: String,
        shortcuts: Vec<String>,
    }

    #[test]
    fn json_codec_requires_a_mapper() {
        let codec = JsonCodec::<Preferences>::new();
        let prefs = Preferences { theme: "dark".into(), shortcuts: vec!["ctrl+k".into()] };
        assert!(matches!(
            codec.encode(&prefs, InsertStrategy::AllFields),
            Err(MappingError::InjectionOrderViolation(_))
        ));

        match codec.shape() {
            Shape::Json(slot) => {
                let _ = slot.set(Arc::new(ObjectMapper::default()));
            }
            _ => panic!("json codec must expose a json shape"),
        }
        assert_eq!(roundtrip(&codec, Preferences { theme: "dark".into(), shortcuts: vec![] }).theme, "dark");
        assert!(codec.decode(&WireValue::Int(1)).is_err());
    }
}

//! Store-native value model: the types and values carried over the protocol.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ProtocolVersion {
    V3,
    #[default]
    V4,
    V5,
}

/// Column / component type as declared in the remote schema.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DataType {
    Boolean,
    Int,
    BigInt,
    Float,
    Double,
    Text,
    Uuid,
    Timestamp,
    Date,
    Time,
    Blob,
    List(Box<DataType>),
    Set(Box<DataType>),
    Map(Box<DataType>, Box<DataType>),
    Tuple(Vec<DataType>),
    Udt { keyspace: Option<String>, name: String },
}

impl DataType {
    pub fn list(element: DataType) -> Self {
        DataType::List(Box::new(element))
    }

    pub fn set(element: DataType) -> Self {
        DataType::Set(Box::new(element))
    }

    pub fn map(key: DataType, value: DataType) -> Self {
        DataType::Map(Box::new(key), Box::new(value))
    }

    pub fn udt(keyspace: Option<&str>, name: &str) -> Self {
        DataType::Udt { keyspace: keyspace.map(str::to_string), name: name.to_string() }
    }

    /// Structural comparison used by schema validation. Structured types are compared by name only,
    /// the remote side reports them fully qualified while declarations may omit the keyspace.
    pub fn matches(&self, other: &DataType) -> bool {
        match (self, other) {
            (DataType::List(a), DataType::List(b)) | (DataType::Set(a), DataType::Set(b)) => a.matches(b),
            (DataType::Map(ka, va), DataType::Map(kb, vb)) => ka.matches(kb) && va.matches(vb),
            (DataType::Tuple(a), DataType::Tuple(b)) => a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.matches(y)),
            (DataType::Udt { name: a, .. }, DataType::Udt { name: b, .. }) => a.eq_ignore_ascii_case(b),
            (a, b) => a == b,
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataType::Boolean => f.write_str("boolean"),
            DataType::Int => f.write_str("int"),
            DataType::BigInt => f.write_str("bigint"),
            DataType::Float => f.write_str("float"),
            DataType::Double => f.write_str("double"),
            DataType::Text => f.write_str("text"),
            DataType::Uuid => f.write_str("uuid"),
            DataType::Timestamp => f.write_str("timestamp"),
            DataType::Date => f.write_str("date"),
            DataType::Time => f.write_str("time"),
            DataType::Blob => f.write_str("blob"),
            DataType::List(e) => write!(f, "list<{}>", e),
            DataType::Set(e) => write!(f, "set<{}>", e),
            DataType::Map(k, v) => write!(f, "map<{}, {}>", k, v),
            DataType::Tuple(components) => {
                f.write_str("frozen<tuple<")?;
                for (i, c) in components.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", c)?;
                }
                f.write_str(">>")
            }
            DataType::Udt { name, .. } => write!(f, "frozen<{}>", name),
        }
    }
}

/// Anonymous positional type, produced by the tuple-type factory.
#[derive(Debug, Clone, PartialEq)]
pub struct TupleType {
    pub protocol_version: ProtocolVersion,
    pub components: Vec<DataType>,
}

impl TupleType {
    pub fn of(protocol_version: ProtocolVersion, components: Vec<DataType>) -> Self {
        TupleType { protocol_version, components }
    }

    /// Fresh builder with every slot unset.
    pub fn new_value(self: &Arc<Self>) -> TupleValue {
        TupleValue { tuple_type: Arc::clone(self), values: vec![None; self.components.len()] }
    }

    pub fn data_type(&self) -> DataType {
        DataType::Tuple(self.components.clone())
    }

    pub fn same_shape(&self, other: &TupleType) -> bool {
        self.components == other.components
    }
}

/// Named structured type, produced by the structured-type factory.
#[derive(Debug, Clone, PartialEq)]
pub struct UserType {
    pub protocol_version: ProtocolVersion,
    pub keyspace: Option<String>,
    pub name: String,
    pub fields: Vec<(String, DataType)>,
}

impl UserType {
    pub fn new_value(self: &Arc<Self>) -> UdtValue {
        UdtValue { user_type: Arc::clone(self), values: vec![None; self.fields.len()] }
    }

    pub fn data_type(&self) -> DataType {
        DataType::Udt { keyspace: self.keyspace.clone(), name: self.name.clone() }
    }

    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|(n, _)| n == name)
    }

    pub fn qualified_name(&self) -> String {
        match &self.keyspace {
            Some(ks) => format!("{}.{}", ks, self.name),
            None => self.name.clone(),
        }
    }

    pub fn same_shape(&self, other: &UserType) -> bool {
        self.name.eq_ignore_ascii_case(&other.name) && self.fields == other.fields
    }
}

/// `None` slots are unset and never transmitted, `Some(WireValue::Null)` is an explicit null.
#[derive(Debug, Clone, PartialEq)]
pub struct TupleValue {
    pub tuple_type: Arc<TupleType>,
    pub values: Vec<Option<WireValue>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UdtValue {
    pub user_type: Arc<UserType>,
    pub values: Vec<Option<WireValue>>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum WireValue {
    Null,
    Boolean(bool),
    Int(i32),
    BigInt(i64),
    Float(f32),
    Double(f64),
    Text(String),
    Uuid(Uuid),
    Timestamp(DateTime<Utc>),
    Date(NaiveDate),
    Time(NaiveTime),
    Blob(Vec<u8>),
    List(Vec<WireValue>),
    Set(Vec<WireValue>),
    Map(Vec<(WireValue, WireValue)>),
    Tuple(TupleValue),
    Udt(UdtValue),
}

impl WireValue {
    pub fn is_null(&self) -> bool {
        matches!(self, WireValue::Null)
    }

    /// Runtime type name used in mismatch reports.
    pub fn kind_name(&self) -> String {
        match self {
            WireValue::Null => "null".to_string(),
            WireValue::Boolean(_) => DataType::Boolean.to_string(),
            WireValue::Int(_) => DataType::Int.to_string(),
            WireValue::BigInt(_) => DataType::BigInt.to_string(),
            WireValue::Float(_) => DataType::Float.to_string(),
            WireValue::Double(_) => DataType::Double.to_string(),
            WireValue::Text(_) => DataType::Text.to_string(),
            WireValue::Uuid(_) => DataType::Uuid.to_string(),
            WireValue::Timestamp(_) => DataType::Timestamp.to_string(),
            WireValue::Date(_) => DataType::Date.to_string(),
            WireValue::Time(_) => DataType::Time.to_string(),
            WireValue::Blob(_) => DataType::Blob.to_string(),
            WireValue::List(_) => "list".to_string(),
            WireValue::Set(_) => "set".to_string(),
            WireValue::Map(_) => "map".to_string(),
            WireValue::Tuple(t) => t.tuple_type.data_type().to_string(),
            WireValue::Udt(u) => u.user_type.data_type().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_cql_types() {
        assert_eq!(DataType::list(DataType::Int).to_string(), "list<int>");
        assert_eq!(DataType::map(DataType::Text, DataType::BigInt).to_string(), "map<text, bigint>");
        assert_eq!(DataType::Tuple(vec![DataType::Timestamp, DataType::Text]).to_string(), "frozen<tuple<timestamp, text>>");
        assert_eq!(DataType::udt(Some("geo"), "point").to_string(), "frozen<point>");
        assert_eq!(DataType::list(DataType::udt(None, "point")).to_string(), "list<frozen<point>>");
    }

    #[test]
    fn udt_matching_ignores_keyspace_and_case() {
        let declared = DataType::list(DataType::udt(None, "Point"));
        let remote = DataType::list(DataType::udt(Some("geo"), "point"));
        assert!(declared.matches(&remote));
        assert!(!DataType::Int.matches(&DataType::BigInt));
        assert!(!DataType::Tuple(vec![DataType::Int]).matches(&DataType::Tuple(vec![DataType::Int, DataType::Int])));
    }

    #[test]
    fn fresh_builders_are_fully_unset() {
        let tuple_type = Arc::new(TupleType::of(ProtocolVersion::V4, vec![DataType::Int, DataType::Text]));
        let value = tuple_type.new_value();
        assert_eq!(value.values, vec![None, None]);

        let user_type = Arc::new(UserType {
            protocol_version: ProtocolVersion::V4,
            keyspace: Some("geo".into()),
            name: "point".into(),
            fields: vec![("x".into(), DataType::Int), ("y".into(), DataType::Int)],
        });
        assert_eq!(user_type.field_index("y"), Some(1));
        assert_eq!(user_type.qualified_name(), "geo.point");
        assert_eq!(user_type.new_value().values.len(), 2);
    }
}

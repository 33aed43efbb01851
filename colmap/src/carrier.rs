//! Destinations and sources of encoded values: rows, bound statements, tuples and structured values.

use crate::error::MappingError;
use crate::wire::{TupleValue, UdtValue, WireValue};

/// Addresses a value inside a carrier, by column / field name or by position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot<'a> {
    Named(&'a str),
    Positional(usize),
}

impl std::fmt::Display for Slot<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Slot::Named(name) => write!(f, "`{}`", name),
            Slot::Positional(i) => write!(f, "#{}", i),
        }
    }
}

pub trait SettableData {
    fn set_value(&mut self, slot: Slot<'_>, value: WireValue) -> Result<(), MappingError>;

    /// Resets a slot so it is not transmitted at all.
    fn unset(&mut self, slot: Slot<'_>) -> Result<(), MappingError>;
}

pub trait GettableData {
    /// `Ok(None)` means the slot exists but was never set.
    fn get_value(&self, slot: Slot<'_>) -> Result<Option<&WireValue>, MappingError>;
}

fn positional_index(len: usize, slot: Slot<'_>, what: &str) -> Result<usize, MappingError> {
    match slot {
        Slot::Positional(i) if i < len => Ok(i),
        other => Err(MappingError::UnknownColumn(format!("{} slot {}", what, other))),
    }
}

impl SettableData for TupleValue {
    fn set_value(&mut self, slot: Slot<'_>, value: WireValue) -> Result<(), MappingError> {
        let idx = positional_index(self.values.len(), slot, "tuple")?;
        self.values[idx] = Some(value);
        Ok(())
    }

    fn unset(&mut self, slot: Slot<'_>) -> Result<(), MappingError> {
        let idx = positional_index(self.values.len(), slot, "tuple")?;
        self.values[idx] = None;
        Ok(())
    }
}

impl GettableData for TupleValue {
    fn get_value(&self, slot: Slot<'_>) -> Result<Option<&WireValue>, MappingError> {
        let idx = positional_index(self.values.len(), slot, "tuple")?;
        Ok(self.values[idx].as_ref())
    }
}

impl UdtValue {
    fn index_of(&self, slot: Slot<'_>) -> Result<usize, MappingError> {
        match slot {
            Slot::Named(name) => self
                .user_type
                .field_index(name)
                .ok_or_else(|| MappingError::UnknownColumn(format!("{}.{}", self.user_type.name, name))),
            positional => positional_index(self.values.len(), positional, &self.user_type.name),
        }
    }
}

impl SettableData for UdtValue {
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

impl GettableData for UdtValue {
    fn get_value(&self, slot: Slot<'_>) -> Result<Option<&WireValue>, MappingError> {
        let idx = self.index_of(slot)?;
        Ok(self.values[idx].as_ref())
    }
}

/// Ordered column → value pairs; used both for results and for values staged before binding.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    columns: Vec<(String, WireValue)>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, column: &str, value: WireValue) -> Self {
        self.put(column, value);
        self
    }

    pub fn put(&mut self, column: &str, value: WireValue) {
        match self.columns.iter_mut().find(|(name, _)| name == column) {
            Some((_, existing)) => *existing = value,
            None => self.columns.push((column.to_string(), value)),
        }
    }

    pub fn get(&self, column: &str) -> Option<&WireValue> {
        self.columns.iter().find(|(name, _)| name == column).map(|(_, v)| v)
    }

    pub fn columns(&self) -> impl Iterator<Item = (&str, &WireValue)> {
        self.columns.iter().map(|(n, v)| (n.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

impl SettableData for Row {
    fn set_value(&mut self, slot: Slot<'_>, value: WireValue) -> Result<(), MappingError> {
        match slot {
            Slot::Named(name) => {
                self.put(name, value);
                Ok(())
            }
            positional => {
                let idx = positional_index(self.columns.len(), positional, "row")?;
                self.columns[idx].1 = value;
                Ok(())
            }
        }
    }

    fn unset(&mut self, slot: Slot<'_>) -> Result<(), MappingError> {
        match slot {
            Slot::Named(name) => self.columns.retain(|(n, _)| n != name),
            positional => {
                let idx = positional_index(self.columns.len(), positional, "row")?;
                self.columns.remove(idx);
            }
        }
        Ok(())
    }
}

impl GettableData for Row {
    fn get_value(&self, slot: Slot<'_>) -> Result<Option<&WireValue>, MappingError> {
        match slot {
            Slot::Named(name) => Ok(self.get(name)),
            positional => {
                let idx = positional_index(self.columns.len(), positional, "row")?;
                Ok(Some(&self.columns[idx].1))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{DataType, ProtocolVersion, TupleType, UserType};
    use std::sync::Arc;

    #[test]
    fn tuples_are_positional_only() {
        let tuple_type = Arc::new(TupleType::of(ProtocolVersion::V4, vec![DataType::Int, DataType::Text]));
        let mut value = tuple_type.new_value();
        value.set_value(Slot::Positional(1), WireValue::Text("a".into())).unwrap();
        assert_eq!(value.get_value(Slot::Positional(1)).unwrap(), Some(&WireValue::Text("a".into())));
        assert_eq!(value.get_value(Slot::Positional(0)).unwrap(), None);
        assert!(value.set_value(Slot::Named("x"), WireValue::Int(1)).is_err());
        assert!(value.set_value(Slot::Positional(2), WireValue::Int(1)).is_err());
    }

    #[test]
    fn udt_slots_resolve_by_name_and_keep_unset_apart_from_null() {
        let user_type = Arc::new(UserType {
            protocol_version: ProtocolVersion::V4,
            keyspace: None,
            name: "point".into(),
            fields: vec![("x".into(), DataType::Int), ("y".into(), DataType::Int)],
        });
        let mut value = user_type.new_value();
        value.set_value(Slot::Named("y"), WireValue::Null).unwrap();
        assert_eq!(value.values, vec![None, Some(WireValue::Null)]);
        value.unset(Slot::Named("y")).unwrap();
        assert_eq!(value.values, vec![None, None]);
        assert!(matches!(value.set_value(Slot::Named("z"), WireValue::Int(1)), Err(MappingError::UnknownColumn(_))));
    }

    #[test]
    fn rows_replace_in_place_and_keep_order() {
        let mut row = Row::new().with("id", WireValue::Int(1)).with("name", WireValue::Text("a".into()));
        row.set_value(Slot::Named("id"), WireValue::Int(2)).unwrap();
        let names: Vec<&str> = row.columns().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["id", "name"]);
        assert_eq!(row.get("id"), Some(&WireValue::Int(2)));
        row.unset(Slot::Named("name")).unwrap();
        assert_eq!(row.len(), 1);
    }
}

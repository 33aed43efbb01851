//! Remote schema model, DDL rendering, validation and the structured type registry.

use crate::composite::{BuiltType, CompositeKind, CompositeMeta};
use crate::error::MappingError;
use crate::property::{ClusteringOrder, ColumnKind};
use crate::warn;
use crate::wire::{DataType, UserType};
use std::any::TypeId;
use std::collections::HashSet;
use std::fmt::Write;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMetadata {
    pub name: String,
    pub data_type: DataType,
    pub kind: ColumnKind,
}

impl ColumnMetadata {
    pub fn new(name: &str, data_type: DataType, kind: ColumnKind) -> Self {
        ColumnMetadata { name: name.to_string(), data_type, kind }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableMetadata {
    pub keyspace: Option<String>,
    pub name: String,
    pub columns: Vec<ColumnMetadata>,
}

impl TableMetadata {
    pub fn new(keyspace: Option<&str>, name: &str, columns: Vec<ColumnMetadata>) -> Self {
        TableMetadata { keyspace: keyspace.map(str::to_string), name: name.to_string(), columns }
    }

    pub fn qualified_name(&self) -> String {
        qualify(self.keyspace.as_deref(), &self.name)
    }

    pub fn column(&self, name: &str) -> Option<&ColumnMetadata> {
        self.columns.iter().find(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn partition_keys(&self) -> Vec<&ColumnMetadata> {
        let mut keys: Vec<(u8, &ColumnMetadata)> = self
            .columns
            .iter()
            .filter_map(|c| match c.kind {
                ColumnKind::PartitionKey(ordinal) => Some((ordinal, c)),
                _ => None,
            })
            .collect();
        keys.sort_by_key(|(ordinal, _)| *ordinal);
        keys.into_iter().map(|(_, c)| c).collect()
    }

    pub fn clustering_columns(&self) -> Vec<(&ColumnMetadata, ClusteringOrder)> {
        let mut keys: Vec<(u8, &ColumnMetadata, ClusteringOrder)> = self
            .columns
            .iter()
            .filter_map(|c| match c.kind {
                ColumnKind::Clustering(ordinal, order) => Some((ordinal, c, order)),
                _ => None,
            })
            .collect();
        keys.sort_by_key(|(ordinal, _, _)| *ordinal);
        keys.into_iter().map(|(_, c, order)| (c, order)).collect()
    }

    /// Partition key columns followed by clustering columns.
    pub fn primary_key(&self) -> Vec<&ColumnMetadata> {
        let mut key = self.partition_keys();
        key.extend(self.clustering_columns().into_iter().map(|(c, _)| c));
        key
    }
}

pub fn qualify(keyspace: Option<&str>, name: &str) -> String {
    match keyspace {
        Some(ks) => format!("{}.{}", ks, name),
        None => name.to_string(),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SchemaChange {
    CreateType(Arc<UserType>),
    CreateTable(TableMetadata),
}

/// DDL text together with the definition it creates.
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaStatement {
    pub cql: String,
    pub change: SchemaChange,
}

impl SchemaStatement {
    pub fn create_type(user_type: Arc<UserType>) -> Self {
        let fields: Vec<String> = user_type.fields.iter().map(|(name, data_type)| format!("{} {}", name, data_type)).collect();
        let cql = format!("CREATE TYPE IF NOT EXISTS {} ({})", user_type.qualified_name(), fields.join(", "));
        SchemaStatement { cql, change: SchemaChange::CreateType(user_type) }
    }

    pub fn create_table(table: TableMetadata) -> Self {
        let mut cql = format!("CREATE TABLE IF NOT EXISTS {} (", table.qualified_name());
        for column in &table.columns {
            let _ = write!(cql, "{} {}", column.name, column.data_type);
            if column.kind == ColumnKind::Static {
                cql.push_str(" static");
            }
            cql.push_str(", ");
        }
        let partition: Vec<&str> = table.partition_keys().iter().map(|c| c.name.as_str()).collect();
        let clustering = table.clustering_columns();
        let partition_clause =
            if partition.len() == 1 { partition[0].to_string() } else { format!("({})", partition.join(", ")) };
        let mut key_parts = vec![partition_clause];
        key_parts.extend(clustering.iter().map(|(c, _)| c.name.clone()));
        let _ = write!(cql, "PRIMARY KEY ({}))", key_parts.join(", "));
        if !clustering.is_empty() {
            let orders: Vec<String> = clustering.iter().map(|(c, order)| format!("{} {}", c.name, order)).collect();
            let _ = write!(cql, " WITH CLUSTERING ORDER BY ({})", orders.join(", "));
        }
        SchemaStatement { cql, change: SchemaChange::CreateTable(table) }
    }
}

/// Every declared column must exist remotely with a matching type and key role.
/// Remote columns the mapping does not know about are only reported.
pub fn validate_table(declared: &TableMetadata, remote: &TableMetadata) -> Result<(), MappingError> {
    let target = declared.qualified_name();
    for column in &declared.columns {
        let live = remote
            .column(&column.name)
            .ok_or_else(|| MappingError::schema(&target, format!("column `{}` does not exist", column.name)))?;
        if !column.data_type.matches(&live.data_type) {
            return Err(MappingError::schema(
                &target,
                format!("column `{}` has type {}, mapping declares {}", column.name, live.data_type, column.data_type),
            ));
        }
        let role_matches = match (column.kind, live.kind) {
            (ColumnKind::PartitionKey(_), ColumnKind::PartitionKey(_)) => true,
            (ColumnKind::Clustering(..), ColumnKind::Clustering(..)) => true,
            (declared_kind, live_kind) => !declared_kind.is_primary_key() && !live_kind.is_primary_key(),
        };
        if !role_matches {
            return Err(MappingError::schema(
                &target,
                format!("column `{}` is {:?} remotely, mapping declares {:?}", column.name, live.kind, column.kind),
            ));
        }
    }
    for extra in remote.columns.iter().filter(|c| declared.column(&c.name).is_none()) {
        warn!("Table {} has unmapped column `{}` of type {}", target, extra.name, extra.data_type);
    }
    Ok(())
}

pub fn validate_type(declared: &UserType, remote: &UserType) -> Result<(), MappingError> {
    let target = declared.qualified_name();
    for (name, data_type) in &declared.fields {
        let live = remote
            .fields
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .ok_or_else(|| MappingError::schema(&target, format!("field `{}` does not exist", name)))?;
        if !data_type.matches(&live.1) {
            return Err(MappingError::schema(
                &target,
                format!("field `{}` has type {}, mapping declares {}", name, live.1, data_type),
            ));
        }
    }
    for (extra, _) in remote.fields.iter().filter(|(n, _)| declared.field_index(n).is_none()) {
        warn!("Type {} has unmapped field `{}`", target, extra);
    }
    Ok(())
}

/// Built structured type of an injected composite.
pub fn declared_user_type(meta: &dyn CompositeMeta) -> Result<Arc<UserType>, MappingError> {
    match meta.built_type() {
        Some(BuiltType::Udt(user_type)) => Ok(user_type),
        Some(BuiltType::Tuple(_)) => Err(MappingError::Custom(format!("{} is a tuple, not a structured type", meta.class_name()))),
        None => Err(MappingError::unbound(meta.class_name())),
    }
}

/// Structured types reachable from `roots`, deduplicated by class and ordered dependencies first.
/// Tuples are traversed but not collected.
pub fn collect_structured_types(roots: &[Arc<dyn CompositeMeta>]) -> Vec<Arc<dyn CompositeMeta>> {
    fn visit(meta: &Arc<dyn CompositeMeta>, seen: &mut HashSet<TypeId>, out: &mut Vec<Arc<dyn CompositeMeta>>) {
        if !seen.insert(meta.class_id()) {
            return;
        }
        for (_, shape) in meta.fields() {
            for child in shape.direct_composites() {
                visit(&child, seen, out);
            }
        }
        if let CompositeKind::Udt { .. } = meta.kind() {
            out.push(Arc::clone(meta));
        }
    }
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for root in roots {
        visit(root, &mut seen, &mut out);
    }
    out
}

pub struct UdtEntry {
    pub meta: Arc<dyn CompositeMeta>,
    /// Number of managed entities referencing the type, directly or through other structured types.
    pub usage: usize,
}

/// Structured types of every discovered entity, dependencies first.
#[derive(Default)]
pub struct UdtRegistry {
    entries: Vec<UdtEntry>,
}

impl UdtRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the structured types one entity references; only managed entities count as usage.
    /// An entry first seen through an unmanaged entity takes over the descriptor of the first managed
    /// one, since only managed trees get injected.
    pub fn register_entity(&mut self, roots: &[Arc<dyn CompositeMeta>], managed: bool) {
        for meta in collect_structured_types(roots) {
            match self.entries.iter_mut().find(|e| e.meta.class_id() == meta.class_id()) {
                Some(entry) if managed => {
                    if entry.usage == 0 {
                        entry.meta = meta;
                    }
                    entry.usage += 1;
                }
                Some(_) => {}
                None => self.entries.push(UdtEntry { meta, usage: usize::from(managed) }),
            }
        }
    }

    pub fn entries(&self) -> &[UdtEntry] {
        &self.entries
    }

    pub fn referenced(&self) -> impl Iterator<Item = &UdtEntry> {
        self.entries.iter().filter(|e| e.usage > 0)
    }

    pub fn usage_of(&self, class_id: TypeId) -> Option<usize> {
        self.entries.iter().find(|e| e.meta.class_id() == class_id).map(|e| e.usage)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{IntCodec, TextCodec};
    use crate::composite::{CompositeCodec, CompositeProperty};
    use crate::factory::{DefaultBeanFactory, Dependencies, ObjectMapper};
    use crate::property::{FieldInfo, Property};
    use crate::registry::CodecRegistry;
    use crate::wire::ProtocolVersion;

    #[derive(Debug, Default)]
    struct Point {
        x: i32,
    }

    #[derive(Debug, Default)]
    struct Label {
        text: String,
        anchor: Point,
    }

    #[derive(Debug, Default)]
    struct Anchored {
        label: Label,
        anchor: Point,
    }

    fn point() -> Arc<CompositeProperty<Point>> {
        CompositeProperty::udt(
            Some("ks"),
            "point",
            vec![Property::new(FieldInfo::field("x"), IntCodec, |p: &Point| &p.x, |p: &mut Point, v| p.x = v)],
            Point::default,
        )
    }

    fn label(point: &Arc<CompositeProperty<Point>>) -> Arc<CompositeProperty<Label>> {
        CompositeProperty::udt(
            Some("ks"),
            "label",
            vec![
                Property::new(FieldInfo::field("text"), TextCodec, |l: &Label| &l.text, |l: &mut Label, v| l.text = v),
                Property::new(
                    FieldInfo::field("anchor"),
                    CompositeCodec(Arc::clone(point)),
                    |l: &Label| &l.anchor,
                    |l: &mut Label, v| l.anchor = v,
                ),
            ],
            Label::default,
        )
    }

    fn anchored(point: &Arc<CompositeProperty<Point>>) -> Arc<CompositeProperty<Anchored>> {
        CompositeProperty::tuple(
            vec![
                Property::new(
                    FieldInfo::field("label"),
                    CompositeCodec(label(point)),
                    |a: &Anchored| &a.label,
                    |a: &mut Anchored, v| a.label = v,
                ),
                Property::new(
                    FieldInfo::field("anchor"),
                    CompositeCodec(Arc::clone(point)),
                    |a: &Anchored| &a.anchor,
                    |a: &mut Anchored, v| a.anchor = v,
                ),
            ],
            Anchored::default,
        )
    }

    fn table() -> TableMetadata {
        TableMetadata::new(
            Some("ks"),
            "events",
            vec![
                ColumnMetadata::new("bucket", DataType::Int, ColumnKind::PartitionKey(0)),
                ColumnMetadata::new("day", DataType::Date, ColumnKind::PartitionKey(1)),
                ColumnMetadata::new("at", DataType::Timestamp, ColumnKind::Clustering(0, ClusteringOrder::Desc)),
                ColumnMetadata::new("owner", DataType::Text, ColumnKind::Static),
                ColumnMetadata::new("place", DataType::udt(Some("ks"), "point"), ColumnKind::Normal),
            ],
        )
    }

    #[test]
    fn renders_create_table() {
        let statement = SchemaStatement::create_table(table());
        assert_eq!(
            statement.cql,
            "CREATE TABLE IF NOT EXISTS ks.events (bucket int, day date, at timestamp, owner text static, \
             place frozen<point>, PRIMARY KEY ((bucket, day), at)) WITH CLUSTERING ORDER BY (at DESC)"
        );

        let simple = TableMetadata::new(None, "users", vec![ColumnMetadata::new("id", DataType::Uuid, ColumnKind::PartitionKey(0))]);
        assert_eq!(SchemaStatement::create_table(simple).cql, "CREATE TABLE IF NOT EXISTS users (id uuid, PRIMARY KEY (id))");
    }

    #[test]
    fn renders_create_type() {
        let user_type = Arc::new(UserType {
            protocol_version: ProtocolVersion::V4,
            keyspace: Some("ks".into()),
            name: "point".into(),
            fields: vec![("x".into(), DataType::Int), ("tags".into(), DataType::set(DataType::Text))],
        });
        let statement = SchemaStatement::create_type(user_type);
        assert_eq!(statement.cql, "CREATE TYPE IF NOT EXISTS ks.point (x int, tags set<text>)");
    }

    #[test]
    fn validation_names_the_offending_column() {
        let declared = table();
        let mut remote = table();
        remote.columns.push(ColumnMetadata::new("legacy", DataType::Blob, ColumnKind::Normal));
        validate_table(&declared, &remote).unwrap();

        remote.columns[3].data_type = DataType::BigInt;
        match validate_table(&declared, &remote).unwrap_err() {
            MappingError::SchemaValidationFailure { target, reason } => {
                assert_eq!(target, "ks.events");
                assert!(reason.contains("owner"), "{reason}");
            }
            other => panic!("unexpected {other:?}"),
        }

        let mut remote = table();
        remote.columns.remove(2);
        assert!(validate_table(&declared, &remote).is_err());

        let mut remote = table();
        remote.columns[2].kind = ColumnKind::Normal;
        assert!(validate_table(&declared, &remote).is_err());
    }

    #[test]
    fn type_validation_compares_fields_by_name() {
        let declared = UserType {
            protocol_version: ProtocolVersion::V4,
            keyspace: None,
            name: "point".into(),
            fields: vec![("x".into(), DataType::Int)],
        };
        let mut remote = declared.clone();
        remote.keyspace = Some("ks".into());
        remote.fields.push(("z".into(), DataType::Int));
        validate_type(&declared, &remote).unwrap();

        remote.fields[0].1 = DataType::Text;
        assert!(validate_type(&declared, &remote).is_err());
    }

    #[test]
    fn structured_types_come_dependencies_first() {
        let point = point();
        let anchored = anchored(&point);
        let roots: Vec<Arc<dyn CompositeMeta>> = vec![anchored.clone()];
        let collected = collect_structured_types(&roots);
        let names: Vec<String> = collected
            .iter()
            .map(|m| match m.kind() {
                CompositeKind::Udt { name, .. } => name.clone(),
                CompositeKind::Tuple => "tuple".to_string(),
            })
            .collect();
        assert_eq!(names, vec!["point", "label"]);
    }

    #[test]
    fn registry_counts_managed_usage_only() {
        let point = point();
        let first: Vec<Arc<dyn CompositeMeta>> = vec![label(&point)];
        let second: Vec<Arc<dyn CompositeMeta>> = vec![point.clone()];
        let third: Vec<Arc<dyn CompositeMeta>> = vec![point.clone(), point.clone()];

        let mut registry = UdtRegistry::new();
        registry.register_entity(&first, false);
        registry.register_entity(&second, true);
        registry.register_entity(&third, true);

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.usage_of(TypeId::of::<Point>()), Some(2));
        assert_eq!(registry.usage_of(TypeId::of::<Label>()), Some(0));
        assert_eq!(registry.referenced().count(), 1);
    }

    #[test]
    fn managed_descriptor_replaces_an_unmanaged_one() {
        let unmanaged_point = point();
        let managed_point = point();
        let unmanaged: Vec<Arc<dyn CompositeMeta>> = vec![label(&unmanaged_point)];
        let managed: Vec<Arc<dyn CompositeMeta>> = vec![managed_point.clone()];
        let deps =
            Dependencies::new(ProtocolVersion::V4, Arc::new(CodecRegistry::new()), Arc::new(ObjectMapper::default()), Arc::new(DefaultBeanFactory));
        deps.inject_into(managed_point.as_ref()).unwrap();

        let mut registry = UdtRegistry::new();
        registry.register_entity(&unmanaged, false);
        registry.register_entity(&managed, true);
        registry.register_entity(&unmanaged, false);

        let referenced: Vec<&UdtEntry> = registry.referenced().collect();
        assert_eq!(referenced.len(), 1);
        assert_eq!(referenced[0].usage, 1);
        assert!(referenced[0].meta.is_bound());
        assert_eq!(declared_user_type(referenced[0].meta.as_ref()).unwrap().qualified_name(), "ks.point");
    }

    #[test]
    fn declared_type_requires_injection() {
        let point = point();
        assert!(matches!(declared_user_type(point.as_ref()), Err(MappingError::InjectionOrderViolation(_))));
        let deps =
            Dependencies::new(ProtocolVersion::V4, Arc::new(CodecRegistry::new()), Arc::new(ObjectMapper::default()), Arc::new(DefaultBeanFactory));
        deps.inject_into(point.as_ref()).unwrap();
        assert_eq!(declared_user_type(point.as_ref()).unwrap().qualified_name(), "ks.point");
    }
}

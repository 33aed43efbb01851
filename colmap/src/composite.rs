//! Tuple and structured (user defined) type properties, composed recursively from child properties.

use crate::carrier::Slot;
use crate::codec::{Codec, InsertStrategy};
use crate::error::MappingError;
use crate::factory::{new_instance, BeanFactory, Bindings, Injectable, ObjectMapper, TupleTypeFactory, UserTypeFactory};
use crate::property::{Property, Shape};
use crate::trace;
use crate::wire::{DataType, TupleType, UserType, WireValue};
use once_cell::sync::OnceCell;
use std::any::TypeId;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompositeKind {
    Tuple,
    Udt { keyspace: Option<String>, name: String },
}

/// Wire type built from the injected factory.
#[derive(Debug, Clone)]
pub enum BuiltType {
    Tuple(Arc<TupleType>),
    Udt(Arc<UserType>),
}

impl BuiltType {
    pub fn data_type(&self) -> DataType {
        match self {
            BuiltType::Tuple(t) => t.data_type(),
            BuiltType::Udt(u) => u.data_type(),
        }
    }
}

/// Type-erased view of a composite node, shared between the parents that embed it.
pub trait CompositeMeta: Injectable + Send + Sync {
    fn class_id(&self) -> TypeId;
    fn class_name(&self) -> &'static str;
    fn kind(&self) -> &CompositeKind;
    fn data_type(&self) -> DataType;
    /// Component names (column names for structured types, positions for tuples) and shapes in declared order.
    fn fields(&self) -> Vec<(String, Shape)>;
    fn is_bound(&self) -> bool;
    fn built_type(&self) -> Option<BuiltType>;
}

pub struct CompositeProperty<T> {
    class_name: &'static str,
    kind: CompositeKind,
    components: Vec<Property<T>>,
    ctor: fn() -> T,
    bindings: Bindings,
    built: OnceCell<BuiltType>,
}

impl<T: Send + 'static> CompositeProperty<T> {
    pub fn tuple(components: Vec<Property<T>>, ctor: fn() -> T) -> Arc<Self> {
        Arc::new(Self::new(CompositeKind::Tuple, components, ctor))
    }

    pub fn udt(keyspace: Option<&str>, name: &str, components: Vec<Property<T>>, ctor: fn() -> T) -> Arc<Self> {
        let kind = CompositeKind::Udt { keyspace: keyspace.map(str::to_string), name: name.to_string() };
        Arc::new(Self::new(kind, components, ctor))
    }

    fn new(kind: CompositeKind, components: Vec<Property<T>>, ctor: fn() -> T) -> Self {
        CompositeProperty {
            class_name: std::any::type_name::<T>(),
            kind,
            components,
            ctor,
            bindings: Bindings::default(),
            built: OnceCell::new(),
        }
    }

    pub fn components(&self) -> &[Property<T>] {
        &self.components
    }

    fn component_types(&self) -> Vec<DataType> {
        self.components.iter().map(|c| c.data_type()).collect()
    }

    fn bound_type(&self) -> Result<&BuiltType, MappingError> {
        match self.built.get() {
            Some(built) if self.bindings.is_complete() => Ok(built),
            _ => Err(MappingError::unbound(self.class_name)),
        }
    }

    pub fn encode(&self, value: &T, strategy: InsertStrategy) -> Result<WireValue, MappingError> {
        match self.bound_type()? {
            BuiltType::Tuple(tuple_type) => {
                let mut tuple = tuple_type.new_value();
                for (i, component) in self.components.iter().enumerate() {
                    component.encode_to_carrier(value, &mut tuple, Slot::Positional(i), strategy)?;
                }
                Ok(WireValue::Tuple(tuple))
            }
            BuiltType::Udt(user_type) => {
                let mut udt = user_type.new_value();
                for component in &self.components {
                    component.encode_to_carrier(value, &mut udt, Slot::Named(component.column()), strategy)?;
                }
                Ok(WireValue::Udt(udt))
            }
        }
    }

    pub fn decode(&self, wire: &WireValue) -> Result<T, MappingError> {
        let built = self.bound_type()?;
        match (built, wire) {
            (BuiltType::Tuple(expected), WireValue::Tuple(tuple)) if tuple.tuple_type.same_shape(expected) => {
                let mut out = self.instantiate()?;
                for (i, component) in self.components.iter().enumerate() {
                    component.decode_from_carrier(&mut out, tuple, Slot::Positional(i))?;
                }
                Ok(out)
            }
            (BuiltType::Udt(expected), WireValue::Udt(udt)) if udt.user_type.name.eq_ignore_ascii_case(&expected.name) => {
                let mut out = self.instantiate()?;
                for component in &self.components {
                    // fields added remotely after the value was written decode as absent
                    match udt.user_type.field_index(component.column()) {
                        Some(_) => component.decode_from_carrier(&mut out, udt, Slot::Named(component.column()))?,
                        None => component.decode_field(&mut out, &WireValue::Null)?,
                    }
                }
                Ok(out)
            }
            (built, other) => Err(MappingError::mismatch(built.data_type(), other.kind_name())),
        }
    }

    fn instantiate(&self) -> Result<T, MappingError> {
        new_instance(self.bindings.bean_factory(self.class_name)?, self.class_name, self.ctor)
    }

    /// Re-injection is a no-op and does not descend again.
    fn inject_children(&self, f: impl Fn(&Property<T>) -> Result<(), MappingError>) -> Result<(), MappingError> {
        self.components.iter().try_for_each(f)
    }
}

impl<T: Send + 'static> Injectable for CompositeProperty<T> {
    fn inject_tuple_factory(&self, factory: &Arc<TupleTypeFactory>) -> Result<(), MappingError> {
        if self.bindings.tuple_factory.get().is_some() {
            return Ok(());
        }
        self.inject_children(|c| c.inject_tuple_factory(factory))?;
        if self.kind == CompositeKind::Tuple {
            let _ = self.built.set(BuiltType::Tuple(factory.type_for(self.component_types())));
        }
        trace!("Tuple factory bound to {}", self.class_name);
        let _ = self.bindings.tuple_factory.set(Arc::clone(factory));
        Ok(())
    }

    fn inject_udt_factory(&self, factory: &Arc<UserTypeFactory>) -> Result<(), MappingError> {
        if self.bindings.udt_factory.get().is_some() {
            return Ok(());
        }
        self.inject_children(|c| c.inject_udt_factory(factory))?;
        if let CompositeKind::Udt { keyspace, name } = &self.kind {
            let fields = self.components.iter().map(|c| (c.column().to_string(), c.data_type())).collect();
            let _ = self.built.set(BuiltType::Udt(factory.type_for(keyspace.as_deref(), name, fields)));
        }
        trace!("Structured type factory bound to {}", self.class_name);
        let _ = self.bindings.udt_factory.set(Arc::clone(factory));
        Ok(())
    }

    fn inject_object_mapper(&self, mapper: &Arc<ObjectMapper>) -> Result<(), MappingError> {
        if self.bindings.object_mapper.get().is_some() {
            return Ok(());
        }
        self.inject_children(|c| c.inject_object_mapper(mapper))?;
        let _ = self.bindings.object_mapper.set(Arc::clone(mapper));
        Ok(())
    }

    fn inject_bean_factory(&self, factory: &Arc<dyn BeanFactory>) -> Result<(), MappingError> {
        if self.bindings.bean_factory.get().is_some() {
            return Ok(());
        }
        self.inject_children(|c| c.inject_bean_factory(factory))?;
        let _ = self.bindings.bean_factory.set(Arc::clone(factory));
        Ok(())
    }
}

impl<T: Send + 'static> CompositeMeta for CompositeProperty<T> {
    fn class_id(&self) -> TypeId {
        TypeId::of::<T>()
    }

    fn class_name(&self) -> &'static str {
        self.class_name
    }

    fn kind(&self) -> &CompositeKind {
        &self.kind
    }

    fn data_type(&self) -> DataType {
        match &self.kind {
            CompositeKind::Tuple => DataType::Tuple(self.component_types()),
            CompositeKind::Udt { keyspace, name } => DataType::udt(keyspace.as_deref(), name),
        }
    }

    fn fields(&self) -> Vec<(String, Shape)> {
        self.components.iter().map(|c| (c.column().to_string(), c.shape().clone())).collect()
    }

    fn is_bound(&self) -> bool {
        self.bindings.is_complete() && self.built.get().is_some()
    }

    fn built_type(&self) -> Option<BuiltType> {
        self.built.get().cloned()
    }
}

/// Uses a composite property as a field codec; nest with the collection codecs for lists of tuples.
pub struct CompositeCodec<T>(pub Arc<CompositeProperty<T>>);

impl<T> Clone for CompositeCodec<T> {
    fn clone(&self) -> Self {
        CompositeCodec(Arc::clone(&self.0))
    }
}

impl<T: Send + 'static> Codec for CompositeCodec<T> {
    type Value = T;

    fn shape(&self) -> Shape {
        let meta: Arc<dyn CompositeMeta> = self.0.clone();
        match self.0.kind {
            CompositeKind::Tuple => Shape::Tuple(meta),
            CompositeKind::Udt { .. } => Shape::Udt(meta),
        }
    }

    fn encode(&self, value: &T, strategy: InsertStrategy) -> Result<WireValue, MappingError> {
        self.0.encode(value, strategy)
    }

    fn decode(&self, wire: &WireValue) -> Result<T, MappingError> {
        self.0.decode(wire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{IntCodec, ListCodec, OptionalCodec, TextCodec};
    use crate::factory::{DefaultBeanFactory, Dependencies};
    use crate::property::FieldInfo;
    use crate::registry::CodecRegistry;
    use crate::wire::ProtocolVersion;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::any::Any;

    #[derive(Debug, Default, Clone, PartialEq)]
    struct Point {
        x: i32,
        y: i32,
    }

    #[derive(Debug, Default, Clone, PartialEq)]
    struct Segment {
        label: Option<String>,
        from: Point,
        to: Point,
    }

    #[derive(Debug, Default, Clone, PartialEq)]
    struct Pair {
        left: i32,
        right: Option<String>,
    }

    fn point() -> Arc<CompositeProperty<Point>> {
        CompositeProperty::udt(
            Some("geo"),
            "point",
            vec![
                Property::new(FieldInfo::field("x"), IntCodec, |p: &Point| &p.x, |p: &mut Point, v| p.x = v),
                Property::new(FieldInfo::field("y"), IntCodec, |p: &Point| &p.y, |p: &mut Point, v| p.y = v),
            ],
            Point::default,
        )
    }

    fn segment(point: &Arc<CompositeProperty<Point>>) -> Arc<CompositeProperty<Segment>> {
        CompositeProperty::udt(
            Some("geo"),
            "segment",
            vec![
                Property::new(
                    FieldInfo::field("label"),
                    OptionalCodec(TextCodec),
                    |s: &Segment| &s.label,
                    |s: &mut Segment, v| s.label = v,
                ),
                Property::new(
                    FieldInfo::new("from", "start"),
                    CompositeCodec(Arc::clone(point)),
                    |s: &Segment| &s.from,
                    |s: &mut Segment, v| s.from = v,
                ),
                Property::new(
                    FieldInfo::new("to", "end"),
                    CompositeCodec(Arc::clone(point)),
                    |s: &Segment| &s.to,
                    |s: &mut Segment, v| s.to = v,
                ),
            ],
            Segment::default,
        )
    }

    fn pair() -> Arc<CompositeProperty<Pair>> {
        CompositeProperty::tuple(
            vec![
                Property::new(FieldInfo::field("left"), IntCodec, |p: &Pair| &p.left, |p: &mut Pair, v| p.left = v),
                Property::new(
                    FieldInfo::field("right"),
                    OptionalCodec(TextCodec),
                    |p: &Pair| &p.right,
                    |p: &mut Pair, v| p.right = v,
                ),
            ],
            Pair::default,
        )
    }

    struct CountingBeanFactory(AtomicUsize);

    impl BeanFactory for CountingBeanFactory {
        fn instantiate(&self, _class: &str, ctor: &dyn Fn() -> Box<dyn Any + Send>) -> Result<Box<dyn Any + Send>, MappingError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(ctor())
        }
    }

    fn deps_with(bean_factory: Arc<dyn BeanFactory>) -> Dependencies {
        Dependencies::new(ProtocolVersion::V4, Arc::new(CodecRegistry::new()), Arc::new(ObjectMapper::default()), bean_factory)
    }

    fn deps() -> Dependencies {
        deps_with(Arc::new(DefaultBeanFactory))
    }

    #[test]
    fn unbound_composites_refuse_to_encode() {
        let point = point();
        let err = point.encode(&Point::default(), InsertStrategy::AllFields).unwrap_err();
        assert!(matches!(err, MappingError::InjectionOrderViolation(_)));

        let deps = deps();
        point.inject_tuple_factory(&deps.tuple_factory).unwrap();
        point.inject_udt_factory(&deps.udt_factory).unwrap();
        // bean factory still missing
        assert!(!point.is_bound());
        assert!(point.encode(&Point::default(), InsertStrategy::AllFields).is_err());
    }

    #[test]
    fn nested_structured_types_roundtrip() {
        let point = point();
        let segment = segment(&point);
        deps().inject_into(segment.as_ref()).unwrap();
        assert!(point.is_bound());

        let value = Segment { label: Some("diagonal".into()), from: Point { x: 0, y: 0 }, to: Point { x: 3, y: 4 } };
        let wire = segment.encode(&value, InsertStrategy::AllFields).unwrap();
        match &wire {
            WireValue::Udt(udt) => {
                assert_eq!(udt.user_type.qualified_name(), "geo.segment");
                assert_eq!(udt.user_type.fields[1], ("start".to_string(), DataType::udt(Some("geo"), "point")));
            }
            other => panic!("expected udt, got {other:?}"),
        }
        assert_eq!(segment.decode(&wire).unwrap(), value);
    }

    #[test]
    fn shared_child_is_injected_once() {
        let counter = Arc::new(CountingBeanFactory(AtomicUsize::new(0)));
        let point = point();
        let segment = segment(&point);
        let deps = deps_with(counter.clone());
        deps.inject_into(segment.as_ref()).unwrap();
        // reached through both segment fields and once more directly
        deps.inject_into(point.as_ref()).unwrap();

        let built = point.built_type().unwrap();
        let first = match built {
            BuiltType::Udt(u) => u,
            _ => panic!("point is a structured type"),
        };
        deps.inject_into(segment.as_ref()).unwrap();
        match point.built_type().unwrap() {
            BuiltType::Udt(u) => assert!(Arc::ptr_eq(&u, &first)),
            _ => unreachable!(),
        }

        let wire = segment.encode(&Segment::default(), InsertStrategy::AllFields).unwrap();
        segment.decode(&wire).unwrap();
        assert_eq!(counter.0.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn tuples_distinguish_null_from_unset() {
        let pair = pair();
        deps().inject_into(pair.as_ref()).unwrap();
        let value = Pair { left: 1, right: None };

        let all = pair.encode(&value, InsertStrategy::AllFields).unwrap();
        let not_null = pair.encode(&value, InsertStrategy::NotNullFields).unwrap();
        match (&all, &not_null) {
            (WireValue::Tuple(a), WireValue::Tuple(b)) => {
                assert_eq!(a.values, vec![Some(WireValue::Int(1)), Some(WireValue::Null)]);
                assert_eq!(b.values, vec![Some(WireValue::Int(1)), None]);
            }
            _ => panic!("expected tuples"),
        }
        assert_eq!(pair.decode(&all).unwrap(), value);
        assert_eq!(pair.decode(&not_null).unwrap(), value);
        assert_eq!(pair.data_type().to_string(), "frozen<tuple<int, text>>");
    }

    #[test]
    fn decode_rejects_foreign_types() {
        let pair = pair();
        let point = point();
        let deps = deps();
        deps.inject_into(pair.as_ref()).unwrap();
        deps.inject_into(point.as_ref()).unwrap();

        let wire = point.encode(&Point { x: 1, y: 2 }, InsertStrategy::AllFields).unwrap();
        assert!(matches!(pair.decode(&wire), Err(MappingError::CodecMismatch { .. })));
        assert!(matches!(point.decode(&WireValue::Int(1)), Err(MappingError::CodecMismatch { .. })));

        let other_tuple = deps.tuple_factory.type_for(vec![DataType::Int]).new_value();
        assert!(pair.decode(&WireValue::Tuple(other_tuple)).is_err());
    }

    #[test]
    fn collections_of_structured_values() {
        let point = point();
        let codec = ListCodec(CompositeCodec(Arc::clone(&point)));
        deps().inject_into(point.as_ref()).unwrap();
        assert_eq!(codec.data_type().to_string(), "list<frozen<point>>");

        let points = vec![Point { x: 1, y: 1 }, Point { x: 2, y: 3 }];
        let wire = codec.encode(&points, InsertStrategy::AllFields).unwrap();
        assert_eq!(codec.decode(&wire).unwrap(), points);
        assert_eq!(codec.shape().direct_composites().len(), 1);
    }
}

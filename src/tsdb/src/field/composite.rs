use std::any::Any;
use std::collections::HashSet;
use std::fmt::{Debug, Formatter};

use dyn_clone::DynClone;

use crate::codec::{CodecReader, CodecWriter};
use crate::error::SeriesError;
use crate::field::layout::FieldLayout;
use crate::field::state::StateStore;
use crate::field::{DefaultField, Field, FieldKind, FieldNode};

const STRUCT_FIELD_VERSION: u32 = 1;

/// MemberCodec is a field of `T` together with the accessors that move its value in and
/// out of the record.
pub trait MemberCodec<T>: FieldNode + DynClone {
    fn serialize_member(
        &self,
        item: &T,
        w: &mut CodecWriter,
        state: &mut StateStore,
    ) -> anyhow::Result<()>;

    fn deserialize_member(
        &self,
        item: &mut T,
        r: &mut CodecReader,
        state: &mut StateStore,
    ) -> anyhow::Result<()>;

    fn node_mut(&mut self) -> &mut dyn FieldNode;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

dyn_clone::clone_trait_object!(<T> MemberCodec<T>);

pub struct Member<T, V> {
    field: Box<dyn Field<V>>,
    get: fn(&T) -> V,
    set: fn(&mut T, V),
}

impl<T, V> Clone for Member<T, V> {
    fn clone(&self) -> Self {
        Self {
            field: self.field.clone(),
            get: self.get,
            set: self.set,
        }
    }
}

impl<T, V> Debug for Member<T, V> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Member").field("field", &self.field).finish()
    }
}

impl<T, V> FieldNode for Member<T, V> {
    fn name(&self) -> &str {
        self.field.name()
    }

    fn kind(&self) -> FieldKind {
        self.field.kind()
    }

    fn max_encoded_size(&self) -> usize {
        self.field.max_encoded_size()
    }

    fn validate(&self) -> anyhow::Result<()> {
        self.field.validate()
    }

    fn layout(&self) -> FieldLayout {
        self.field.layout()
    }

    fn restore(&mut self, layout: &FieldLayout) -> anyhow::Result<()> {
        self.field.restore(layout)
    }

    fn set_multiplier(&mut self, multiplier: i64) -> anyhow::Result<()> {
        self.field.set_multiplier(multiplier)
    }

    fn set_delta_type(&mut self, delta_type: crate::field::DeltaType) -> anyhow::Result<()> {
        self.field.set_delta_type(delta_type)
    }

    fn set_state_name(&mut self, state_name: &str) -> anyhow::Result<()> {
        self.field.set_state_name(state_name)
    }

    fn prefix_state_names(&mut self, prefix: &str) {
        self.field.prefix_state_names(prefix)
    }

    fn member_mut(&mut self, path: &str) -> Option<&mut dyn FieldNode> {
        self.field.member_mut(path)
    }
}

impl<T: 'static, V: 'static> MemberCodec<T> for Member<T, V> {
    fn serialize_member(
        &self,
        item: &T,
        w: &mut CodecWriter,
        state: &mut StateStore,
    ) -> anyhow::Result<()> {
        let v = (self.get)(item);
        self.field.serialize(&v, w, state)
    }

    fn deserialize_member(
        &self,
        item: &mut T,
        r: &mut CodecReader,
        state: &mut StateStore,
    ) -> anyhow::Result<()> {
        let v = self.field.deserialize(r, state)?;
        (self.set)(item, v);
        Ok(())
    }

    fn node_mut(&mut self) -> &mut dyn FieldNode {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// StructField encodes a record by encoding each member in declaration order. Decoding
/// starts from `T::default()` and assigns every member.
pub struct StructField<T> {
    name: String,
    type_name: String,
    version: u32,
    members: Vec<Box<dyn MemberCodec<T>>>,
}

impl<T> Clone for StructField<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            type_name: self.type_name.clone(),
            version: self.version,
            members: self.members.clone(),
        }
    }
}

impl<T> Debug for StructField<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StructField")
            .field("name", &self.name)
            .field("type_name", &self.type_name)
            .field("members", &self.members)
            .finish()
    }
}

impl<T: Default + 'static> StructField<T> {
    pub fn new(name: &str, type_name: &str) -> Self {
        Self {
            name: name.to_string(),
            type_name: type_name.to_string(),
            version: STRUCT_FIELD_VERSION,
            members: vec![],
        }
    }

    /// member adds a member encoded by the default codec of its type.
    pub fn member<V: DefaultField>(self, name: &str, get: fn(&T) -> V, set: fn(&mut T, V)) -> Self {
        self.member_with(V::default_field(name), get, set)
    }

    /// member_with adds a member encoded by `field`.
    pub fn member_with<V: 'static>(
        mut self,
        field: Box<dyn Field<V>>,
        get: fn(&T) -> V,
        set: fn(&mut T, V),
    ) -> Self {
        self.members.push(Box::new(Member { field, get, set }));
        self
    }

    /// renamed returns the same tree under another name, used when a record is nested
    /// inside another record. State names of the tree are prefixed with `name`.
    pub fn renamed(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self.prefix_state_names(name);
        self
    }

    pub fn type_name(&self) -> &str {
        self.type_name.as_str()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn member_names(&self) -> Vec<&str> {
        self.members.iter().map(|m| m.name()).collect()
    }

    /// replace_field swaps the codec of the member `name`. The new codec must encode the
    /// member's value type.
    pub fn replace_field<V: 'static>(
        &mut self,
        name: &str,
        field: Box<dyn Field<V>>,
    ) -> anyhow::Result<()> {
        if field.name() != name {
            return Err(SeriesError::serializer(
                name,
                format!("replacement field is named {}", field.name()),
            )
            .into());
        }

        let member = match self.members.iter_mut().find(|m| m.name() == name) {
            Some(member) => member,
            None => return Err(anyhow!("{} has no member {}", self.name, name)),
        };

        match member.as_any_mut().downcast_mut::<Member<T, V>>() {
            Some(m) => {
                m.field = field;
                Ok(())
            }
            None => Err(SeriesError::serializer(
                name,
                format!(
                    "replacement field type {} does not match the member type",
                    std::any::type_name::<V>()
                ),
            )
            .into()),
        }
    }
}

impl<T: Default + 'static> FieldNode for StructField<T> {
    fn name(&self) -> &str {
        self.name.as_str()
    }

    fn kind(&self) -> FieldKind {
        FieldKind::Struct
    }

    fn max_encoded_size(&self) -> usize {
        self.members.iter().map(|m| m.max_encoded_size()).sum()
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.name.is_empty() {
            return Err(SeriesError::serializer(&self.type_name, "field name is empty").into());
        }
        if self.members.is_empty() {
            return Err(SeriesError::serializer(&self.name, "struct has no members").into());
        }

        let mut names = HashSet::with_capacity(self.members.len());
        for m in &self.members {
            if !names.insert(m.name()) {
                return Err(SeriesError::serializer(
                    &self.name,
                    format!("duplicate member {}", m.name()),
                )
                .into());
            }
            m.validate()?;
        }
        Ok(())
    }

    fn layout(&self) -> FieldLayout {
        let mut layout =
            FieldLayout::new(FieldKind::Struct, &self.name, &self.type_name, self.version);
        layout.children = self.members.iter().map(|m| m.layout()).collect();
        layout
    }

    fn restore(&mut self, layout: &FieldLayout) -> anyhow::Result<()> {
        if layout.kind != FieldKind::Struct
            || layout.name != self.name
            || layout.type_name != self.type_name
        {
            return Err(anyhow!(
                "struct {}:{} does not match stored {:?} field {}:{}",
                self.name,
                self.type_name,
                layout.kind,
                layout.name,
                layout.type_name
            ));
        }
        if layout.version > STRUCT_FIELD_VERSION {
            return Err(anyhow!(
                "struct {} has unsupported version {}",
                self.name,
                layout.version
            ));
        }
        if layout.children.len() != self.members.len() {
            return Err(anyhow!(
                "struct {} has {} members, stored layout has {}",
                self.name,
                self.members.len(),
                layout.children.len()
            ));
        }

        for (m, child) in self.members.iter_mut().zip(layout.children.iter()) {
            m.restore(child)?;
        }
        self.version = layout.version;
        Ok(())
    }

    fn prefix_state_names(&mut self, prefix: &str) {
        for m in self.members.iter_mut() {
            m.prefix_state_names(prefix);
        }
    }

    fn member_mut(&mut self, path: &str) -> Option<&mut dyn FieldNode> {
        let (head, rest) = match path.split_once('.') {
            Some((head, rest)) => (head, Some(rest)),
            None => (path, None),
        };

        let member = self.members.iter_mut().find(|m| m.name() == head)?;
        match rest {
            Some(rest) => member.node_mut().member_mut(rest),
            None => Some(member.node_mut()),
        }
    }
}

impl<T: Default + 'static> Field<T> for StructField<T> {
    fn serialize(
        &self,
        value: &T,
        w: &mut CodecWriter,
        state: &mut StateStore,
    ) -> anyhow::Result<()> {
        for m in &self.members {
            m.serialize_member(value, w, state)?;
        }
        Ok(())
    }

    fn deserialize(&self, r: &mut CodecReader, state: &mut StateStore) -> anyhow::Result<T> {
        let mut item = T::default();
        for m in &self.members {
            m.deserialize_member(&mut item, r, state)?;
        }
        Ok(item)
    }
}

#[cfg(test)]
mod tests {
    use crate::codec::{CodecReader, CodecWriter};
    use crate::error::{ErrorKind, SeriesError};
    use crate::field::state::StateStore;
    use crate::field::{
        DefaultField, DeltaType, Field, FieldKind, FieldNode, IncrementalField, RecordFields,
        ScalarField, StructField,
    };

    #[derive(Debug, Default, Clone, Copy, PartialEq)]
    struct Bar {
        time: i64,
        open: f64,
        close: f64,
    }

    crate::fixed_record!(Bar { time: i64, open: f64, close: f64 });

    #[derive(Debug, Default, Clone, Copy, PartialEq)]
    struct Sample {
        seq: u32,
        bar: Bar,
    }

    crate::fixed_record!(Sample { seq: u32, bar: Bar });

    fn round_trip<T: Default + 'static>(field: &StructField<T>, items: &[T]) -> (Vec<u8>, Vec<T>) {
        let mut buf = vec![];
        let mut state = StateStore::new();
        {
            let mut w = CodecWriter::new(&mut buf);
            for item in items {
                field.serialize(item, &mut w, &mut state).unwrap();
            }
        }

        let mut state = StateStore::new();
        let mut r = CodecReader::new(&buf);
        let out = (0..items.len())
            .map(|_| field.deserialize(&mut r, &mut state).unwrap())
            .collect();
        assert!(r.is_empty());
        (buf, out)
    }

    fn bars() -> Vec<Bar> {
        (0..100)
            .map(|i| Bar {
                time: 1_600_000_000 + i * 60,
                open: (10_000 + i) as f64 / 100.0,
                close: (10_050 - i) as f64 / 100.0,
            })
            .collect()
    }

    #[test]
    fn test_default_tree() {
        let fields = Sample::record_fields();
        fields.validate().unwrap();
        assert_eq!(fields.member_names(), vec!["seq", "bar"]);
        assert_eq!(fields.type_name(), "Sample");

        let layout = fields.layout();
        assert_eq!(layout.children[0].kind, FieldKind::Delta);
        assert_eq!(layout.children[1].kind, FieldKind::Struct);
        assert_eq!(layout.children[1].name, "bar");
        assert_eq!(layout.children[1].type_name, "Bar");
        assert_eq!(layout.children[1].children[1].kind, FieldKind::Raw);

        let items = bars()
            .into_iter()
            .enumerate()
            .map(|(i, bar)| Sample { seq: i as u32, bar })
            .collect::<Vec<_>>();
        let (_, out) = round_trip(&fields, &items);
        assert_eq!(out, items);
    }

    #[test]
    fn test_configured_tree_is_smaller() {
        let items = bars();
        let (plain, _) = round_trip(&Bar::record_fields(), &items);

        let mut fields = Bar::record_fields();
        fields.member_mut("open").unwrap().set_multiplier(100).unwrap();
        fields.member_mut("close").unwrap().set_multiplier(100).unwrap();
        fields
            .member_mut("time")
            .unwrap()
            .set_delta_type(DeltaType::Positive)
            .unwrap();
        let (packed, out) = round_trip(&fields, &items);

        assert_eq!(out, items);
        assert!(packed.len() < plain.len() / 3, "{} {}", packed.len(), plain.len());
    }

    fn coupled(fields: &mut StructField<Bar>) {
        fields.member_mut("open").unwrap().set_multiplier(100).unwrap();
        let close = fields.member_mut("close").unwrap();
        close.set_multiplier(100).unwrap();
        close.set_state_name("open").unwrap();
    }

    #[test]
    fn test_shared_state() {
        let items = [
            Bar {
                time: 100,
                open: 10.00,
                close: 10.05,
            },
            Bar {
                time: 160,
                open: 10.01,
                close: 10.04,
            },
        ];

        // close is written against open of the same record, open against the previous close
        let mut fields = Bar::record_fields();
        coupled(&mut fields);
        let (b, out) = round_trip(&fields, &items);
        assert_eq!(out, items.to_vec());
        assert_eq!(b, vec![0xC8, 0x01, 0xD0, 0x0F, 0x0A, 0x78, 0x07, 0x06]);

        // the chain follows member order: close now starts it and open follows
        let mut swapped = StructField::<Bar>::new("Bar", "Bar")
            .member("time", |b: &Bar| b.time, |b: &mut Bar, v| b.time = v)
            .member("close", |b: &Bar| b.close, |b: &mut Bar, v| b.close = v)
            .member("open", |b: &Bar| b.open, |b: &mut Bar, v| b.open = v);
        coupled(&mut swapped);
        let (b, out) = round_trip(&swapped, &items);
        assert_eq!(out, items.to_vec());
        assert_eq!(b, vec![0xC8, 0x01, 0xDA, 0x0F, 0x09, 0x78, 0x08, 0x05]);

        let items = bars();
        let (_, out) = round_trip(&fields, &items);
        assert_eq!(out, items);
    }

    #[derive(Debug, Default, Clone, Copy, PartialEq)]
    struct Stamped {
        time: i64,
        bar: Bar,
    }

    crate::fixed_record!(Stamped { time: i64, bar: Bar });

    #[test]
    fn test_nested_state_names() {
        let mut fields = Stamped::record_fields();
        let layout = fields.layout();
        assert_eq!(layout.children[0].state_name, "time");
        assert_eq!(layout.children[1].children[0].state_name, "bar.time");
        assert_eq!(layout.children[1].children[2].state_name, "bar.close");

        let outer = Stamped::default_field("stamped").layout();
        assert_eq!(outer.children[0].state_name, "stamped.time");
        assert_eq!(outer.children[1].children[0].state_name, "stamped.bar.time");

        // the outer time only grows, the nested one lives in another range
        fields
            .member_mut("time")
            .unwrap()
            .set_delta_type(DeltaType::Positive)
            .unwrap();
        let items = bars()
            .into_iter()
            .enumerate()
            .map(|(i, bar)| Stamped {
                time: i as i64,
                bar,
            })
            .collect::<Vec<_>>();
        let (_, out) = round_trip(&fields, &items);
        assert_eq!(out, items);

        // explicitly coupled they fail the growth check
        fields.member_mut("time").unwrap().set_state_name("bar.time").unwrap();
        let mut buf = vec![];
        let mut state = StateStore::new();
        let mut w = CodecWriter::new(&mut buf);
        fields.serialize(&items[0], &mut w, &mut state).unwrap();
        let err = fields.serialize(&items[1], &mut w, &mut state).unwrap_err();
        assert_eq!(SeriesError::kind_of(&err), Some(ErrorKind::Ordering));
    }

    #[test]
    fn test_nested_path() {
        let mut fields = Sample::record_fields();
        fields
            .member_mut("bar.open")
            .unwrap()
            .set_multiplier(1000)
            .unwrap();
        assert!(fields.member_mut("bar.volume").is_none());
        assert!(fields.member_mut("seq.x").is_none());

        let layout = fields.layout();
        assert_eq!(layout.children[1].children[1].multiplier, 1000);
        assert_eq!(layout.children[1].children[1].kind, FieldKind::Delta);
    }

    #[test]
    fn test_replace_field() {
        let mut fields = Sample::record_fields();
        fields
            .replace_field("seq", Box::new(IncrementalField::<u32>::new("seq")))
            .unwrap();
        assert_eq!(fields.layout().children[0].kind, FieldKind::Incremental);

        let err = fields
            .replace_field("seq", Box::new(ScalarField::<i64>::delta("seq")))
            .unwrap_err();
        assert_eq!(SeriesError::kind_of(&err), Some(ErrorKind::Configuration));
        assert!(fields
            .replace_field("nope", Box::new(ScalarField::<u32>::delta("nope")))
            .is_err());
    }

    #[test]
    fn test_duplicate_member() {
        let fields = StructField::<Bar>::new("Bar", "Bar")
            .member("time", |b: &Bar| b.time, |b: &mut Bar, v| b.time = v)
            .member("time", |b: &Bar| b.open, |b: &mut Bar, v| b.open = v);
        let err = fields.validate().unwrap_err();
        assert_eq!(SeriesError::kind_of(&err), Some(ErrorKind::Configuration));
    }

    #[test]
    fn test_restore() {
        let mut stored = Bar::record_fields();
        stored.member_mut("open").unwrap().set_multiplier(10).unwrap();
        let layout = stored.layout();

        let mut fields = Bar::record_fields();
        fields.restore(&layout).unwrap();
        assert_eq!(fields.layout(), layout);

        let mut other = Sample::record_fields();
        assert!(other.restore(&layout).is_err());
    }
}
